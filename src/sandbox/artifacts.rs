use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

const SOURCES_DIR: &str = "sources";
const INPUTS_DIR: &str = "inputs";
const OUTPUTS_DIR: &str = "outputs";

/// Paths handed out for a freshly allocated job
#[derive(Debug, Clone)]
pub struct JobArtifacts {
    pub id: String,
    pub source: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl JobArtifacts {
    pub fn paths(&self) -> Vec<PathBuf> {
        vec![self.source.clone(), self.input.clone(), self.output.clone()]
    }
}

/// On-disk home of every job's source, input and compiled output
///
/// The three directories are created once when the store is opened. After
/// that only files inside them come and go, each named after a random job id,
/// so concurrent jobs never touch each other's files.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    sources_dir: PathBuf,
    inputs_dir: PathBuf,
    outputs_dir: PathBuf,
}

impl ArtifactStore {
    /// Opens the store under `root`, creating its directories if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let sources_dir = root.join(SOURCES_DIR);
        let inputs_dir = root.join(INPUTS_DIR);
        let outputs_dir = root.join(OUTPUTS_DIR);

        for dir in [&sources_dir, &inputs_dir, &outputs_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create artifact dir {}", dir.display()))?;
        }

        log::info!("Artifact store ready at {}", root.display());
        Ok(Self {
            root,
            sources_dir,
            inputs_dir,
            outputs_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserves a fresh job id and derives its artifact paths
    ///
    /// Nothing is written to disk here.
    pub fn allocate(&self, extension: &str) -> JobArtifacts {
        let id = Uuid::new_v4().simple().to_string();
        let source = self.sources_dir.join(format!("{id}.{extension}"));
        let input = self.inputs_dir.join(format!("{id}.txt"));
        let output = self.output_path_for(&source);

        JobArtifacts {
            id,
            source,
            input,
            output,
        }
    }

    /// Writes the whole buffer before returning
    pub fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(path, bytes)
    }

    /// Compiled output path sharing the source file's job id
    pub fn output_path_for(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = if cfg!(windows) {
            format!("{stem}.exe")
        } else {
            stem
        };
        self.outputs_dir.join(file_name)
    }

    /// Removes a file, returning whether it existed
    ///
    /// A missing file is not an error.
    pub fn remove(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
