use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "code-judge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Address the HTTP server binds to
    #[arg(long)]
    pub bind_address: Option<String>,

    /// Port the HTTP server binds to
    #[arg(long, short = 'p')]
    pub bind_port: Option<u16>,

    /// Directory holding the per-job source, input and output files
    #[arg(long)]
    pub artifact_root: Option<PathBuf>,

    /// Maximum number of jobs compiling or running at the same time
    #[arg(long)]
    pub max_jobs: Option<usize>,
}

impl CliArgs {
    /// Load the configuration from the specified file, then apply CLI overrides
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader::<_, Config>(reader)?
            }
            None => Config::default(),
        };

        if let Some(address) = &self.bind_address {
            config.server.bind_address = address.clone();
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = port;
        }
        if let Some(root) = &self.artifact_root {
            config.judge.artifact_root = Some(root.clone());
        }
        if let Some(max_jobs) = self.max_jobs {
            if max_jobs == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "the number of concurrent jobs must not be 0",
                ));
            }
            config.judge.max_concurrent_jobs = max_jobs;
        }
        if config.languages.is_empty() {
            config.languages = LanguageConfig::builtin();
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub judge: JudgeConfig,
    pub languages: Vec<LanguageConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub bind_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 12345,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct JudgeConfig {
    pub run_timeout_ms: Millisecond,
    pub compile_timeout_ms: Millisecond,
    pub cleanup_delay_ms: Millisecond,
    pub max_concurrent_jobs: usize,
    pub output_limit_kb: u64,
    pub artifact_root: Option<PathBuf>,
    pub launcher: LauncherKind,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            run_timeout_ms: Millisecond(2000),
            compile_timeout_ms: Millisecond(10000),
            cleanup_delay_ms: Millisecond(1000),
            max_concurrent_jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            output_limit_kb: 65536,
            artifact_root: None,
            launcher: LauncherKind::Auto,
        }
    }
}

impl JudgeConfig {
    /// Resolves the artifact root, defaulting to the per-user cache directory
    pub fn artifact_root(&self) -> PathBuf {
        use directories::ProjectDirs;

        if let Some(root) = &self.artifact_root {
            return root.clone();
        }

        match ProjectDirs::from("", "", "code-judge") {
            Some(proj_dirs) => proj_dirs.cache_dir().join("artifacts"),
            None => {
                log::warn!("Unable to find user directory, using the system temp dir");
                std::env::temp_dir().join("code-judge")
            }
        }
    }

    pub fn output_limit_bytes(&self) -> usize {
        usize::try_from(self.output_limit_kb.saturating_mul(1024)).unwrap_or(usize::MAX)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Millisecond(pub u64);

impl From<Millisecond> for std::time::Duration {
    fn from(value: Millisecond) -> Self {
        std::time::Duration::from_millis(value.0)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    Auto,
    ProcessGroup,
    Native,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LanguageConfig {
    pub name: String,
    /// File extension of the source file, without the dot
    pub extension: String,
    /// Compile command template; languages without one are run from source
    pub compile: Option<Vec<String>>,
    /// Run command template
    pub run: Vec<String>,
}

impl LanguageConfig {
    pub fn needs_compilation(&self) -> bool {
        self.compile.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Languages available when the configuration file lists none
    pub fn builtin() -> Vec<LanguageConfig> {
        fn argv(parts: &[&str]) -> Vec<String> {
            parts.iter().map(|s| s.to_string()).collect()
        }

        vec![
            LanguageConfig {
                name: "cpp".to_string(),
                extension: "cpp".to_string(),
                compile: Some(argv(&["g++", "-O2", "-std=c++17", "-o", "%OUTPUT%", "%INPUT%"])),
                run: argv(&["%OUTPUT%"]),
            },
            LanguageConfig {
                name: "c".to_string(),
                extension: "c".to_string(),
                compile: Some(argv(&["gcc", "-O2", "-o", "%OUTPUT%", "%INPUT%", "-lm"])),
                run: argv(&["%OUTPUT%"]),
            },
            LanguageConfig {
                name: "rust".to_string(),
                extension: "rs".to_string(),
                compile: Some(argv(&["rustc", "-O", "-o", "%OUTPUT%", "%INPUT%"])),
                run: argv(&["%OUTPUT%"]),
            },
            LanguageConfig {
                name: "python".to_string(),
                extension: "py".to_string(),
                compile: None,
                run: argv(&["python3", "%INPUT%"]),
            },
            LanguageConfig {
                name: "javascript".to_string(),
                extension: "js".to_string(),
                compile: None,
                run: argv(&["node", "%INPUT%"]),
            },
        ]
    }
}
