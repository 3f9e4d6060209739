#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use code_judge::config::{JudgeConfig, LanguageConfig, LauncherKind, Millisecond};
use code_judge::job::VerdictKind;
use code_judge::judge::Judge;
use code_judge::sandbox::{ArtifactStore, create_launcher};

// Languages built on /bin/sh so the tests do not depend on installed compilers
fn create_test_languages() -> Vec<LanguageConfig> {
    let mut languages = vec![
        LanguageConfig {
            name: "sh".to_string(),
            extension: "sh".to_string(),
            compile: None,
            run: vec!["sh".to_string(), "%INPUT%".to_string()],
        },
        LanguageConfig {
            name: "compiled-sh".to_string(),
            extension: "sh".to_string(),
            compile: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "sh -n %INPUT% && cp %INPUT% %OUTPUT% && chmod +x %OUTPUT%".to_string(),
            ]),
            run: vec!["%OUTPUT%".to_string()],
        },
        LanguageConfig {
            name: "slow-compiled-sh".to_string(),
            extension: "sh".to_string(),
            compile: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "sleep 1 && cp %INPUT% %OUTPUT% && chmod +x %OUTPUT%".to_string(),
            ]),
            run: vec!["%OUTPUT%".to_string()],
        },
    ];
    languages.extend(LanguageConfig::builtin());
    languages
}

// Helper function to create a judge over an isolated artifact root
fn create_test_judge(run_timeout_ms: u64) -> (tempfile::TempDir, Judge) {
    let dir = tempfile::tempdir().unwrap();
    let config = JudgeConfig {
        run_timeout_ms: Millisecond(run_timeout_ms),
        // Long enough that only an explicit flush removes anything
        cleanup_delay_ms: Millisecond(3_600_000),
        max_concurrent_jobs: 4,
        artifact_root: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
    let judge = Judge::new(
        &config,
        create_test_languages(),
        store,
        create_launcher(LauncherKind::Auto),
    );
    (dir, judge)
}

// Counts files across the sources, inputs and outputs directories
fn count_artifacts(root: &Path) -> usize {
    ["sources", "inputs", "outputs"]
        .iter()
        .map(|dir| std::fs::read_dir(root.join(dir)).unwrap().count())
        .sum()
}

#[tokio::test]
async fn test_success_reads_stdin() {
    let (_dir, judge) = create_test_judge(2000);

    let verdict = judge
        .execute("sh", Some("read a b\necho $((a + b))"), Some("2 3"))
        .await;

    assert_eq!(verdict.kind, VerdictKind::Success);
    assert_eq!(verdict.output, "5");
    assert!(verdict.execution_time_ms.is_some());
    assert_eq!(verdict.error, None);
}

#[tokio::test]
async fn test_output_keeps_leading_whitespace() {
    let (_dir, judge) = create_test_judge(2000);

    let verdict = judge
        .execute("sh", Some("printf '  a  b\\n c  \\n\\n'"), None)
        .await;

    assert_eq!(verdict.kind, VerdictKind::Success);
    assert_eq!(verdict.output, "  a  b\n c");
}

#[tokio::test]
async fn test_empty_source_is_judged() {
    let (_dir, judge) = create_test_judge(2000);

    let verdict = judge.execute("sh", Some(""), None).await;

    assert_eq!(verdict.kind, VerdictKind::Success);
    assert_eq!(verdict.output, "");
}

#[tokio::test]
async fn test_missing_source_creates_no_artifacts() {
    let (dir, judge) = create_test_judge(2000);

    let verdict = judge.execute("sh", None, Some("1 2")).await;

    assert_eq!(verdict.kind, VerdictKind::InvalidInput);
    assert_eq!(judge.cleanup().pending(), 0);
    assert_eq!(count_artifacts(dir.path()), 0);
}

#[tokio::test]
async fn test_unsupported_language_is_invalid_input() {
    let (dir, judge) = create_test_judge(2000);

    let verdict = judge.execute("brainfuck", Some("+++"), None).await;

    assert_eq!(verdict.kind, VerdictKind::InvalidInput);
    assert_eq!(
        verdict.error.as_deref(),
        Some("Unsupported language: brainfuck")
    );
    assert_eq!(count_artifacts(dir.path()), 0);
}

#[tokio::test]
async fn test_compilation_error_skips_run_and_leaves_nothing() {
    let (dir, judge) = create_test_judge(2000);
    let marker = dir.path().join("ran");
    let source = format!(
        "#!/bin/sh\ntouch {}\nif then fi (\n",
        marker.display()
    );

    let verdict = judge.execute("compiled-sh", Some(&source), None).await;

    assert_eq!(verdict.kind, VerdictKind::CompilationError);
    assert!(verdict.diagnostics.is_some_and(|d| !d.is_empty()));
    assert_eq!(verdict.execution_time_ms, None);
    assert!(!marker.exists());

    assert_eq!(judge.cleanup().flush(), 1);
    assert_eq!(count_artifacts(dir.path()), 0);
}

#[tokio::test]
async fn test_compiled_program_runs() {
    let (dir, judge) = create_test_judge(2000);

    let verdict = judge
        .execute("compiled-sh", Some("#!/bin/sh\nread line\necho \"got $line\""), Some("x"))
        .await;

    assert_eq!(verdict.kind, VerdictKind::Success);
    assert_eq!(verdict.output, "got x");

    // Source, input and binary are all released after the delay
    assert_eq!(count_artifacts(dir.path()), 3);
    assert_eq!(judge.cleanup().flush(), 1);
    assert_eq!(count_artifacts(dir.path()), 0);
}

#[tokio::test]
async fn test_compile_time_is_not_execution_time() {
    let (_dir, judge) = create_test_judge(2000);

    let verdict = judge
        .execute("slow-compiled-sh", Some("#!/bin/sh\necho fast"), None)
        .await;

    assert_eq!(verdict.kind, VerdictKind::Success);
    assert!(verdict.execution_time_ms.unwrap() < 1000);
}

#[tokio::test]
async fn test_infinite_loop_is_time_limit_exceeded() {
    let (_dir, judge) = create_test_judge(300);

    let verdict = judge
        .execute("sh", Some("while :; do :; done"), None)
        .await;

    assert_eq!(verdict.kind, VerdictKind::TimeLimitExceeded);
    assert_eq!(verdict.execution_time_ms, Some(300));
    assert_eq!(verdict.output, "");
}

#[tokio::test]
async fn test_forked_children_do_not_outlive_timeout() {
    let (_dir, judge) = create_test_judge(300);

    let started = std::time::Instant::now();
    let verdict = judge
        .execute("sh", Some("sleep 30 &\nsleep 30"), None)
        .await;

    assert_eq!(verdict.kind, VerdictKind::TimeLimitExceeded);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_nonzero_exit_is_runtime_error() {
    let (_dir, judge) = create_test_judge(2000);

    let verdict = judge
        .execute("sh", Some("echo partial\necho boom >&2\nexit 3"), None)
        .await;

    assert_eq!(verdict.kind, VerdictKind::RuntimeError);
    assert_eq!(verdict.diagnostics.as_deref(), Some("boom\n"));
    assert_eq!(verdict.error.as_deref(), Some("Process exited with code 3"));
    assert!(verdict.execution_time_ms.is_some());
}

#[tokio::test]
async fn test_missing_interpreter_is_runtime_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut languages = create_test_languages();
    languages.push(LanguageConfig {
        name: "ghost".to_string(),
        extension: "gh".to_string(),
        compile: None,
        run: vec!["/nonexistent/interpreter".to_string(), "%INPUT%".to_string()],
    });
    let judge = Judge::new(
        &JudgeConfig::default(),
        languages,
        Arc::new(ArtifactStore::open(dir.path()).unwrap()),
        create_launcher(LauncherKind::Auto),
    );

    let verdict = judge.execute("ghost", Some("boo"), None).await;

    assert_eq!(verdict.kind, VerdictKind::RuntimeError);
    assert!(verdict.diagnostics.is_some_and(|d| d.contains("Failed to spawn")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_are_isolated() {
    let (dir, judge) = create_test_judge(5000);
    let source = "#!/bin/sh\nread value\nsleep 0.2\necho \"$value\"";

    let mut handles = Vec::new();
    for i in 0..8 {
        let judge = judge.clone();
        handles.push(tokio::spawn(async move {
            let input = format!("job-{i}");
            let verdict = judge
                .execute("compiled-sh", Some(source), Some(&input))
                .await;
            (input, verdict)
        }));
    }

    for handle in handles {
        let (input, verdict) = handle.await.unwrap();
        assert_eq!(verdict.kind, VerdictKind::Success);
        assert_eq!(verdict.output, input);
    }

    assert_eq!(judge.cleanup().flush(), 8);
    assert_eq!(count_artifacts(dir.path()), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identical_submissions_run_independently() {
    let (_dir, judge) = create_test_judge(2000);
    let source = "read a b\necho $((a * b))";

    let (first, second) = tokio::join!(
        judge.execute("sh", Some(source), Some("6 7")),
        judge.execute("sh", Some(source), Some("6 7")),
    );

    assert_eq!(first.output, "42");
    assert_eq!(second.output, "42");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_request_kills_child() {
    let (dir, judge) = create_test_judge(10_000);
    let marker = dir.path().join("survived");
    let source = format!("sleep 1\ntouch {}", marker.display());

    let aborted = tokio::time::timeout(
        Duration::from_millis(200),
        judge.execute("sh", Some(&source), None),
    )
    .await;
    assert!(aborted.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_cpp_sum_example() {
    let has_gxx = std::process::Command::new("which")
        .arg("g++")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);
    if !has_gxx {
        println!("g++ not found, skipping");
        return;
    }

    let (_dir, judge) = create_test_judge(2000);
    let verdict = judge
        .execute(
            "cpp",
            Some("#include<iostream>\nint main(){int a,b;std::cin>>a>>b;std::cout<<a+b;}"),
            Some("2 3"),
        )
        .await;

    assert_eq!(verdict.kind, VerdictKind::Success);
    assert_eq!(verdict.output, "5");
}

fn has_setsid() -> bool {
    std::process::Command::new("which")
        .arg("setsid")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_detached_grandchild_keeps_printed_output() {
    if !has_setsid() {
        println!("setsid not found, skipping");
        return;
    }

    let (_dir, judge) = create_test_judge(2000);
    let verdict = judge
        .execute("sh", Some("echo 5\nsetsid sleep 3 &\nexit 0"), None)
        .await;

    assert_eq!(verdict.kind, VerdictKind::Success);
    assert_eq!(verdict.output, "5");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_request_holds_permit_until_child_is_gone() {
    if !has_setsid() {
        println!("setsid not found, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let config = JudgeConfig {
        run_timeout_ms: Millisecond(10_000),
        cleanup_delay_ms: Millisecond(3_600_000),
        max_concurrent_jobs: 1,
        ..Default::default()
    };
    let judge = Judge::new(
        &config,
        create_test_languages(),
        Arc::new(ArtifactStore::open(dir.path()).unwrap()),
        create_launcher(LauncherKind::Auto),
    );

    // The detached sleep holds the pipes, so the job task lingers after the kill
    let aborted = tokio::time::timeout(
        Duration::from_millis(200),
        judge.execute("sh", Some("setsid sleep 3 &\nsleep 30"), None),
    )
    .await;
    assert!(aborted.is_err());
    assert_eq!(judge.cleanup().pending(), 0);

    let verdict = judge.execute("sh", Some("echo next"), None).await;
    assert_eq!(verdict.kind, VerdictKind::Success);
    assert_eq!(verdict.output, "next");

    // The first job released its artifacts before its permit
    assert_eq!(judge.cleanup().pending(), 2);
}
