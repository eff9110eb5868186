//! CommandTool behavior against real subprocesses.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use strata_tool::{CommandTool, ToolAdapter, ToolError, ToolInvocation};

fn shell(script: &str, outputs: Vec<PathBuf>) -> ToolInvocation {
  ToolInvocation {
    program: PathBuf::from("sh"),
    args: vec!["-c".to_string(), script.to_string()],
    outputs,
    output_dir: None,
    status_file: None,
  }
}

#[tokio::test]
async fn successful_run_reports_declared_outputs() {
  let workdir = tempfile::tempdir().expect("tempdir");
  let output = workdir.path().join("timeline.jsonl");
  let invocation = shell("printf 'line' > timeline.jsonl", vec![output.clone()]);

  let outcome = CommandTool::new()
    .run(&invocation, workdir.path(), Duration::from_secs(10), CancellationToken::new())
    .await
    .expect("run");

  assert_eq!(outcome.exit_code, Some(0));
  assert!(outcome.is_success());
  assert_eq!(outcome.output_paths, vec![output]);
}

#[tokio::test]
async fn failing_run_reports_exit_code_and_stderr() {
  let workdir = tempfile::tempdir().expect("tempdir");
  let invocation = shell("echo 'bad format' >&2; exit 1", vec![workdir.path().join("missing")]);

  let outcome = CommandTool::new()
    .run(&invocation, workdir.path(), Duration::from_secs(10), CancellationToken::new())
    .await
    .expect("run");

  assert_eq!(outcome.exit_code, Some(1));
  assert!(!outcome.is_success());
  assert!(outcome.output_paths.is_empty(), "missing outputs are not reported");
  assert_eq!(outcome.stderr_tail, "bad format");
}

#[tokio::test]
async fn stderr_tail_is_bounded() {
  let workdir = tempfile::tempdir().expect("tempdir");
  let invocation = shell("i=0; while [ $i -lt 1000 ]; do echo 0123456789 >&2; i=$((i+1)); done", vec![]);

  let outcome = CommandTool::new()
    .with_stderr_tail(256)
    .run(&invocation, workdir.path(), Duration::from_secs(10), CancellationToken::new())
    .await
    .expect("run");

  assert!(outcome.stderr_tail.len() <= 256);
  assert!(outcome.stderr_tail.ends_with("0123456789"));
}

#[tokio::test]
async fn overrunning_tool_is_killed_within_bounded_overhead() {
  let workdir = tempfile::tempdir().expect("tempdir");
  let output = workdir.path().join("late");
  let invocation = shell("sleep 30; touch late", vec![output.clone()]);

  let started = Instant::now();
  let error = CommandTool::new()
    .run(&invocation, workdir.path(), Duration::from_millis(200), CancellationToken::new())
    .await
    .err()
    .expect("timeout error");

  assert!(matches!(error, ToolError::Timeout { .. }));
  assert!(started.elapsed() < Duration::from_secs(5), "kill took too long");
  assert!(!output.exists(), "tool must not have run to completion");
}

#[tokio::test]
async fn timeout_kills_the_whole_process_group() {
  let workdir = tempfile::tempdir().expect("tempdir");
  // The grandchild would outlive a kill aimed only at the direct child.
  let marker = workdir.path().join("orphan");
  let script = format!("(sleep 2; touch {}) & sleep 30", marker.display());
  let invocation = shell(&script, vec![]);

  let error = CommandTool::new()
    .run(&invocation, workdir.path(), Duration::from_millis(200), CancellationToken::new())
    .await
    .err()
    .expect("timeout error");
  assert!(matches!(error, ToolError::Timeout { .. }));

  tokio::time::sleep(Duration::from_millis(2500)).await;
  assert!(!marker.exists(), "background descendant survived the kill");
}

#[tokio::test]
async fn cancellation_terminates_the_run() {
  let workdir = tempfile::tempdir().expect("tempdir");
  let invocation = shell("sleep 30", vec![]);
  let cancel = CancellationToken::new();

  let canceller = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(100)).await;
    canceller.cancel();
  });

  let started = Instant::now();
  let error = CommandTool::new()
    .run(&invocation, workdir.path(), Duration::from_secs(30), cancel)
    .await
    .err()
    .expect("cancelled error");

  assert!(matches!(error, ToolError::Cancelled));
  assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
  let workdir = tempfile::tempdir().expect("tempdir");
  let invocation = ToolInvocation {
    program: PathBuf::from("definitely-not-installed-tool"),
    args: vec![],
    outputs: vec![],
    output_dir: None,
    status_file: None,
  };

  let error = CommandTool::new()
    .run(&invocation, workdir.path(), Duration::from_secs(1), CancellationToken::new())
    .await
    .err()
    .expect("spawn error");
  assert!(matches!(error, ToolError::Spawn { .. }));
}

#[tokio::test]
async fn output_directory_contents_are_collected() {
  let workdir = tempfile::tempdir().expect("tempdir");
  let export_dir = workdir.path().join("export");
  let invocation = ToolInvocation {
    program: PathBuf::from("sh"),
    args: vec![
      "-c".to_string(),
      "mkdir -p export/sub && touch export/a.txt export/sub/b.txt".to_string(),
    ],
    outputs: vec![],
    output_dir: Some(export_dir.clone()),
    status_file: None,
  };

  let outcome = CommandTool::new()
    .run(&invocation, workdir.path(), Duration::from_secs(10), CancellationToken::new())
    .await
    .expect("run");

  let mut names: Vec<_> = outcome
    .output_paths
    .iter()
    .map(|p| p.strip_prefix(&export_dir).expect("under export dir").to_path_buf())
    .collect();
  names.sort();
  assert_eq!(names, vec![PathBuf::from("a.txt"), PathBuf::from("sub/b.txt")]);
}
