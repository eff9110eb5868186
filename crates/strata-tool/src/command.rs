//! Subprocess-backed tool adapter.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::adapter::{RunOutcome, ToolAdapter, ToolError, ToolInvocation};

const DEFAULT_STDERR_TAIL: usize = 4096;

/// Tool adapter that runs the invocation as a subprocess.
///
/// The child is placed in its own process group so that a timeout or
/// cancellation kills the whole tree, not just the direct child. The tools
/// fork helper processes for partition scanning and extraction workers.
pub struct CommandTool {
  stderr_tail_bytes: usize,
}

impl CommandTool {
  pub fn new() -> Self {
    Self {
      stderr_tail_bytes: DEFAULT_STDERR_TAIL,
    }
  }

  /// Override how much of the tool's stderr is retained.
  pub fn with_stderr_tail(mut self, bytes: usize) -> Self {
    self.stderr_tail_bytes = bytes;
    self
  }

  /// Kill the child's process group and reap it.
  async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
      // The child is its own group leader; negative pid addresses the group.
      unsafe {
        libc::killpg(pid as i32, libc::SIGKILL);
      }
    }
    if let Err(e) = child.start_kill() {
      debug!(error = %e, "child already exited before kill");
    }
    if let Err(e) = child.wait().await {
      warn!(error = %e, "failed to reap terminated child");
    }
  }
}

impl Default for CommandTool {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ToolAdapter for CommandTool {
  #[instrument(name = "tool_run", skip(self, invocation, cancel), fields(program = %invocation.program.display()))]
  async fn run(
    &self,
    invocation: &ToolInvocation,
    workdir: &Path,
    timeout: Duration,
    cancel: CancellationToken,
  ) -> Result<RunOutcome, ToolError> {
    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .current_dir(workdir)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    debug!(command = %invocation.command_line(), "spawning tool");

    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
      program: invocation.program.display().to_string(),
      source,
    })?;

    let stderr_task = child
      .stderr
      .take()
      .map(|stderr| tokio::spawn(read_tail(stderr, self.stderr_tail_bytes)));

    let status = tokio::select! {
      _ = cancel.cancelled() => {
        Self::terminate(&mut child).await;
        return Err(ToolError::Cancelled);
      }
      waited = tokio::time::timeout(timeout, child.wait()) => match waited {
        Ok(status) => status?,
        Err(_) => {
          Self::terminate(&mut child).await;
          return Err(ToolError::timeout(timeout));
        }
      }
    };

    let stderr_tail = match stderr_task {
      Some(task) => task.await.unwrap_or_default(),
      None => String::new(),
    };

    let output_paths = existing_outputs(invocation).await;

    Ok(RunOutcome {
      exit_code: status.code(),
      output_paths,
      stderr_tail,
    })
  }
}

/// Read a stream to EOF, retaining only the last `cap` bytes.
async fn read_tail(mut stderr: ChildStderr, cap: usize) -> String {
  let mut tail: Vec<u8> = Vec::new();
  let mut chunk = [0u8; 1024];
  loop {
    match stderr.read(&mut chunk).await {
      Ok(0) | Err(_) => break,
      Ok(n) => {
        tail.extend_from_slice(&chunk[..n]);
        if tail.len() > cap {
          let excess = tail.len() - cap;
          tail.drain(..excess);
        }
      }
    }
  }
  String::from_utf8_lossy(&tail).trim().to_string()
}

/// Declared outputs that exist after the run, including everything under the
/// output directory for export-style invocations.
async fn existing_outputs(invocation: &ToolInvocation) -> Vec<PathBuf> {
  let mut paths = Vec::new();
  for output in &invocation.outputs {
    if tokio::fs::metadata(output).await.is_ok_and(|m| m.is_file()) {
      paths.push(output.clone());
    }
  }
  if let Some(dir) = &invocation.output_dir {
    collect_files(dir, &mut paths).await;
  }
  paths
}

/// Collect every file under `dir`, depth-first without recursion.
async fn collect_files(dir: &Path, paths: &mut Vec<PathBuf>) {
  let mut pending = vec![dir.to_path_buf()];
  while let Some(current) = pending.pop() {
    let Ok(mut entries) = tokio::fs::read_dir(&current).await else {
      continue;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
      let path = entry.path();
      match entry.file_type().await {
        Ok(file_type) if file_type.is_dir() => pending.push(path),
        Ok(file_type) if file_type.is_file() => paths.push(path),
        _ => {}
      }
    }
  }
}
