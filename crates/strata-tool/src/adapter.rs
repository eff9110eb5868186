//! The tool adapter seam.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A concrete tool invocation: the program, its arguments, and the outputs
/// the caller expects it to produce inside the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
  pub program: PathBuf,
  pub args: Vec<String>,
  /// Files the tool is expected to write on success.
  pub outputs: Vec<PathBuf>,
  /// Directory whose entire contents count as outputs (artifact export).
  pub output_dir: Option<PathBuf>,
  /// Machine-readable status file the tool updates while running, used for
  /// best-effort progress reporting.
  pub status_file: Option<PathBuf>,
}

impl ToolInvocation {
  /// The invocation as a display string for logs and results.
  pub fn command_line(&self) -> String {
    let mut line = self.program.display().to_string();
    for arg in &self.args {
      line.push(' ');
      line.push_str(arg);
    }
    line
  }
}

/// Result of one tool run.
///
/// A non-zero exit code is a normal outcome here, never an error: the
/// adapter reports exit status and output locations, interpretation is the
/// caller's concern.
#[derive(Debug, Clone)]
pub struct RunOutcome {
  /// Exit code, `None` when the tool was killed by a signal.
  pub exit_code: Option<i32>,
  /// Declared outputs that exist after the run.
  pub output_paths: Vec<PathBuf>,
  /// Bounded tail of the tool's stderr.
  pub stderr_tail: String,
}

impl RunOutcome {
  /// Whether the tool reported success.
  pub fn is_success(&self) -> bool {
    self.exit_code == Some(0)
  }
}

/// Errors that prevent a run from producing an exit status.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
  /// The program could not be spawned (missing binary, permissions).
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The tool exceeded its deadline and was terminated.
  #[error("tool exceeded timeout of {limit_secs}s")]
  Timeout { limit_secs: u64 },

  /// The run was cancelled and the tool terminated.
  #[error("tool run cancelled")]
  Cancelled,

  /// I/O failure while supervising the child process.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl ToolError {
  pub(crate) fn timeout(limit: Duration) -> Self {
    Self::Timeout {
      limit_secs: limit.as_secs(),
    }
  }
}

/// Runs an external tool to completion.
///
/// The call blocks (asynchronously) until the tool exits, the timeout
/// elapses, or `cancel` fires; on timeout or cancellation the subprocess and
/// its descendants are terminated and the partial output is the caller's to
/// discard. Adapters never retry.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
  async fn run(
    &self,
    invocation: &ToolInvocation,
    workdir: &Path,
    timeout: Duration,
    cancel: CancellationToken,
  ) -> Result<RunOutcome, ToolError>;
}
