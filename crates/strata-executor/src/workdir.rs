//! Per-attempt working directories.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// The ephemeral filesystem scope of one task attempt.
///
/// Holds the staged input, the tool's outputs, and its status file. Created
/// fresh per attempt (`{base}/{task_id}/{attempt-id}`) and never shared, so
/// re-delivered tasks cannot observe a previous attempt's partial state.
#[derive(Debug)]
pub struct WorkDir {
  root: PathBuf,
}

impl WorkDir {
  /// Create a fresh working directory for one attempt of a task.
  pub async fn create(base: &Path, task_id: &str) -> io::Result<Self> {
    let attempt_id = uuid::Uuid::new_v4().simple().to_string();
    let root = base.join(task_id).join(attempt_id);
    tokio::fs::create_dir_all(root.join("input")).await?;
    Ok(Self { root })
  }

  /// Root of this working directory.
  pub fn path(&self) -> &Path {
    &self.root
  }

  /// Where the named input file is staged.
  pub fn input_path(&self, file_name: &str) -> PathBuf {
    self.root.join("input").join(file_name)
  }

  /// Remove the directory tree. Removal failure is logged, not propagated:
  /// the attempt already has a result and stray directories are harmless.
  pub async fn cleanup(self) {
    if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
      warn!(path = %self.root.display(), error = %e, "failed to remove working directory");
    }
  }
}
