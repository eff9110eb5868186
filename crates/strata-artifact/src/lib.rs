//! Strata Artifact
//!
//! The shared artifact store the worker stages evidence from and registers
//! outputs into. Artifacts are opaque blobs addressed by string keys; the
//! orchestrator owns key assignment and lifecycle.
//!
//! The [`Store`] trait is the backend seam (filesystem, object storage, ...).
//! The trait uses async streaming so multi-gigabyte disk images never sit in
//! memory. [`stage_to_file`] and [`register_file`] adapt the streams to the
//! local paths the external tool works with.

mod fs;

pub use fs::FsStore;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// A boxed stream of bytes for artifact data.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Error type for artifact storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested artifact was not found.
  #[error("artifact not found: {0}")]
  NotFound(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Artifact storage trait.
///
/// Implementations provide the actual storage backend. Keys are opaque
/// relative paths (`{task_id}/{attempt}/{name}` by worker convention).
#[async_trait]
pub trait Store: Send + Sync {
  /// Retrieve an artifact by key as a byte stream.
  async fn get(&self, key: &str) -> Result<ByteStream, Error>;

  /// Store an artifact from a byte stream.
  async fn put(&self, key: &str, data: ByteStream) -> Result<(), Error>;

  /// Whether an artifact exists. Used to validate input references before
  /// any staging work happens.
  async fn exists(&self, key: &str) -> Result<bool, Error>;

  /// Delete an artifact by key.
  async fn delete(&self, key: &str) -> Result<(), Error>;
}

/// Stage an artifact into a local file, returning the number of bytes written.
///
/// The destination's parent directory must already exist; the caller owns the
/// working directory layout.
pub async fn stage_to_file(store: &dyn Store, key: &str, dest: &Path) -> Result<u64, Error> {
  let mut stream = store.get(key).await?;
  let mut file = File::create(dest).await?;
  let mut written = 0u64;

  while let Some(chunk) = stream.next().await {
    let bytes = chunk?;
    file.write_all(&bytes).await?;
    written += bytes.len() as u64;
  }

  file.flush().await?;
  Ok(written)
}

/// Register a local file with the store under the given key.
pub async fn register_file(store: &dyn Store, path: &Path, key: &str) -> Result<(), Error> {
  let file = File::open(path).await?;
  let stream: ByteStream = Box::pin(ReaderStream::new(file).map(|r| r.map_err(Error::Io)));
  store.put(key, stream).await
}
