//! Strata Config
//!
//! Worker configuration assembled from the environment. Everything has a
//! default; the recognized variables are listed on each field. Tests build
//! configurations through [`WorkerConfig::from_lookup`] so nothing here ever
//! reads ambient process state except the one [`WorkerConfig::from_env`]
//! entry point.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// A configuration value that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {name}: {value:?}")]
pub struct ConfigError {
  pub name: String,
  pub value: String,
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Broker endpoint. `STRATA_BROKER_URL`, falling back to `REDIS_URL`.
  pub broker_url: String,
  /// Key namespace shared by all workers of one pipeline. `STRATA_QUEUE_PREFIX`.
  pub queue_prefix: String,
  /// Artifact store root. `STRATA_STORE_PATH`; defaults under the data dir.
  pub store_path: Option<PathBuf>,
  /// Working-directory root. `STRATA_WORK_ROOT`; defaults under the data dir.
  pub work_root: Option<PathBuf>,
  /// Concurrent task slots. `STRATA_CONCURRENCY`. The default of 1 is
  /// deliberate: the tool is CPU- and IO-heavy on its own.
  pub concurrency: usize,
  /// Default per-task tool deadline. `STRATA_TASK_TIMEOUT_SECS`.
  pub task_timeout: Duration,
  /// How long one queue pull blocks. `STRATA_POLL_INTERVAL_SECS`.
  pub poll_interval: Duration,
  /// How often the tool status file is polled. `STRATA_PROGRESS_INTERVAL_SECS`.
  pub progress_interval: Duration,
  /// Lease timeout before an unacked task is re-deliverable.
  /// `STRATA_VISIBILITY_TIMEOUT_SECS`.
  pub visibility_timeout: Duration,
  /// Tool entry points. `STRATA_LOG2TIMELINE_BIN`, `STRATA_PSORT_BIN`,
  /// `STRATA_IMAGE_EXPORT_BIN`.
  pub log2timeline_bin: PathBuf,
  pub psort_bin: PathBuf,
  pub image_export_bin: PathBuf,
  /// Keep working directories after a task resolves. `STRATA_KEEP_WORKDIR`.
  pub keep_workdir: bool,
  /// Debug-introspection toggle and port, diagnostic only. `STRATA_DEBUG`,
  /// `STRATA_DEBUG_PORT`.
  pub debug: bool,
  pub debug_port: u16,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      broker_url: "redis://127.0.0.1:6379".to_string(),
      queue_prefix: "strata".to_string(),
      store_path: None,
      work_root: None,
      concurrency: 1,
      task_timeout: Duration::from_secs(4 * 3600),
      poll_interval: Duration::from_secs(5),
      progress_interval: Duration::from_secs(3),
      visibility_timeout: Duration::from_secs(5 * 3600),
      log2timeline_bin: PathBuf::from("log2timeline.py"),
      psort_bin: PathBuf::from("psort.py"),
      image_export_bin: PathBuf::from("image_export.py"),
      keep_workdir: false,
      debug: false,
      debug_port: 5678,
    }
  }
}

impl WorkerConfig {
  /// Load configuration from the process environment.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| env::var(name).ok())
  }

  /// Load configuration through an arbitrary variable lookup.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();
    let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(url) = get("STRATA_BROKER_URL").or_else(|| get("REDIS_URL")) {
      config.broker_url = url;
    }
    if let Some(prefix) = get("STRATA_QUEUE_PREFIX") {
      config.queue_prefix = prefix;
    }
    if let Some(path) = get("STRATA_STORE_PATH") {
      config.store_path = Some(PathBuf::from(path));
    }
    if let Some(path) = get("STRATA_WORK_ROOT") {
      config.work_root = Some(PathBuf::from(path));
    }
    if let Some(value) = get("STRATA_CONCURRENCY") {
      config.concurrency = parse_positive("STRATA_CONCURRENCY", &value)?;
    }
    if let Some(value) = get("STRATA_TASK_TIMEOUT_SECS") {
      config.task_timeout = parse_secs("STRATA_TASK_TIMEOUT_SECS", &value)?;
    }
    if let Some(value) = get("STRATA_POLL_INTERVAL_SECS") {
      config.poll_interval = parse_secs("STRATA_POLL_INTERVAL_SECS", &value)?;
    }
    if let Some(value) = get("STRATA_PROGRESS_INTERVAL_SECS") {
      config.progress_interval = parse_secs("STRATA_PROGRESS_INTERVAL_SECS", &value)?;
    }
    if let Some(value) = get("STRATA_VISIBILITY_TIMEOUT_SECS") {
      config.visibility_timeout = parse_secs("STRATA_VISIBILITY_TIMEOUT_SECS", &value)?;
    }
    if let Some(path) = get("STRATA_LOG2TIMELINE_BIN") {
      config.log2timeline_bin = PathBuf::from(path);
    }
    if let Some(path) = get("STRATA_PSORT_BIN") {
      config.psort_bin = PathBuf::from(path);
    }
    if let Some(path) = get("STRATA_IMAGE_EXPORT_BIN") {
      config.image_export_bin = PathBuf::from(path);
    }
    if let Some(value) = get("STRATA_KEEP_WORKDIR") {
      config.keep_workdir = parse_bool("STRATA_KEEP_WORKDIR", &value)?;
    }
    if let Some(value) = get("STRATA_DEBUG") {
      config.debug = parse_bool("STRATA_DEBUG", &value)?;
    }
    if let Some(value) = get("STRATA_DEBUG_PORT") {
      config.debug_port = value.parse().map_err(|_| ConfigError {
        name: "STRATA_DEBUG_PORT".to_string(),
        value,
      })?;
    }

    Ok(config)
  }

  /// Artifact store root, defaulting under the given data directory.
  pub fn store_path(&self, data_dir: &std::path::Path) -> PathBuf {
    self
      .store_path
      .clone()
      .unwrap_or_else(|| data_dir.join("artifacts"))
  }

  /// Working-directory root, defaulting under the given data directory.
  pub fn work_root(&self, data_dir: &std::path::Path) -> PathBuf {
    self
      .work_root
      .clone()
      .unwrap_or_else(|| data_dir.join("work"))
  }
}

fn parse_positive(name: &str, value: &str) -> Result<usize, ConfigError> {
  match value.parse::<usize>() {
    Ok(parsed) if parsed > 0 => Ok(parsed),
    _ => Err(ConfigError {
      name: name.to_string(),
      value: value.to_string(),
    }),
  }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration, ConfigError> {
  match value.parse::<u64>() {
    Ok(parsed) if parsed > 0 => Ok(Duration::from_secs(parsed)),
    _ => Err(ConfigError {
      name: name.to_string(),
      value: value.to_string(),
    }),
  }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
  match value {
    "1" | "true" | "yes" => Ok(true),
    "0" | "false" | "no" => Ok(false),
    _ => Err(ConfigError {
      name: name.to_string(),
      value: value.to_string(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup(entries: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = entries
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name: &str| map.get(name).cloned()
  }

  #[test]
  fn defaults_apply_with_an_empty_environment() {
    let config = WorkerConfig::from_lookup(|_| None).expect("defaults");
    assert_eq!(config.broker_url, "redis://127.0.0.1:6379");
    assert_eq!(config.concurrency, 1);
    assert!(!config.debug);
    assert_eq!(config.store_path(std::path::Path::new("/data")), PathBuf::from("/data/artifacts"));
  }

  #[test]
  fn redis_url_is_a_fallback_for_broker_url() {
    let config =
      WorkerConfig::from_lookup(lookup(&[("REDIS_URL", "redis://queue:6379")])).expect("config");
    assert_eq!(config.broker_url, "redis://queue:6379");

    let config = WorkerConfig::from_lookup(lookup(&[
      ("REDIS_URL", "redis://queue:6379"),
      ("STRATA_BROKER_URL", "redis://other:6379"),
    ]))
    .expect("config");
    assert_eq!(config.broker_url, "redis://other:6379");
  }

  #[test]
  fn explicit_paths_override_the_data_dir() {
    let config = WorkerConfig::from_lookup(lookup(&[
      ("STRATA_STORE_PATH", "/mnt/artifacts"),
      ("STRATA_WORK_ROOT", "/scratch"),
    ]))
    .expect("config");
    let data_dir = std::path::Path::new("/data");
    assert_eq!(config.store_path(data_dir), PathBuf::from("/mnt/artifacts"));
    assert_eq!(config.work_root(data_dir), PathBuf::from("/scratch"));
  }

  #[test]
  fn numbers_and_durations_are_validated() {
    let config = WorkerConfig::from_lookup(lookup(&[
      ("STRATA_CONCURRENCY", "4"),
      ("STRATA_TASK_TIMEOUT_SECS", "600"),
    ]))
    .expect("config");
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.task_timeout, Duration::from_secs(600));

    assert!(WorkerConfig::from_lookup(lookup(&[("STRATA_CONCURRENCY", "0")])).is_err());
    assert!(WorkerConfig::from_lookup(lookup(&[("STRATA_TASK_TIMEOUT_SECS", "later")])).is_err());
  }

  #[test]
  fn debug_toggle_parses_common_spellings() {
    for (value, expected) in [("1", true), ("true", true), ("0", false), ("no", false)] {
      let config =
        WorkerConfig::from_lookup(lookup(&[("STRATA_DEBUG", value)])).expect("config");
      assert_eq!(config.debug, expected, "value {value}");
    }
    assert!(WorkerConfig::from_lookup(lookup(&[("STRATA_DEBUG", "maybe")])).is_err());
  }

  #[test]
  fn blank_values_fall_back_to_defaults() {
    let config = WorkerConfig::from_lookup(lookup(&[("STRATA_QUEUE_PREFIX", "  ")])).expect("config");
    assert_eq!(config.queue_prefix, "strata");
  }
}
