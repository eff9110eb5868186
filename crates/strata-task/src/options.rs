//! Validated task options.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::TaskError;

/// Which external tool a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolKind {
  /// Extract a timeline storage file from the evidence (log2timeline).
  #[default]
  Timeline,
  /// Convert an existing timeline storage file to CSV (psort).
  Sort,
  /// Export files matching forensic artifact definitions (image_export).
  Export,
}

impl ToolKind {
  /// Canonical option value for this kind.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Timeline => "log2timeline",
      Self::Sort => "psort",
      Self::Export => "image_export",
    }
  }

  fn parse(raw: &str) -> Result<Self, TaskError> {
    match raw {
      "log2timeline" | "timeline" => Ok(Self::Timeline),
      "psort" | "sort" => Ok(Self::Sort),
      "image_export" | "export" => Ok(Self::Export),
      other => Err(TaskError::invalid_task(format!("unknown tool: {other}"))),
    }
  }
}

/// Validated form of a task's option map.
///
/// Produced by [`TaskOptions::parse`] before any staging I/O happens, so a
/// malformed task never touches the working directory or the tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
  pub tool: ToolKind,
  /// Forensic artifact definition names to restrict extraction to.
  pub artifact_filters: Vec<String>,
  /// Parser names to restrict extraction to.
  pub parsers: Vec<String>,
  /// Archive types whose contents should be processed.
  pub archives: Vec<String>,
  /// Inline Yara rules used to tag files during extraction.
  pub yara_rules: Option<String>,
  /// Per-task timeout override.
  pub timeout: Option<Duration>,
}

impl TaskOptions {
  /// Parse and validate a raw option map.
  ///
  /// # Errors
  /// Returns [`TaskError::InvalidTask`] for unknown keys, unparsable values,
  /// or option combinations the selected tool does not accept.
  pub fn parse(raw: &BTreeMap<String, String>) -> Result<Self, TaskError> {
    let mut options = Self::default();

    for (key, value) in raw {
      match key.as_str() {
        "tool" => options.tool = ToolKind::parse(value)?,
        "artifacts" => options.artifact_filters = split_list(value),
        "parsers" => options.parsers = split_list(value),
        "archives" => options.archives = split_list(value),
        "yara_rules" => {
          if !value.trim().is_empty() {
            options.yara_rules = Some(value.clone());
          }
        }
        "timeout_secs" => {
          let secs: u64 = value.parse().map_err(|_| {
            TaskError::invalid_task(format!("timeout_secs is not a number: {value}"))
          })?;
          if secs == 0 {
            return Err(TaskError::invalid_task("timeout_secs must be positive"));
          }
          options.timeout = Some(Duration::from_secs(secs));
        }
        other => {
          return Err(TaskError::invalid_task(format!("unknown option: {other}")));
        }
      }
    }

    options.validate()?;
    Ok(options)
  }

  fn validate(&self) -> Result<(), TaskError> {
    match self.tool {
      ToolKind::Timeline => Ok(()),
      ToolKind::Sort => {
        if !self.artifact_filters.is_empty()
          || !self.parsers.is_empty()
          || !self.archives.is_empty()
          || self.yara_rules.is_some()
        {
          return Err(TaskError::invalid_task(
            "psort accepts no extraction options (artifacts, parsers, archives, yara_rules)",
          ));
        }
        Ok(())
      }
      ToolKind::Export => {
        if self.artifact_filters.is_empty() {
          return Err(TaskError::invalid_task(
            "image_export requires a non-empty artifacts option",
          ));
        }
        if !self.parsers.is_empty() || !self.archives.is_empty() || self.yara_rules.is_some() {
          return Err(TaskError::invalid_task(
            "image_export accepts only the artifacts option",
          ));
        }
        Ok(())
      }
    }
  }
}

/// Split a comma-separated option value, dropping empty entries.
fn split_list(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|entry| !entry.is_empty())
    .map(str::to_string)
    .collect()
}
