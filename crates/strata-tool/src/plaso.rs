//! Plaso command-line contracts.
//!
//! Argument construction for the supported tool entry points, plus the
//! helpers that understand Plaso's status-view output and EWF image naming.
//! Nothing here executes anything; building an invocation is pure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use strata_task::{TaskOptions, ToolKind};

use crate::adapter::ToolInvocation;

/// Paths to the installed Plaso entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlasoTools {
  pub log2timeline: PathBuf,
  pub psort: PathBuf,
  pub image_export: PathBuf,
}

impl Default for PlasoTools {
  fn default() -> Self {
    Self {
      log2timeline: PathBuf::from("log2timeline.py"),
      psort: PathBuf::from("psort.py"),
      image_export: PathBuf::from("image_export.py"),
    }
  }
}

impl PlasoTools {
  /// Build the invocation for a task's validated options.
  ///
  /// `input` is the staged evidence file and `workdir` the attempt's working
  /// directory; all outputs land inside `workdir`. When the options carry
  /// inline Yara rules the caller must have written them to
  /// [`yara_rules_path`] before running the invocation.
  pub fn invocation(&self, options: &TaskOptions, input: &Path, workdir: &Path) -> ToolInvocation {
    match options.tool {
      ToolKind::Timeline => self.timeline(options, input, workdir),
      ToolKind::Sort => self.sort(input, workdir),
      ToolKind::Export => self.export(options, input, workdir),
    }
  }

  fn timeline(&self, options: &TaskOptions, input: &Path, workdir: &Path) -> ToolInvocation {
    let status_file = workdir.join("status");
    let storage_file = workdir.join(format!("{}.plaso", input_name(input)));

    let mut args = vec![
      "--quiet".to_string(),
      "--unattended".to_string(),
      "--partitions".to_string(),
      "all".to_string(),
      "--status-view".to_string(),
      "file".to_string(),
      "--status-view-file".to_string(),
      status_file.display().to_string(),
      "--storage-file".to_string(),
      storage_file.display().to_string(),
    ];

    if !options.artifact_filters.is_empty() {
      args.push("--artifact_filters".to_string());
      args.push(options.artifact_filters.join(","));
    }
    if !options.parsers.is_empty() {
      args.push("--parsers".to_string());
      args.push(options.parsers.join(","));
    }
    if !options.archives.is_empty() {
      args.push("--archives".to_string());
      args.push(options.archives.join(","));
    }
    if options.yara_rules.is_some() {
      args.push("--yara_rules".to_string());
      args.push(yara_rules_path(workdir).display().to_string());
    }

    args.push(input.display().to_string());

    ToolInvocation {
      program: self.log2timeline.clone(),
      args,
      outputs: vec![storage_file],
      output_dir: None,
      status_file: Some(status_file),
    }
  }

  fn sort(&self, input: &Path, workdir: &Path) -> ToolInvocation {
    let status_file = workdir.join("status");
    let output_file = workdir.join(format!("{}.csv", input_name(input)));

    let args = vec![
      "--quiet".to_string(),
      "--status-view".to_string(),
      "file".to_string(),
      "--status-view-file".to_string(),
      status_file.display().to_string(),
      "--additional_fields".to_string(),
      "yara_match".to_string(),
      "-w".to_string(),
      output_file.display().to_string(),
      input.display().to_string(),
    ];

    ToolInvocation {
      program: self.psort.clone(),
      args,
      outputs: vec![output_file],
      output_dir: None,
      status_file: Some(status_file),
    }
  }

  fn export(&self, options: &TaskOptions, input: &Path, workdir: &Path) -> ToolInvocation {
    let log_file = workdir.join("image_export.log");
    let export_dir = workdir.join("export");

    let args = vec![
      "--no-hashes".to_string(),
      "--logfile".to_string(),
      log_file.display().to_string(),
      "--write".to_string(),
      export_dir.display().to_string(),
      "--partitions".to_string(),
      "all".to_string(),
      "--volumes".to_string(),
      "all".to_string(),
      "--unattended".to_string(),
      "--artifact_filters".to_string(),
      options.artifact_filters.join(","),
      input.display().to_string(),
    ];

    ToolInvocation {
      program: self.image_export.clone(),
      args,
      outputs: Vec::new(),
      output_dir: Some(export_dir),
      status_file: None,
    }
  }
}

fn input_name(input: &Path) -> String {
  input
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| "input".to_string())
}

/// Where inline Yara rules are written inside a working directory.
pub fn yara_rules_path(workdir: &Path) -> PathBuf {
  workdir.join("rules.yara")
}

/// Parse a Plaso status-view file into counters.
///
/// The status view is a header token followed by `Name: value` pairs on
/// whitespace; names are lowercased with the colon stripped. Pairs whose
/// value is not an integer are skipped.
pub fn parse_status_counters(raw: &str) -> BTreeMap<String, u64> {
  let mut counters = BTreeMap::new();
  let mut items = raw.split_whitespace().skip(1);
  while let (Some(name), Some(value)) = (items.next(), items.next()) {
    if let Ok(value) = value.parse::<u64>() {
      counters.insert(name.trim_matches(':').to_lowercase(), value);
    }
  }
  counters
}

/// True if every path looks like part of an EnCase (EWF) image set:
/// extensions `.e01` through `.e99`, case-insensitive.
pub fn is_ewf_set<'a, I>(paths: I) -> bool
where
  I: IntoIterator<Item = &'a Path>,
{
  paths.into_iter().all(|path| {
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
      return false;
    };
    let extension = extension.to_ascii_lowercase();
    let Some(digits) = extension.strip_prefix('e') else {
      return false;
    };
    if digits.len() != 2 {
      return false;
    }
    matches!(digits.parse::<u8>(), Ok(1..=99))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap as Map;

  fn options(entries: &[(&str, &str)]) -> TaskOptions {
    let raw: Map<String, String> = entries
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    TaskOptions::parse(&raw).expect("valid options")
  }

  #[test]
  fn timeline_invocation_declares_storage_file() {
    let tools = PlasoTools::default();
    let invocation = tools.invocation(
      &options(&[("parsers", "winreg,syslog")]),
      Path::new("/work/t1/a/input/evidence.img"),
      Path::new("/work/t1/a"),
    );

    assert_eq!(invocation.program, PathBuf::from("log2timeline.py"));
    assert_eq!(invocation.outputs, vec![PathBuf::from("/work/t1/a/evidence.img.plaso")]);
    assert_eq!(invocation.status_file, Some(PathBuf::from("/work/t1/a/status")));

    let line = invocation.command_line();
    assert!(line.contains("--quiet --unattended --partitions all"));
    assert!(line.contains("--parsers winreg,syslog"));
    assert!(line.ends_with("/work/t1/a/input/evidence.img"));
    assert!(!line.contains("--yara_rules"));
  }

  #[test]
  fn timeline_with_yara_rules_points_at_rules_file() {
    let tools = PlasoTools::default();
    let invocation = tools.invocation(
      &options(&[("yara_rules", "rule a { condition: true }")]),
      Path::new("/work/t1/a/input/evidence.img"),
      Path::new("/work/t1/a"),
    );
    assert!(
      invocation
        .command_line()
        .contains("--yara_rules /work/t1/a/rules.yara")
    );
  }

  #[test]
  fn sort_invocation_writes_csv() {
    let tools = PlasoTools::default();
    let invocation = tools.invocation(
      &options(&[("tool", "psort")]),
      Path::new("/work/t1/a/input/evidence.plaso"),
      Path::new("/work/t1/a"),
    );

    assert_eq!(invocation.program, PathBuf::from("psort.py"));
    assert_eq!(invocation.outputs, vec![PathBuf::from("/work/t1/a/evidence.plaso.csv")]);
    assert!(invocation.command_line().contains("--additional_fields yara_match"));
  }

  #[test]
  fn export_invocation_collects_directory() {
    let tools = PlasoTools::default();
    let invocation = tools.invocation(
      &options(&[("tool", "image_export"), ("artifacts", "BrowserHistory,WindowsEventLogs")]),
      Path::new("/work/t1/a/input/evidence.img"),
      Path::new("/work/t1/a"),
    );

    assert_eq!(invocation.program, PathBuf::from("image_export.py"));
    assert!(invocation.outputs.is_empty());
    assert_eq!(invocation.output_dir, Some(PathBuf::from("/work/t1/a/export")));
    assert!(
      invocation
        .command_line()
        .contains("--artifact_filters BrowserHistory,WindowsEventLogs")
    );
  }

  #[test]
  fn status_counters_parse_name_value_pairs() {
    let counters =
      parse_status_counters("processing: Tasks: 3 Events: 1024 Errors: 0 Warnings: 7");
    assert_eq!(counters.get("tasks"), Some(&3));
    assert_eq!(counters.get("events"), Some(&1024));
    assert_eq!(counters.get("errors"), Some(&0));
    assert_eq!(counters.get("warnings"), Some(&7));
  }

  #[test]
  fn status_counters_skip_unparsable_values() {
    let counters = parse_status_counters("header Tasks: three Events: 12");
    assert_eq!(counters.get("tasks"), None);
    assert_eq!(counters.get("events"), Some(&12));
    assert!(parse_status_counters("").is_empty());
  }

  #[test]
  fn ewf_set_accepts_the_full_extension_range() {
    let paths = [
      PathBuf::from("/evidence/image.e01"),
      PathBuf::from("/evidence/image.E02"),
      PathBuf::from("/evidence/image.e99"),
    ];
    assert!(is_ewf_set(paths.iter().map(PathBuf::as_path)));
  }

  #[test]
  fn ewf_set_rejects_mixed_and_out_of_range() {
    let mixed = [PathBuf::from("a.e01"), PathBuf::from("b.txt")];
    assert!(!is_ewf_set(mixed.iter().map(PathBuf::as_path)));

    for bad in ["image.e00", "image.e100", "image.exe01", "image"] {
      let paths = [PathBuf::from(bad)];
      assert!(!is_ewf_set(paths.iter().map(PathBuf::as_path)), "{bad} accepted");
    }
  }

  #[test]
  fn ewf_set_is_vacuously_true_for_no_paths() {
    assert!(is_ewf_set(std::iter::empty::<&Path>()));
  }
}
