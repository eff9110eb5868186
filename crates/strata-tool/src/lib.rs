//! Strata Tool
//!
//! The external tool adapter: everything the worker knows about running the
//! forensic tools as subprocesses, and nothing about what they compute.
//!
//! [`ToolAdapter`] is the seam between the execution unit and the tool. The
//! production implementation, [`CommandTool`], spawns the tool in its own
//! process group, enforces a deadline, and captures a bounded tail of its
//! diagnostic output. [`PlasoTools`] holds the argument contracts for the
//! supported tool entry points.

mod adapter;
mod command;
mod plaso;

pub use adapter::{RunOutcome, ToolAdapter, ToolError, ToolInvocation};
pub use command::CommandTool;
pub use plaso::{PlasoTools, is_ewf_set, parse_status_counters, yara_rules_path};
