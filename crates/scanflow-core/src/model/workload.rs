use serde::{Deserialize, Serialize};
use std::fmt;

use super::Phase;

/// What a workload runs on behalf of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// The scanner process producing a raw result artifact.
    Scanner,
    /// The parser process turning a raw result into findings.
    Parser,
    /// A post-processing hook run against parsed findings.
    Hook,
}

impl WorkloadKind {
    /// The scan phase this workload belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            WorkloadKind::Scanner => Phase::Scanning,
            WorkloadKind::Parser => Phase::Parsing,
            WorkloadKind::Hook => Phase::Cascading,
        }
    }

    fn suffix(&self) -> &str {
        match self {
            WorkloadKind::Scanner => "scan",
            WorkloadKind::Parser => "parse",
            WorkloadKind::Hook => "hook",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Terminal and non-terminal states the scheduler reports for a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WorkloadState {
    Pending,
    Running,
    /// Finished successfully; `artifact` references the produced output.
    Succeeded { artifact: String },
    Failed { reason: String },
}

/// One scheduled execution unit, bound to exactly one scan and one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    /// Owning scan name. Deleting the scan deletes its workloads.
    pub scan: String,
    pub kind: WorkloadKind,
    pub scan_type: String,
    pub args: Vec<String>,
    pub state: WorkloadState,
}

/// Deterministic workload name for a (scan, phase) pair. A second create
/// under the same name collides in the scheduler instead of duplicating
/// side effects.
pub fn workload_name(scan: &str, kind: WorkloadKind) -> String {
    format!("{}-{}", scan, kind.suffix())
}
