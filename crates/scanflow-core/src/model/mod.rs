pub mod finding;
pub mod rule;
pub mod workload;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;

/// Identity and bookkeeping shared by every stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Set when an operator requested deletion; the controller must observe
    /// this before advancing the scan any further.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        ObjectMeta {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            deletion_timestamp: None,
        }
    }

    /// Store key, unique across namespaces.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Selects resources by their labels. An empty selector matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// What to run: scanner type, its arguments, and which cascading rules the
/// scan opts into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanSpec {
    pub scan_type: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Label selector over CascadingRule records in the scan's namespace.
    /// Absent means the scan never cascades.
    #[serde(default)]
    pub cascades: Option<LabelSelector>,
}

impl ScanSpec {
    /// Reject specs that can never be scheduled. Failures here are
    /// non-retriable: the record will not get better on its own.
    pub fn validate(&self) -> Result<(), Error> {
        if self.scan_type.is_empty() {
            return Err(Error::InvalidSpec("scanType must not be empty".to_string()));
        }
        if !is_dns_label(&self.scan_type) {
            return Err(Error::InvalidSpec(format!(
                "scanType '{}' must be a lowercase DNS label",
                self.scan_type
            )));
        }
        Ok(())
    }
}

/// Lowercase RFC 1123 label: alphanumeric and '-', 63 chars max.
pub fn is_dns_label(value: &str) -> bool {
    let re = regex::Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
    value.len() <= 63 && re.is_match(value)
}

/// Where a cascaded scan came from. Root scans carry no origin and are
/// generation 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeOrigin {
    pub parent_scan: String,
    pub rule: String,
    pub generation: u32,
}

/// A request to create one scan. Immutable once accepted; the store's
/// identity-conflict semantics resolve duplicate submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: ScanSpec,
    #[serde(default)]
    pub origin: Option<CascadeOrigin>,
}

/// Execution phases of a scan. Transitions only move forward; the three
/// terminal phases are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    Init,
    Scanning,
    Parsing,
    Cascading,
    Done,
    Errored,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Errored | Phase::Cancelled)
    }

    fn ordinal(&self) -> u8 {
        match self {
            Phase::Init => 0,
            Phase::Scanning => 1,
            Phase::Parsing => 2,
            Phase::Cascading => 3,
            Phase::Done => 4,
            Phase::Errored => 4,
            Phase::Cancelled => 4,
        }
    }

    /// Forward steps only. Any non-terminal phase may jump into a terminal
    /// one; nothing leaves a terminal phase.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.ordinal() == self.ordinal() + 1
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "Init",
            Phase::Scanning => "Scanning",
            Phase::Parsing => "Parsing",
            Phase::Cascading => "Cascading",
            Phase::Done => "Done",
            Phase::Errored => "Errored",
            Phase::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

/// One recorded phase transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub phase: Phase,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Controller-owned status of a scan. Everything needed to resume a
/// reconciliation lives here; the controller itself keeps no state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub raw_result: Option<String>,
    #[serde(default)]
    pub findings: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// The durable record of one scan's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub metadata: ObjectMeta,
    pub spec: ScanSpec,
    #[serde(default)]
    pub origin: Option<CascadeOrigin>,
    #[serde(default)]
    pub status: ScanStatus,
}

impl Scan {
    pub fn from_request(request: ScanRequest) -> Scan {
        Scan {
            metadata: ObjectMeta {
                name: request.name,
                namespace: request.namespace,
                labels: request.labels,
                annotations: request.annotations,
                deletion_timestamp: None,
            },
            spec: request.spec,
            origin: request.origin,
            status: ScanStatus::default(),
        }
    }

    /// Cascade hops separating this scan from its root. Root scans are 0.
    pub fn generation(&self) -> u32 {
        self.origin.as_ref().map(|o| o.generation).unwrap_or(0)
    }
}
