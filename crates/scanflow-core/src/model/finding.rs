use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Severity level reported by a parser for one finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn priority(&self) -> u8 {
        match self {
            Severity::Critical => 5,
            Severity::High => 4,
            Severity::Medium => 3,
            Severity::Low => 2,
            Severity::Info => 1,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }
}

/// One discovered item, immutable once parsed. The attribute map is open:
/// scanners disagree wildly about what they report, so values are arbitrary
/// JSON scalars or nested objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub category: String,
    pub severity: Severity,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Finding {
    /// Resolve a dotted attribute path against this finding.
    ///
    /// `category`, `severity`, `name` and `id` address the fixed fields;
    /// `attributes.<key>` addresses the open map. A literal key containing
    /// dots wins over nested descent, so `attributes.state.name` first tries
    /// the `state.name` key and then `state` -> `name`.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        match (head, rest) {
            ("category", None) => Some(Value::String(self.category.clone())),
            ("severity", None) => Some(Value::String(self.severity.symbol().to_string())),
            ("name", None) => self.name.clone().map(Value::String),
            ("id", None) => self.id.clone().map(Value::String),
            ("attributes", Some(rest)) => {
                if let Some(value) = self.attributes.get(rest) {
                    return Some(value.clone());
                }
                let (key, nested) = match rest.split_once('.') {
                    Some((key, nested)) => (key, Some(nested)),
                    None => (rest, None),
                };
                let root = self.attributes.get(key)?;
                match nested {
                    None => Some(root.clone()),
                    Some(nested) => descend(root, nested).cloned(),
                }
            }
            _ => None,
        }
    }
}

fn descend<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
