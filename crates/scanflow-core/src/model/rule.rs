use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{ObjectMeta, ScanSpec};

/// A policy that spawns a follow-up scan whenever a completed scan's
/// findings satisfy one of its match conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadingRule {
    pub metadata: ObjectMeta,
    pub spec: CascadingRuleSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadingRuleSpec {
    pub matches: Matches,
    /// Template for the generated child scan.
    pub scan_spec: ScanSpec,
    /// Merged over the parent scan's labels; rule values win on collision.
    #[serde(default)]
    pub scan_labels: BTreeMap<String, String>,
    /// Merged over the parent scan's annotations; rule values win.
    #[serde(default)]
    pub scan_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Matches {
    #[serde(default)]
    pub any_of: Vec<MatchCondition>,
}

/// One condition: attribute path -> expected value. All pairs must hold
/// for the condition to match a finding; conditions combine with OR.
///
/// Paths follow `Finding::resolve` (`category`, `severity`,
/// `attributes.<key>`); string expectations may carry a single `*`
/// wildcard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct MatchCondition(pub BTreeMap<String, Value>);

impl CascadingRule {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_yaml_shape_round_trips() {
        let yaml = r#"
metadata:
  name: ssh-audit-on-open-ssh
  namespace: default
  labels:
    scope: network
spec:
  matches:
    anyOf:
      - category: open-port
        attributes.service: ssh
      - attributes.port: 2222
  scanSpec:
    scanType: ssh-audit
    parameters: ["--level", "deep"]
  scanLabels:
    origin: cascade
  scanAnnotations:
    scanflow.io/chain: "true"
"#;
        let rule: CascadingRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.name(), "ssh-audit-on-open-ssh");
        assert_eq!(rule.spec.matches.any_of.len(), 2);
        assert_eq!(
            rule.spec.matches.any_of[0].0.get("attributes.service"),
            Some(&json!("ssh"))
        );
        assert_eq!(rule.spec.scan_spec.scan_type, "ssh-audit");
        assert_eq!(
            rule.spec.scan_labels.get("origin"),
            Some(&"cascade".to_string())
        );
    }

    #[test]
    fn test_match_maps_default_empty() {
        let yaml = r#"
metadata:
  name: bare
spec:
  matches: {}
  scanSpec:
    scanType: nmap
"#;
        let rule: CascadingRule = serde_yaml::from_str(yaml).unwrap();
        assert!(rule.spec.matches.any_of.is_empty());
        assert!(rule.spec.scan_labels.is_empty());
    }
}
