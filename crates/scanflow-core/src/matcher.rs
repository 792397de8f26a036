//! Pure finding-vs-condition evaluation. No state, no I/O.

use serde_json::Value;

use crate::model::finding::Finding;
use crate::model::rule::{CascadingRule, MatchCondition};

/// A rule matches iff at least one finding satisfies at least one of its
/// `anyOf` conditions. Short-circuits on the first hit.
pub fn rule_matches(rule: &CascadingRule, findings: &[Finding]) -> bool {
    findings.iter().any(|finding| {
        rule.spec
            .matches
            .any_of
            .iter()
            .any(|condition| condition_matches(condition, finding))
    })
}

/// Every (path, expected) pair must resolve in the finding and satisfy its
/// matcher. A missing path is a non-match; there is no defaulting. An empty
/// condition matches nothing rather than everything.
pub fn condition_matches(condition: &MatchCondition, finding: &Finding) -> bool {
    if condition.0.is_empty() {
        return false;
    }
    condition.0.iter().all(|(path, expected)| {
        finding
            .resolve(path)
            .is_some_and(|actual| value_matches(expected, &actual))
    })
}

/// Scalar comparison with type coercion: numbers and numeric strings compare
/// numerically, booleans exactly, strings exactly or through a single `*`
/// wildcard. Non-scalar values fall back to structural equality.
pub fn value_matches(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::String(pattern) if pattern.contains('*') => {
            scalar_to_string(actual).is_some_and(|s| wildcard_match(pattern, &s))
        }
        Value::String(s) => match actual {
            Value::String(a) => s == a,
            Value::Number(_) => numeric(expected) == numeric(actual) && numeric(actual).is_some(),
            Value::Bool(b) => s.parse::<bool>().map(|p| p == *b).unwrap_or(false),
            _ => false,
        },
        Value::Number(_) => match numeric(actual) {
            Some(a) => numeric(expected) == Some(a),
            None => false,
        },
        Value::Bool(b) => match actual {
            Value::Bool(a) => a == b,
            Value::String(s) => s.parse::<bool>().map(|p| p == *b).unwrap_or(false),
            _ => false,
        },
        other => other == actual,
    }
}

/// Glob with one wildcard token: `prefix*suffix`. Characters after a second
/// `*` are taken literally; nested wildcards are not supported.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == value,
        Some((prefix, suffix)) => {
            value.len() >= prefix.len() + suffix.len()
                && value.starts_with(prefix)
                && value.ends_with(suffix)
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::finding::Severity;
    use crate::model::rule::Matches;
    use crate::model::{ObjectMeta, ScanSpec};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn make_finding(category: &str, attributes: &[(&str, Value)]) -> Finding {
        Finding {
            id: None,
            name: None,
            category: category.to_string(),
            severity: Severity::High,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn condition(pairs: &[(&str, Value)]) -> MatchCondition {
        MatchCondition(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn make_rule(any_of: Vec<MatchCondition>) -> CascadingRule {
        CascadingRule {
            metadata: ObjectMeta::new("test-rule", "default"),
            spec: crate::model::rule::CascadingRuleSpec {
                matches: Matches { any_of },
                scan_spec: ScanSpec {
                    scan_type: "nmap".to_string(),
                    ..Default::default()
                },
                scan_labels: BTreeMap::new(),
                scan_annotations: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(wildcard_match("prod-*", "prod-db-1"));
        assert!(!wildcard_match("prod-*", "staging-db-1"));
        assert!(wildcard_match("*-db-1", "prod-db-1"));
        assert!(wildcard_match("prod-*-1", "prod-db-1"));
        assert!(wildcard_match("exact", "exact"));
        assert!(!wildcard_match("prod-*-1", "prod-1"));
    }

    #[test]
    fn test_condition_pairs_combine_with_and() {
        let f = make_finding("open-port", &[("port", json!(22)), ("service", json!("ssh"))]);

        let both = condition(&[
            ("attributes.port", json!(22)),
            ("attributes.service", json!("ssh")),
        ]);
        assert!(condition_matches(&both, &f));

        let one_wrong = condition(&[
            ("attributes.port", json!(22)),
            ("attributes.service", json!("telnet")),
        ]);
        assert!(!condition_matches(&one_wrong, &f));
    }

    #[test]
    fn test_missing_path_is_a_non_match() {
        let f = make_finding("open-port", &[("service", json!("ssh"))]);
        let cond = condition(&[("attributes.banner", json!("*OpenSSH*"))]);
        assert!(!condition_matches(&cond, &f));

        // Removing a required path flips a match to a non-match.
        let cond = condition(&[("attributes.service", json!("ssh"))]);
        assert!(condition_matches(&cond, &f));
        let stripped = make_finding("open-port", &[]);
        assert!(!condition_matches(&cond, &stripped));
    }

    #[test]
    fn test_numeric_coercion() {
        let f = make_finding("open-port", &[("port", json!("22"))]);
        assert!(condition_matches(&condition(&[("attributes.port", json!(22))]), &f));

        let f = make_finding("open-port", &[("port", json!(22))]);
        assert!(condition_matches(&condition(&[("attributes.port", json!("22"))]), &f));
        assert!(!condition_matches(&condition(&[("attributes.port", json!(23))]), &f));
    }

    #[test]
    fn test_boolean_coercion() {
        let f = make_finding("tls", &[("selfSigned", json!(true))]);
        assert!(condition_matches(&condition(&[("attributes.selfSigned", json!(true))]), &f));
        assert!(condition_matches(&condition(&[("attributes.selfSigned", json!("true"))]), &f));
        assert!(!condition_matches(&condition(&[("attributes.selfSigned", json!(false))]), &f));
    }

    #[test]
    fn test_severity_and_category_paths() {
        let f = make_finding("open-port", &[]);
        assert!(condition_matches(
            &condition(&[("category", json!("open-port")), ("severity", json!("HIGH"))]),
            &f
        ));
        assert!(!condition_matches(&condition(&[("severity", json!("LOW"))]), &f));
    }

    #[test]
    fn test_any_of_combines_with_or() {
        let f = make_finding("open-port", &[("service", json!("ssh"))]);
        let rule = make_rule(vec![
            condition(&[("attributes.service", json!("telnet"))]),
            condition(&[("attributes.service", json!("ssh"))]),
        ]);
        assert!(rule_matches(&rule, &[f]));
    }

    #[test]
    fn test_empty_condition_matches_nothing() {
        let f = make_finding("open-port", &[]);
        let rule = make_rule(vec![MatchCondition::default()]);
        assert!(!rule_matches(&rule, &[f]));
    }

    #[test]
    fn test_rule_without_findings_never_matches() {
        let rule = make_rule(vec![condition(&[("category", json!("open-port"))])]);
        assert!(!rule_matches(&rule, &[]));
    }
}
