//! Cascading rule engine: turns a completed scan's findings into follow-up
//! scan requests, with a hard generation bound as the termination guarantee.

use std::collections::BTreeMap;
use tracing::debug;

use crate::matcher;
use crate::model::finding::Finding;
use crate::model::rule::CascadingRule;
use crate::model::{CascadeOrigin, Scan, ScanRequest};

/// Result of one engine evaluation.
#[derive(Debug, Clone, Default)]
pub struct CascadeOutcome {
    pub requests: Vec<ScanRequest>,
    /// Rules skipped because the child would exceed the depth bound.
    /// Expected steady-state behavior, counted rather than errored.
    pub skipped_by_depth: u64,
}

/// Rules a scan has opted into: same namespace, labels satisfying the
/// scan's `spec.cascades` selector. No selector means no cascading.
pub fn applicable_rules<'a>(scan: &Scan, rules: &'a [CascadingRule]) -> Vec<&'a CascadingRule> {
    let Some(selector) = &scan.spec.cascades else {
        return Vec::new();
    };
    rules
        .iter()
        .filter(|rule| rule.metadata.namespace == scan.metadata.namespace)
        .filter(|rule| selector.matches(&rule.metadata.labels))
        .collect()
}

/// Evaluate every applicable rule against the findings. At most one request
/// per (parent, rule) pair comes out, and the child name is derived from
/// that pair, so re-evaluation collides in the store instead of duplicating.
pub fn evaluate(
    scan: &Scan,
    findings: &[Finding],
    rules: &[CascadingRule],
    max_depth: u32,
) -> CascadeOutcome {
    let mut outcome = CascadeOutcome::default();
    let child_generation = scan.generation() + 1;

    for rule in applicable_rules(scan, rules) {
        if child_generation > max_depth {
            debug!(
                scan = %scan.metadata.name,
                rule = %rule.name(),
                generation = child_generation,
                max_depth,
                "skipping rule, cascade depth bound reached"
            );
            outcome.skipped_by_depth += 1;
            continue;
        }
        if !matcher::rule_matches(rule, findings) {
            continue;
        }
        outcome.requests.push(child_request(scan, rule, child_generation));
    }

    outcome
}

/// Deterministic child identity for a (parent, rule) pair, clipped to the
/// DNS label limit. Determinism is the idempotency mechanism.
pub fn child_name(parent: &str, rule: &str) -> String {
    let mut name = format!("{}-{}", parent, rule);
    if name.len() > 63 {
        name.truncate(63);
        while name.ends_with('-') {
            name.pop();
        }
    }
    name
}

fn child_request(scan: &Scan, rule: &CascadingRule, generation: u32) -> ScanRequest {
    ScanRequest {
        name: child_name(&scan.metadata.name, rule.name()),
        namespace: scan.metadata.namespace.clone(),
        labels: merged(&scan.metadata.labels, &rule.spec.scan_labels),
        annotations: merged(&scan.metadata.annotations, &rule.spec.scan_annotations),
        spec: rule.spec.scan_spec.clone(),
        origin: Some(CascadeOrigin {
            parent_scan: scan.metadata.name.clone(),
            rule: rule.name().to_string(),
            generation,
        }),
    }
}

/// Rule values merged over parent values, rule winning on collision.
fn merged(
    parent: &BTreeMap<String, String>,
    rule: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut out = parent.clone();
    for (k, v) in rule {
        out.insert(k.clone(), v.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::finding::Severity;
    use crate::model::rule::{CascadingRuleSpec, MatchCondition, Matches};
    use crate::model::{LabelSelector, ObjectMeta, ScanSpec};
    use serde_json::json;

    fn ssh_finding() -> Finding {
        Finding {
            id: None,
            name: None,
            category: "open-port".to_string(),
            severity: Severity::Medium,
            attributes: BTreeMap::from([
                ("port".to_string(), json!(22)),
                ("service".to_string(), json!("ssh")),
            ]),
        }
    }

    fn make_rule(name: &str, service: &str) -> CascadingRule {
        let mut metadata = ObjectMeta::new(name, "default");
        metadata
            .labels
            .insert("scope".to_string(), "network".to_string());
        CascadingRule {
            metadata,
            spec: CascadingRuleSpec {
                matches: Matches {
                    any_of: vec![MatchCondition(BTreeMap::from([(
                        "attributes.service".to_string(),
                        json!(service),
                    )]))],
                },
                scan_spec: ScanSpec {
                    scan_type: "ssh-audit".to_string(),
                    parameters: vec!["--deep".to_string()],
                    cascades: None,
                },
                scan_labels: BTreeMap::from([("origin".to_string(), "cascade".to_string())]),
                scan_annotations: BTreeMap::new(),
            },
        }
    }

    fn make_scan(name: &str, generation: u32) -> Scan {
        let mut metadata = ObjectMeta::new(name, "default");
        metadata
            .labels
            .insert("origin".to_string(), "manual".to_string());
        metadata
            .labels
            .insert("team".to_string(), "security".to_string());
        Scan {
            metadata,
            spec: ScanSpec {
                scan_type: "nmap".to_string(),
                parameters: vec!["10.0.0.1".to_string()],
                cascades: Some(LabelSelector {
                    match_labels: BTreeMap::from([(
                        "scope".to_string(),
                        "network".to_string(),
                    )]),
                }),
            },
            origin: if generation == 0 {
                None
            } else {
                Some(CascadeOrigin {
                    parent_scan: "root".to_string(),
                    rule: "r".to_string(),
                    generation,
                })
            },
            status: Default::default(),
        }
    }

    #[test]
    fn test_matching_rule_produces_one_child() {
        let scan = make_scan("nmap-1", 0);
        let rules = vec![make_rule("ssh-audit-rule", "ssh")];
        let outcome = evaluate(&scan, &[ssh_finding()], &rules, 3);

        assert_eq!(outcome.requests.len(), 1);
        let child = &outcome.requests[0];
        assert_eq!(child.name, "nmap-1-ssh-audit-rule");
        assert_eq!(child.spec.scan_type, "ssh-audit");
        let origin = child.origin.as_ref().unwrap();
        assert_eq!(origin.parent_scan, "nmap-1");
        assert_eq!(origin.rule, "ssh-audit-rule");
        assert_eq!(origin.generation, 1);
    }

    #[test]
    fn test_multiple_matching_findings_still_one_child_per_rule() {
        let scan = make_scan("nmap-1", 0);
        let rules = vec![make_rule("ssh-audit-rule", "ssh")];
        let findings = vec![ssh_finding(), ssh_finding(), ssh_finding()];
        let outcome = evaluate(&scan, &findings, &rules, 3);
        assert_eq!(outcome.requests.len(), 1);
    }

    #[test]
    fn test_re_evaluation_is_deterministic() {
        let scan = make_scan("nmap-1", 0);
        let rules = vec![make_rule("ssh-audit-rule", "ssh")];
        let first = evaluate(&scan, &[ssh_finding()], &rules, 3);
        let second = evaluate(&scan, &[ssh_finding()], &rules, 3);
        assert_eq!(first.requests, second.requests);
    }

    #[test]
    fn test_depth_bound_skips_rule() {
        let scan = make_scan("deep", 3);
        let rules = vec![make_rule("ssh-audit-rule", "ssh")];
        let outcome = evaluate(&scan, &[ssh_finding()], &rules, 3);
        assert!(outcome.requests.is_empty());
        assert_eq!(outcome.skipped_by_depth, 1);

        let shallow = make_scan("shallow", 2);
        let outcome = evaluate(&shallow, &[ssh_finding()], &rules, 3);
        assert_eq!(outcome.requests.len(), 1);
        assert_eq!(outcome.requests[0].origin.as_ref().unwrap().generation, 3);
    }

    #[test]
    fn test_rule_labels_win_on_merge() {
        let scan = make_scan("nmap-1", 0);
        let rules = vec![make_rule("ssh-audit-rule", "ssh")];
        let outcome = evaluate(&scan, &[ssh_finding()], &rules, 3);
        let child = &outcome.requests[0];

        // Parent had origin=manual; the rule overrides it, the rest survives.
        assert_eq!(child.labels.get("origin"), Some(&"cascade".to_string()));
        assert_eq!(child.labels.get("team"), Some(&"security".to_string()));
    }

    #[test]
    fn test_scan_without_selector_never_cascades() {
        let mut scan = make_scan("nmap-1", 0);
        scan.spec.cascades = None;
        let rules = vec![make_rule("ssh-audit-rule", "ssh")];
        let outcome = evaluate(&scan, &[ssh_finding()], &rules, 3);
        assert!(outcome.requests.is_empty());
        assert_eq!(outcome.skipped_by_depth, 0);
    }

    #[test]
    fn test_selector_scopes_rules() {
        let scan = make_scan("nmap-1", 0);
        let mut off_scope = make_rule("other-rule", "ssh");
        off_scope.metadata.labels.insert("scope".to_string(), "web".to_string());
        let mut off_namespace = make_rule("far-rule", "ssh");
        off_namespace.metadata.namespace = "team-b".to_string();

        let rules = vec![off_scope, off_namespace, make_rule("ssh-audit-rule", "ssh")];
        let outcome = evaluate(&scan, &[ssh_finding()], &rules, 3);
        assert_eq!(outcome.requests.len(), 1);
        assert_eq!(outcome.requests[0].origin.as_ref().unwrap().rule, "ssh-audit-rule");
    }

    #[test]
    fn test_non_matching_rule_produces_nothing() {
        let scan = make_scan("nmap-1", 0);
        let rules = vec![make_rule("telnet-rule", "telnet")];
        let outcome = evaluate(&scan, &[ssh_finding()], &rules, 3);
        assert!(outcome.requests.is_empty());
    }

    #[test]
    fn test_child_name_clipped_to_dns_label() {
        let long = "a".repeat(50);
        let name = child_name(&long, "very-long-cascading-rule-name");
        assert!(name.len() <= 63);
        assert!(!name.ends_with('-'));
        assert_eq!(name, child_name(&long, "very-long-cascading-rule-name"));
    }
}
