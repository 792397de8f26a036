//! The cluster resource store boundary. The store is authoritative; the
//! core never keeps a durable copy of anything it reads from here.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::model::rule::CascadingRule;
use crate::model::{LabelSelector, Scan, ScanStatus};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("resource '{0}' not found")]
    NotFound(String),

    /// Identity conflict on create. Benign for deterministic resubmission.
    #[error("resource '{0}' already exists")]
    AlreadyExists(String),

    #[error("write conflict on '{0}'")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

/// Namespaced reference to a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanRef {
    pub namespace: String,
    pub name: String,
}

impl ScanRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ScanRef {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Level-triggered change notifications. Receivers reconcile the affected
/// scan(s); the payload carries identity only, never state.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A scan was created or its record changed.
    ScanApplied(ScanRef),
    /// A scan record was removed; dependent workloads must be cleaned up.
    ScanDeleted(ScanRef),
    /// A cascading rule appeared or changed in a namespace.
    RuleApplied(String),
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a scan; `AlreadyExists` on identity collision.
    async fn create_scan(&self, scan: Scan) -> Result<(), StoreError>;

    async fn get_scan(&self, namespace: &str, name: &str) -> Result<Scan, StoreError>;

    async fn list_scans(&self, namespace: &str) -> Result<Vec<Scan>, StoreError>;

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: ScanStatus,
    ) -> Result<(), StoreError>;

    /// Flag a scan for cancellation by stamping its deletion timestamp.
    async fn request_deletion(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Remove the record entirely.
    async fn delete_scan(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// List rules in a namespace, optionally narrowed by a label selector.
    async fn list_rules(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<CascadingRule>, StoreError>;

    async fn put_rule(&self, rule: CascadingRule) -> Result<(), StoreError>;

    fn watch(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-memory store used by tests and local runs. Mimics the identity and
/// notification semantics of the real cluster store at the boundary.
#[derive(Debug)]
pub struct InMemoryStore {
    scans: RwLock<HashMap<String, Scan>>,
    rules: RwLock<HashMap<String, CascadingRule>>,
    events: broadcast::Sender<StoreEvent>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(InMemoryStore {
            scans: RwLock::new(HashMap::new()),
            rules: RwLock::new(HashMap::new()),
            events,
        })
    }

    fn notify(&self, event: StoreEvent) {
        // Nobody listening is fine; the CLI submits without a controller.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn create_scan(&self, scan: Scan) -> Result<(), StoreError> {
        let key = scan.metadata.key();
        let mut scans = self.scans.write().await;
        if scans.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        let reference = ScanRef::new(&scan.metadata.namespace, &scan.metadata.name);
        scans.insert(key, scan);
        drop(scans);
        self.notify(StoreEvent::ScanApplied(reference));
        Ok(())
    }

    async fn get_scan(&self, namespace: &str, name: &str) -> Result<Scan, StoreError> {
        let key = format!("{}/{}", namespace, name);
        self.scans
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }

    async fn list_scans(&self, namespace: &str) -> Result<Vec<Scan>, StoreError> {
        let mut scans: Vec<Scan> = self
            .scans
            .read()
            .await
            .values()
            .filter(|s| s.metadata.namespace == namespace)
            .cloned()
            .collect();
        scans.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(scans)
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: ScanStatus,
    ) -> Result<(), StoreError> {
        let key = format!("{}/{}", namespace, name);
        let mut scans = self.scans.write().await;
        let scan = scans.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        scan.status = status;
        drop(scans);
        self.notify(StoreEvent::ScanApplied(ScanRef::new(namespace, name)));
        Ok(())
    }

    async fn request_deletion(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = format!("{}/{}", namespace, name);
        let mut scans = self.scans.write().await;
        let scan = scans.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        if scan.metadata.deletion_timestamp.is_none() {
            scan.metadata.deletion_timestamp = Some(Utc::now());
        }
        drop(scans);
        self.notify(StoreEvent::ScanApplied(ScanRef::new(namespace, name)));
        Ok(())
    }

    async fn delete_scan(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = format!("{}/{}", namespace, name);
        let removed = self.scans.write().await.remove(&key);
        if removed.is_none() {
            return Err(StoreError::NotFound(key));
        }
        self.notify(StoreEvent::ScanDeleted(ScanRef::new(namespace, name)));
        Ok(())
    }

    async fn list_rules(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<CascadingRule>, StoreError> {
        let mut rules: Vec<CascadingRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.metadata.namespace == namespace)
            .filter(|r| selector.map_or(true, |s| s.matches(&r.metadata.labels)))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(rules)
    }

    async fn put_rule(&self, rule: CascadingRule) -> Result<(), StoreError> {
        let namespace = rule.metadata.namespace.clone();
        self.rules.write().await.insert(rule.metadata.key(), rule);
        self.notify(StoreEvent::RuleApplied(namespace));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectMeta, ScanSpec};

    fn make_scan(name: &str) -> Scan {
        Scan {
            metadata: ObjectMeta::new(name, "default"),
            spec: ScanSpec {
                scan_type: "nmap".to_string(),
                ..Default::default()
            },
            origin: None,
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_conflicts_on_duplicate_name() {
        let store = InMemoryStore::new();
        store.create_scan(make_scan("s1")).await.unwrap();
        let err = store.create_scan(make_scan("s1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_watch_sees_lifecycle_events() {
        let store = InMemoryStore::new();
        let mut rx = store.watch();

        store.create_scan(make_scan("s1")).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            StoreEvent::ScanApplied(r) if r.name == "s1"
        ));

        store.delete_scan("default", "s1").await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            StoreEvent::ScanDeleted(r) if r.name == "s1"
        ));
    }

    #[tokio::test]
    async fn test_request_deletion_stamps_timestamp_once() {
        let store = InMemoryStore::new();
        store.create_scan(make_scan("s1")).await.unwrap();
        store.request_deletion("default", "s1").await.unwrap();
        let first = store.get_scan("default", "s1").await.unwrap();
        let stamp = first.metadata.deletion_timestamp.unwrap();

        store.request_deletion("default", "s1").await.unwrap();
        let second = store.get_scan("default", "s1").await.unwrap();
        assert_eq!(second.metadata.deletion_timestamp, Some(stamp));
    }

    #[tokio::test]
    async fn test_rules_listed_by_label_selector() {
        use crate::model::rule::{CascadingRuleSpec, Matches};
        use std::collections::BTreeMap;

        let store = InMemoryStore::new();
        for (name, scope) in [("r1", "network"), ("r2", "web")] {
            let mut metadata = ObjectMeta::new(name, "default");
            metadata.labels.insert("scope".to_string(), scope.to_string());
            store
                .put_rule(CascadingRule {
                    metadata,
                    spec: CascadingRuleSpec {
                        matches: Matches::default(),
                        scan_spec: ScanSpec {
                            scan_type: "nmap".to_string(),
                            ..Default::default()
                        },
                        scan_labels: BTreeMap::new(),
                        scan_annotations: BTreeMap::new(),
                    },
                })
                .await
                .unwrap();
        }

        assert_eq!(store.list_rules("default", None).await.unwrap().len(), 2);

        let selector = LabelSelector {
            match_labels: BTreeMap::from([("scope".to_string(), "network".to_string())]),
        };
        let selected = store.list_rules("default", Some(&selector)).await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].metadata.name, "r1");
    }

    #[tokio::test]
    async fn test_scans_listed_per_namespace() {
        let store = InMemoryStore::new();
        store.create_scan(make_scan("s1")).await.unwrap();
        let mut other = make_scan("s2");
        other.metadata.namespace = "team-a".to_string();
        store.create_scan(other).await.unwrap();

        assert_eq!(store.list_scans("default").await.unwrap().len(), 1);
        assert_eq!(store.list_scans("team-a").await.unwrap().len(), 1);
        assert!(store.list_scans("empty").await.unwrap().is_empty());
    }
}
