//! The container scheduler boundary. The core requests execution and
//! observes terminal signals; it never interprets execution internals.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::model::finding::Finding;
use crate::model::workload::{Workload, WorkloadState};
use crate::store::ScanRef;

#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// A workload with this name already runs. Benign under deterministic
    /// (scan, phase) naming; the caller treats it as "already ensured".
    #[error("workload '{0}' already exists")]
    AlreadyExists(String),

    #[error("artifact '{0}' not found")]
    ArtifactNotFound(String),

    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

impl SchedulerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::Unavailable(_))
    }
}

#[async_trait]
pub trait WorkloadScheduler: Send + Sync {
    /// Schedule a workload; `AlreadyExists` on name collision.
    async fn create_workload(&self, workload: Workload) -> Result<(), SchedulerError>;

    /// Current state, or `None` if no such workload exists.
    async fn workload_state(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadState>, SchedulerError>;

    /// Remove one workload, e.g. a failed run before a retry.
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), SchedulerError>;

    /// Remove every workload owned by a scan.
    async fn delete_scan_workloads(
        &self,
        namespace: &str,
        scan: &str,
    ) -> Result<(), SchedulerError>;

    /// Read parsed findings from an output artifact reference.
    async fn read_findings(&self, artifact: &str) -> Result<Vec<Finding>, SchedulerError>;

    /// Completion notifications, keyed by owning scan.
    fn watch(&self) -> broadcast::Receiver<ScanRef>;
}

/// In-memory scheduler for tests and local runs. Workloads stay `Pending`
/// until a test hook drives them to a terminal state.
#[derive(Debug)]
pub struct InMemoryScheduler {
    workloads: RwLock<HashMap<String, Workload>>,
    artifacts: RwLock<HashMap<String, Vec<Finding>>>,
    unavailable: AtomicBool,
    events: broadcast::Sender<ScanRef>,
}

impl InMemoryScheduler {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(InMemoryScheduler {
            workloads: RwLock::new(HashMap::new()),
            artifacts: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            events,
        })
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{}/{}", namespace, name)
    }

    /// Simulate scheduler downtime: every call fails `Unavailable`.
    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SchedulerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchedulerError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    /// Test hook: drive a workload to success and stage its artifact.
    pub async fn complete_workload(
        &self,
        namespace: &str,
        name: &str,
        artifact: &str,
        findings: Vec<Finding>,
    ) {
        let key = Self::key(namespace, name);
        let mut workloads = self.workloads.write().await;
        let workload = workloads
            .get_mut(&key)
            .unwrap_or_else(|| panic!("no workload '{}'", key));
        workload.state = WorkloadState::Succeeded {
            artifact: artifact.to_string(),
        };
        let owner = ScanRef::new(namespace, &workload.scan);
        drop(workloads);
        self.artifacts
            .write()
            .await
            .insert(artifact.to_string(), findings);
        let _ = self.events.send(owner);
    }

    /// Test hook: drive a workload to failure.
    pub async fn fail_workload(&self, namespace: &str, name: &str, reason: &str) {
        let key = Self::key(namespace, name);
        let mut workloads = self.workloads.write().await;
        let workload = workloads
            .get_mut(&key)
            .unwrap_or_else(|| panic!("no workload '{}'", key));
        workload.state = WorkloadState::Failed {
            reason: reason.to_string(),
        };
        let owner = ScanRef::new(namespace, &workload.scan);
        drop(workloads);
        let _ = self.events.send(owner);
    }

    pub async fn workload_count_for(&self, namespace: &str, scan: &str) -> usize {
        self.workloads
            .read()
            .await
            .values()
            .filter(|w| w.namespace == namespace && w.scan == scan)
            .count()
    }
}

#[async_trait]
impl WorkloadScheduler for InMemoryScheduler {
    async fn create_workload(&self, workload: Workload) -> Result<(), SchedulerError> {
        self.check_available()?;
        let key = Self::key(&workload.namespace, &workload.name);
        let mut workloads = self.workloads.write().await;
        if workloads.contains_key(&key) {
            return Err(SchedulerError::AlreadyExists(key));
        }
        workloads.insert(key, workload);
        Ok(())
    }

    async fn workload_state(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadState>, SchedulerError> {
        self.check_available()?;
        Ok(self
            .workloads
            .read()
            .await
            .get(&Self::key(namespace, name))
            .map(|w| w.state.clone()))
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), SchedulerError> {
        self.check_available()?;
        self.workloads
            .write()
            .await
            .remove(&Self::key(namespace, name));
        Ok(())
    }

    async fn delete_scan_workloads(
        &self,
        namespace: &str,
        scan: &str,
    ) -> Result<(), SchedulerError> {
        self.check_available()?;
        self.workloads
            .write()
            .await
            .retain(|_, w| !(w.namespace == namespace && w.scan == scan));
        Ok(())
    }

    async fn read_findings(&self, artifact: &str) -> Result<Vec<Finding>, SchedulerError> {
        self.check_available()?;
        self.artifacts
            .read()
            .await
            .get(artifact)
            .cloned()
            .ok_or_else(|| SchedulerError::ArtifactNotFound(artifact.to_string()))
    }

    fn watch(&self) -> broadcast::Receiver<ScanRef> {
        self.events.subscribe()
    }
}
