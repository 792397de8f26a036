//! The scan lifecycle controller: a level-triggered reconciler that drives
//! each scan through `Init -> Scanning -> Parsing -> Cascading -> Done`.
//!
//! Reconciliation is a resumable step function. Everything needed to resume
//! lives in the scan record, so the controller survives restarts with no
//! in-process state. A single event loop serializes reconciles, which keeps
//! phase transitions for one scan totally ordered.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::cascade;
use crate::config::ScanflowConfig;
use crate::error::Error;
use crate::metrics::ControllerMetrics;
use crate::model::workload::{workload_name, Workload, WorkloadKind, WorkloadState};
use crate::model::{Condition, Phase, Scan};
use crate::scheduler::WorkloadScheduler;
use crate::store::{ResourceStore, ScanRef, StoreError, StoreEvent};

/// What the caller should do after a reconcile: nothing, or try again
/// after a delay (retry backoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    fn done() -> Self {
        ReconcileOutcome::default()
    }

    fn after(delay: Duration) -> Self {
        ReconcileOutcome {
            requeue_after: Some(delay),
        }
    }
}

pub struct ScanController {
    store: Arc<dyn ResourceStore>,
    scheduler: Arc<dyn WorkloadScheduler>,
    config: ScanflowConfig,
    metrics: Arc<ControllerMetrics>,
}

impl ScanController {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        scheduler: Arc<dyn WorkloadScheduler>,
        config: ScanflowConfig,
    ) -> Self {
        ScanController {
            store,
            scheduler,
            config,
            metrics: Arc::new(ControllerMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<ControllerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// One reconciliation step for one scan. Idempotent: re-running against
    /// unchanged state creates no second workload and no second child scan.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, Error> {
        let mut scan = match self.store.get_scan(namespace, name).await {
            Ok(scan) => scan,
            // Already gone; workload cleanup rides on the deletion event.
            Err(StoreError::NotFound(_)) => return Ok(ReconcileOutcome::done()),
            Err(e) => return Err(e.into()),
        };

        if scan.status.phase.is_terminal() {
            // A create racing the cancellation may have landed after the
            // cleanup; sweep again rather than let the workload run.
            if scan.status.phase == Phase::Cancelled {
                self.scheduler
                    .delete_scan_workloads(&scan.metadata.namespace, &scan.metadata.name)
                    .await?;
            }
            return Ok(ReconcileOutcome::done());
        }

        // Cancellation wins over any further phase advancement.
        if scan.metadata.deletion_timestamp.is_some() {
            return self.cancel(&mut scan).await;
        }

        match scan.status.phase {
            Phase::Init => self.start(&mut scan).await,
            Phase::Scanning => self.observe(&mut scan, WorkloadKind::Scanner).await,
            Phase::Parsing => self.observe(&mut scan, WorkloadKind::Parser).await,
            Phase::Cascading => self.finish(&mut scan).await,
            Phase::Done | Phase::Errored | Phase::Cancelled => Ok(ReconcileOutcome::done()),
        }
    }

    async fn start(&self, scan: &mut Scan) -> Result<ReconcileOutcome, Error> {
        if let Err(e) = scan.spec.validate() {
            // Malformed specs are non-retriable by definition.
            return self.fail(scan, "InvalidSpec", &e.to_string()).await;
        }

        let args = scan.spec.parameters.clone();
        self.ensure_workload(scan, WorkloadKind::Scanner, args).await?;
        self.transition(scan, Phase::Scanning, "ScannerScheduled", "scanner workload created")?;
        self.update(scan).await?;
        Ok(ReconcileOutcome::done())
    }

    /// Observe the active workload of the current phase and advance on its
    /// terminal signal.
    async fn observe(
        &self,
        scan: &mut Scan,
        kind: WorkloadKind,
    ) -> Result<ReconcileOutcome, Error> {
        let name = workload_name(&scan.metadata.name, kind);
        let state = self
            .scheduler
            .workload_state(&scan.metadata.namespace, &name)
            .await?;

        match state {
            // Nothing active for this phase: create it. Covers the first
            // pass after a retry deleted the failed run, and lost workloads.
            None => {
                let args = self.workload_args(scan, kind);
                self.ensure_workload(scan, kind, args).await?;
                Ok(ReconcileOutcome::done())
            }
            Some(WorkloadState::Pending) | Some(WorkloadState::Running) => {
                Ok(ReconcileOutcome::done())
            }
            Some(WorkloadState::Succeeded { artifact }) => match kind {
                WorkloadKind::Scanner => {
                    scan.status.raw_result = Some(artifact.clone());
                    scan.status.retries = 0;
                    self.transition(scan, Phase::Parsing, "ScannerCompleted", "raw result ready")?;
                    self.ensure_workload(scan, WorkloadKind::Parser, vec![artifact]).await?;
                    self.update(scan).await?;
                    Ok(ReconcileOutcome::done())
                }
                WorkloadKind::Parser | WorkloadKind::Hook => {
                    scan.status.findings = Some(artifact);
                    scan.status.retries = 0;
                    self.transition(scan, Phase::Cascading, "ParserCompleted", "findings ready")?;
                    self.update(scan).await?;
                    self.finish(scan).await
                }
            },
            Some(WorkloadState::Failed { reason }) => self.retry(scan, kind, &name, &reason).await,
        }
    }

    /// Evaluate cascading rules against the findings and close the scan out.
    async fn finish(&self, scan: &mut Scan) -> Result<ReconcileOutcome, Error> {
        let findings = match &scan.status.findings {
            Some(reference) => self.scheduler.read_findings(reference).await?,
            None => Vec::new(),
        };

        let rules = self
            .store
            .list_rules(&scan.metadata.namespace, scan.spec.cascades.as_ref())
            .await?;
        let outcome = cascade::evaluate(scan, &findings, &rules, self.config.cascade.max_depth);
        self.metrics
            .cascade_rules_skipped_depth
            .fetch_add(outcome.skipped_by_depth, Ordering::Relaxed);

        for request in outcome.requests {
            let child = request.name.clone();
            match self.store.create_scan(Scan::from_request(request)).await {
                Ok(()) => {
                    self.metrics.cascade_children_created.fetch_add(1, Ordering::Relaxed);
                    info!(
                        scan = %scan.metadata.name,
                        child = %child,
                        "cascading rule spawned child scan"
                    );
                }
                // The child already exists, typically from an earlier run of
                // this very reconcile. The deterministic name makes this the
                // expected dedup path, not a failure.
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(scan = %scan.metadata.name, child = %child, "child scan already exists");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.transition(scan, Phase::Done, "ScanCompleted", "scan finished")?;
        self.update(scan).await?;
        self.metrics.scans_completed.fetch_add(1, Ordering::Relaxed);
        Ok(ReconcileOutcome::done())
    }

    async fn retry(
        &self,
        scan: &mut Scan,
        kind: WorkloadKind,
        workload: &str,
        reason: &str,
    ) -> Result<ReconcileOutcome, Error> {
        if scan.status.retries >= self.config.controller.max_retries {
            return self
                .fail(
                    scan,
                    "RetryBudgetExhausted",
                    &format!("{} workload failed: {}", kind, reason),
                )
                .await;
        }

        scan.status.retries += 1;
        let delay = self.config.controller.backoff(scan.status.retries - 1);
        warn!(
            scan = %scan.metadata.name,
            workload = %workload,
            reason = %reason,
            retry = scan.status.retries,
            delay_secs = delay.as_secs(),
            "workload failed, retrying after backoff"
        );

        // Drop the failed run so the next pass can re-create under the
        // same deterministic name.
        self.scheduler
            .delete_workload(&scan.metadata.namespace, workload)
            .await?;
        self.update(scan).await?;
        Ok(ReconcileOutcome::after(delay))
    }

    async fn cancel(&self, scan: &mut Scan) -> Result<ReconcileOutcome, Error> {
        self.scheduler
            .delete_scan_workloads(&scan.metadata.namespace, &scan.metadata.name)
            .await?;
        self.transition(scan, Phase::Cancelled, "Cancelled", "deletion requested")?;
        self.update(scan).await?;
        self.metrics.scans_cancelled.fetch_add(1, Ordering::Relaxed);
        info!(scan = %scan.metadata.name, "scan cancelled, workloads cleaned up");
        Ok(ReconcileOutcome::done())
    }

    async fn fail(
        &self,
        scan: &mut Scan,
        reason: &str,
        message: &str,
    ) -> Result<ReconcileOutcome, Error> {
        scan.status.failure_reason = Some(message.to_string());
        self.transition(scan, Phase::Errored, reason, message)?;
        self.update(scan).await?;
        self.metrics.scans_errored.fetch_add(1, Ordering::Relaxed);
        warn!(scan = %scan.metadata.name, reason, message, "scan errored");
        Ok(ReconcileOutcome::done())
    }

    fn workload_args(&self, scan: &Scan, kind: WorkloadKind) -> Vec<String> {
        match kind {
            WorkloadKind::Scanner => scan.spec.parameters.clone(),
            // The parser consumes the scanner's raw output reference.
            WorkloadKind::Parser | WorkloadKind::Hook => {
                scan.status.raw_result.iter().cloned().collect()
            }
        }
    }

    /// Create the phase's workload unless one is already active. The
    /// deterministic name turns the check-then-create race into a benign
    /// identity conflict.
    async fn ensure_workload(
        &self,
        scan: &Scan,
        kind: WorkloadKind,
        args: Vec<String>,
    ) -> Result<(), Error> {
        let namespace = &scan.metadata.namespace;
        let name = workload_name(&scan.metadata.name, kind);
        if self.scheduler.workload_state(namespace, &name).await?.is_some() {
            return Ok(());
        }

        let workload = Workload {
            name: name.clone(),
            namespace: namespace.clone(),
            scan: scan.metadata.name.clone(),
            kind,
            scan_type: scan.spec.scan_type.clone(),
            args,
            state: WorkloadState::Pending,
        };
        match self.scheduler.create_workload(workload).await {
            Ok(()) => {
                self.metrics.workloads_created.fetch_add(1, Ordering::Relaxed);
                info!(scan = %scan.metadata.name, workload = %name, kind = %kind, "workload created");
                Ok(())
            }
            Err(crate::scheduler::SchedulerError::AlreadyExists(_)) => {
                debug!(workload = %name, "workload already active");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transition(
        &self,
        scan: &mut Scan,
        to: Phase,
        reason: &str,
        message: &str,
    ) -> Result<(), Error> {
        let from = scan.status.phase;
        if !from.can_transition_to(to) {
            return Err(Error::PhaseTransition { from, to });
        }
        scan.status.conditions.push(Condition {
            phase: to,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        scan.status.phase = to;
        info!(scan = %scan.metadata.name, %from, %to, reason, "phase transition");
        Ok(())
    }

    async fn update(&self, scan: &Scan) -> Result<(), Error> {
        self.store
            .update_status(
                &scan.metadata.namespace,
                &scan.metadata.name,
                scan.status.clone(),
            )
            .await?;
        Ok(())
    }

    /// Level-triggered event loop. Store changes, workload completions and
    /// backoff requeues all funnel into the same serial reconcile path.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut store_events = self.store.watch();
        let mut scheduler_events = self.scheduler.watch();
        let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<ScanRef>();

        info!("scan controller started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = store_events.recv() => match event {
                    Ok(StoreEvent::ScanApplied(reference)) => {
                        self.process(reference, &requeue_tx).await;
                    }
                    Ok(StoreEvent::ScanDeleted(reference)) => {
                        if let Err(e) = self
                            .scheduler
                            .delete_scan_workloads(&reference.namespace, &reference.name)
                            .await
                        {
                            warn!(scan = %reference.name, error = %e, "workload cleanup after deletion failed");
                        }
                    }
                    Ok(StoreEvent::RuleApplied(namespace)) => {
                        self.resync_namespace(&namespace, &requeue_tx).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "store watch lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = scheduler_events.recv() => match event {
                    Ok(reference) => self.process(reference, &requeue_tx).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "scheduler watch lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(reference) = requeue_rx.recv() => {
                    self.process(reference, &requeue_tx).await;
                }
            }
        }
        info!("scan controller stopped");
    }

    async fn process(&self, reference: ScanRef, requeue_tx: &mpsc::UnboundedSender<ScanRef>) {
        match self.reconcile(&reference.namespace, &reference.name).await {
            Ok(outcome) => {
                if let Some(delay) = outcome.requeue_after {
                    schedule_requeue(requeue_tx.clone(), reference, delay);
                }
            }
            Err(e) if e.is_transient() => {
                warn!(scan = %reference.name, error = %e, "transient reconcile failure");
                self.note_transient_failure(reference, requeue_tx).await;
            }
            Err(e) => {
                error!(scan = %reference.name, error = %e, "fatal reconcile failure");
                self.mark_errored(&reference, &e).await;
            }
        }
    }

    /// Track infra retries through the scan record so the budget survives
    /// controller restarts, then requeue with backoff or give up.
    async fn note_transient_failure(
        &self,
        reference: ScanRef,
        requeue_tx: &mpsc::UnboundedSender<ScanRef>,
    ) {
        let Ok(mut scan) = self
            .store
            .get_scan(&reference.namespace, &reference.name)
            .await
        else {
            return;
        };
        if scan.status.phase.is_terminal() {
            return;
        }

        if scan.status.retries >= self.config.controller.max_retries {
            let _ = self
                .fail(&mut scan, "InfrastructureFailure", "retry budget exhausted")
                .await;
            return;
        }

        scan.status.retries += 1;
        let delay = self.config.controller.backoff(scan.status.retries - 1);
        if let Err(e) = self.update(&scan).await {
            warn!(scan = %reference.name, error = %e, "failed to record retry attempt");
        }
        schedule_requeue(requeue_tx.clone(), reference, delay);
    }

    async fn mark_errored(&self, reference: &ScanRef, cause: &Error) {
        let Ok(mut scan) = self
            .store
            .get_scan(&reference.namespace, &reference.name)
            .await
        else {
            return;
        };
        if scan.status.phase.is_terminal() {
            return;
        }
        let _ = self
            .fail(&mut scan, "ReconcileFailed", &cause.to_string())
            .await;
    }

    /// A rule set change may unblock any in-flight scan in the namespace.
    async fn resync_namespace(&self, namespace: &str, requeue_tx: &mpsc::UnboundedSender<ScanRef>) {
        let scans = match self.store.list_scans(namespace).await {
            Ok(scans) => scans,
            Err(e) => {
                warn!(namespace, error = %e, "namespace resync failed");
                return;
            }
        };
        for scan in scans {
            if !scan.status.phase.is_terminal() {
                self.process(
                    ScanRef::new(namespace, &scan.metadata.name),
                    requeue_tx,
                )
                .await;
            }
        }
    }
}

fn schedule_requeue(tx: mpsc::UnboundedSender<ScanRef>, reference: ScanRef, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(reference);
    });
}
