//! Deadline scheduler: drives resolution and tally once per proposal.
//!
//! Two drivers cooperate:
//!
//! 1. Every sweep arms an in-process timer for each proposal whose deadline
//!    falls inside the look-ahead window and is not fully completed.
//! 2. The same sweep immediately processes every proposal whose deadline has
//!    passed and is not fully completed. Timers die with the process, so this
//!    is the crash-recovery path.
//!
//! Per proposal: `Unscheduled → Scheduled → Processing → Resolved |
//! ResolutionFailed`, then `Resolved → ProcessingTally → TallyCompleted |
//! TallyFailed`. Tally only runs after a successful resolution. Failed
//! proposals are not retried on the spot; the next sweep or a manual
//! [`Scheduler::retry`] picks them up again.
//!
//! Store calls are synchronous and run directly on the runtime's worker
//! threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use liquid_governance::{
    record_resolution_failure, DelegationResolver, GovernanceError, TallyEngine,
};
use liquid_store::{AuditStore, ProposalStore, VotingStore};
use liquid_types::{
    Clock, OptionNumber, Proposal, ProposalId, SnapshotKind, Timestamp,
};
use liquid_utils::{format_duration, format_millis};

use crate::metrics::LiquidMetrics;
use crate::snapshot::SnapshotManager;
use crate::tracing_spans::{process_span, sweep_span};
use crate::{NodeConfig, NodeError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Unscheduled,
    Scheduled,
    Processing,
    Resolved,
    ResolutionFailed,
    ProcessingTally,
    TallyCompleted,
    TallyFailed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unscheduled => "unscheduled",
            Phase::Scheduled => "scheduled",
            Phase::Processing => "processing",
            Phase::Resolved => "resolved",
            Phase::ResolutionFailed => "resolution_failed",
            Phase::ProcessingTally => "processing_tally",
            Phase::TallyCompleted => "tally_completed",
            Phase::TallyFailed => "tally_failed",
        }
    }

    fn is_in_flight(&self) -> bool {
        matches!(self, Phase::Processing | Phase::Resolved | Phase::ProcessingTally)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one attempt to process a proposal.
#[derive(Debug)]
pub enum ProcessOutcome {
    Completed {
        winning_option: Option<OptionNumber>,
        total_voting_power: u64,
        total_cast_power: u64,
    },
    /// Both audit records already exist with status `completed`.
    AlreadyCompleted,
    /// This process is already working on the proposal.
    InFlight,
    /// Another process holds the proposal's lock key.
    Locked,
    ResolutionFailed(GovernanceError),
    TallyFailed(GovernanceError),
}

impl ProcessOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProcessOutcome::ResolutionFailed(_) | ProcessOutcome::TallyFailed(_)
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Timers newly armed for upcoming deadlines.
    pub scheduled: usize,
    /// Expired proposals processed to completion.
    pub processed: usize,
    /// Expired proposals whose resolution or tally failed.
    pub failed: usize,
    /// Expired proposals skipped (locked, in flight, or timer still armed).
    pub skipped: usize,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub sweep_interval: Duration,
    pub lookahead_secs: u64,
    pub enforce_lock: bool,
    pub lock_ttl_secs: u64,
    pub pre_calculation_snapshots: bool,
    pub key_retention_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig::from(&NodeConfig::default())
    }
}

impl From<&NodeConfig> for SchedulerConfig {
    fn from(c: &NodeConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(c.sweep_interval_secs),
            lookahead_secs: c.lookahead_secs,
            enforce_lock: c.enforce_resolution_lock,
            lock_ttl_secs: c.lock_ttl_secs,
            pre_calculation_snapshots: c.pre_calculation_snapshots,
            key_retention_secs: c.key_retention_secs,
        }
    }
}

struct TimerEntry {
    generation: u64,
    fires_at: Timestamp,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    voting: Arc<dyn VotingStore>,
    audit: Arc<dyn AuditStore>,
    proposals: Arc<dyn ProposalStore>,
    clock: Arc<dyn Clock>,
    snapshots: Option<Arc<SnapshotManager>>,
    metrics: Option<Arc<LiquidMetrics>>,
    resolver: DelegationResolver,
    tally: TallyEngine,
    config: SchedulerConfig,
    lock_owner: String,
    timers: Mutex<HashMap<ProposalId, TimerEntry>>,
    next_generation: AtomicU64,
    phases: Mutex<HashMap<ProposalId, Phase>>,
    stopped: AtomicBool,
}

/// Owns the keyed timer table and the per-proposal phase table.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Collects the scheduler's optional collaborators before it is shared.
pub struct SchedulerBuilder {
    inner: Inner,
}

impl SchedulerBuilder {
    /// Take a pre-calculation snapshot through `snapshots` before resolving
    /// (when the config enables it).
    pub fn with_snapshots(mut self, snapshots: Arc<SnapshotManager>) -> Self {
        self.inner.snapshots = Some(snapshots);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LiquidMetrics>) -> Self {
        self.inner.metrics = Some(metrics);
        self
    }

    pub fn with_resolver(mut self, resolver: DelegationResolver) -> Self {
        self.inner.resolver = resolver;
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Arc::new(self.inner),
        }
    }
}

impl Scheduler {
    pub fn builder(
        voting: Arc<dyn VotingStore>,
        audit: Arc<dyn AuditStore>,
        proposals: Arc<dyn ProposalStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> SchedulerBuilder {
        let lock_owner = format!("scheduler-{}-{}", std::process::id(), Timestamp::now().as_secs());
        SchedulerBuilder {
            inner: Inner {
                voting,
                audit,
                proposals,
                clock,
                snapshots: None,
                metrics: None,
                resolver: DelegationResolver::default(),
                tally: TallyEngine::new(),
                config,
                lock_owner,
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                phases: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            },
        }
    }

    /// A scheduler without snapshots or metrics.
    pub fn new(
        voting: Arc<dyn VotingStore>,
        audit: Arc<dyn AuditStore>,
        proposals: Arc<dyn ProposalStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self::builder(voting, audit, proposals, clock, config).build()
    }

    /// Spawn the periodic sweep loop. The first sweep runs immediately, on
    /// the blocking pool since store calls are synchronous. On shutdown the
    /// loop exits and every armed timer is cancelled.
    pub fn start(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("scheduler sweep task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let sweeper = scheduler.clone();
                        match tokio::task::spawn_blocking(move || sweeper.run_sweep()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::error!(error = %e, "scheduler sweep failed"),
                            Err(e) => tracing::error!(error = %e, "scheduler sweep task panicked"),
                        }
                    }
                }
            }
            scheduler.shutdown().await;
        })
    }

    /// One sweep: arm timers for upcoming deadlines, process expired ones.
    ///
    /// Per-proposal failures are counted, never propagated. Only a failure to
    /// list proposals fails the sweep. Blocks on store I/O and must run
    /// inside a tokio runtime (a `spawn_blocking` thread qualifies).
    pub fn run_sweep(&self) -> Result<SweepReport, NodeError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(NodeError::SchedulerStopped);
        }
        let _span = sweep_span().entered();
        let inner = &self.inner;
        let now = inner.clock.now();
        let horizon = now.plus_secs(inner.config.lookahead_secs);
        let mut report = SweepReport::default();

        for proposal in inner.proposals.proposals_due_between(now, horizon)? {
            if inner.is_completed(&proposal.id) {
                continue;
            }
            match self.schedule_proposal(&proposal) {
                Ok(true) => report.scheduled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(proposal = %proposal.id, error = %e, "cannot arm deadline timer")
                }
            }
        }

        for proposal in inner.proposals.proposals_due_before(now)? {
            if inner.is_completed(&proposal.id) {
                continue;
            }
            if inner.has_timer(&proposal.id) {
                report.skipped += 1;
                continue;
            }
            match inner.process(&proposal.id) {
                ProcessOutcome::Completed { .. } => report.processed += 1,
                ProcessOutcome::AlreadyCompleted => {}
                ProcessOutcome::InFlight | ProcessOutcome::Locked => report.skipped += 1,
                ProcessOutcome::ResolutionFailed(_) | ProcessOutcome::TallyFailed(_) => {
                    report.failed += 1
                }
            }
        }

        if let Some(m) = &inner.metrics {
            m.sweeps.inc();
        }
        tracing::info!(
            scheduled = report.scheduled,
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            armed = self.armed_timers().len(),
            next_sweep_in = %format_duration(inner.config.sweep_interval.as_secs()),
            "scheduler sweep finished"
        );
        Ok(report)
    }

    /// Arm a timer that processes `proposal` at its deadline. Returns `false`
    /// if one is already armed. Must run inside a tokio runtime.
    pub fn schedule_proposal(&self, proposal: &Proposal) -> Result<bool, NodeError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            return Err(NodeError::SchedulerStopped);
        }
        let mut timers = inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        if timers.contains_key(&proposal.id) {
            return Ok(false);
        }

        let delay_secs = proposal.deadline.secs_until(inner.clock.now());
        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (cancel, mut cancel_rx) = oneshot::channel::<()>();
        let task_inner = Arc::clone(inner);
        let id = proposal.id.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    tracing::debug!(proposal = %id, "deadline timer cancelled");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(delay_secs)) => {}
            }
            task_inner.disarm(&id, generation);
            tracing::info!(proposal = %id, "deadline reached");
            let worker = Arc::clone(&task_inner);
            let target = id.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || worker.process(&target)).await {
                tracing::error!(proposal = %id, error = %e, "deadline processing panicked");
            }
        });

        timers.insert(
            proposal.id.clone(),
            TimerEntry {
                generation,
                fires_at: proposal.deadline,
                cancel,
                handle,
            },
        );
        let armed = timers.len();
        drop(timers);

        inner.set_phase(&proposal.id, Phase::Scheduled);
        if let Some(m) = &inner.metrics {
            m.armed_timers.set(armed as i64);
        }
        tracing::info!(
            proposal = %proposal.id,
            deadline = %proposal.deadline.to_iso8601(),
            fires_in = %format_duration(delay_secs),
            "deadline timer armed"
        );
        Ok(true)
    }

    /// Resolve and tally `proposal` now, blocking the calling thread on
    /// store I/O.
    pub fn process_proposal(&self, proposal: &ProposalId) -> ProcessOutcome {
        self.inner.process(proposal)
    }

    /// Manually re-run a proposal, typically one left in `ResolutionFailed`.
    pub fn retry(&self, proposal: &ProposalId) -> ProcessOutcome {
        tracing::info!(proposal = %proposal, phase = %self.phase(proposal), "manual retry");
        self.cancel(proposal);
        self.inner.process(proposal)
    }

    /// Cancel an armed timer. Returns `false` if none was armed.
    pub fn cancel(&self, proposal: &ProposalId) -> bool {
        let entry = {
            let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
            let entry = timers.remove(proposal);
            if let Some(m) = &self.inner.metrics {
                m.armed_timers.set(timers.len() as i64);
            }
            entry
        };
        match entry {
            Some(entry) => {
                let _ = entry.cancel.send(());
                true
            }
            None => false,
        }
    }

    /// Stop accepting work, cancel every armed timer and wait for the timer
    /// tasks to finish.
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let entries: Vec<(ProposalId, TimerEntry)> = {
            let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.drain().collect()
        };
        if let Some(m) = &self.inner.metrics {
            m.armed_timers.set(0);
        }
        let count = entries.len();
        for (proposal, entry) in entries {
            let _ = entry.cancel.send(());
            if let Err(e) = entry.handle.await {
                tracing::warn!(proposal = %proposal, error = %e, "deadline timer task ended abnormally");
            }
        }
        tracing::info!(cancelled = count, "scheduler stopped");
    }

    pub fn phase(&self, proposal: &ProposalId) -> Phase {
        self.inner.phase(proposal)
    }

    /// Armed timers and when they fire.
    pub fn armed_timers(&self) -> Vec<(ProposalId, Timestamp)> {
        let timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        let mut armed: Vec<_> = timers
            .iter()
            .map(|(id, entry)| (id.clone(), entry.fires_at))
            .collect();
        armed.sort_by_key(|(_, at)| *at);
        armed
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn phase(&self, proposal: &ProposalId) -> Phase {
        self.phases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(proposal)
            .copied()
            .unwrap_or(Phase::Unscheduled)
    }

    fn set_phase(&self, proposal: &ProposalId, phase: Phase) {
        let previous = self
            .phases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(proposal.clone(), phase);
        tracing::debug!(proposal = %proposal, from = ?previous, to = %phase, "phase change");
    }

    /// Move to `Processing` unless a run is already in flight. Returns the
    /// phase to fall back to if the run is abandoned before it starts.
    fn begin(&self, proposal: &ProposalId) -> Option<Phase> {
        let mut phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        let current = phases.get(proposal).copied().unwrap_or(Phase::Unscheduled);
        if current.is_in_flight() {
            return None;
        }
        phases.insert(proposal.clone(), Phase::Processing);
        Some(current)
    }

    fn has_timer(&self, proposal: &ProposalId) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(proposal)
    }

    fn disarm(&self, proposal: &ProposalId, generation: u64) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if timers.get(proposal).is_some_and(|t| t.generation == generation) {
            timers.remove(proposal);
        }
        if let Some(m) = &self.metrics {
            m.armed_timers.set(timers.len() as i64);
        }
    }

    /// Audit records say both stages completed. A read failure counts as
    /// not completed: re-running is safe because saves are upserts.
    fn is_completed(&self, proposal: &ProposalId) -> bool {
        match self.audit.is_fully_completed(proposal) {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(proposal = %proposal, error = %e, "cannot read audit status");
                false
            }
        }
    }

    fn process(&self, proposal: &ProposalId) -> ProcessOutcome {
        let _span = process_span(proposal).entered();

        if self.is_completed(proposal) {
            tracing::debug!(proposal = %proposal, "already fully completed");
            self.set_phase(proposal, Phase::TallyCompleted);
            return ProcessOutcome::AlreadyCompleted;
        }
        let Some(previous) = self.begin(proposal) else {
            tracing::debug!(proposal = %proposal, "already being processed here");
            return ProcessOutcome::InFlight;
        };

        let started = Instant::now();
        if self.config.enforce_lock {
            match self
                .voting
                .try_acquire_lock(proposal, &self.lock_owner, self.config.lock_ttl_secs)
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(proposal = %proposal, "lock held by another scheduler; skipping");
                    if let Some(m) = &self.metrics {
                        m.lock_contended.inc();
                    }
                    // A fired timer has already disarmed itself.
                    let fallback = if previous == Phase::Scheduled && !self.has_timer(proposal) {
                        Phase::Unscheduled
                    } else {
                        previous
                    };
                    self.set_phase(proposal, fallback);
                    return ProcessOutcome::Locked;
                }
                Err(e) => {
                    let err = GovernanceError::from(e);
                    tracing::error!(proposal = %proposal, error = %err, "cannot acquire proposal lock");
                    record_resolution_failure(
                        self.audit.as_ref(),
                        proposal,
                        &err,
                        started.elapsed().as_millis() as u64,
                        self.clock.now(),
                    );
                    self.count_resolution(false, None);
                    self.set_phase(proposal, Phase::ResolutionFailed);
                    return ProcessOutcome::ResolutionFailed(err);
                }
            }
        }

        let outcome = self.resolve_and_tally(proposal);

        if self.config.enforce_lock {
            if let Err(e) = self.voting.release_lock(proposal, &self.lock_owner) {
                tracing::warn!(proposal = %proposal, error = %e, "failed to release proposal lock; it will expire");
            }
        }
        tracing::info!(
            proposal = %proposal,
            phase = %self.phase(proposal),
            took = %format_millis(started.elapsed().as_millis() as u64),
            "proposal run finished"
        );
        outcome
    }

    fn resolve_and_tally(&self, proposal: &ProposalId) -> ProcessOutcome {
        if self.config.pre_calculation_snapshots {
            if let Some(snapshots) = &self.snapshots {
                if let Err(e) = snapshots.create_snapshot(proposal, SnapshotKind::PreCalculation) {
                    tracing::warn!(proposal = %proposal, error = %e, "pre-calculation snapshot failed; resolving anyway");
                }
            }
        }

        let resolution = self.resolver.resolve_proposal(
            self.voting.as_ref(),
            self.audit.as_ref(),
            self.clock.as_ref(),
            proposal,
        );
        match resolution {
            Ok(record) => {
                self.count_resolution(true, Some((record.computation_ms, record.longest_chain)));
                self.set_phase(proposal, Phase::Resolved);
            }
            Err(err) => {
                self.count_resolution(false, None);
                self.set_phase(proposal, Phase::ResolutionFailed);
                return ProcessOutcome::ResolutionFailed(err);
            }
        }

        self.set_phase(proposal, Phase::ProcessingTally);
        let tally = self.tally.tally_proposal(
            self.voting.as_ref(),
            self.audit.as_ref(),
            self.proposals.as_ref(),
            self.clock.as_ref(),
            proposal,
        );
        match tally {
            Ok(record) => {
                if let Some(m) = &self.metrics {
                    m.tallies_completed.inc();
                }
                self.set_phase(proposal, Phase::TallyCompleted);
                if let Err(e) = self
                    .voting
                    .expire_proposal(proposal, self.config.key_retention_secs)
                {
                    tracing::warn!(proposal = %proposal, error = %e, "failed to set key retention expiry");
                }
                ProcessOutcome::Completed {
                    winning_option: record.winning_option,
                    total_voting_power: record.total_voting_power,
                    total_cast_power: record.total_cast_power,
                }
            }
            Err(err) => {
                if let Some(m) = &self.metrics {
                    m.tallies_failed.inc();
                }
                self.set_phase(proposal, Phase::TallyFailed);
                ProcessOutcome::TallyFailed(err)
            }
        }
    }

    fn count_resolution(&self, ok: bool, detail: Option<(u64, usize)>) {
        let Some(m) = &self.metrics else {
            return;
        };
        if ok {
            m.resolutions_completed.inc();
        } else {
            m.resolutions_failed.inc();
        }
        if let Some((ms, longest_chain)) = detail {
            m.resolution_time_ms.observe(ms as f64);
            m.last_longest_chain.set(longest_chain as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquid_nullables::{
        NullAuditStore, NullClock, NullProposalStore, NullSnapshotStore, NullVotingStore,
    };
    use liquid_store::{keys, SnapshotStore};
    use liquid_types::{AuditStatus, ProposalOption, WalletAddress};

    struct Fixture {
        clock: Arc<NullClock>,
        voting: Arc<NullVotingStore>,
        audit: Arc<NullAuditStore>,
        proposals: Arc<NullProposalStore>,
        snapshot_store: Arc<NullSnapshotStore>,
        metrics: Arc<LiquidMetrics>,
        scheduler: Scheduler,
    }

    const NOW: u64 = 1_000_000;

    fn fixture() -> Fixture {
        let clock = Arc::new(NullClock::new(NOW));
        let voting = Arc::new(NullVotingStore::new(clock.clone()));
        let audit = Arc::new(NullAuditStore::new());
        let proposals = Arc::new(NullProposalStore::new());
        let snapshot_store = Arc::new(NullSnapshotStore::new());
        let metrics = Arc::new(LiquidMetrics::new());
        let snapshots = Arc::new(SnapshotManager::new(
            voting.clone(),
            snapshot_store.clone(),
            proposals.clone(),
            clock.clone(),
        ));
        let scheduler = Scheduler::builder(
            voting.clone(),
            audit.clone(),
            proposals.clone(),
            clock.clone(),
            SchedulerConfig::default(),
        )
        .with_snapshots(snapshots)
        .with_metrics(metrics.clone())
        .build();
        Fixture { clock, voting, audit, proposals, snapshot_store, metrics, scheduler }
    }

    fn w(s: &str) -> WalletAddress {
        WalletAddress::new(s)
    }

    fn add_proposal(f: &Fixture, id: &str, deadline: u64) -> ProposalId {
        let p = ProposalId::new(id);
        f.proposals
            .put_proposal(&Proposal {
                id: p.clone(),
                organization_id: "org".into(),
                options: vec![
                    ProposalOption { number: 1, text: "yes".into() },
                    ProposalOption { number: 2, text: "no".into() },
                ],
                deadline: Timestamp::new(deadline),
            })
            .unwrap();
        p
    }

    /// A→B, B→C, C votes 1, D votes 2.
    fn seed_scenario(f: &Fixture, p: &ProposalId) {
        f.voting.set_delegation(p, &w("a"), &w("b")).unwrap();
        f.voting.set_delegation(p, &w("b"), &w("c")).unwrap();
        f.voting.cast_vote(p, &w("c"), 1).unwrap();
        f.voting.cast_vote(p, &w("d"), 2).unwrap();
    }

    /// Timer and sweep work runs on the blocking pool; give it a moment.
    async fn wait_for_phase(scheduler: &Scheduler, p: &ProposalId, want: Phase) {
        for _ in 0..200 {
            if scheduler.phase(p) == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.phase(p), want);
    }

    #[tokio::test]
    async fn sweep_processes_expired_proposals() {
        let f = fixture();
        let p = add_proposal(&f, "expired", NOW - 10);
        seed_scenario(&f, &p);

        let report = f.scheduler.run_sweep().unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(f.scheduler.phase(&p), Phase::TallyCompleted);

        let tally = f.audit.get_tally(&p).unwrap().unwrap();
        assert_eq!(tally.option_tallies[&1], 3);
        assert_eq!(tally.option_tallies[&2], 1);
        assert_eq!(tally.winning_option, Some(1));
        assert_eq!(f.metrics.resolutions_completed.get(), 1);
        assert_eq!(f.metrics.last_longest_chain.get(), 2);

        // Pre-calculation snapshot taken, lock released.
        let snaps = f.snapshot_store.list_snapshots(&p).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].kind, SnapshotKind::PreCalculation);
        assert!(f.voting.try_acquire_lock(&p, "someone", 10).unwrap());
    }

    #[tokio::test]
    async fn completed_proposals_are_not_reprocessed() {
        let f = fixture();
        let p = add_proposal(&f, "expired", NOW - 10);
        seed_scenario(&f, &p);
        f.scheduler.run_sweep().unwrap();

        let report = f.scheduler.run_sweep().unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(matches!(
            f.scheduler.process_proposal(&p),
            ProcessOutcome::AlreadyCompleted
        ));
        assert_eq!(f.metrics.resolutions_completed.get(), 1);
    }

    #[tokio::test]
    async fn completed_keys_expire_after_retention() {
        let f = fixture();
        let p = add_proposal(&f, "expired", NOW - 10);
        seed_scenario(&f, &p);
        f.scheduler.run_sweep().unwrap();

        f.clock.advance(keys::KEY_RETENTION_SECS - 1);
        assert!(!f.voting.get_all_votes(&p).unwrap().is_empty());
        f.clock.advance(1);
        assert!(f.voting.get_all_votes(&p).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn upcoming_deadline_arms_timer_that_fires() {
        let f = fixture();
        let soon = add_proposal(&f, "soon", NOW + 100);
        let far = add_proposal(&f, "far", NOW + 40 * 3600);
        seed_scenario(&f, &soon);

        let report = f.scheduler.run_sweep().unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(f.scheduler.phase(&soon), Phase::Scheduled);
        assert_eq!(f.scheduler.phase(&far), Phase::Unscheduled);
        assert_eq!(f.metrics.armed_timers.get(), 1);

        // A second sweep does not double-arm.
        assert_eq!(f.scheduler.run_sweep().unwrap().scheduled, 0);

        f.clock.advance(100);
        tokio::time::sleep(Duration::from_secs(101)).await;
        wait_for_phase(&f.scheduler, &soon, Phase::TallyCompleted).await;
        assert!(f.scheduler.armed_timers().is_empty());
        assert_eq!(
            f.audit.get_tally_summary(&soon).unwrap().unwrap().status,
            AuditStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_shutdown_stop_timers() {
        let f = fixture();
        let a = add_proposal(&f, "a", NOW + 100);
        let b = add_proposal(&f, "b", NOW + 200);
        f.scheduler.run_sweep().unwrap();
        assert_eq!(f.scheduler.armed_timers().len(), 2);

        assert!(f.scheduler.cancel(&a));
        assert!(!f.scheduler.cancel(&a));

        f.scheduler.shutdown().await;
        assert!(f.scheduler.armed_timers().is_empty());
        assert!(f.scheduler.is_stopped());
        assert!(matches!(f.scheduler.run_sweep(), Err(NodeError::SchedulerStopped)));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(f.scheduler.phase(&b), Phase::Scheduled);
        assert!(f.audit.get_resolution(&b).unwrap().is_none());
    }

    #[tokio::test]
    async fn resolution_failure_skips_tally_and_isolates() {
        let f = fixture();
        let p = add_proposal(&f, "p", NOW - 10);
        let q = add_proposal(&f, "q", NOW - 20);
        seed_scenario(&f, &p);
        f.voting.set_unavailable(true);

        let report = f.scheduler.run_sweep().unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(f.scheduler.phase(&p), Phase::ResolutionFailed);
        assert_eq!(f.scheduler.phase(&q), Phase::ResolutionFailed);
        assert!(f.audit.get_tally(&p).unwrap().is_none());
        assert!(!f.audit.list_errors(&p).unwrap().is_empty());

        // The outage hits the lock first; the error resolution record is
        // still written.
        let failed = f.audit.get_resolution(&p).unwrap().unwrap();
        assert_eq!(failed.status, AuditStatus::Error);
        assert!(failed.error.as_deref().unwrap_or_default().contains("unavailable"));
        assert!(failed.voting_power.is_empty());
        assert_eq!(f.metrics.resolutions_failed.get(), 2);

        f.voting.set_unavailable(false);
        assert!(matches!(
            f.scheduler.retry(&p),
            ProcessOutcome::Completed { winning_option: Some(1), .. }
        ));
        assert_eq!(f.scheduler.phase(&p), Phase::TallyCompleted);
    }

    #[tokio::test]
    async fn held_lock_skips_run() {
        let f = fixture();
        let p = add_proposal(&f, "p", NOW - 10);
        seed_scenario(&f, &p);
        assert!(f.voting.try_acquire_lock(&p, "other-replica", 300).unwrap());

        let report = f.scheduler.run_sweep().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(f.scheduler.phase(&p), Phase::Unscheduled);
        assert!(f.audit.get_resolution(&p).unwrap().is_none());
        assert_eq!(f.metrics.lock_contended.get(), 1);

        f.voting.release_lock(&p, "other-replica").unwrap();
        assert_eq!(f.scheduler.run_sweep().unwrap().processed, 1);
    }

    #[tokio::test]
    async fn outage_without_lock_also_writes_error_record() {
        let f = fixture();
        let p = add_proposal(&f, "p", NOW - 10);
        let scheduler = Scheduler::new(
            f.voting.clone(),
            f.audit.clone(),
            f.proposals.clone(),
            f.clock.clone(),
            SchedulerConfig { enforce_lock: false, ..SchedulerConfig::default() },
        );
        f.voting.set_unavailable(true);

        assert!(matches!(
            scheduler.process_proposal(&p),
            ProcessOutcome::ResolutionFailed(GovernanceError::StoreUnavailable(_))
        ));
        assert_eq!(
            f.audit.get_resolution(&p).unwrap().unwrap().status,
            AuditStatus::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fired_timer_blocked_by_lock_falls_back_to_unscheduled() {
        let f = fixture();
        let p = add_proposal(&f, "p", NOW + 50);
        seed_scenario(&f, &p);
        assert_eq!(f.scheduler.run_sweep().unwrap().scheduled, 1);
        assert!(f.voting.try_acquire_lock(&p, "other-replica", 3600).unwrap());

        f.clock.advance(50);
        tokio::time::sleep(Duration::from_secs(51)).await;
        wait_for_phase(&f.scheduler, &p, Phase::Unscheduled).await;

        assert_eq!(f.metrics.lock_contended.get(), 1);
        assert!(f.scheduler.armed_timers().is_empty());
        assert!(f.audit.get_resolution(&p).unwrap().is_none());
    }

    #[tokio::test]
    async fn started_loop_sweeps_and_stops_on_shutdown() {
        let f = fixture();
        let p = add_proposal(&f, "p", NOW - 10);
        seed_scenario(&f, &p);
        let (tx, rx) = broadcast::channel(1);

        let handle = f.scheduler.start(rx);
        wait_for_phase(&f.scheduler, &p, Phase::TallyCompleted).await;

        tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(f.scheduler.is_stopped());
        assert_eq!(f.metrics.sweeps.get(), 1);
    }

    #[tokio::test]
    async fn tally_failure_keeps_resolution() {
        let f = fixture();
        let p = add_proposal(&f, "p", NOW - 10);
        seed_scenario(&f, &p);
        f.audit.set_fail_writes(true);

        // Resolution write is swallowed, so tally finds no resolution.
        let outcome = f.scheduler.process_proposal(&p);
        assert!(matches!(
            outcome,
            ProcessOutcome::TallyFailed(GovernanceError::NoResolution(_))
        ));
        assert!(outcome.is_failure());
        assert_eq!(f.scheduler.phase(&p), Phase::TallyFailed);
    }
}
