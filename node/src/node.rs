//! The liquid voting node: wires stores, governance, scheduler and snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use liquid_governance::{CycleDetector, DelegationResolver, VotingService};
use liquid_store::{AuditStore, ProposalStore, SnapshotStore, VotingStore};
use liquid_store_lmdb::{check_data_dir, check_integrity, LmdbEnvironment};
use liquid_store_redis::RedisVotingStore;
use liquid_types::{Clock, SystemClock};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::metrics::{serve_metrics, LiquidMetrics};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::shutdown::ShutdownController;
use crate::snapshot::SnapshotManager;

/// Timeout for waiting on background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The store handles a node runs against.
pub struct Stores {
    pub voting: Arc<dyn VotingStore>,
    pub audit: Arc<dyn AuditStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub proposals: Arc<dyn ProposalStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct LiquidNode {
    pub config: NodeConfig,
    pub metrics: Arc<LiquidMetrics>,
    stores: Stores,
    voting_service: Arc<VotingService>,
    snapshots: Arc<SnapshotManager>,
    scheduler: Scheduler,
    shutdown: Arc<ShutdownController>,
    /// Present when the node opened its own LMDB environment.
    lmdb: Option<LmdbEnvironment>,
    /// Handles for spawned background tasks (joined during shutdown).
    task_handles: Vec<JoinHandle<()>>,
}

impl LiquidNode {
    /// Open the LMDB environment at `config.data_dir` and connect (lazily) to
    /// Redis at `config.redis_url`.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        check_data_dir(&config.data_dir).map_err(NodeError::Config)?;

        let lmdb = LmdbEnvironment::open_default(&config.data_dir)?;
        let report = check_integrity(lmdb.env())?;
        if report.is_healthy() {
            tracing::info!(
                databases = report.databases_checked,
                entries = report.total_entries,
                "LMDB integrity check passed"
            );
        } else {
            for err in &report.errors {
                tracing::error!(error = %err, "LMDB integrity problem");
            }
        }

        let redis = RedisVotingStore::open(&config.redis_url)?;
        if let Err(e) = redis.ping() {
            tracing::warn!(url = %config.redis_url, error = %e, "voting store not reachable yet; will retry on use");
        }

        let stores = Stores {
            voting: Arc::new(redis),
            audit: Arc::new(lmdb.audit_store()),
            snapshots: Arc::new(lmdb.snapshot_store()),
            proposals: Arc::new(lmdb.proposal_store()),
            clock: Arc::new(SystemClock),
        };
        let mut node = Self::with_stores(config, stores)?;
        node.lmdb = Some(lmdb);
        Ok(node)
    }

    /// Build a node over caller-provided stores (nullables in tests).
    pub fn with_stores(config: NodeConfig, stores: Stores) -> Result<Self, NodeError> {
        config.validate()?;
        let metrics = Arc::new(LiquidMetrics::new());

        let voting_service = Arc::new(
            VotingService::new(
                Arc::clone(&stores.voting),
                Arc::clone(&stores.proposals),
                Arc::clone(&stores.clock),
            )
            .with_cooldown(config.vote_cooldown_secs)
            .with_detector(CycleDetector::new(config.max_delegation_hops)),
        );

        let snapshots = Arc::new(
            SnapshotManager::new(
                Arc::clone(&stores.voting),
                Arc::clone(&stores.snapshots),
                Arc::clone(&stores.proposals),
                Arc::clone(&stores.clock),
            )
            .with_hourly_retained(config.hourly_snapshots_retained)
            .with_metrics(Arc::clone(&metrics)),
        );

        let scheduler = Scheduler::builder(
            Arc::clone(&stores.voting),
            Arc::clone(&stores.audit),
            Arc::clone(&stores.proposals),
            Arc::clone(&stores.clock),
            SchedulerConfig::from(&config),
        )
        .with_snapshots(Arc::clone(&snapshots))
        .with_metrics(Arc::clone(&metrics))
        .with_resolver(DelegationResolver::new(config.max_delegation_hops))
        .build();

        Ok(Self {
            config,
            metrics,
            stores,
            voting_service,
            snapshots,
            scheduler,
            shutdown: Arc::new(ShutdownController::new()),
            lmdb: None,
            task_handles: Vec::new(),
        })
    }

    /// Spawn the background tasks. Does not wait for a shutdown signal.
    pub fn spawn_tasks(&mut self) {
        tracing::info!(
            data_dir = %self.config.data_dir.display(),
            sweep_interval_secs = self.config.sweep_interval_secs,
            lookahead_secs = self.config.lookahead_secs,
            lock = self.config.enforce_resolution_lock,
            "liquid node starting"
        );

        // ── Deadline scheduler ────────────────────────────────────────────
        let scheduler_handle = self.scheduler.start(self.shutdown.subscribe());
        self.task_handles.push(scheduler_handle);

        // ── Hourly snapshots ─────────────────────────────────────────────
        let snapshots = Arc::clone(&self.snapshots);
        let period = Duration::from_secs(self.config.snapshot_interval_secs);
        let mut shutdown_rx = self.shutdown.subscribe();
        let snapshot_handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("snapshot task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let manager = Arc::clone(&snapshots);
                        match tokio::task::spawn_blocking(move || manager.create_hourly_snapshots()).await {
                            Ok(Ok(report)) => tracing::info!(
                                created = report.created.len(),
                                failed = report.failed.len(),
                                "hourly snapshots taken"
                            ),
                            Ok(Err(e)) => tracing::error!(error = %e, "hourly snapshot job failed"),
                            Err(e) => tracing::error!(error = %e, "hourly snapshot task panicked"),
                        }
                    }
                }
            }
        });
        self.task_handles.push(snapshot_handle);

        // ── Metrics endpoint (optional) ──────────────────────────────────
        if self.config.enable_metrics {
            let metrics = Arc::clone(&self.metrics);
            let port = self.config.metrics_port;
            let shutdown_rx = self.shutdown.subscribe();
            let metrics_handle = tokio::spawn(async move {
                if let Err(e) = serve_metrics(metrics, port, shutdown_rx).await {
                    tracing::error!(port, error = %e, "metrics endpoint failed");
                }
            });
            self.task_handles.push(metrics_handle);
        }
    }

    /// Start all background tasks and block until SIGINT / SIGTERM or a
    /// programmatic shutdown.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        self.spawn_tasks();
        self.shutdown.wait_for_signal().await;
        Ok(())
    }

    /// Signal every task, cancel armed timers and wait (bounded) for the
    /// tasks to exit.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!("liquid node stopping");
        self.shutdown.shutdown();
        self.scheduler.shutdown().await;

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!("background tasks did not stop within {SHUTDOWN_TIMEOUT:?}");
        }

        if let Some(lmdb) = &self.lmdb {
            match lmdb.env().force_sync() {
                Ok(()) => tracing::info!("LMDB flushed to disk"),
                Err(e) => tracing::warn!(error = %e, "LMDB force_sync failed"),
            }
        }
        tracing::info!("liquid node stopped");
        Ok(())
    }

    pub fn voting_service(&self) -> &Arc<VotingService> {
        &self.voting_service
    }

    pub fn snapshot_manager(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn shutdown_handle(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }
}
