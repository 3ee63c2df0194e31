//! Liquid voting node: orchestrates proposal processing.
//!
//! The node is the central coordinator that:
//! - Accepts guarded vote / delegate mutations through [`VotingService`]
//! - Arms a timer for every upcoming deadline and sweeps for missed ones
//! - Resolves delegations, then tallies, exactly once per proposal
//! - Takes hourly and pre-calculation snapshots, and restores from them
//! - Exposes Prometheus metrics and structured logs
//!
//! [`VotingService`]: liquid_governance::VotingService

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod snapshot;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::{serve_metrics, LiquidMetrics};
pub use node::{LiquidNode, Stores};
pub use scheduler::{
    Phase, ProcessOutcome, Scheduler, SchedulerBuilder, SchedulerConfig, SweepReport,
};
pub use shutdown::ShutdownController;
pub use snapshot::{BatchReport, IntegrityFindings, SnapshotManager};
