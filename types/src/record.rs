//! Durable audit records produced by resolution and tallying.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{OptionNumber, ProposalId, Timestamp, WalletAddress};

/// Outcome status of an audit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditStatus {
    Completed,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Completed => "completed",
            AuditStatus::Error => "error",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the pipeline an error record was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingStage {
    Resolution,
    Tally,
    Snapshot,
    Restore,
    Integrity,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Resolution => "resolution",
            ProcessingStage::Tally => "tally",
            ProcessingStage::Snapshot => "snapshot",
            ProcessingStage::Restore => "restore",
            ProcessingStage::Integrity => "integrity",
        }
    }
}

/// Final delegate computed for one delegator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDelegation {
    pub delegator: WalletAddress,
    /// The sink: first wallet on the chain with no outgoing delegation.
    pub final_delegate: WalletAddress,
    /// Every wallet walked, starting with the delegator and ending with the sink.
    pub path: Vec<WalletAddress>,
    /// Number of hops taken (`path.len() - 1`).
    pub path_length: usize,
    /// Walk stopped on a revisit or the hop limit instead of a true sink.
    pub truncated: bool,
}

/// Durable output of delegation-graph resolution for one proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub proposal_id: ProposalId,
    pub status: AuditStatus,
    pub delegations: Vec<ResolvedDelegation>,
    /// wallet → number of participants whose vote ultimately accrues to it.
    pub voting_power: BTreeMap<WalletAddress, u64>,
    pub total_participants: u64,
    pub total_delegators: u64,
    pub direct_voters: u64,
    pub longest_chain: usize,
    pub error: Option<String>,
    pub computation_ms: u64,
    pub resolved_at: Timestamp,
}

impl ResolutionRecord {
    /// An `error` record carrying no resolution data.
    pub fn failed(
        proposal_id: ProposalId,
        error: impl Into<String>,
        computation_ms: u64,
        at: Timestamp,
    ) -> Self {
        Self {
            proposal_id,
            status: AuditStatus::Error,
            delegations: Vec::new(),
            voting_power: BTreeMap::new(),
            total_participants: 0,
            total_delegators: 0,
            direct_voters: 0,
            longest_chain: 0,
            error: Some(error.into()),
            computation_ms,
            resolved_at: at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AuditStatus::Completed
    }

    pub fn total_power(&self) -> u64 {
        self.voting_power.values().sum()
    }
}

/// One cast vote and the power it carried into the tally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBreakdown {
    pub wallet: WalletAddress,
    pub option: OptionNumber,
    pub power: u64,
}

/// Durable output of weighted vote counting for one proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyRecord {
    pub proposal_id: ProposalId,
    pub status: AuditStatus,
    /// Every declared option, including those that received nothing.
    pub option_tallies: BTreeMap<OptionNumber, u64>,
    pub breakdown: Vec<VoteBreakdown>,
    pub total_voting_power: u64,
    pub total_cast_power: u64,
    pub unique_voters: u64,
    /// `None` on a tie at the maximum or when nothing was cast.
    pub winning_option: Option<OptionNumber>,
    pub error: Option<String>,
    pub computation_ms: u64,
    pub tallied_at: Timestamp,
}

impl TallyRecord {
    /// An `error` record with zeroed totals.
    pub fn failed(
        proposal_id: ProposalId,
        error: impl Into<String>,
        computation_ms: u64,
        at: Timestamp,
    ) -> Self {
        Self {
            proposal_id,
            status: AuditStatus::Error,
            option_tallies: BTreeMap::new(),
            breakdown: Vec::new(),
            total_voting_power: 0,
            total_cast_power: 0,
            unique_voters: 0,
            winning_option: None,
            error: Some(error.into()),
            computation_ms,
            tallied_at: at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AuditStatus::Completed
    }

    pub fn summary(&self) -> TallySummary {
        TallySummary {
            proposal_id: self.proposal_id.clone(),
            status: self.status,
            total_voting_power: self.total_voting_power,
            total_cast_power: self.total_cast_power,
            winning_option: self.winning_option,
            tallied_at: self.tallied_at,
        }
    }
}

/// Denormalized tally fields kept alongside the full record for fast display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallySummary {
    pub proposal_id: ProposalId,
    pub status: AuditStatus,
    pub total_voting_power: u64,
    pub total_cast_power: u64,
    pub winning_option: Option<OptionNumber>,
    pub tallied_at: Timestamp,
}

/// An error-log row. Failures are appended, never overwritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub proposal_id: ProposalId,
    pub stage: ProcessingStage,
    /// Stable kind label (e.g. `store_unavailable`, `no_resolution`).
    pub kind: String,
    pub message: String,
    pub at: Timestamp,
}
