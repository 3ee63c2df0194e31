//! Point-in-time copies of a proposal's live voting state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::{OptionNumber, ProposalId, Timestamp, WalletAddress};

/// Why a snapshot was taken. Only `Hourly` snapshots are ever pruned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotKind {
    Hourly,
    PreCalculation,
    Manual,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Hourly => "hourly",
            SnapshotKind::PreCalculation => "pre_calculation",
            SnapshotKind::Manual => "manual",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(SnapshotKind::Hourly),
            "pre_calculation" | "pre-calculation" => Ok(SnapshotKind::PreCalculation),
            "manual" => Ok(SnapshotKind::Manual),
            other => Err(format!("unknown snapshot type: {other}")),
        }
    }
}

/// Store-assigned snapshot identifier. Larger ids are newer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the ephemeral store holds for one proposal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalState {
    pub votes: BTreeMap<WalletAddress, OptionNumber>,
    pub delegations: BTreeMap<WalletAddress, WalletAddress>,
    pub participants: BTreeSet<WalletAddress>,
    pub status: Option<String>,
    pub deadline: Option<Timestamp>,
}

impl ProposalState {
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty() && self.delegations.is_empty() && self.participants.is_empty()
    }
}

/// Immutable durable copy of one proposal's state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub proposal_id: ProposalId,
    pub kind: SnapshotKind,
    pub taken_at: Timestamp,
    pub state: ProposalState,
}
