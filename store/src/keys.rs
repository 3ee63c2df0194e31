//! Ephemeral store key namespace.
//!
//! Per proposal `P`:
//!
//! | key                          | type   | contents                 |
//! |------------------------------|--------|--------------------------|
//! | `proposal:P:votes`           | hash   | wallet → option number   |
//! | `proposal:P:delegations`     | hash   | delegator → delegate     |
//! | `proposal:P:participants`    | set    | wallets                  |
//! | `proposal:P:status`          | string | free-form status         |
//! | `proposal:P:deadline`        | string | ISO-8601 timestamp       |
//! | `proposal:P:lock`            | string | lock owner token         |
//! | `cooldown:W:P`               | string | set with a 60s expiry    |

use liquid_types::{ProposalId, WalletAddress};

/// Per-(wallet, proposal) mutation cooldown.
pub const COOLDOWN_SECS: u64 = 60;

/// Minimum time keys of a completed proposal are kept after the deadline.
pub const KEY_RETENTION_SECS: u64 = 7 * 24 * 3600;

pub fn votes(p: &ProposalId) -> String {
    format!("proposal:{p}:votes")
}

pub fn delegations(p: &ProposalId) -> String {
    format!("proposal:{p}:delegations")
}

pub fn participants(p: &ProposalId) -> String {
    format!("proposal:{p}:participants")
}

pub fn status(p: &ProposalId) -> String {
    format!("proposal:{p}:status")
}

pub fn deadline(p: &ProposalId) -> String {
    format!("proposal:{p}:deadline")
}

pub fn lock(p: &ProposalId) -> String {
    format!("proposal:{p}:lock")
}

pub fn cooldown(w: &WalletAddress, p: &ProposalId) -> String {
    format!("cooldown:{w}:{p}")
}

/// Every per-proposal key (cooldowns excluded, they expire on their own).
pub fn proposal_keys(p: &ProposalId) -> [String; 6] {
    [votes(p), delegations(p), participants(p), status(p), deadline(p), lock(p)]
}
