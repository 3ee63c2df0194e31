//! Proposal identity and the read-only proposal definition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{InputError, Timestamp};

/// 1-based option number as chosen by a voter.
pub type OptionNumber = u32;

/// Identifier of a proposal, as assigned by the proposal collaborator.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId(String);

impl ProposalId {
    pub const MAX_LEN: usize = 128;

    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    /// Parse and validate an id from untrusted input.
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let id = Self::new(raw);
        let ok = !id.0.is_empty()
            && id.0.len() <= Self::MAX_LEN
            && !id.0.chars().any(|c| c.is_whitespace() || c.is_control() || c == ':');
        if ok {
            Ok(id)
        } else {
            Err(InputError::InvalidProposalId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProposalId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One selectable option of a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalOption {
    pub number: OptionNumber,
    pub text: String,
}

/// A proposal as provided by the proposal collaborator. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub organization_id: String,
    /// Ordered by option number.
    pub options: Vec<ProposalOption>,
    pub deadline: Timestamp,
}

impl Proposal {
    pub fn has_option(&self, number: OptionNumber) -> bool {
        self.options.iter().any(|o| o.number == number)
    }

    /// Voting is open strictly before the deadline.
    pub fn is_open(&self, now: Timestamp) -> bool {
        now < self.deadline
    }

    pub fn option_numbers(&self) -> impl Iterator<Item = OptionNumber> + '_ {
        self.options.iter().map(|o| o.number)
    }
}
