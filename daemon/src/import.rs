//! Proposal import file.
//!
//! ```toml
//! [[proposal]]
//! id = "budget-2025"
//! organization_id = "acme"
//! deadline = "2025-03-01T12:00:00Z"
//! options = ["approve", "reject"]
//! ```
//!
//! Options are numbered from 1 in file order.

use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use liquid_types::{Proposal, ProposalId, ProposalOption, Timestamp};

#[derive(Debug, Deserialize)]
struct ImportFile {
    #[serde(default, rename = "proposal")]
    proposals: Vec<ImportedProposal>,
}

#[derive(Debug, Deserialize)]
struct ImportedProposal {
    id: String,
    organization_id: String,
    deadline: String,
    options: Vec<String>,
}

pub fn load_proposals(path: &Path) -> anyhow::Result<Vec<Proposal>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_proposals(&contents).with_context(|| format!("invalid import file {}", path.display()))
}

pub fn parse_proposals(contents: &str) -> anyhow::Result<Vec<Proposal>> {
    let file: ImportFile = toml::from_str(contents)?;
    file.proposals
        .into_iter()
        .map(|p| {
            let id = ProposalId::parse(&p.id)?;
            if p.options.is_empty() {
                bail!("proposal {id} declares no options");
            }
            let deadline = Timestamp::parse_iso8601(&p.deadline)
                .with_context(|| format!("proposal {id}: bad deadline"))?;
            let options = p
                .options
                .into_iter()
                .zip(1u32..)
                .map(|(text, number)| ProposalOption { number, text })
                .collect();
            Ok(Proposal {
                id,
                organization_id: p.organization_id,
                options,
                deadline,
            })
        })
        .collect()
}
