//! Cache keys.

use serde::Serialize;
use sha2::{Digest, Sha256};
use shelfwise_core::{AgentContext, ResolvedFilter, ResolvedQuery, Result, Shelf, SortSpec};
use std::collections::BTreeMap;
use std::fmt;

/// SHA-256 (hex) over the canonical JSON of a resolved query plus the
/// caller's agent and session identity.
///
/// The evaluation instant is excluded: two resolutions of `due_date=today`
/// on the same day share a fingerprint because their bounds are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(String);

#[derive(Serialize)]
struct Canonical<'a> {
    shelf: Shelf,
    filters: &'a BTreeMap<String, ResolvedFilter>,
    sort: &'a SortSpec,
    limit: usize,
    offset: usize,
    agent: &'a str,
    session: &'a str,
}

impl Fingerprint {
    pub fn compute(query: &ResolvedQuery, ctx: &AgentContext) -> Result<Self> {
        let canonical = Canonical {
            shelf: query.shelf,
            filters: &query.filters,
            sort: &query.sort,
            limit: query.limit,
            offset: query.offset,
            agent: &ctx.agent_id,
            session: &ctx.session_id,
        };
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(Self(format!("{:x}", Sha256::digest(&bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form for logs
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}
