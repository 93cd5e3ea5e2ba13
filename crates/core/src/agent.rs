//! The calling agent's identity and capability scopes.

use crate::shelf::Shelf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Who is asking, within which session, holding which scopes.
///
/// Scopes are plain strings: `read:<shelf>` grants a shelf, `tool:<view>`
/// grants a composed view. `read:*` and `tool:*` are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: String,
    pub session_id: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl AgentContext {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            scopes: BTreeSet::new(),
        }
    }

    /// Builder-style scope grant.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    /// Grant every shelf and every view.
    pub fn with_all_scopes(self) -> Self {
        self.with_scope("read:*").with_scope("tool:*")
    }

    /// Whether `scope` is held, directly or through its wildcard.
    pub fn has_scope(&self, scope: &str) -> bool {
        if self.scopes.contains(scope) {
            return true;
        }
        match scope.split_once(':') {
            Some((prefix, _)) => self.scopes.contains(&format!("{prefix}:*")),
            None => false,
        }
    }

    pub fn can_read(&self, shelf: Shelf) -> bool {
        self.has_scope(&shelf.read_scope())
    }

    /// A context carrying additional read scopes for `shelves`, used when a
    /// view runs its constituent queries on the caller's behalf.
    pub fn delegated(&self, shelves: &[Shelf]) -> Self {
        let mut ctx = self.clone();
        ctx.scopes
            .extend(shelves.iter().map(|shelf| shelf.read_scope()));
        ctx
    }
}
