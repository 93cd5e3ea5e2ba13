//! Capability scope checks.

use shelfwise_core::{AgentContext, Error, Result, Shelf};
use tracing::warn;

/// The scope that grants a composed view.
pub fn view_scope(view: &str) -> String {
    format!("tool:{view}")
}

/// Fail with `PermissionDenied` unless `ctx` may read `shelf`.
pub fn require_shelf(ctx: &AgentContext, shelf: Shelf) -> Result<()> {
    require(ctx, shelf.read_scope())
}

/// Fail with `PermissionDenied` unless `ctx` may run `view`.
pub fn require_view(ctx: &AgentContext, view: &str) -> Result<()> {
    require(ctx, view_scope(view))
}

fn require(ctx: &AgentContext, scope: String) -> Result<()> {
    if ctx.has_scope(&scope) {
        return Ok(());
    }
    warn!(agent = %ctx.agent_id, scope = %scope, "Scope check failed");
    Err(Error::PermissionDenied { scope })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shelf_scope_required() {
        let ctx = AgentContext::new("a", "s").with_scope("read:tasks");
        assert!(require_shelf(&ctx, Shelf::Tasks).is_ok());
        match require_shelf(&ctx, Shelf::Comms) {
            Err(Error::PermissionDenied { scope }) => assert_eq!(scope, "read:comms"),
            other => panic!("Expected PermissionDenied, got: {other:?}"),
        }
    }

    #[test]
    fn view_scope_and_wildcard() {
        let ctx = AgentContext::new("a", "s").with_scope("tool:today_briefing");
        assert!(require_view(&ctx, "today_briefing").is_ok());
        assert!(require_view(&ctx, "client_pipeline").is_err());

        let all = AgentContext::new("a", "s").with_all_scopes();
        assert!(require_view(&all, "client_pipeline").is_ok());
        assert!(require_shelf(&all, Shelf::Identity).is_ok());
    }
}
