//! Runs view definitions against the mediator.

use crate::builtins;
use crate::definition::{Outputs, Plan, QueryTemplate, ViewInput, ViewRegistry, ViewSummary};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use shelfwise_core::{AgentContext, Error, FailureReason, PartialFailure, RawParams, Result};
use shelfwise_engine::{Mediator, ResolveOptions};
use shelfwise_security::{AuditEvent, AuditOutcome, require_view};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a view run hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ViewResult {
    pub view: String,
    pub data: serde_json::Value,
    /// Shelves whose constituent query was blocked or failed outright.
    pub missing: Vec<String>,
    pub errors: Vec<PartialFailure>,
    pub generated_at: DateTime<Utc>,
}

impl ViewResult {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct ViewComposer {
    mediator: Arc<Mediator>,
    views: Arc<ViewRegistry>,
}

impl ViewComposer {
    pub fn new(mediator: Arc<Mediator>, views: Arc<ViewRegistry>) -> Self {
        Self { mediator, views }
    }

    /// A composer serving the built-in views.
    pub fn with_builtins(mediator: Arc<Mediator>) -> Self {
        Self::new(mediator, Arc::new(builtins::default_registry()))
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.views
    }

    pub fn describe(&self) -> Vec<ViewSummary> {
        self.views.describe()
    }

    /// Run the view `name` on behalf of `ctx`.
    ///
    /// Holding `tool:<name>` is enough: the constituent queries run with
    /// read scopes for the view's shelves delegated on top of the caller's.
    pub async fn run_view(
        &self,
        name: &str,
        params: &RawParams,
        ctx: &AgentContext,
    ) -> Result<ViewResult> {
        // Scope first, so an unauthorized caller learns nothing about
        // which views exist.
        self.authorize(ctx, name)?;
        let view = self.views.lookup(name)?;
        let params = view.bind_params(params)?;

        let delegated = ctx.delegated(&view.shelves());
        let now = Utc::now();
        let mut outputs = Outputs::new();
        let mut missing: Vec<String> = Vec::new();
        let mut errors: Vec<PartialFailure> = Vec::new();

        for stage in &view.stages {
            let mut runs: Vec<(&QueryTemplate, RawParams)> = Vec::new();
            {
                let input = ViewInput {
                    params: &params,
                    outputs: &outputs,
                    now,
                };
                for template in stage {
                    match (template.plan)(&input) {
                        Plan::Run(query) => runs.push((template, query)),
                        Plan::Skip => {
                            debug!(view = name, key = template.key, "Constituent skipped");
                        }
                        Plan::Blocked => {
                            debug!(view = name, key = template.key, "Constituent blocked");
                            note_missing(&mut missing, template);
                        }
                    }
                }
            }

            let settled = join_all(runs.iter().map(|(template, query)| {
                self.mediator.query_shelf(
                    template.shelf,
                    query,
                    &delegated,
                    ResolveOptions::default(),
                )
            }))
            .await;

            for ((template, _), outcome) in runs.iter().zip(settled) {
                match outcome {
                    Ok(result) => {
                        errors.extend(result.errors.iter().cloned());
                        if result.is_total_failure() {
                            note_missing(&mut missing, template);
                        } else {
                            outputs.insert(template.key.to_string(), result);
                        }
                    }
                    Err(err @ (Error::InvalidParameter { .. } | Error::PermissionDenied { .. })) => {
                        return Err(err);
                    }
                    Err(err) => {
                        warn!(view = name, key = template.key, error = %err, "Constituent query failed");
                        let reason = match &err {
                            Error::RateLimitExceeded { retry_after_ms, .. } => {
                                FailureReason::RateLimited {
                                    retry_after_ms: *retry_after_ms,
                                }
                            }
                            _ => FailureReason::Unavailable,
                        };
                        errors.push(PartialFailure::new(template.key, reason, err.to_string()));
                        note_missing(&mut missing, template);
                    }
                }
            }
        }

        let data = (view.derive)(&ViewInput {
            params: &params,
            outputs: &outputs,
            now,
        });

        let outcome = if missing.is_empty() {
            AuditOutcome::Success
        } else {
            AuditOutcome::Partial
        };
        self.mediator.audit().log(
            AuditEvent::ViewRun {
                missing: missing.clone(),
            },
            &ctx.agent_id,
            &ctx.session_id,
            name,
            outcome,
            None,
        );
        info!(
            view = name,
            agent = %ctx.agent_id,
            missing = missing.len(),
            errors = errors.len(),
            "View completed"
        );

        Ok(ViewResult {
            view: name.to_string(),
            data,
            missing,
            errors,
            generated_at: Utc::now(),
        })
    }

    fn authorize(&self, ctx: &AgentContext, view: &str) -> Result<()> {
        require_view(ctx, view).inspect_err(|err| {
            if let Error::PermissionDenied { scope } = err {
                self.mediator.audit().log(
                    AuditEvent::PermissionDenied {
                        scope: scope.clone(),
                    },
                    &ctx.agent_id,
                    &ctx.session_id,
                    view,
                    AuditOutcome::Denied,
                    None,
                );
            }
        })
    }
}

fn note_missing(missing: &mut Vec<String>, template: &QueryTemplate) {
    let shelf = template.shelf.as_str();
    if !missing.iter().any(|m| m == shelf) {
        missing.push(shelf.to_string());
    }
}
