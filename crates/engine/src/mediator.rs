//! The query surface: raw parameters in, shared aggregated results out.
//!
//! Order of operations: scope check, parameter validation, resolution
//! against the current instant, cache lookup, aggregation, cache store,
//! audit. Scope and parameter failures return before any connector is
//! contacted.

use crate::aggregator::{Aggregator, ResolveOptions};
use chrono::Utc;
use shelfwise_cache::{Fingerprint, ResultCache};
use shelfwise_config::AppConfig;
use shelfwise_connectors::ConnectorRegistry;
use shelfwise_core::{
    AgentContext, AggregatedResult, Error, RawParams, Result, Shelf, StructuredQuery,
};
use shelfwise_query::QueryParser;
use shelfwise_security::{AuditEvent, AuditLogger, AuditOutcome, require_shelf};
use std::sync::Arc;

pub struct Mediator {
    parser: QueryParser,
    aggregator: Arc<Aggregator>,
    cache: Arc<ResultCache>,
    audit: Arc<AuditLogger>,
}

impl Mediator {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            parser: QueryParser::default(),
            aggregator,
            cache: Arc::new(ResultCache::default()),
            audit: Arc::new(AuditLogger::new()),
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(config: &AppConfig, registry: Arc<ConnectorRegistry>) -> Self {
        Self::new(Arc::new(Aggregator::from_config(registry, config)))
            .with_parser(QueryParser::new(
                config.query.default_limit,
                config.query.max_limit,
            ))
            .with_cache(Arc::new(ResultCache::from_config(&config.cache)))
    }

    pub fn with_parser(mut self, parser: QueryParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn parser(&self) -> &QueryParser {
        &self.parser
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        self.aggregator.registry()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Query a shelf by name with raw `key=value` parameters.
    pub async fn query(
        &self,
        shelf: &str,
        params: &RawParams,
        ctx: &AgentContext,
    ) -> Result<Arc<AggregatedResult>> {
        let shelf: Shelf = shelf.parse()?;
        self.query_shelf(shelf, params, ctx, ResolveOptions::default())
            .await
    }

    pub async fn query_shelf(
        &self,
        shelf: Shelf,
        params: &RawParams,
        ctx: &AgentContext,
        options: ResolveOptions,
    ) -> Result<Arc<AggregatedResult>> {
        self.authorize(ctx, shelf)?;
        let query = self.parser.parse(shelf, params)?;
        self.execute(&query, ctx, options).await
    }

    /// Run an already-validated query.
    pub async fn execute(
        &self,
        query: &StructuredQuery,
        ctx: &AgentContext,
        options: ResolveOptions,
    ) -> Result<Arc<AggregatedResult>> {
        let shelf = query.shelf;
        self.authorize(ctx, shelf)?;

        let resolved = query.resolve(Utc::now());
        let fingerprint = Fingerprint::compute(&resolved, ctx)?;

        if let Some(hit) = self.cache.get(&fingerprint) {
            self.record(ctx, shelf, &hit, true);
            return Ok(hit);
        }

        match self.aggregator.resolve_with(&resolved, ctx, options).await {
            Ok(result) => {
                let result = Arc::new(result);
                // partial answers are not worth replaying
                if !result.is_partial() {
                    self.cache.put(
                        fingerprint,
                        Arc::clone(&result),
                        self.cache.default_ttl(),
                        &ctx.session_id,
                    );
                }
                self.record(ctx, shelf, &result, false);
                Ok(result)
            }
            Err(err) => {
                if let Error::RateLimitExceeded { retry_after_ms, .. } = &err {
                    self.audit.log(
                        AuditEvent::RateLimited {
                            retry_after_ms: *retry_after_ms,
                        },
                        &ctx.agent_id,
                        &ctx.session_id,
                        shelf.as_str(),
                        AuditOutcome::Denied,
                        Some(err.to_string()),
                    );
                }
                Err(err)
            }
        }
    }

    /// Drop everything cached for `session`.
    pub fn end_session(&self, session: &str) -> usize {
        self.cache.teardown_session(session)
    }

    fn authorize(&self, ctx: &AgentContext, shelf: Shelf) -> Result<()> {
        require_shelf(ctx, shelf).inspect_err(|err| {
            if let Error::PermissionDenied { scope } = err {
                self.audit.log(
                    AuditEvent::PermissionDenied {
                        scope: scope.clone(),
                    },
                    &ctx.agent_id,
                    &ctx.session_id,
                    shelf.as_str(),
                    AuditOutcome::Denied,
                    None,
                );
            }
        })
    }

    fn record(&self, ctx: &AgentContext, shelf: Shelf, result: &AggregatedResult, cached: bool) {
        let outcome = if result.is_total_failure() {
            AuditOutcome::Failure
        } else if result.is_partial() {
            AuditOutcome::Partial
        } else {
            AuditOutcome::Success
        };
        self.audit.log(
            AuditEvent::ShelfQueried {
                returned: result.count,
                partial_failures: result.errors.len(),
                cached,
            },
            &ctx.agent_id,
            &ctx.session_id,
            shelf.as_str(),
            outcome,
            None,
        );
    }
}
