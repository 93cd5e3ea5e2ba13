//! Fan-out aggregation over every connector serving a shelf.
//!
//! One spawned task per connector, bounded by a per-shelf semaphore. Each
//! task waits for rate-limit admission, then for a permit, then fetches
//! under the fetch timeout, all while racing the caller's cancellation
//! token and deadline. Outcomes are collected in registry order, so merge
//! order never depends on which connector answered first.

use crate::merge;
use chrono::Utc;
use shelfwise_config::AppConfig;
use shelfwise_connectors::ConnectorRegistry;
use shelfwise_core::{
    AgentContext, AggregatedResult, Connector, Error, FailureReason, NativeRecord,
    PartialFailure, ResolvedQuery, Result, Shelf, SourceInfo, StructuredQuery,
};
use shelfwise_normalize::Normalizer;
use shelfwise_ratelimit::{BackoffPolicy, RateLimiter};
use shelfwise_security::require_shelf;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Caller-side controls for one resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Fetches still running at this instant are abandoned as cancelled.
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl ResolveOptions {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

pub struct Aggregator {
    registry: Arc<ConnectorRegistry>,
    limiter: Arc<RateLimiter>,
    normalizer: Normalizer,
    backoff: BackoffPolicy,
    fetch_timeout: Duration,
    semaphores: HashMap<Shelf, Arc<Semaphore>>,
}

/// Everything one fetch task needs, owned so it can be spawned.
struct FetchJob {
    connector: Arc<dyn Connector>,
    query: Arc<ResolvedQuery>,
    agent: String,
    limiter: Arc<RateLimiter>,
    backoff: BackoffPolicy,
    semaphore: Arc<Semaphore>,
    fetch_timeout: Duration,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Aggregator {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self {
            registry,
            limiter: Arc::new(RateLimiter::default()),
            normalizer: Normalizer::new(),
            backoff: BackoffPolicy::default(),
            fetch_timeout: Duration::from_secs(5),
            semaphores: Self::semaphores(4),
        }
    }

    pub fn from_config(registry: Arc<ConnectorRegistry>, config: &AppConfig) -> Self {
        Self::new(registry)
            .with_rate_limiter(Arc::new(RateLimiter::from_config(&config.rate_limit)))
            .with_backoff(BackoffPolicy::from_config(&config.rate_limit))
            .with_fetch_timeout(config.aggregator.fetch_timeout())
            .with_max_concurrency(config.aggregator.max_concurrency_per_shelf)
    }

    fn semaphores(permits: usize) -> HashMap<Shelf, Arc<Semaphore>> {
        Shelf::ALL
            .iter()
            .map(|shelf| (*shelf, Arc::new(Semaphore::new(permits.max(1)))))
            .collect()
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Concurrent fetches allowed per shelf, across all resolutions.
    pub fn with_max_concurrency(mut self, permits: usize) -> Self {
        self.semaphores = Self::semaphores(permits);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.registry
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Resolve `query` against the current instant.
    pub async fn resolve(&self, query: &StructuredQuery, ctx: &AgentContext) -> Result<AggregatedResult> {
        let resolved = query.resolve(Utc::now());
        self.resolve_with(&resolved, ctx, ResolveOptions::default()).await
    }

    pub async fn resolve_with(
        &self,
        query: &ResolvedQuery,
        ctx: &AgentContext,
        options: ResolveOptions,
    ) -> Result<AggregatedResult> {
        let shelf = query.shelf;
        require_shelf(ctx, shelf)?;

        let connectors = self.registry.connectors_for(shelf);
        if connectors.is_empty() {
            info!(shelf = %shelf, "No connectors registered for shelf");
            return Ok(AggregatedResult::new(shelf, vec![], 0, vec![], vec![], Utc::now()));
        }

        let semaphore = self
            .semaphores
            .get(&shelf)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no semaphore for shelf '{shelf}'")))?;

        // Dropping this resolution cancels every task it spawned.
        let cancel = options.cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let query = Arc::new(query.clone());

        let tasks: Vec<_> = connectors
            .into_iter()
            .map(|connector| {
                let job = FetchJob {
                    connector: Arc::clone(&connector),
                    query: Arc::clone(&query),
                    agent: ctx.agent_id.clone(),
                    limiter: Arc::clone(&self.limiter),
                    backoff: self.backoff,
                    semaphore: Arc::clone(&semaphore),
                    fetch_timeout: self.fetch_timeout,
                    deadline: options.deadline,
                    cancel: cancel.clone(),
                };
                (connector, tokio::spawn(job.run()))
            })
            .collect();

        let mut records = Vec::new();
        let mut errors = Vec::new();
        let mut succeeded = Vec::new();

        for (connector, handle) in tasks {
            let name = connector.name().to_string();
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(PartialFailure::new(
                    &name,
                    FailureReason::Unavailable,
                    format!("fetch task failed: {e}"),
                )),
            };

            match outcome {
                Ok(native) => {
                    let fetched = native.len();
                    let before = records.len();
                    self.collect(connector.as_ref(), &query, native, &mut records);
                    debug!(
                        connector = %name,
                        shelf = %shelf,
                        fetched,
                        kept = records.len() - before,
                        "Connector answered"
                    );
                    succeeded.push(name);
                }
                Err(failure) => {
                    warn!(
                        connector = %name,
                        shelf = %shelf,
                        reason = ?failure.reason,
                        message = %failure.message,
                        "Connector failed, continuing with partial results"
                    );
                    errors.push(failure);
                }
            }
        }

        if succeeded.is_empty()
            && let Some(retry_after_ms) = all_rate_limited(&errors)
        {
            return Err(Error::RateLimitExceeded {
                agent: ctx.agent_id.clone(),
                shelf: shelf.to_string(),
                retry_after_ms,
            });
        }

        let mut merged = merge::dedup(records);
        let total = merged.len();
        merge::sort(&mut merged, shelf, &query.sort);
        let page = merge::paginate(merged, query.offset, query.limit);

        info!(
            shelf = %shelf,
            agent = %ctx.agent_id,
            total,
            returned = page.len(),
            failed = errors.len(),
            "Shelf resolved"
        );
        Ok(AggregatedResult::new(shelf, page, total, errors, succeeded, Utc::now()))
    }

    /// Apply the filters `connector` did not apply itself, then normalize.
    fn collect(
        &self,
        connector: &dyn Connector,
        query: &ResolvedQuery,
        native: Vec<NativeRecord>,
        into: &mut Vec<shelfwise_core::CanonicalRecord>,
    ) {
        let shelf = query.shelf;
        let applied = connector.native_filters(shelf);
        let source = SourceInfo::of(connector);

        for record in native {
            if !shelfwise_query::matches_all(&record.data, shelf, &query.filters, &applied) {
                continue;
            }
            match self.normalizer.normalize(shelf, record, &source) {
                Ok(canonical) => into.push(canonical),
                Err(dropped) => warn!(
                    connector = %dropped.connector,
                    shelf = %dropped.shelf,
                    reason = %dropped.reason,
                    "{dropped}"
                ),
            }
        }
    }
}

/// The shortest retry hint when every failure was a rate-limit denial.
fn all_rate_limited(errors: &[PartialFailure]) -> Option<u64> {
    if errors.is_empty() {
        return None;
    }
    errors
        .iter()
        .map(|e| match e.reason {
            FailureReason::RateLimited { retry_after_ms } => Some(retry_after_ms),
            _ => None,
        })
        .collect::<Option<Vec<u64>>>()?
        .into_iter()
        .min()
}

impl FetchJob {
    async fn run(self) -> std::result::Result<Vec<NativeRecord>, PartialFailure> {
        let name = self.connector.name().to_string();
        let deadline = self.deadline;
        let cancel = self.cancel.clone();

        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PartialFailure::new(
                &name,
                FailureReason::Cancelled,
                "cancelled by caller",
            )),
            _ = expired => Err(PartialFailure::new(
                &name,
                FailureReason::Cancelled,
                "deadline reached before the fetch completed",
            )),
            outcome = self.fetch(&name) => outcome,
        }
    }

    async fn fetch(&self, name: &str) -> std::result::Result<Vec<NativeRecord>, PartialFailure> {
        let shelf = self.query.shelf;

        // Admission before the permit: a throttled agent backs off without
        // holding a slot other agents need.
        self.limiter
            .acquire(&self.agent, shelf, &self.backoff, &self.cancel)
            .await
            .map_err(|e| e.into_failure(name))?;

        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PartialFailure::new(name, FailureReason::Cancelled, "shelf closed"))?;

        match tokio::time::timeout(self.fetch_timeout, self.connector.fetch(shelf, &self.query)).await {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(e)) => Err(PartialFailure::from_error(name, &e)),
            Err(_) => Err(PartialFailure::new(
                name,
                FailureReason::Timeout,
                format!(
                    "Connector '{name}' timed out after {}ms",
                    self.fetch_timeout.as_millis()
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use shelfwise_connectors::FixtureConnector;
    use shelfwise_core::{ConnectorError, FilterValue, Sensitivity, ShelfPayload};
    use shelfwise_ratelimit::Limit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn agent() -> AgentContext {
        AgentContext::new("planner", "session-1").with_all_scopes()
    }

    fn aggregator(connectors: Vec<Arc<dyn Connector>>) -> Aggregator {
        let mut registry = ConnectorRegistry::new();
        for connector in connectors {
            registry.register(connector);
        }
        Aggregator::new(Arc::new(registry))
    }

    fn tasks_fixture(name: &str, records: serde_json::Value) -> FixtureConnector {
        let records = records.as_array().cloned().unwrap_or_default();
        FixtureConnector::new(name).with_records(Shelf::Tasks, records)
    }

    /// Counts fetches; used to prove nothing is dispatched.
    struct CountingConnector {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        fn name(&self) -> &str {
            "counting"
        }

        fn supported_shelves(&self) -> Vec<Shelf> {
            vec![Shelf::Comms]
        }

        async fn fetch(
            &self,
            _shelf: Shelf,
            _query: &ResolvedQuery,
        ) -> std::result::Result<Vec<NativeRecord>, ConnectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn merges_connectors_and_dedups_by_source() {
        let a = tasks_fixture(
            "todo-a",
            json!([
                { "id": "t-1", "type": "task", "title": "Ship", "status": "active", "priority": "high", "updated_at": "2025-03-02T00:00:00Z" },
                { "id": "t-2", "type": "task", "title": "Plan", "status": "pending", "priority": "low", "updated_at": "2025-03-01T00:00:00Z" }
            ]),
        )
        .with_system("todo");
        // same system, same id, lower confidence, flagged confidential
        let b = tasks_fixture(
            "todo-b",
            json!([
                { "id": "t-1", "title": "Ship (mirror)", "status": "done", "sensitivity": "s3", "updated_at": "2025-03-02T00:00:00Z" }
            ]),
        )
        .with_system("todo");

        let result = aggregator(vec![Arc::new(a), Arc::new(b)])
            .resolve(&StructuredQuery::new(Shelf::Tasks), &agent())
            .await
            .unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.succeeded, vec!["todo-a", "todo-b"]);
        assert!(result.errors.is_empty());
        let shipped = &result.records[0];
        assert_eq!(shipped.id, "t-1");
        assert_eq!(shipped.sensitivity, Sensitivity::S3);
        match &shipped.payload {
            ShelfPayload::Tasks(task) => assert_eq!(task.title, "Ship"),
            other => panic!("Expected tasks payload, got: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connector_becomes_timeout_failure() {
        let fast = tasks_fixture("fast", json!([{ "id": "t-1", "type": "task", "title": "Ship", "status": "pending", "priority": "low" }]));
        let slow = tasks_fixture("slow", json!([{ "id": "t-9", "title": "Late" }]))
            .with_latency(Duration::from_secs(30));

        let result = aggregator(vec![Arc::new(fast), Arc::new(slow)])
            .with_fetch_timeout(Duration::from_secs(5))
            .resolve(&StructuredQuery::new(Shelf::Tasks), &agent())
            .await
            .unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].connector, "slow");
        assert_eq!(result.errors[0].reason, FailureReason::Timeout);
        assert!(result.is_partial());
    }

    #[tokio::test]
    async fn connector_errors_are_partial_failures() {
        let ok = tasks_fixture("ok", json!([{ "id": "t-1", "title": "Ship" }]));
        let broken = tasks_fixture("broken", json!([]))
            .failing_with(ConnectorError::Auth("token expired".into()));

        let result = aggregator(vec![Arc::new(broken), Arc::new(ok)])
            .resolve(&StructuredQuery::new(Shelf::Tasks), &agent())
            .await
            .unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.errors[0].reason, FailureReason::AuthFailed);
        assert_eq!(result.succeeded, vec!["ok"]);
    }

    #[tokio::test]
    async fn missing_scope_fails_before_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let aggregator = aggregator(vec![Arc::new(CountingConnector {
            calls: Arc::clone(&calls),
        })]);
        let ctx = AgentContext::new("planner", "s").with_scope("read:tasks");

        let err = aggregator
            .resolve(&StructuredQuery::new(Shelf::Comms), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_native_filters_apply_after_fetch() {
        let records = json!([
            { "id": "t-1", "title": "A", "priority": "high", "status": "pending" },
            { "id": "t-2", "title": "B", "priority": "low", "status": "pending" },
            { "id": "t-3", "title": "C", "priority": "high", "status": "completed" }
        ]);
        let native = tasks_fixture("native", records.clone()).with_native_filters(vec!["status".into()]);
        let plain = tasks_fixture("plain", records).with_system("plain");

        let query = StructuredQuery::new(Shelf::Tasks)
            .with_filter("priority", FilterValue::Exact("high".into()))
            .with_filter("status", FilterValue::Exact("pending".into()));
        let result = aggregator(vec![Arc::new(native), Arc::new(plain)])
            .resolve(&query, &agent())
            .await
            .unwrap();

        // both connectors yield exactly t-1, from different systems
        assert_eq!(result.total, 2);
        assert!(result.records.iter().all(|r| r.id == "t-1"));
    }

    #[tokio::test]
    async fn dropped_records_are_skipped() {
        let fixture = tasks_fixture(
            "todo",
            json!([{ "title": "No id" }, { "id": "t-1", "title": "Has id" }]),
        );
        let result = aggregator(vec![Arc::new(fixture)])
            .resolve(&StructuredQuery::new(Shelf::Tasks), &agent())
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn pagination_reports_total_before_paging() {
        let records: Vec<_> = (1..=5)
            .map(|n| json!({ "id": format!("t-{n}"), "title": format!("Task {n}") }))
            .collect();
        let fixture = FixtureConnector::new("todo").with_records(Shelf::Tasks, records);

        let query = StructuredQuery::new(Shelf::Tasks)
            .sorted_by("id", shelfwise_core::SortOrder::Asc)
            .with_page(1, 2);
        let result = aggregator(vec![Arc::new(fixture)])
            .resolve(&query, &agent())
            .await
            .unwrap();

        assert_eq!(result.total, 5);
        assert_eq!(result.count, 2);
        let ids: Vec<_> = result.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t-2", "t-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn every_connector_rate_limited_is_an_error() {
        let fixture = tasks_fixture("todo", json!([{ "id": "t-1", "title": "Ship" }]));
        let aggregator = aggregator(vec![Arc::new(fixture)])
            .with_rate_limiter(Arc::new(RateLimiter::new(Limit::new(1, 1), Limit::new(600, 100))))
            .with_backoff(BackoffPolicy::no_retry());
        let query = StructuredQuery::new(Shelf::Tasks);

        aggregator.resolve(&query, &agent()).await.unwrap();
        match aggregator.resolve(&query, &agent()).await {
            Err(Error::RateLimitExceeded { retry_after_ms, shelf, .. }) => {
                assert_eq!(shelf, "tasks");
                assert!(retry_after_ms > 0);
            }
            other => panic!("Expected RateLimitExceeded, got: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_agent_does_not_hold_a_shelf_slot() {
        let fixture = tasks_fixture("todo", json!([{ "id": "t-1", "title": "Ship" }]));
        let aggregator = Arc::new(
            aggregator(vec![Arc::new(fixture)])
                .with_max_concurrency(1)
                .with_rate_limiter(Arc::new(RateLimiter::new(Limit::new(1, 1), Limit::new(600, 100))))
                .with_backoff(BackoffPolicy {
                    base: Duration::from_secs(10),
                    max_delay: Duration::from_secs(30),
                    max_attempts: 3,
                }),
        );
        let query = StructuredQuery::new(Shelf::Tasks);
        let batch = AgentContext::new("batch", "s-batch").with_all_scopes();

        // spend the batch agent's only token, then leave it backing off
        aggregator.resolve(&query, &batch).await.unwrap();
        let throttled = {
            let aggregator = Arc::clone(&aggregator);
            let query = query.clone();
            tokio::spawn(async move { aggregator.resolve(&query, &batch).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let start = Instant::now();
        let result = aggregator.resolve(&query, &agent()).await.unwrap();
        assert_eq!(result.count, 1);
        assert!(start.elapsed() < Duration::from_secs(1));

        throttled.abort();
    }

    #[tokio::test]
    async fn pages_over_two_connectors_tile_the_merged_order() {
        let a = tasks_fixture(
            "todo-a",
            json!([
                { "id": "t-1", "title": "A1", "due_date": "2025-03-01" },
                { "id": "t-3", "title": "A3", "due_date": "2025-03-02" },
                { "id": "t-5", "title": "A5", "due_date": "2025-03-02" },
                { "id": "t-7", "title": "A7", "due_date": "2025-03-03" }
            ]),
        )
        .with_system("a");
        let b = tasks_fixture(
            "todo-b",
            json!([
                { "id": "t-2", "title": "B2", "due_date": "2025-03-01" },
                { "id": "t-4", "title": "B4", "due_date": "2025-03-02" },
                { "id": "t-6", "title": "B6", "due_date": "2025-03-03" },
                { "id": "t-8", "title": "B8" }
            ]),
        )
        .with_system("b");
        let aggregator = aggregator(vec![Arc::new(a), Arc::new(b)]);
        let sorted = StructuredQuery::new(Shelf::Tasks).sorted_by("due_date", shelfwise_core::SortOrder::Asc);
        let ids = |result: &AggregatedResult| -> Vec<String> {
            result.records.iter().map(|r| r.id.clone()).collect()
        };

        let whole = aggregator
            .resolve(&sorted.clone().with_page(0, 50), &agent())
            .await
            .unwrap();
        assert_eq!(
            ids(&whole),
            vec!["t-1", "t-2", "t-3", "t-4", "t-5", "t-6", "t-7", "t-8"]
        );

        for size in [1, 3, 5] {
            let mut paged = Vec::new();
            let mut offset = 0;
            while offset < whole.total {
                let page = aggregator
                    .resolve(&sorted.clone().with_page(offset, size), &agent())
                    .await
                    .unwrap();
                assert_eq!(page.total, whole.total);
                assert!(page.count <= size);
                paged.extend(ids(&page));
                offset += size;
            }
            assert_eq!(paged, ids(&whole), "page size {size}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_unfinished_fetches() {
        let fast = tasks_fixture("fast", json!([{ "id": "t-1", "title": "Ship" }]));
        let slow = tasks_fixture("slow", json!([{ "id": "t-2", "title": "Late" }]))
            .with_latency(Duration::from_secs(3));
        let aggregator = aggregator(vec![Arc::new(fast), Arc::new(slow)]);

        let query = StructuredQuery::new(Shelf::Tasks).resolve(Utc::now());
        let options = ResolveOptions::default().with_timeout(Duration::from_secs(1));
        let result = aggregator.resolve_with(&query, &agent(), options).await.unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.errors[0].connector, "slow");
        assert_eq!(result.errors[0].reason, FailureReason::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_token_cancels_everything() {
        let fixture = tasks_fixture("todo", json!([{ "id": "t-1", "title": "Ship" }]))
            .with_latency(Duration::from_millis(50));
        let aggregator = aggregator(vec![Arc::new(fixture)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let query = StructuredQuery::new(Shelf::Tasks).resolve(Utc::now());
        let result = aggregator
            .resolve_with(&query, &agent(), ResolveOptions::default().with_cancel(cancel))
            .await
            .unwrap();
        assert_eq!(result.count, 0);
        assert_eq!(result.errors[0].reason, FailureReason::Cancelled);
    }

    #[tokio::test]
    async fn shelf_without_connectors_is_empty() {
        let result = aggregator(vec![])
            .resolve(&StructuredQuery::new(Shelf::Docs), &agent())
            .await
            .unwrap();
        assert_eq!(result.count, 0);
        assert!(!result.is_total_failure());
    }
}
