//! Execution Engine (C5, spec section 4.5): batches, orders, and commits
//! `QueryEvents` against the graph database in a single transaction per
//! batch, retrying transient failures with exponential backoff and routing
//! permanent ones through the configured dead-letter policy.
//!
//! The session pool below mirrors the `Arc<OnceCell<Arc<Graph>>>` lazy
//! connection idiom used by the corpus's own Neo4j storage connector: the
//! cell is populated on first use and every subsequent batch reuses the
//! same connection, released only when the engine itself is dropped.

use std::sync::Arc;
use std::time::Duration;

use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Neo4jErrorKind, Query};
use tokio::sync::OnceCell;
use tracing::warn;

use bridge_core::{BridgeError, DeadLetterPolicy, EventParams, GraphConnectionConfig, QueryEvents, RetryConfig, Value};

/// Where a batch currently stands in the state machine of spec section 4.5:
/// `Building -> Submitted -> (Committed | Retrying -> Submitted | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Building,
    Submitted,
    Retrying,
    Committed,
    Failed,
}

/// Lazily-connects and caches a single `neo4rs::Graph` session, released on
/// all exit paths (including panics) because `Graph`'s own drop closes its
/// connection pool — no manual acquire/release bookkeeping is needed here.
#[derive(Default)]
pub struct GraphPool {
    cell: OnceCell<Arc<Graph>>,
}

impl GraphPool {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, config: &GraphConnectionConfig) -> Result<Arc<Graph>, BridgeError> {
        let graph = self
            .cell
            .get_or_try_init(|| async {
                let cfg = ConfigBuilder::default()
                    .uri(config.uri.clone())
                    .user(config.username.clone())
                    .password(config.password.clone())
                    .db(config.database.clone())
                    .build()
                    .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;
                let graph = Graph::connect(cfg)
                    .await
                    .map_err(|e| BridgeError::TransientDriver(e.to_string()))?;
                Ok::<_, BridgeError>(Arc::new(graph))
            })
            .await?;
        Ok(graph.clone())
    }
}

/// Commits batches of `QueryEvents` against a pooled graph session.
pub struct ExecutionEngine {
    pool: GraphPool,
    graph_config: GraphConnectionConfig,
    retry: RetryConfig,
    chunk_size: usize,
    dead_letter_policy: DeadLetterPolicy,
}

impl ExecutionEngine {
    pub fn new(
        graph_config: GraphConnectionConfig,
        retry: RetryConfig,
        chunk_size: usize,
        dead_letter_policy: DeadLetterPolicy,
    ) -> Self {
        Self { pool: GraphPool::new(), graph_config, retry, chunk_size: chunk_size.max(1), dead_letter_policy }
    }

    /// Commits an ordered batch in a single transaction, chunking each
    /// statement's parameter list to `chunk_size` entries per invocation
    /// (spec section 4.5). Transient failures retry the whole batch up to
    /// `maxRetries` with doubling backoff; permanent failures are routed
    /// through the dead-letter policy rather than propagated, unless that
    /// policy is `Fail`.
    pub async fn commit_batch(&self, events: &[QueryEvents]) -> Result<(), BridgeError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut attempt = 0u32;
        loop {
            match self.try_commit(events).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let backoff_msecs = self.retry.backoff_msecs.saturating_mul(1u64 << attempt.min(16));
                    warn!(
                        attempt,
                        backoff_msecs,
                        error = %err,
                        "retrying batch after transient graph-database failure"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_msecs)).await;
                }
                Err(err) => return self.route_permanent_failure(err),
            }
        }
    }

    async fn try_commit(&self, events: &[QueryEvents]) -> Result<(), BridgeError> {
        let graph = self.pool.get(&self.graph_config).await?;
        let mut txn = graph.start_txn().await.map_err(classify_driver_error)?;
        for event in events {
            for chunk in event.parameters.chunks(self.chunk_size) {
                let query = build_query(event, chunk);
                txn.run(query).await.map_err(classify_driver_error)?;
            }
        }
        txn.commit().await.map_err(classify_driver_error)?;
        Ok(())
    }

    fn route_permanent_failure(&self, err: BridgeError) -> Result<(), BridgeError> {
        match &self.dead_letter_policy {
            DeadLetterPolicy::Fail => Err(err),
            DeadLetterPolicy::Skip => {
                warn!(error = %err, "skipping permanently-failed batch (errors.tolerance=all)");
                Ok(())
            }
            DeadLetterPolicy::DeadLetterTopic(topic) => {
                // Publishing to the dead-letter topic is the broker-producer
                // collaborator's job (spec section 1's exclusions); the
                // engine's role ends at classifying and logging the route.
                warn!(error = %err, dead_letter_topic = %topic, "routing permanently-failed batch to dead-letter topic");
                Ok(())
            }
        }
    }
}

fn classify_driver_error(err: neo4rs::Error) -> BridgeError {
    let transient = match &err {
        neo4rs::Error::ConnectionError => true,
        neo4rs::Error::Neo4j(e) => e.kind() == Neo4jErrorKind::Transient,
        _ => false,
    };
    if transient {
        BridgeError::TransientDriver(err.to_string())
    } else {
        BridgeError::PermanentDriver(err.to_string())
    }
}

/// Converts one statement invocation's parameter chunk into a bound
/// `neo4rs::Query`, binding it as `$events` to match every handler's
/// `UNWIND $events AS event` prelude.
fn build_query(event: &QueryEvents, chunk: &[EventParams]) -> Query {
    let events_list =
        BoltList { value: chunk.iter().map(|params| value_to_bolt(&Value::Map(params.clone()))).collect() };
    query(&event.statement).param("events", BoltType::List(events_list))
}

/// Mirrors the corpus's own `json_value_to_bolt_value` conversion (the
/// Neo4j storage connector's way of crossing the serde/Bolt boundary),
/// generalized from `serde_json::Value` to this crate's own [`Value`].
fn value_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull::default()),
        Value::Bool(b) => BoltType::Boolean(neo4rs::BoltBoolean::new(*b)),
        Value::Int(i) => BoltType::Integer(neo4rs::BoltInteger::new(*i)),
        Value::Float(f) => BoltType::Float(neo4rs::BoltFloat::new(*f)),
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::List(items) => BoltType::List(BoltList { value: items.iter().map(value_to_bolt).collect() }),
        Value::Map(map) => BoltType::Map(BoltMap {
            value: map.iter().map(|(k, v)| (BoltString::new(k), value_to_bolt(v))).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn value_to_bolt_preserves_map_shape() {
        let mut map = IndexMap::new();
        map.insert("id".to_string(), Value::Int(1));
        map.insert("name".to_string(), Value::String("alice".to_string()));
        let bolt = value_to_bolt(&Value::Map(map));
        match bolt {
            BoltType::Map(m) => assert_eq!(m.value.len(), 2),
            other => panic!("expected BoltType::Map, got {other:?}"),
        }
    }

    #[test]
    fn build_query_binds_events_param() {
        let mut params = IndexMap::new();
        params.insert("id".to_string(), Value::Int(1));
        let events = QueryEvents::with_parameters("UNWIND $events AS event RETURN event", vec![params]);
        let query = build_query(&events, &events.parameters);
        // neo4rs::Query does not expose its bound params for inspection;
        // this only asserts construction doesn't panic on a realistic shape.
        let _ = query;
    }
}
