//! CLI runner for the neo4j-kafka-bridge source connector.
//!
//! The opposing direction of the sink: poll a configured Cypher query (or
//! tail the graph's change-data-capture feed) on an interval, project the
//! rows into outbound records with `bridge-source`, and publish them to
//! Kafka. Not the hard core of this bridge (spec section 6) — this runner
//! keeps strategy selection, cursoring, and projection thin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use neo4rs::{BoltType, ConfigBuilder, Graph};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bridge_core::{Record, SourceConnectorConfig, SourceQuerySpec, Value};
use bridge_source::{CdcTailProjector, ChangeProjector, CursorStore, InMemoryCursorStore, QueryPollProjector};

/// Command-line arguments for the source connector runner.
#[derive(Parser, Debug)]
#[command(name = "neo4j-source-connector")]
#[command(about = "Republishes graph rows and change events as broker records")]
struct Args {
    /// Path to the connector's TOML configuration file, layered the same
    /// way the sink connector's is (`NEO4J_SOURCE_`-prefixed env overrides).
    #[arg(short, long)]
    config: PathBuf,

    /// Kafka broker bootstrap list.
    #[arg(long, default_value = "localhost:9092")]
    brokers: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config: SourceConnectorConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("NEO4J_SOURCE_").split("__"))
        .extract()
        .context("loading source connector configuration")?;
    config.validate().context("validating source connector configuration")?;

    let graph_cfg = ConfigBuilder::default()
        .uri(config.graph.uri.clone())
        .user(config.graph.username.clone())
        .password(config.graph.password.clone())
        .db(config.graph.database.clone())
        .build()
        .context("building graph driver config")?;
    let graph = Arc::new(Graph::connect(graph_cfg).await.context("connecting to graph database")?);

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &args.brokers)
        .set("message.timeout.ms", "30000")
        .create()
        .context("creating kafka producer")?;
    let producer = Arc::new(producer);

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();
    for (topic, spec) in config.topics.clone() {
        let graph = graph.clone();
        let producer = producer.clone();
        let cancel = cancel.child_token();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = run_topic(graph, producer, topic.clone(), spec, cancel).await {
                error!(topic = %topic, error = %err, "source topic loop exited with an error");
            }
        }));
    }

    signal::ctrl_c().await.context("listening for shutdown signal")?;
    info!("received shutdown signal, stopping poll loops");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// Runs one topic's poll-or-tail loop until cancelled, publishing every
/// projected record to the broker.
async fn run_topic(
    graph: Arc<Graph>,
    producer: Arc<FutureProducer>,
    topic: String,
    spec: SourceQuerySpec,
    cancel: CancellationToken,
) -> Result<()> {
    match spec {
        SourceQuerySpec::Poll { query, cursor_column, interval_msecs } => {
            let projector =
                QueryPollProjector::new(topic.clone(), cursor_column.clone(), InMemoryCursorStore::default());
            let interval = Duration::from_millis(interval_msecs);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(interval) => {}
                }
                let cursor = projector.last_cursor().unwrap_or(Value::Null);
                let rows = match run_poll_query(&graph, &query, &cursor).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        warn!(topic = %topic, error = %err, "poll query failed, will retry next interval");
                        continue;
                    }
                };
                if rows.is_empty() {
                    continue;
                }
                let records = projector.project(rows);
                publish(&producer, &records).await;
            }
        }
        SourceQuerySpec::CdcTail { selectors } => {
            let projector = CdcTailProjector::new(topic.clone());
            let cursor_store = InMemoryCursorStore::default();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(1000)) => {}
                }
                let from = cursor_store.load();
                let (rows, next_cursor) = match run_cdc_query(&graph, &selectors, &from).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(topic = %topic, error = %err, "cdc query failed, will retry next interval");
                        continue;
                    }
                };
                if let Some(cursor) = next_cursor {
                    cursor_store.store(cursor);
                }
                if rows.is_empty() {
                    continue;
                }
                let records = projector.project(rows);
                publish(&producer, &records).await;
            }
        }
    }
}

/// Runs a poll query bound to the projector's cursor, returning each result
/// row as a [`Value::Map`] keyed by returned column name.
async fn run_poll_query(graph: &Graph, statement: &str, cursor: &Value) -> Result<Vec<Value>> {
    let q = neo4rs::query(statement).param("cursor", value_to_bolt(cursor));
    let mut stream = graph.execute(q).await.context("executing poll query")?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next().await.context("streaming poll query rows")? {
        rows.push(row_to_value(&row));
    }
    Ok(rows)
}

/// Runs the change-data-capture feed query from the last-seen change
/// identifier (or `db.cdc.current()` on first run), returning the rows and
/// the change identifier to resume from on the next call.
async fn run_cdc_query(graph: &Graph, selectors: &[String], from: &Option<Value>) -> Result<(Vec<Value>, Option<Value>)> {
    let from_id = match from {
        Some(cursor) => cursor.clone(),
        None => {
            let mut current = graph.execute(neo4rs::query("CALL db.cdc.current()")).await.context("fetching cdc cursor")?;
            match current.next().await.context("reading cdc cursor row")? {
                Some(row) => row_to_value(&row).as_map().and_then(|m| m.get("id")).cloned().unwrap_or(Value::Null),
                None => Value::Null,
            }
        }
    };

    let selector_list = BoltType::List(neo4rs::BoltList {
        value: selectors.iter().map(|s| BoltType::String(neo4rs::BoltString::new(s))).collect(),
    });
    let q = neo4rs::query("CALL db.cdc.query($from, $selectors)")
        .param("from", value_to_bolt(&from_id))
        .param("selectors", selector_list);
    let mut stream = graph.execute(q).await.context("executing cdc query")?;
    let mut rows = Vec::new();
    let mut last_id = None;
    while let Some(row) = stream.next().await.context("streaming cdc query rows")? {
        let value = row_to_value(&row);
        if let Some(id) = value.as_map().and_then(|m| m.get("id")).cloned() {
            last_id = Some(id);
        }
        rows.push(value);
    }
    Ok((rows, last_id))
}

/// Publishes every projected record to its topic, logging (rather than
/// failing the loop on) individual delivery errors — durability and retry
/// for the outbound leg are the broker producer's concern.
async fn publish(producer: &FutureProducer, records: &[Record]) {
    for record in records {
        let payload = serde_json::to_vec(&serde_json::Value::from(record.value.clone())).unwrap_or_default();
        let key = match &record.key {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => serde_json::to_string(&serde_json::Value::from(other.clone())).unwrap_or_default(),
        };
        let send = producer.send(
            FutureRecord::to(&record.topic).payload(&payload).key(&key),
            Duration::from_secs(5),
        );
        if let Err((err, _)) = send.await {
            warn!(topic = %record.topic, error = %err, "failed to publish source record");
        }
    }
}

/// Converts a returned row's fields into a single [`Value::Map`], matching
/// the bind shape the sink side reads its CDC payloads as.
fn row_to_value(row: &neo4rs::Row) -> Value {
    let mut map = indexmap::IndexMap::new();
    for key in row.keys() {
        if let Ok(bolt) = row.get::<BoltType>(key) {
            map.insert(key.to_string(), bolt_to_value(&bolt));
        }
    }
    Value::Map(map)
}

/// Inverse of the sink execution engine's `value_to_bolt`: converts a driver
/// row field back into this crate's own [`Value`] shape.
fn bolt_to_value(bolt: &BoltType) -> Value {
    match bolt {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::Int(i.value),
        BoltType::Float(f) => Value::Float(f.value),
        BoltType::String(s) => Value::String(s.value.clone()),
        BoltType::List(list) => Value::List(list.value.iter().map(bolt_to_value).collect()),
        BoltType::Map(map) => {
            Value::Map(map.value.iter().map(|(k, v)| (k.value.clone(), bolt_to_value(v))).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn value_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(neo4rs::BoltNull::default()),
        Value::Bool(b) => BoltType::Boolean(neo4rs::BoltBoolean::new(*b)),
        Value::Int(i) => BoltType::Integer(neo4rs::BoltInteger::new(*i)),
        Value::Float(f) => BoltType::Float(neo4rs::BoltFloat::new(*f)),
        Value::String(s) => BoltType::String(neo4rs::BoltString::new(s)),
        Value::List(items) => {
            BoltType::List(neo4rs::BoltList { value: items.iter().map(value_to_bolt).collect() })
        }
        Value::Map(map) => BoltType::Map(neo4rs::BoltMap {
            value: map.iter().map(|(k, v)| (neo4rs::BoltString::new(k), value_to_bolt(v))).collect(),
        }),
    }
}
