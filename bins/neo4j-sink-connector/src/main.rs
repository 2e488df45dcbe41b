//! CLI runner for the neo4j-kafka-bridge sink connector.
//!
//! Loads the connector's configuration, subscribes to the configured
//! topics, batches incoming records, and runs them through the topic
//! registry (C6), strategy handlers (C3), statement grouper (C4), and
//! execution engine (C5) in sequence — acking consumer offsets only after
//! a batch has committed (spec section 4.5/4.6).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers as _, Message};
use rdkafka::ClientConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bridge_core::{BridgeError, Headers, Record, SinkConnectorConfig, Value};
use bridge_sink::{ExecutionEngine, TopicRegistry};

/// Command-line arguments for the sink connector runner.
#[derive(Parser, Debug)]
#[command(name = "neo4j-sink-connector")]
#[command(about = "Applies broker topic records as graph mutations")]
struct Args {
    /// Path to the connector's TOML configuration file. Values are layered
    /// under `NEO4J_SINK_`-prefixed environment variables (figment's env
    /// provider takes precedence), matching the teacher's layered
    /// file-plus-env config idiom.
    #[arg(short, long)]
    config: PathBuf,

    /// Kafka broker bootstrap list.
    #[arg(long, default_value = "localhost:9092")]
    brokers: String,

    /// Consumer group id for offset coordination.
    #[arg(long, default_value = "neo4j-sink-connector")]
    group_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config: SinkConnectorConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("NEO4J_SINK_").split("__"))
        .extract()
        .context("loading sink connector configuration")?;
    config.validate().context("validating sink connector configuration")?;

    let registry = Arc::new(TopicRegistry::build(&config)?);
    let engine = Arc::new(ExecutionEngine::new(
        config.graph.clone(),
        config.retry.clone(),
        config.batch_size,
        config.dead_letter_policy.clone(),
    ));

    let topics: Vec<String> = registry.topics().map(str::to_string).collect();
    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &args.brokers)
        .set("group.id", &args.group_id)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "false")
        .create()
        .context("creating kafka consumer")?;
    consumer.subscribe(&topic_refs).context("subscribing to configured topics")?;

    let cancel = CancellationToken::new();
    let run_cancel = cancel.child_token();
    let batch_size = config.batch_size;
    let batch_timeout = Duration::from_millis(config.batch_timeout_msecs);
    let run_handle =
        tokio::spawn(run(consumer, registry, engine, batch_size, batch_timeout, run_cancel));

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, draining in-flight batch");
            cancel.cancel();
        }
        result = run_handle => {
            result.context("sink connector task panicked")??;
        }
    }

    Ok(())
}

/// Pulls records off the consumer, accumulates them until `batch_size` is
/// reached or `batch_timeout` elapses, and flushes the accumulated batch
/// through the topic registry, grouper, and execution engine.
async fn run(
    consumer: StreamConsumer,
    registry: Arc<TopicRegistry>,
    engine: Arc<ExecutionEngine>,
    batch_size: usize,
    batch_timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut stream = consumer.stream();
    let mut pending: Vec<Record> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("shutdown requested, committing final partial batch");
                break;
            }
            maybe_msg = stream.next() => {
                match maybe_msg {
                    Some(Ok(message)) => {
                        match decode_record(&message) {
                            Ok(record) => pending.push(record),
                            Err(err) => {
                                warn!(
                                    topic = %message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %err,
                                    "dropping malformed record per errors.tolerance policy"
                                );
                            }
                        }
                    }
                    Some(Err(err)) => warn!(error = %err, "kafka error polling record"),
                    None => break,
                }
            }
            _ = tokio::time::sleep(batch_timeout), if !pending.is_empty() => {}
        }

        if pending.len() >= batch_size {
            flush(&registry, &engine, &consumer, std::mem::take(&mut pending)).await?;
        }
    }

    if !pending.is_empty() {
        flush(&registry, &engine, &consumer, pending).await?;
    }
    Ok(())
}

/// Groups a batch by topic, dispatches each topic's slice to its handler,
/// coalesces the resulting `QueryEvents` (spec section 4.4), commits them
/// (spec section 4.5), and only then acks consumer offsets — offset commit
/// happens strictly after a successful transaction commit.
async fn flush(
    registry: &TopicRegistry,
    engine: &ExecutionEngine,
    consumer: &StreamConsumer,
    batch: Vec<Record>,
) -> Result<()> {
    let mut by_topic: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in batch {
        by_topic.entry(record.topic.clone()).or_default().push(record);
    }

    let mut events = Vec::new();
    for (topic, records) in &by_topic {
        match registry.dispatch(topic, records) {
            Ok(mut topic_events) => events.append(&mut topic_events),
            Err(err) => {
                error!(topic = %topic, error = %err, "dropping batch slice for topic after translation error");
            }
        }
    }

    let grouped = bridge_sink::group(events);
    engine.commit_batch(&grouped).await?;
    consumer.commit_consumer_state(CommitMode::Async).context("committing consumer offsets")?;
    Ok(())
}

/// Decodes a raw Kafka message into the pipeline's [`Record`] shape.
/// Deserialization of the wire format (Avro/JSON-Schema/protobuf) is a
/// collaborator's concern per spec section 1; this runner assumes JSON,
/// the simplest decoded shape the strategy handlers all understand.
///
/// A record with no payload bytes at all is a genuine tombstone
/// (`Value::Null`, spec section 3). A record whose payload bytes are present
/// but fail to parse as JSON is not a tombstone, it's malformed — conflating
/// the two would make the node-pattern/relationship-pattern handlers issue a
/// real `DETACH DELETE` against corrupted input, so that case is reported as
/// `BridgeError::MalformedRecord` and routed through the tolerance policy by
/// the caller instead (spec section 7).
fn decode_record(message: &BorrowedMessage<'_>) -> Result<Record, BridgeError> {
    let malformed = |reason: &str| BridgeError::MalformedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        reason: reason.to_string(),
    };

    let value: Value = match message.payload() {
        None => Value::Null,
        Some(bytes) => serde_json::from_slice::<serde_json::Value>(bytes)
            .map(Value::from)
            .map_err(|_| malformed("value payload bytes are not valid JSON"))?,
    };
    let key: Value = match message.key() {
        None => Value::Null,
        Some(bytes) => serde_json::from_slice::<serde_json::Value>(bytes)
            .map(Value::from)
            .map_err(|_| malformed("key payload bytes are not valid JSON"))?,
    };

    let headers: Headers = message
        .headers()
        .map(|hs| {
            (0..hs.count())
                .map(|i| hs.get(i))
                .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    Ok(Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key,
        value,
        timestamp: message.timestamp().to_millis().unwrap_or(0),
        headers,
    })
}
