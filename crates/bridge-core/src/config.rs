use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// What happens to a permanently-failed batch or record (spec section 4.5 /
/// 6). Mirrors the `errors.tolerance` / `errors.deadletterqueue.*` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeadLetterPolicy {
    Fail,
    Skip,
    DeadLetterTopic(String),
}

impl Default for DeadLetterPolicy {
    fn default() -> Self {
        DeadLetterPolicy::Fail
    }
}

/// Per-topic strategy assignment — exactly one of these per topic is
/// permitted (spec section 6); conflicting assignments fail validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum TopicStrategy {
    Cypher {
        statement: String,
        #[serde(default)]
        bind_key: bool,
        #[serde(default = "default_true")]
        bind_value: bool,
        #[serde(default)]
        bind_header: bool,
        #[serde(default)]
        bind_timestamp: bool,
    },
    Cud,
    PatternNode {
        pattern: String,
        #[serde(default)]
        merge_properties: bool,
    },
    PatternRelationship {
        pattern: String,
        #[serde(default)]
        merge_properties: bool,
    },
    CdcSchema,
    CdcSourceId {
        #[serde(default = "default_label_name")]
        label_name: String,
        #[serde(default = "default_id_name")]
        id_name: String,
    },
}

fn default_true() -> bool {
    true
}

fn default_label_name() -> String {
    "SourceEvent".to_string()
}

fn default_id_name() -> String {
    "sourceId".to_string()
}

/// Retry policy for the execution engine (spec section 4.5 / 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_msecs")]
    pub backoff_msecs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: default_max_retries(), backoff_msecs: default_backoff_msecs() }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_msecs() -> u64 {
    1000
}

/// Connection parameters for the graph database, matching the
/// `neo4j.uri` / `neo4j.authentication.*` / `neo4j.database` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConnectionConfig {
    pub uri: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "neo4j".to_string()
}

/// The full sink-connector configuration, parsed from the `neo4j.*`
/// property-style keys of spec section 6 once flattened into a typed layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConnectorConfig {
    pub connector_class: String,
    pub graph: GraphConnectionConfig,
    pub topics: HashMap<String, TopicStrategy>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_msecs")]
    pub batch_timeout_msecs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dead_letter_policy: DeadLetterPolicy,
}

fn default_batch_size() -> usize {
    1000
}

fn default_batch_timeout_msecs() -> u64 {
    60_000
}

impl SinkConnectorConfig {
    /// Validates start-up invariants (spec section 6/7): the connector class
    /// is the expected fixed id, required graph auth fields are non-empty,
    /// and there is exactly one strategy per topic — which is structurally
    /// guaranteed here because `topics` is a map, but we still reject empty
    /// topic names and empty statements/patterns up front so a malformed
    /// config fails at start-up rather than on the first batch.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.graph.uri.is_empty() {
            return Err(BridgeError::InvalidConfig("neo4j.uri must not be empty".into()));
        }
        if self.topics.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one neo4j.topic.* assignment is required".into(),
            ));
        }
        for (topic, strategy) in &self.topics {
            if topic.is_empty() {
                return Err(BridgeError::InvalidConfig("topic name must not be empty".into()));
            }
            match strategy {
                TopicStrategy::Cypher { statement, .. } if statement.trim().is_empty() => {
                    return Err(BridgeError::InvalidConfig(format!(
                        "topic `{topic}` has an empty cypher statement"
                    )));
                }
                TopicStrategy::PatternNode { pattern, .. } | TopicStrategy::PatternRelationship { pattern, .. }
                    if pattern.trim().is_empty() =>
                {
                    return Err(BridgeError::InvalidConfig(format!(
                        "topic `{topic}` has an empty pattern"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A single source-side topic assignment: which query to poll (or which
/// CDC topic to tail) and what to name the outbound broker topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SourceQuerySpec {
    /// Poll a parameterized Cypher query on a fixed interval, keeping a
    /// cursor over `cursor_column` between polls.
    Poll { query: String, cursor_column: String, interval_msecs: u64 },
    /// Tail a CDC change-stream query (`db.cdc.query`) for entities already
    /// shaped like the sink's CDC envelope.
    CdcTail { selectors: Vec<String> },
}

/// The source-connector configuration, parsed the same way as
/// [`SinkConnectorConfig`]: one `neo4j.*`-keyed connection block plus a map
/// of outbound topics to [`SourceQuerySpec`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConnectorConfig {
    pub connector_class: String,
    pub graph: GraphConnectionConfig,
    pub topics: HashMap<String, SourceQuerySpec>,
    #[serde(default = "default_poll_interval_msecs")]
    pub poll_interval_msecs: u64,
}

fn default_poll_interval_msecs() -> u64 {
    5_000
}

impl SourceConnectorConfig {
    /// Start-up validation mirroring [`SinkConnectorConfig::validate`]: a
    /// non-empty connection uri and at least one topic assignment, with
    /// poll specs carrying a non-empty query and cursor column.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.graph.uri.is_empty() {
            return Err(BridgeError::InvalidConfig("neo4j.uri must not be empty".into()));
        }
        if self.topics.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one source topic assignment is required".into(),
            ));
        }
        for (topic, spec) in &self.topics {
            if topic.is_empty() {
                return Err(BridgeError::InvalidConfig("topic name must not be empty".into()));
            }
            if let SourceQuerySpec::Poll { query, cursor_column, .. } = spec {
                if query.trim().is_empty() {
                    return Err(BridgeError::InvalidConfig(format!(
                        "topic `{topic}` has an empty poll query"
                    )));
                }
                if cursor_column.trim().is_empty() {
                    return Err(BridgeError::InvalidConfig(format!(
                        "topic `{topic}` has an empty cursor column"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SinkConnectorConfig {
        let mut topics = HashMap::new();
        topics.insert("people".to_string(), TopicStrategy::CdcSchema);
        SinkConnectorConfig {
            connector_class: "neo4j.sink".to_string(),
            graph: GraphConnectionConfig {
                uri: "bolt://localhost:7687".to_string(),
                username: "neo4j".to_string(),
                password: "secret".to_string(),
                database: "neo4j".to_string(),
            },
            topics,
            batch_size: 1000,
            batch_timeout_msecs: 60_000,
            retry: RetryConfig::default(),
            dead_letter_policy: DeadLetterPolicy::Fail,
        }
    }

    #[test]
    fn accepts_a_well_formed_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_missing_uri() {
        let mut cfg = valid_config();
        cfg.graph.uri.clear();
        assert!(matches!(cfg.validate(), Err(BridgeError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_no_topics() {
        let mut cfg = valid_config();
        cfg.topics.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_cypher_statement() {
        let mut cfg = valid_config();
        cfg.topics.insert(
            "orders".to_string(),
            TopicStrategy::Cypher {
                statement: "  ".to_string(),
                bind_key: false,
                bind_value: true,
                bind_header: false,
                bind_timestamp: false,
            },
        );
        assert!(cfg.validate().is_err());
    }

    fn valid_source_config() -> SourceConnectorConfig {
        let mut topics = HashMap::new();
        topics.insert(
            "people-out".to_string(),
            SourceQuerySpec::Poll {
                query: "MATCH (p:Person) WHERE p.updatedAt > $cursor RETURN p".to_string(),
                cursor_column: "updatedAt".to_string(),
                interval_msecs: 5_000,
            },
        );
        SourceConnectorConfig {
            connector_class: "neo4j.source".to_string(),
            graph: GraphConnectionConfig {
                uri: "bolt://localhost:7687".to_string(),
                username: "neo4j".to_string(),
                password: "secret".to_string(),
                database: "neo4j".to_string(),
            },
            topics,
            poll_interval_msecs: 5_000,
        }
    }

    #[test]
    fn accepts_a_well_formed_source_config() {
        assert!(valid_source_config().validate().is_ok());
    }

    #[test]
    fn rejects_poll_spec_with_empty_query() {
        let mut cfg = valid_source_config();
        cfg.topics.insert(
            "broken".to_string(),
            SourceQuerySpec::Poll {
                query: "  ".to_string(),
                cursor_column: "updatedAt".to_string(),
                interval_msecs: 1000,
            },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_source_config_with_no_topics() {
        let mut cfg = valid_source_config();
        cfg.topics.clear();
        assert!(cfg.validate().is_err());
    }
}
