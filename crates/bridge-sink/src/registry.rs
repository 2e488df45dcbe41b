//! Topic Registry (C6, spec section 4.6): maps each configured topic to its
//! handler. Built once at connector start-up from `SinkConnectorConfig` and
//! read-only afterward (spec section 5) — every consumer task dispatches
//! through the same `Arc<dyn Handler>` map without synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use bridge_core::{BridgeError, Handler, QueryEvents, Record, SinkConnectorConfig, TopicStrategy};
use bridge_pattern::{parse_node_pattern, parse_relationship_pattern};

use crate::cdc_schema::CdcSchemaHandler;
use crate::cdc_source_id::{CdcSourceIdConfig, CdcSourceIdHandler};
use crate::cud::CudHandler;
use crate::cypher::{CypherHandler, CypherHandlerConfig};
use crate::node_pattern::NodePatternHandler;
use crate::relationship_pattern::RelationshipPatternHandler;

pub struct TopicRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl TopicRegistry {
    /// Materializes one handler per `neo4j.topic.*` assignment (spec section
    /// 6). `SinkConnectorConfig::topics` is a map keyed by topic name, so
    /// "exactly one strategy per topic" is already structurally enforced by
    /// the time this runs; `validate()` should be called on the config
    /// first to reject malformed assignments before this does any parsing.
    pub fn build(config: &SinkConnectorConfig) -> Result<Self, BridgeError> {
        let mut handlers: HashMap<String, Arc<dyn Handler>> = HashMap::with_capacity(config.topics.len());
        for (topic, strategy) in &config.topics {
            let handler = build_handler(strategy)?;
            handlers.insert(topic.clone(), handler);
        }
        Ok(Self { handlers })
    }

    /// Looks up the handler registered for `topic`, failing with
    /// `UnmappedTopic` if the connector's configuration never assigned one
    /// (spec section 4.6).
    pub fn handler_for(&self, topic: &str) -> Result<&Arc<dyn Handler>, BridgeError> {
        self.handlers.get(topic).ok_or_else(|| BridgeError::UnmappedTopic(topic.to_string()))
    }

    /// Dispatches a single-topic batch of records to its configured
    /// handler. Callers are responsible for grouping a mixed-topic poll
    /// batch by topic first (spec section 2's flow: dispatch happens per
    /// topic, the grouper coalesces across the whole batch afterward).
    pub fn dispatch(&self, topic: &str, records: &[Record]) -> Result<Vec<QueryEvents>, BridgeError> {
        self.handler_for(topic)?.handle(records)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

fn build_handler(strategy: &TopicStrategy) -> Result<Arc<dyn Handler>, BridgeError> {
    let handler: Arc<dyn Handler> = match strategy {
        TopicStrategy::Cypher { statement, bind_key, bind_value, bind_header, bind_timestamp } => {
            Arc::new(CypherHandler::new(CypherHandlerConfig {
                statement: statement.clone(),
                bind_key: *bind_key,
                bind_value: *bind_value,
                bind_header: *bind_header,
                bind_timestamp: *bind_timestamp,
            }))
        }
        TopicStrategy::Cud => Arc::new(CudHandler),
        TopicStrategy::PatternNode { pattern, merge_properties } => {
            let mut parsed = parse_node_pattern(pattern)?;
            parsed.merge_properties = *merge_properties;
            Arc::new(NodePatternHandler::new(parsed))
        }
        TopicStrategy::PatternRelationship { pattern, merge_properties } => {
            let mut parsed = parse_relationship_pattern(pattern)?;
            parsed.merge_properties = *merge_properties;
            Arc::new(RelationshipPatternHandler::new(parsed))
        }
        TopicStrategy::CdcSchema => Arc::new(CdcSchemaHandler::new()),
        TopicStrategy::CdcSourceId { label_name, id_name } => Arc::new(CdcSourceIdHandler::new(CdcSourceIdConfig {
            label_name: label_name.clone(),
            id_name: id_name.clone(),
        })),
    };
    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    use bridge_core::{GraphConnectionConfig, Value};

    fn config(topics: StdHashMap<String, TopicStrategy>) -> SinkConnectorConfig {
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
            retry: Default::default(),
            dead_letter_policy: Default::default(),
        }
    }

    #[test]
    fn builds_a_handler_per_topic() {
        let mut topics = StdHashMap::new();
        topics.insert("cud-topic".to_string(), TopicStrategy::Cud);
        topics.insert(
            "people".to_string(),
            TopicStrategy::PatternNode { pattern: "(:Person{!id,name})".to_string(), merge_properties: false },
        );
        let registry = TopicRegistry::build(&config(topics)).unwrap();
        assert!(registry.handler_for("cud-topic").is_ok());
        assert!(registry.handler_for("people").is_ok());
    }

    #[test]
    fn unmapped_topic_is_an_error() {
        let registry = TopicRegistry::build(&config(StdHashMap::new())).unwrap();
        assert!(matches!(registry.handler_for("ghost"), Err(BridgeError::UnmappedTopic(_))));
    }

    #[test]
    fn invalid_pattern_fails_registry_construction() {
        let mut topics = StdHashMap::new();
        topics.insert(
            "bad".to_string(),
            TopicStrategy::PatternNode { pattern: "NoKeys{a,b}".to_string(), merge_properties: false },
        );
        assert!(TopicRegistry::build(&config(topics)).is_err());
    }

    #[test]
    fn dispatch_routes_to_the_right_handler() {
        let mut topics = StdHashMap::new();
        topics.insert("cud-topic".to_string(), TopicStrategy::Cud);
        let registry = TopicRegistry::build(&config(topics)).unwrap();
        let record = Record {
            topic: "cud-topic".to_string(),
            partition: 0,
            offset: 0,
            key: Value::Null,
            value: serde_json::json!({"op": "create", "type": "node", "labels": ["T"], "ids": {"k": 1}, "properties": {}}).into(),
            timestamp: 0,
            headers: Vec::new(),
        };
        let events = registry.dispatch("cud-topic", &[record]).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn pattern_node_merge_properties_flag_reaches_the_handler() {
        let mut topics = StdHashMap::new();
        topics.insert(
            "people".to_string(),
            TopicStrategy::PatternNode { pattern: "(:Person{!id,name})".to_string(), merge_properties: true },
        );
        let registry = TopicRegistry::build(&config(topics)).unwrap();
        let record = Record {
            topic: "people".to_string(),
            partition: 0,
            offset: 0,
            key: Value::Null,
            value: serde_json::json!({"id": 1, "name": "alice"}).into(),
            timestamp: 0,
            headers: Vec::new(),
        };
        let events = registry.dispatch("people", &[record]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("SET n += event.properties"));
    }
}
