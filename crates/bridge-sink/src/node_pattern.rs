//! Node-pattern strategy handler (spec section 4.3).

use indexmap::IndexMap;

use bridge_core::{quote_identifier, BridgeError, EventParams, Handler, QueryEvents, Record, Value};
use bridge_pattern::{NodePatternConfiguration, PatternConfigurationType};

pub struct NodePatternHandler {
    config: NodePatternConfiguration,
    merge_statement: String,
    delete_statement: String,
}

fn keys_clause(keys: &[String], param_path: &str) -> String {
    let pairs: Vec<String> = keys
        .iter()
        .map(|k| format!("{}: event.{param_path}.{}", quote_identifier(k), k))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

fn labels_clause(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{}", quote_identifier(l))).collect()
}

impl NodePatternHandler {
    pub fn new(config: NodePatternConfiguration) -> Self {
        let keys: Vec<String> = config.keys.iter().cloned().collect();
        let node_pattern = format!("(n{} {})", labels_clause(&config.labels), keys_clause(&keys, "keys"));
        let set_clause = if config.merge_properties { "SET n += event.properties" } else { "SET n = event.properties" };
        let merge_statement =
            format!("UNWIND $events AS event\nMERGE {node_pattern} {set_clause}");
        let delete_statement =
            format!("UNWIND $events AS event\nMATCH {node_pattern} DETACH DELETE n");
        Self { config, merge_statement, delete_statement }
    }

    fn project_properties(&self, value_map: &IndexMap<String, Value>) -> IndexMap<String, Value> {
        match self.config.pattern_type {
            PatternConfigurationType::All => value_map
                .iter()
                .filter(|(k, _)| !self.config.keys.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            PatternConfigurationType::Include => self
                .config
                .properties
                .iter()
                .filter_map(|name| value_map.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
            PatternConfigurationType::Exclude => value_map
                .iter()
                .filter(|(k, _)| !self.config.keys.contains(*k) && !self.config.properties.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn project_keys(&self, source_map: &IndexMap<String, Value>) -> IndexMap<String, Value> {
        self.config
            .keys
            .iter()
            .filter_map(|k| source_map.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

impl Handler for NodePatternHandler {
    fn handle(&self, records: &[Record]) -> Result<Vec<QueryEvents>, BridgeError> {
        let mut merge_params: Vec<EventParams> = Vec::new();
        let mut delete_params: Vec<EventParams> = Vec::new();

        for record in records {
            if record.is_tombstone() {
                let key_map = record.key.as_map().ok_or_else(|| BridgeError::MalformedRecord {
                    topic: record.topic.clone(),
                    partition: record.partition,
                    offset: record.offset,
                    reason: "tombstone key is not a mapping".to_string(),
                })?;
                let keys = self.project_keys(key_map);
                let mut params = IndexMap::new();
                params.insert("keys".to_string(), Value::Map(keys));
                delete_params.push(params);
            } else {
                let value_map = record.value.as_map().ok_or_else(|| BridgeError::MalformedRecord {
                    topic: record.topic.clone(),
                    partition: record.partition,
                    offset: record.offset,
                    reason: "value is not a mapping".to_string(),
                })?;
                let keys = self.project_keys(value_map);
                let properties = self.project_properties(value_map);
                let mut params = IndexMap::new();
                params.insert("keys".to_string(), Value::Map(keys));
                params.insert("properties".to_string(), Value::Map(properties));
                merge_params.push(params);
            }
        }

        let mut out = Vec::new();
        if !merge_params.is_empty() {
            out.push(QueryEvents::with_parameters(self.merge_statement.clone(), merge_params));
        }
        if !delete_params.is_empty() {
            out.push(QueryEvents::with_parameters(self.delete_statement.clone(), delete_params));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_pattern::parse_node_pattern;

    fn record(offset: i64, key: serde_json::Value, value: serde_json::Value) -> Record {
        Record {
            topic: "people".into(),
            partition: 0,
            offset,
            key: key.into(),
            value: value.into(),
            timestamp: 0,
            headers: Vec::new(),
        }
    }

    #[test]
    fn merges_non_tombstone_records() {
        let config = parse_node_pattern("(:Person{!id,name})").unwrap();
        let handler = NodePatternHandler::new(config);
        let records =
            vec![record(0, serde_json::json!({"id": 1}), serde_json::json!({"id": 1, "name": "alice", "age": 9}))];
        let events = handler.handle(&records).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("MERGE"));
        let props = events[0].parameters[0]["properties"].as_map().unwrap();
        assert_eq!(props.get("name"), Some(&Value::String("alice".to_string())));
        assert!(!props.contains_key("age"));
        assert!(!props.contains_key("id"));
    }

    #[test]
    fn tombstone_deletes_by_key_from_record_key() {
        let config = parse_node_pattern("(:Person{!id})").unwrap();
        let handler = NodePatternHandler::new(config);
        let records = vec![record(0, serde_json::json!({"id": 5}), serde_json::Value::Null)];
        let events = handler.handle(&records).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("DETACH DELETE"));
        let keys = events[0].parameters[0]["keys"].as_map().unwrap();
        assert_eq!(keys.get("id"), Some(&Value::Int(5)));
    }

    #[test]
    fn exclude_pattern_drops_listed_properties() {
        let config = parse_node_pattern("(:Person{!id,-ssn})").unwrap();
        let handler = NodePatternHandler::new(config);
        let records =
            vec![record(0, serde_json::json!({"id": 1}), serde_json::json!({"id": 1, "ssn": "x", "name": "bob"}))];
        let events = handler.handle(&records).unwrap();
        let props = events[0].parameters[0]["properties"].as_map().unwrap();
        assert!(!props.contains_key("ssn"));
        assert!(props.contains_key("name"));
    }
}
