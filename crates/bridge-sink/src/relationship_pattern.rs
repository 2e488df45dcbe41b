//! Relationship-pattern strategy handler (spec section 4.3). Projects
//! start-node keys, end-node keys, and relationship properties. Tombstones
//! delete the relationship only — the endpoint nodes are never touched.

use indexmap::IndexMap;

use bridge_core::{quote_identifier, BridgeError, EventParams, Handler, QueryEvents, Record, Value};
use bridge_pattern::{PatternConfigurationType, RelationshipPatternConfiguration};

fn labels_clause(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{}", quote_identifier(l))).collect()
}

fn keys_clause(keys: &[String], param_path: &str) -> String {
    let pairs: Vec<String> = keys
        .iter()
        .map(|k| format!("{}: event.{param_path}.{}", quote_identifier(k), k))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

fn project_keys(keys: &std::collections::BTreeSet<String>, map: &IndexMap<String, Value>) -> IndexMap<String, Value> {
    keys.iter().filter_map(|k| map.get(k).map(|v| (k.clone(), v.clone()))).collect()
}

pub struct RelationshipPatternHandler {
    config: RelationshipPatternConfiguration,
    merge_statement: String,
    delete_statement: String,
}

impl RelationshipPatternHandler {
    pub fn new(config: RelationshipPatternConfiguration) -> Self {
        let start_keys: Vec<String> = config.start.keys.iter().cloned().collect();
        let end_keys: Vec<String> = config.end.keys.iter().cloned().collect();
        let start_pattern =
            format!("(start{} {})", labels_clause(&config.start.labels), keys_clause(&start_keys, "start"));
        let end_pattern =
            format!("(end{} {})", labels_clause(&config.end.labels), keys_clause(&end_keys, "end"));
        let rel_type = quote_identifier(&config.rel_type);

        let set_clause =
            if config.merge_properties { "SET r += event.properties" } else { "SET r = event.properties" };
        let merge_statement = format!(
            "UNWIND $events AS event\nMERGE {start_pattern}\nMERGE {end_pattern}\nMERGE (start)-[r:{rel_type}]->(end) {set_clause}"
        );
        let delete_statement = format!(
            "UNWIND $events AS event\nMATCH {start_pattern}-[r:{rel_type}]->{end_pattern} DELETE r"
        );

        Self { config, merge_statement, delete_statement }
    }

    /// Splits a record's decoded value into its `start`/`end` nested maps
    /// and the remaining top-level fields, which make up the relationship's
    /// own properties.
    fn split_value(
        &self,
        value_map: &IndexMap<String, Value>,
    ) -> (IndexMap<String, Value>, IndexMap<String, Value>, IndexMap<String, Value>) {
        let start_map = value_map.get("start").and_then(Value::as_map).cloned().unwrap_or_default();
        let end_map = value_map.get("end").and_then(Value::as_map).cloned().unwrap_or_default();
        let rest: IndexMap<String, Value> = value_map
            .iter()
            .filter(|(k, _)| k.as_str() != "start" && k.as_str() != "end")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        (start_map, end_map, rest)
    }

    fn project_properties(&self, rest: &IndexMap<String, Value>) -> IndexMap<String, Value> {
        match self.config.pattern_type {
            PatternConfigurationType::All => rest.clone(),
            PatternConfigurationType::Include => self
                .config
                .properties
                .iter()
                .filter_map(|name| rest.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
            PatternConfigurationType::Exclude => rest
                .iter()
                .filter(|(k, _)| !self.config.properties.iter().any(|p| p == k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl Handler for RelationshipPatternHandler {
    fn handle(&self, records: &[Record]) -> Result<Vec<QueryEvents>, BridgeError> {
        let mut merge_params: Vec<EventParams> = Vec::new();
        let mut delete_params: Vec<EventParams> = Vec::new();

        for record in records {
            let source_map = if record.is_tombstone() { &record.key } else { &record.value };
            let source_map = source_map.as_map().ok_or_else(|| BridgeError::MalformedRecord {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                reason: "value is not a mapping".to_string(),
            })?;
            let (start_map, end_map, rest) = self.split_value(source_map);
            let start_keys = project_keys(&self.config.start.keys, &start_map);
            let end_keys = project_keys(&self.config.end.keys, &end_map);

            if record.is_tombstone() {
                let mut params = IndexMap::new();
                params.insert("start".to_string(), Value::Map(start_keys));
                params.insert("end".to_string(), Value::Map(end_keys));
                delete_params.push(params);
            } else {
                let properties = self.project_properties(&rest);
                let mut params = IndexMap::new();
                params.insert("start".to_string(), Value::Map(start_keys));
                params.insert("end".to_string(), Value::Map(end_keys));
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
    use bridge_pattern::parse_relationship_pattern;

    fn record(key: serde_json::Value, value: serde_json::Value) -> Record {
        Record {
            topic: "rel".into(),
            partition: 0,
            offset: 0,
            key: key.into(),
            value: value.into(),
            timestamp: 0,
            headers: Vec::new(),
        }
    }

    #[test]
    fn merges_endpoints_and_relationship() {
        let config = parse_relationship_pattern("(:Person{!id})-[:KNOWS{since}]->(:Person{!id})").unwrap();
        let handler = RelationshipPatternHandler::new(config);
        let records = vec![record(
            serde_json::Value::Null,
            serde_json::json!({"start": {"id": 1}, "end": {"id": 2}, "since": 2020}),
        )];
        let events = handler.handle(&records).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("MERGE (start"));
        assert!(events[0].statement.contains("-[r:`KNOWS`]->"));
        let props = events[0].parameters[0]["properties"].as_map().unwrap();
        assert_eq!(props.get("since"), Some(&Value::Int(2020)));
    }

    #[test]
    fn tombstone_deletes_relationship_not_endpoints() {
        let config = parse_relationship_pattern("(:Person{!id})-[:KNOWS]->(:Person{!id})").unwrap();
        let handler = RelationshipPatternHandler::new(config);
        let records =
            vec![record(serde_json::json!({"start": {"id": 1}, "end": {"id": 2}}), serde_json::Value::Null)];
        let events = handler.handle(&records).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("DELETE r"));
        assert!(!events[0].statement.contains("DETACH"));
    }
}
