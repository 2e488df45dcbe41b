//! CDC-SourceId strategy handler (spec section 4.3): merges by a synthetic
//! identity built from the event's own entity id, tagged with a configurable
//! label/property name pair. Unlike CDC-SchemaId this never consults
//! `schema.constraints` — every event carries its own key, so nothing is
//! ever dropped for lack of one.

use indexmap::IndexMap;

use bridge_core::{quote_identifier, BridgeError, Handler, QueryEvents, Record, Value};

use crate::cdc::{parse_transaction_event, CdcNodeState, CdcOperation, CdcPayload, CdcRelationshipEndpoint, CdcRelationshipState};

fn label_diff(before: &[String], after: &[String]) -> (Vec<String>, Vec<String>) {
    let to_add: Vec<String> = after.iter().filter(|l| !before.contains(l)).cloned().collect();
    let to_delete: Vec<String> = before.iter().filter(|l| !after.contains(l)).cloned().collect();
    (to_add, to_delete)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeMergeShape {
    labels: Vec<String>,
    labels_to_add: Vec<String>,
    labels_to_delete: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CdcSourceIdConfig {
    pub label_name: String,
    pub id_name: String,
}

fn labels_clause(labels: &[String], tag: &str) -> String {
    let mut out: String = labels.iter().map(|l| format!(":{}", quote_identifier(l))).collect();
    out.push_str(&format!(":{}", quote_identifier(tag)));
    out
}

fn hex_id(entity_id: &[u8]) -> String {
    hex::encode(entity_id)
}

pub struct CdcSourceIdHandler {
    config: CdcSourceIdConfig,
}

impl CdcSourceIdHandler {
    pub fn new(config: CdcSourceIdConfig) -> Self {
        Self { config }
    }

    fn node_merge_statement(&self, shape: &NodeMergeShape) -> String {
        let pattern = format!(
            "(n{} {{{}: event.id}})",
            labels_clause(&shape.labels, &self.config.label_name),
            quote_identifier(&self.config.id_name)
        );
        let mut lines = vec!["UNWIND $events AS event".to_string(), format!("MERGE {pattern}"), "SET n = event.properties".to_string()];
        for label in &shape.labels_to_add {
            lines.push(format!("SET n:{}", quote_identifier(label)));
        }
        for label in &shape.labels_to_delete {
            lines.push(format!("REMOVE n:{}", quote_identifier(label)));
        }
        lines.join("\n")
    }

    fn node_delete_statement(&self, labels: &[String]) -> String {
        let pattern = format!(
            "(n{} {{{}: event.id}})",
            labels_clause(labels, &self.config.label_name),
            quote_identifier(&self.config.id_name)
        );
        format!("UNWIND $events AS event\nMATCH {pattern} DETACH DELETE n")
    }

    fn endpoint_pattern(&self, var: &str, endpoint: &CdcRelationshipEndpoint, param: &str) -> String {
        format!(
            "({var}{} {{{}: event.{param}}})",
            labels_clause(&endpoint.labels, &self.config.label_name),
            quote_identifier(&self.config.id_name)
        )
    }

    fn handle_node(
        &self,
        operation: CdcOperation,
        before: Option<&CdcNodeState>,
        after: Option<&CdcNodeState>,
        merges: &mut IndexMap<NodeMergeShape, QueryEvents>,
        deletes: &mut IndexMap<Vec<String>, QueryEvents>,
    ) {
        match operation {
            CdcOperation::Deleted => {
                let Some(before) = before else { return };
                let statement = self.node_delete_statement(&before.labels);
                let mut params = IndexMap::new();
                params.insert("id".to_string(), Value::String(hex_id(&before.entity_id)));
                deletes
                    .entry(before.labels.clone())
                    .or_insert_with(|| QueryEvents::new(statement))
                    .push(params);
            }
            CdcOperation::Created | CdcOperation::Updated => {
                let Some(after) = after else { return };
                let (labels_to_add, labels_to_delete) = match before {
                    Some(before) => label_diff(&before.labels, &after.labels),
                    None => (after.labels.clone(), Vec::new()),
                };
                let shape = NodeMergeShape { labels: after.labels.clone(), labels_to_add, labels_to_delete };
                let statement = self.node_merge_statement(&shape);
                let mut params = IndexMap::new();
                params.insert("id".to_string(), Value::String(hex_id(&after.entity_id)));
                params.insert("properties".to_string(), Value::Map(after.properties.clone()));
                merges.entry(shape).or_insert_with(|| QueryEvents::new(statement)).push(params);
            }
        }
    }

    fn handle_relationship(
        &self,
        operation: CdcOperation,
        before: Option<&CdcRelationshipState>,
        after: Option<&CdcRelationshipState>,
    ) -> Option<QueryEvents> {
        let state = match operation {
            CdcOperation::Deleted => before,
            CdcOperation::Created | CdcOperation::Updated => after,
        }?;

        let start_pattern = self.endpoint_pattern("start", &state.start, "start_id");
        let end_pattern = self.endpoint_pattern("end", &state.end, "end_id");
        let rel_type = quote_identifier(&state.rel_type);

        let mut params = IndexMap::new();
        params.insert("start_id".to_string(), Value::String(hex_id(&state.start.entity_id)));
        params.insert("end_id".to_string(), Value::String(hex_id(&state.end.entity_id)));

        let statement = match operation {
            CdcOperation::Deleted => {
                format!("UNWIND $events AS event\nMATCH {start_pattern}-[r:{rel_type}]->{end_pattern} DELETE r")
            }
            CdcOperation::Created | CdcOperation::Updated => {
                params.insert("properties".to_string(), Value::Map(state.properties.clone()));
                format!(
                    "UNWIND $events AS event\nMERGE {start_pattern}\nMERGE {end_pattern}\nMERGE (start)-[r:{rel_type}]->(end) SET r = event.properties"
                )
            }
        };

        Some(QueryEvents::with_parameters(statement, vec![params]))
    }
}

impl Handler for CdcSourceIdHandler {
    fn handle(&self, records: &[Record]) -> Result<Vec<QueryEvents>, BridgeError> {
        let mut node_merges: IndexMap<NodeMergeShape, QueryEvents> = IndexMap::new();
        let mut node_deletes: IndexMap<Vec<String>, QueryEvents> = IndexMap::new();
        let mut relationship_events: Vec<QueryEvents> = Vec::new();

        for record in records {
            let event = parse_transaction_event(record)?;
            match &event.payload {
                CdcPayload::Node { before, after } => self.handle_node(
                    event.operation,
                    before.as_ref(),
                    after.as_ref(),
                    &mut node_merges,
                    &mut node_deletes,
                ),
                CdcPayload::Relationship { before, after } => {
                    if let Some(qe) = self.handle_relationship(event.operation, before.as_ref(), after.as_ref()) {
                        relationship_events.push(qe);
                    }
                }
            }
        }

        let mut out = Vec::new();
        out.extend(node_merges.into_values());
        out.extend(node_deletes.into_values());
        out.extend(crate::grouper::group(relationship_events));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cdc_record(json: serde_json::Value) -> Record {
        Record { topic: "cdc-src".into(), partition: 0, offset: 0, key: Value::Null, value: json.into(), timestamp: 0, headers: Vec::new() }
    }

    fn config() -> CdcSourceIdConfig {
        CdcSourceIdConfig { label_name: "SourceEvent".to_string(), id_name: "sourceId".to_string() }
    }

    #[test]
    fn created_node_merges_by_hex_entity_id() {
        let record = cdc_record(serde_json::json!({
            "meta": {"operation": "created"},
            "payload": {"type": "node", "before": null, "after": {"labels": ["Person"], "properties": {"name": "alice"}, "id": "0a"}},
            "schema": {"constraints": []},
        }));
        let handler = CdcSourceIdHandler::new(config());
        let events = handler.handle(&[record]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains(":`Person`:`SourceEvent`"));
        assert!(events[0].statement.contains("`sourceId`: event.id"));
        assert_eq!(events[0].parameters[0]["id"], Value::String("0a".to_string()));
    }

    #[test]
    fn updated_node_adds_and_removes_labels() {
        let record = cdc_record(serde_json::json!({
            "meta": {"operation": "updated"},
            "payload": {
                "type": "node",
                "before": {"labels": ["Person", "Staged"], "properties": {}, "id": "0a"},
                "after": {"labels": ["Person", "Active"], "properties": {"name": "alice"}, "id": "0a"},
            },
            "schema": {"constraints": []},
        }));
        let handler = CdcSourceIdHandler::new(config());
        let events = handler.handle(&[record]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("SET n:`Active`"));
        assert!(events[0].statement.contains("REMOVE n:`Staged`"));
    }

    #[test]
    fn deleted_relationship_projects_no_properties() {
        let rel = serde_json::json!({
            "start": {"labels": ["Person"], "properties": {}, "id": "01"},
            "end": {"labels": ["Person"], "properties": {}, "id": "02"},
            "properties": {},
        });
        let record = cdc_record(serde_json::json!({
            "meta": {"operation": "deleted"},
            "payload": {"type": "relationship", "relType": "KNOWS", "before": rel, "after": null},
            "schema": {"constraints": []},
        }));
        let handler = CdcSourceIdHandler::new(config());
        let events = handler.handle(&[record]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("DELETE r"));
        assert!(!events[0].statement.contains("SET r"));
    }
}
