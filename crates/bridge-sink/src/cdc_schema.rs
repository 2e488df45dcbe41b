//! CDC-SchemaId strategy handler (spec section 4.3): merges nodes and
//! relationships using the identity keys resolved from the event's own
//! `schema.constraints`, rather than a fixed pattern. Events whose entity
//! carries no qualifying constraint are dropped — there is no key to merge
//! on — and counted rather than failing the batch (spec section 9).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use bridge_core::{
    quote_identifier, get_node_keys, BridgeError, ConstraintRef, Handler, NodeSchemaMetadata, QueryEvents, Record,
    RelationshipSchemaMetadata, Value,
};

use crate::cdc::{parse_transaction_event, CdcNodeState, CdcOperation, CdcPayload, CdcRelationshipState};

fn labels_clause(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{}", quote_identifier(l))).collect()
}

fn keys_clause(keys: &BTreeSet<String>, param_path: &str) -> String {
    let pairs: Vec<String> = keys
        .iter()
        .map(|k| format!("{}: event.{param_path}.{}", quote_identifier(k), k))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

fn keyed_params(keys: &BTreeSet<String>, properties: &IndexMap<String, Value>) -> IndexMap<String, Value> {
    keys.iter().filter_map(|k| properties.get(k).map(|v| (k.clone(), v.clone()))).collect()
}

/// Labels already governed by an identity-bearing constraint are redundant
/// to add/remove explicitly: they're already expressed in the MERGE
/// pattern's label clause (spec section 4.3).
fn constrained_labels(constraints: &[bridge_core::Constraint]) -> BTreeSet<String> {
    constraints.iter().filter(|c| c.kind.is_identity_bearing()).map(|c| c.label.clone()).collect()
}

fn label_diff(
    before: &[String],
    after: &[String],
    constraints: &[bridge_core::Constraint],
) -> (Vec<String>, Vec<String>) {
    let covered = constrained_labels(constraints);
    let to_add: Vec<String> =
        after.iter().filter(|l| !before.contains(l) && !covered.contains(*l)).cloned().collect();
    let to_delete: Vec<String> =
        before.iter().filter(|l| !after.contains(l) && !covered.contains(*l)).cloned().collect();
    (to_add, to_delete)
}

fn node_merge_statement(labels: &[String], meta: &NodeSchemaMetadata) -> String {
    let pattern = format!("(n{} {})", labels_clause(labels), keys_clause(&meta.keys, "keys"));
    let mut lines = vec!["UNWIND $events AS event".to_string(), format!("MERGE {pattern}"), "SET n = event.properties".to_string()];
    for label in &meta.labels_to_add {
        lines.push(format!("SET n:{}", quote_identifier(label)));
    }
    for label in &meta.labels_to_delete {
        lines.push(format!("REMOVE n:{}", quote_identifier(label)));
    }
    lines.join("\n")
}

fn node_delete_statement(labels: &[String], keys: &BTreeSet<String>) -> String {
    let pattern = format!("(n{} {})", labels_clause(labels), keys_clause(keys, "keys"));
    format!("UNWIND $events AS event\nMATCH {pattern} DETACH DELETE n")
}

fn relationship_merge_statement(meta: &RelationshipSchemaMetadata) -> String {
    let rel_type = quote_identifier(&meta.rel_type);
    let start = format!("(start{} {})", labels_clause(&meta.start_labels), keys_clause(&meta.start_keys, "start"));
    let end = format!("(end{} {})", labels_clause(&meta.end_labels), keys_clause(&meta.end_keys, "end"));
    format!(
        "UNWIND $events AS event\nMERGE {start}\nMERGE {end}\nMERGE (start)-[r:{rel_type}]->(end) SET r = event.properties"
    )
}

fn relationship_delete_statement(meta: &RelationshipSchemaMetadata) -> String {
    let rel_type = quote_identifier(&meta.rel_type);
    let start = format!("(start{} {})", labels_clause(&meta.start_labels), keys_clause(&meta.start_keys, "start"));
    let end = format!("(end{} {})", labels_clause(&meta.end_labels), keys_clause(&meta.end_keys, "end"));
    format!("UNWIND $events AS event\nMATCH {start}-[r:{rel_type}]->{end} DELETE r")
}

/// Resolves node identity keys from whichever image (before or after) a
/// given operation needs, dropping (returning `None`) when no constraint
/// qualifies.
fn resolve_node_keys(state: &CdcNodeState, constraints: &[bridge_core::Constraint]) -> Option<BTreeSet<String>> {
    let property_keys: BTreeSet<String> = state.properties.keys().cloned().collect();
    let keys = get_node_keys(&state.labels, &property_keys, constraints);
    if keys.is_empty() {
        None
    } else {
        Some(keys)
    }
}

#[derive(Default)]
pub struct CdcSchemaHandler {
    dropped_for_missing_keys: AtomicU64,
}

impl CdcSchemaHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of events dropped so far because no constraint on the entity's
    /// labels qualified as an identity key (spec section 9, open question:
    /// exposed here rather than as a Prometheus counter since this crate has
    /// no metrics dependency yet).
    pub fn dropped_for_missing_keys(&self) -> u64 {
        self.dropped_for_missing_keys.load(Ordering::Relaxed)
    }

    fn handle_node(
        &self,
        record: &Record,
        operation: CdcOperation,
        before: Option<&CdcNodeState>,
        after: Option<&CdcNodeState>,
        constraints: &[bridge_core::Constraint],
        merges: &mut IndexMap<(Vec<String>, NodeSchemaMetadata), QueryEvents>,
        deletes: &mut IndexMap<(Vec<String>, BTreeSet<String>), QueryEvents>,
    ) {
        match operation {
            CdcOperation::Deleted => {
                let Some(before) = before else {
                    tracing::warn!(topic = %record.topic, partition = record.partition, offset = record.offset, timestamp = %record.timestamp_utc(), "cdc-schema delete missing before image");
                    return;
                };
                let Some(keys) = resolve_node_keys(before, constraints) else {
                    self.dropped_for_missing_keys.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(topic = %record.topic, partition = record.partition, offset = record.offset, timestamp = %record.timestamp_utc(), error_kind = "no_qualifying_constraint", "dropping cdc-schema node delete");
                    return;
                };
                let group_key = (before.labels.clone(), keys.clone());
                let statement = node_delete_statement(&before.labels, &keys);
                let mut params = IndexMap::new();
                params.insert("keys".to_string(), Value::Map(keyed_params(&keys, &before.properties)));
                deletes.entry(group_key).or_insert_with(|| QueryEvents::new(statement)).push(params);
            }
            CdcOperation::Created | CdcOperation::Updated => {
                let Some(after) = after else {
                    tracing::warn!(topic = %record.topic, partition = record.partition, offset = record.offset, timestamp = %record.timestamp_utc(), "cdc-schema upsert missing after image");
                    return;
                };
                let Some(keys) = resolve_node_keys(after, constraints) else {
                    self.dropped_for_missing_keys.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(topic = %record.topic, partition = record.partition, offset = record.offset, timestamp = %record.timestamp_utc(), error_kind = "no_qualifying_constraint", "dropping cdc-schema node upsert");
                    return;
                };
                let (labels_to_add, labels_to_delete) = match before {
                    Some(before) => label_diff(&before.labels, &after.labels, constraints),
                    None => {
                        let covered = constrained_labels(constraints);
                        (after.labels.iter().filter(|l| !covered.contains(*l)).cloned().collect(), Vec::new())
                    }
                };
                let constraint_ref = ConstraintRef { label: after.labels.first().cloned().unwrap_or_default(), properties: keys.clone() };
                let meta = NodeSchemaMetadata {
                    constraints: vec![constraint_ref],
                    labels_to_add,
                    labels_to_delete,
                    keys: keys.clone(),
                };
                let statement = node_merge_statement(&after.labels, &meta);
                let mut params = IndexMap::new();
                params.insert("keys".to_string(), Value::Map(keyed_params(&keys, &after.properties)));
                params.insert("properties".to_string(), Value::Map(after.properties.clone()));
                let group_key = (after.labels.clone(), meta.clone());
                merges.entry(group_key).or_insert_with(|| QueryEvents::new(statement)).push(params);
            }
        }
    }

    fn handle_relationship(
        &self,
        record: &Record,
        operation: CdcOperation,
        before: Option<&CdcRelationshipState>,
        after: Option<&CdcRelationshipState>,
        constraints: &[bridge_core::Constraint],
        merges: &mut IndexMap<RelationshipSchemaMetadata, QueryEvents>,
        deletes: &mut IndexMap<RelationshipSchemaMetadata, QueryEvents>,
    ) {
        let state = match operation {
            CdcOperation::Deleted => before,
            CdcOperation::Created | CdcOperation::Updated => after,
        };
        let Some(state) = state else {
            tracing::warn!(topic = %record.topic, partition = record.partition, offset = record.offset, timestamp = %record.timestamp_utc(), "cdc-schema relationship event missing required image");
            return;
        };

        let Some(start_keys) = resolve_node_keys(
            &CdcNodeState { labels: state.start.labels.clone(), properties: state.start.properties.clone(), entity_id: state.start.entity_id.clone() },
            constraints,
        ) else {
            self.dropped_for_missing_keys.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(topic = %record.topic, partition = record.partition, offset = record.offset, timestamp = %record.timestamp_utc(), error_kind = "no_qualifying_constraint", "dropping cdc-schema relationship: start node unkeyed");
            return;
        };
        let Some(end_keys) = resolve_node_keys(
            &CdcNodeState { labels: state.end.labels.clone(), properties: state.end.properties.clone(), entity_id: state.end.entity_id.clone() },
            constraints,
        ) else {
            self.dropped_for_missing_keys.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(topic = %record.topic, partition = record.partition, offset = record.offset, timestamp = %record.timestamp_utc(), error_kind = "no_qualifying_constraint", "dropping cdc-schema relationship: end node unkeyed");
            return;
        };

        let meta = RelationshipSchemaMetadata {
            rel_type: state.rel_type.clone(),
            start_labels: state.start.labels.clone(),
            end_labels: state.end.labels.clone(),
            start_keys: start_keys.clone(),
            end_keys: end_keys.clone(),
        };

        let mut params = IndexMap::new();
        params.insert("start".to_string(), Value::Map(keyed_params(&start_keys, &state.start.properties)));
        params.insert("end".to_string(), Value::Map(keyed_params(&end_keys, &state.end.properties)));

        match operation {
            CdcOperation::Deleted => {
                let statement = relationship_delete_statement(&meta);
                deletes.entry(meta).or_insert_with(|| QueryEvents::new(statement)).push(params);
            }
            CdcOperation::Created | CdcOperation::Updated => {
                params.insert("properties".to_string(), Value::Map(state.properties.clone()));
                let statement = relationship_merge_statement(&meta);
                merges.entry(meta).or_insert_with(|| QueryEvents::new(statement)).push(params);
            }
        }
    }
}

impl Handler for CdcSchemaHandler {
    fn handle(&self, records: &[Record]) -> Result<Vec<QueryEvents>, BridgeError> {
        let mut node_merges: IndexMap<(Vec<String>, NodeSchemaMetadata), QueryEvents> = IndexMap::new();
        let mut node_deletes: IndexMap<(Vec<String>, BTreeSet<String>), QueryEvents> = IndexMap::new();
        let mut rel_merges: IndexMap<RelationshipSchemaMetadata, QueryEvents> = IndexMap::new();
        let mut rel_deletes: IndexMap<RelationshipSchemaMetadata, QueryEvents> = IndexMap::new();

        for record in records {
            let event = parse_transaction_event(record)?;
            match &event.payload {
                CdcPayload::Node { before, after } => self.handle_node(
                    record,
                    event.operation,
                    before.as_ref(),
                    after.as_ref(),
                    &event.constraints,
                    &mut node_merges,
                    &mut node_deletes,
                ),
                CdcPayload::Relationship { before, after } => self.handle_relationship(
                    record,
                    event.operation,
                    before.as_ref(),
                    after.as_ref(),
                    &event.constraints,
                    &mut rel_merges,
                    &mut rel_deletes,
                ),
            }
        }

        let mut out = Vec::new();
        out.extend(node_merges.into_values());
        out.extend(node_deletes.into_values());
        out.extend(rel_merges.into_values());
        out.extend(rel_deletes.into_values());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cdc_record(offset: i64, json: serde_json::Value) -> Record {
        Record {
            topic: "cdc".into(),
            partition: 0,
            offset,
            key: Value::Null,
            value: json.into(),
            timestamp: 0,
            headers: Vec::new(),
        }
    }

    fn node_event(op: &str, before: Option<serde_json::Value>, after: Option<serde_json::Value>) -> serde_json::Value {
        serde_json::json!({
            "meta": {"operation": op},
            "payload": {"type": "node", "before": before, "after": after},
            "schema": {"constraints": [{"label": "Person", "type": "UNIQUE", "properties": ["id"]}]},
        })
    }

    #[test]
    fn created_node_merges_by_resolved_key() {
        let record = cdc_record(
            0,
            node_event(
                "created",
                None,
                Some(serde_json::json!({"labels": ["Person"], "properties": {"id": 1, "name": "alice"}, "id": "01"})),
            ),
        );
        let handler = CdcSchemaHandler::new();
        let events = handler.handle(&[record]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("MERGE (n:`Person`"));
        assert!(events[0].statement.contains("SET n:`Person`"));
        assert_eq!(handler.dropped_for_missing_keys(), 0);
    }

    #[test]
    fn deleted_node_without_qualifying_constraint_is_dropped() {
        let record = cdc_record(
            0,
            serde_json::json!({
                "meta": {"operation": "deleted"},
                "payload": {"type": "node", "before": {"labels": ["Person"], "properties": {"name": "alice"}, "id": "01"}, "after": null},
                "schema": {"constraints": []},
            }),
        );
        let handler = CdcSchemaHandler::new();
        let events = handler.handle(&[record]).unwrap();
        assert!(events.is_empty());
        assert_eq!(handler.dropped_for_missing_keys(), 1);
    }

    #[test]
    fn updated_node_adds_and_removes_labels() {
        let record = cdc_record(
            0,
            node_event(
                "updated",
                Some(serde_json::json!({"labels": ["Person", "Staged"], "properties": {"id": 1}, "id": "01"})),
                Some(serde_json::json!({"labels": ["Person", "Active"], "properties": {"id": 1, "name": "alice"}, "id": "01"})),
            ),
        );
        let handler = CdcSchemaHandler::new();
        let events = handler.handle(&[record]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("SET n:`Active`"));
        assert!(events[0].statement.contains("REMOVE n:`Staged`"));
    }

    #[test]
    fn relationship_delete_projects_endpoint_keys_only() {
        let rel = serde_json::json!({
            "start": {"labels": ["Person"], "properties": {"id": 1}, "id": "01"},
            "end": {"labels": ["Person"], "properties": {"id": 2}, "id": "02"},
            "properties": {},
        });
        let record = cdc_record(
            0,
            serde_json::json!({
                "meta": {"operation": "deleted"},
                "payload": {"type": "relationship", "relType": "KNOWS", "before": rel, "after": null},
                "schema": {"constraints": [{"label": "Person", "type": "UNIQUE", "properties": ["id"]}]},
            }),
        );
        let handler = CdcSchemaHandler::new();
        let events = handler.handle(&[record]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("DELETE r"));
        assert!(!events[0].statement.contains("properties"));
    }
}
