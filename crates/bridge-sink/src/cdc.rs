//! Shared change-data-capture event shape consumed by the CDC-SchemaId and
//! CDC-SourceId handlers (spec section 4.3).
//!
//! Records on CDC topics carry a `StreamsTransactionEvent`: an operation
//! (`created`/`updated`/`deleted`), a before/after image of either a node or
//! a relationship, an opaque per-entity id (hex-encoded for the SourceId
//! strategy), and — for node/relationship events — the unique constraints
//! declared on the schema at the time of the transaction.

use bridge_core::{BridgeError, Constraint, ConstraintType, Record, Value};
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcOperation {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct CdcNodeState {
    pub labels: Vec<String>,
    pub properties: IndexMap<String, Value>,
    pub entity_id: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CdcRelationshipEndpoint {
    pub labels: Vec<String>,
    pub properties: IndexMap<String, Value>,
    pub entity_id: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CdcRelationshipState {
    pub rel_type: String,
    pub start: CdcRelationshipEndpoint,
    pub end: CdcRelationshipEndpoint,
    pub properties: IndexMap<String, Value>,
}

#[derive(Debug, Clone)]
pub enum CdcPayload {
    Node { before: Option<CdcNodeState>, after: Option<CdcNodeState> },
    Relationship { before: Option<CdcRelationshipState>, after: Option<CdcRelationshipState> },
}

#[derive(Debug, Clone)]
pub struct StreamsTransactionEvent {
    pub operation: CdcOperation,
    pub payload: CdcPayload,
    pub constraints: Vec<Constraint>,
}

fn malformed(record: &Record, reason: impl Into<String>) -> BridgeError {
    BridgeError::MalformedRecord {
        topic: record.topic.clone(),
        partition: record.partition,
        offset: record.offset,
        reason: reason.into(),
    }
}

fn field<'a>(map: &'a IndexMap<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key)
}

fn as_str_list(value: &Value) -> Vec<String> {
    match value {
        Value::List(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

fn as_hex_or_raw_id(value: Option<&Value>) -> Vec<u8> {
    match value {
        Some(Value::String(s)) => hex::decode(s).unwrap_or_else(|_| s.as_bytes().to_vec()),
        Some(Value::Int(i)) => i.to_be_bytes().to_vec(),
        _ => Vec::new(),
    }
}

fn parse_node_state(value: &Value) -> Option<CdcNodeState> {
    let map = value.as_map()?;
    let labels = field(map, "labels").map(as_str_list).unwrap_or_default();
    let properties = field(map, "properties").and_then(Value::as_map).cloned().unwrap_or_default();
    let entity_id = as_hex_or_raw_id(field(map, "id"));
    Some(CdcNodeState { labels, properties, entity_id })
}

fn parse_rel_endpoint(value: &Value) -> Option<CdcRelationshipEndpoint> {
    let map = value.as_map()?;
    let labels = field(map, "labels").map(as_str_list).unwrap_or_default();
    let properties = field(map, "properties").and_then(Value::as_map).cloned().unwrap_or_default();
    let entity_id = as_hex_or_raw_id(field(map, "id"));
    Some(CdcRelationshipEndpoint { labels, properties, entity_id })
}

fn parse_rel_state(value: &Value, rel_type: &str) -> Option<CdcRelationshipState> {
    let map = value.as_map()?;
    let start = parse_rel_endpoint(field(map, "start")?)?;
    let end = parse_rel_endpoint(field(map, "end")?)?;
    let properties = field(map, "properties").and_then(Value::as_map).cloned().unwrap_or_default();
    Some(CdcRelationshipState { rel_type: rel_type.to_string(), start, end, properties })
}

fn parse_constraints(value: Option<&Value>) -> Vec<Constraint> {
    let Some(Value::List(items)) = value else { return Vec::new() };
    items
        .iter()
        .filter_map(|item| {
            let map = item.as_map()?;
            let label = field(map, "label")?.as_str()?.to_string();
            let kind = match field(map, "type")?.as_str()? {
                "UNIQUE" => ConstraintType::Unique,
                "NODE_KEY" => ConstraintType::NodeKey,
                _ => ConstraintType::Other,
            };
            let properties = field(map, "properties").map(as_str_list).unwrap_or_default().into_iter().collect();
            Some(Constraint { label, kind, properties })
        })
        .collect()
}

/// Parses a record's value as a `StreamsTransactionEvent`. Expects
/// `{meta: {operation}, payload: {type, before, after, relType?}, schema:
/// {constraints}}`.
pub fn parse_transaction_event(record: &Record) -> Result<StreamsTransactionEvent, BridgeError> {
    let root = record.value.as_map().ok_or_else(|| malformed(record, "value is not a mapping"))?;

    let meta = field(root, "meta")
        .and_then(Value::as_map)
        .ok_or_else(|| malformed(record, "missing `meta`"))?;
    let operation = match field(meta, "operation").and_then(Value::as_str) {
        Some("created") => CdcOperation::Created,
        Some("updated") => CdcOperation::Updated,
        Some("deleted") => CdcOperation::Deleted,
        other => return Err(malformed(record, format!("unknown meta.operation {other:?}"))),
    };

    let payload_map = field(root, "payload")
        .and_then(Value::as_map)
        .ok_or_else(|| malformed(record, "missing `payload`"))?;
    let payload_type = field(payload_map, "type").and_then(Value::as_str).unwrap_or("node");

    let before = field(payload_map, "before");
    let after = field(payload_map, "after");

    let payload = match payload_type {
        "node" => CdcPayload::Node {
            before: before.and_then(parse_node_state),
            after: after.and_then(parse_node_state),
        },
        "relationship" => {
            let rel_type = field(payload_map, "relType").and_then(Value::as_str).unwrap_or_default();
            CdcPayload::Relationship {
                before: before.and_then(|v| parse_rel_state(v, rel_type)),
                after: after.and_then(|v| parse_rel_state(v, rel_type)),
            }
        }
        other => return Err(malformed(record, format!("unknown payload.type `{other}`"))),
    };

    let constraints = field(root, "schema")
        .and_then(Value::as_map)
        .and_then(|schema| field(schema, "constraints"))
        .map(parse_constraints)
        .unwrap_or_default();

    Ok(StreamsTransactionEvent { operation, payload, constraints })
}
