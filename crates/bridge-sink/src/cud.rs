//! CUD strategy handler (spec section 4.3): the compact create/update/merge/
//! delete JSON form. Groups records by `(op, type, labels/relType, identity
//! key shape)` and emits one parameterized statement per group.

use indexmap::IndexMap;

use bridge_core::{quote_identifier, BridgeError, Handler, QueryEvents, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CudOp {
    Create,
    Update,
    Merge,
    Delete,
}

impl CudOp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "merge" => Some(Self::Merge),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Node { op: &'static str, labels: Vec<String>, id_keys: Vec<String> },
    Relationship {
        op: &'static str,
        rel_type: String,
        from_labels: Vec<String>,
        from_keys: Vec<String>,
        to_labels: Vec<String>,
        to_keys: Vec<String>,
    },
}

struct ParsedEvent {
    key: GroupKey,
    params: IndexMap<String, Value>,
}

fn malformed(record: &Record, reason: impl Into<String>) -> BridgeError {
    BridgeError::MalformedRecord {
        topic: record.topic.clone(),
        partition: record.partition,
        offset: record.offset,
        reason: reason.into(),
    }
}

fn as_str_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::List(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

fn as_map(value: Option<&Value>) -> IndexMap<String, Value> {
    match value {
        Some(Value::Map(m)) => m.clone(),
        _ => IndexMap::new(),
    }
}

fn parse_event(record: &Record) -> Result<ParsedEvent, BridgeError> {
    let root = record.value.as_map().ok_or_else(|| malformed(record, "value is not a mapping"))?;

    let op_str = root.get("op").and_then(Value::as_str).ok_or_else(|| malformed(record, "missing `op`"))?;
    let op = CudOp::parse(op_str).ok_or_else(|| malformed(record, format!("unknown op `{op_str}`")))?;
    let entity_type = root.get("type").and_then(Value::as_str).unwrap_or("node");

    match entity_type {
        "node" => {
            let labels = as_str_list(root.get("labels"));
            let ids = as_map(root.get("ids"));
            let properties = as_map(root.get("properties"));
            let mut id_keys: Vec<String> = ids.keys().cloned().collect();
            id_keys.sort();

            let mut params = IndexMap::new();
            params.insert("keys".to_string(), Value::Map(ids));
            if op != CudOp::Delete {
                params.insert("properties".to_string(), Value::Map(properties));
            }

            Ok(ParsedEvent {
                key: GroupKey::Node { op: op_static_str(op), labels, id_keys },
                params,
            })
        }
        "relationship" => {
            let rel_type = root.get("relType").and_then(Value::as_str).unwrap_or_default().to_string();
            let from = root.get("from").and_then(Value::as_map).cloned().unwrap_or_default();
            let to = root.get("to").and_then(Value::as_map).cloned().unwrap_or_default();
            let from_labels = as_str_list(from.get("labels"));
            let to_labels = as_str_list(to.get("labels"));
            let from_ids = as_map(from.get("ids"));
            let to_ids = as_map(to.get("ids"));
            let properties = as_map(root.get("properties"));

            let mut from_keys: Vec<String> = from_ids.keys().cloned().collect();
            from_keys.sort();
            let mut to_keys: Vec<String> = to_ids.keys().cloned().collect();
            to_keys.sort();

            let mut params = IndexMap::new();
            params.insert("from".to_string(), Value::Map(from_ids));
            params.insert("to".to_string(), Value::Map(to_ids));
            if op != CudOp::Delete {
                params.insert("properties".to_string(), Value::Map(properties));
            }

            Ok(ParsedEvent {
                key: GroupKey::Relationship {
                    op: op_static_str(op),
                    rel_type,
                    from_labels,
                    from_keys,
                    to_labels,
                    to_keys,
                },
                params,
            })
        }
        other => Err(malformed(record, format!("unknown type `{other}`"))),
    }
}

fn op_static_str(op: CudOp) -> &'static str {
    match op {
        CudOp::Create => "create",
        CudOp::Update => "update",
        CudOp::Merge => "merge",
        CudOp::Delete => "delete",
    }
}

fn labels_clause(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{}", quote_identifier(l))).collect()
}

fn id_match_clause(param_path: &str, id_keys: &[String]) -> String {
    let pairs: Vec<String> = id_keys
        .iter()
        .map(|k| format!("{}: event.{param_path}.{}", quote_identifier(k), k))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

fn node_statement(op: &str, labels: &[String], id_keys: &[String]) -> String {
    let node_pattern = format!("(n{})", labels_clause(labels));
    match op {
        "create" => format!(
            "UNWIND $events AS event\nCREATE {node_pattern} SET n = event.properties"
        ),
        "merge" => format!(
            "UNWIND $events AS event\nMERGE (n{} {}) SET n += event.properties",
            labels_clause(labels),
            id_match_clause("keys", id_keys)
        ),
        "update" => format!(
            "UNWIND $events AS event\nMATCH (n{} {}) SET n = event.properties",
            labels_clause(labels),
            id_match_clause("keys", id_keys)
        ),
        "delete" => format!(
            "UNWIND $events AS event\nMATCH (n{} {}) DETACH DELETE n",
            labels_clause(labels),
            id_match_clause("keys", id_keys)
        ),
        _ => unreachable!(),
    }
}

fn relationship_statement(
    op: &str,
    rel_type: &str,
    from_labels: &[String],
    from_keys: &[String],
    to_labels: &[String],
    to_keys: &[String],
) -> String {
    let rel_type_q = quote_identifier(rel_type);
    let from_pattern = format!("(a{} {})", labels_clause(from_labels), id_match_clause("from", from_keys));
    let to_pattern = format!("(b{} {})", labels_clause(to_labels), id_match_clause("to", to_keys));
    match op {
        "create" => format!(
            "UNWIND $events AS event\nMATCH {from_pattern}\nMATCH {to_pattern}\nCREATE (a)-[r:{rel_type_q}]->(b) SET r = event.properties"
        ),
        "merge" => format!(
            "UNWIND $events AS event\nMERGE {from_pattern}\nMERGE {to_pattern}\nMERGE (a)-[r:{rel_type_q}]->(b) SET r += event.properties"
        ),
        "update" => format!(
            "UNWIND $events AS event\nMATCH {from_pattern}-[r:{rel_type_q}]->{to_pattern} SET r = event.properties"
        ),
        "delete" => format!(
            "UNWIND $events AS event\nMATCH {from_pattern}-[r:{rel_type_q}]->{to_pattern} DELETE r"
        ),
        _ => unreachable!(),
    }
}

pub struct CudHandler;

impl Handler for CudHandler {
    fn handle(&self, records: &[Record]) -> Result<Vec<QueryEvents>, BridgeError> {
        let mut groups: IndexMap<GroupKey, QueryEvents> = IndexMap::new();
        for record in records {
            let parsed = parse_event(record)?;
            let statement = match &parsed.key {
                GroupKey::Node { op, labels, id_keys } => node_statement(op, labels, id_keys),
                GroupKey::Relationship { op, rel_type, from_labels, from_keys, to_labels, to_keys } => {
                    relationship_statement(op, rel_type, from_labels, from_keys, to_labels, to_keys)
                }
            };
            groups
                .entry(parsed.key)
                .or_insert_with(|| QueryEvents::new(statement))
                .push(parsed.params);
        }
        Ok(groups.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cud_record(offset: i64, json: serde_json::Value) -> Record {
        Record {
            topic: "cud".into(),
            partition: 0,
            offset,
            key: Value::Null,
            value: json.into(),
            timestamp: 0,
            headers: Vec::new(),
        }
    }

    #[test]
    fn scenario_6_groups_two_creates_into_one_statement() {
        let records = vec![
            cud_record(
                0,
                serde_json::json!({"op": "create", "type": "node", "labels": ["T"], "ids": {"k": 1}, "properties": {"a": 1}}),
            ),
            cud_record(
                1,
                serde_json::json!({"op": "create", "type": "node", "labels": ["T"], "ids": {"k": 2}, "properties": {"a": 2}}),
            ),
        ];
        let events = CudHandler.handle(&records).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].parameters.len(), 2);
    }

    #[test]
    fn delete_projects_no_properties() {
        let records = vec![cud_record(
            0,
            serde_json::json!({"op": "delete", "type": "node", "labels": ["T"], "ids": {"k": 1}}),
        )];
        let events = CudHandler.handle(&records).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.contains("DETACH DELETE"));
        assert!(!events[0].parameters[0].contains_key("properties"));
    }

    #[test]
    fn different_label_sets_produce_different_groups() {
        let records = vec![
            cud_record(0, serde_json::json!({"op": "create", "type": "node", "labels": ["A"], "ids": {"k": 1}, "properties": {}})),
            cud_record(1, serde_json::json!({"op": "create", "type": "node", "labels": ["B"], "ids": {"k": 1}, "properties": {}})),
        ];
        let events = CudHandler.handle(&records).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn malformed_value_is_rejected() {
        let record = cud_record(0, serde_json::json!("not-an-object"));
        assert!(matches!(CudHandler.handle(&[record]), Err(BridgeError::MalformedRecord { .. })));
    }
}
