use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// A decoded structured value: the shape a [`Record`](crate::Record)'s key or
/// value payload takes once the broker's (de)serialization format has already
/// run. Handlers never see raw bytes or Avro/protobuf framing, only this.
///
/// `Map` preserves insertion order via [`IndexMap`] so that statement
/// parameters built from a record's fields are deterministic and stable
/// across runs, which matters for the grouping and ordering guarantees in
/// spec section 4.4/4.5.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Lexicographic-ish best-effort rendering used only for diagnostics
    /// (error messages); never used to build statement parameters.
    pub fn describe(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => format!("{s:?}"),
            Value::List(_) => "[..]".to_string(),
            Value::Map(_) => "{..}".to_string(),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            JsonValue::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for JsonValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Int(i) => JsonValue::from(i),
            Value::Float(f) => {
                serde_json::Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            }
            Value::String(s) => JsonValue::String(s),
            Value::List(l) => JsonValue::Array(l.into_iter().map(JsonValue::from).collect()),
            Value::Map(m) => {
                JsonValue::Object(m.into_iter().map(|(k, v)| (k, JsonValue::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let json = serde_json::json!({"id": 1, "name": "alice", "tags": ["a", "b"], "age": null});
        let value: Value = json.clone().into();
        let back: JsonValue = value.into();
        assert_eq!(json, back);
    }

    #[test]
    fn map_preserves_field_order() {
        let json = serde_json::json!({"z": 1, "a": 2, "m": 3});
        let value: Value = json.into();
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
