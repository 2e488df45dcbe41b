use crate::Value;

/// A single header entry. Kafka headers are ordered, repeatable, and
/// byte-valued; we keep that shape rather than collapsing to a map so the
/// Cypher handler's `bindHeader` option can bind the header list as-is.
pub type Headers = Vec<(String, Vec<u8>)>;

/// The input unit handlers operate on: a decoded broker record.
///
/// `key` and `value` are already-decoded [`Value`]s — deserialization of the
/// wire format (Avro/JSON-Schema/protobuf) is a collaborator's job, not this
/// pipeline's. A `value` of [`Value::Null`] is a tombstone, signalling
/// deletion of the keyed entity.
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Value,
    pub value: Value,
    pub timestamp: i64,
    pub headers: Headers,
}

impl Record {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_null()
    }

    /// The record's broker timestamp as a UTC instant, for structured
    /// logging on dropped/dead-lettered records (spec section 7). Falls
    /// back to the Unix epoch if `timestamp` is out of `chrono`'s range.
    pub fn timestamp_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.timestamp).unwrap_or_default()
    }
}
