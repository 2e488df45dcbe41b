//! The opposing connector's row-to-record projection (spec section 1 / the
//! SPEC_FULL §6 supplement): turns rows already shaped by the graph side —
//! either tailed change events or a polled parameterized query's result set
//! — into outbound broker records.
//!
//! The poll scheduler loop, cursor durability beyond process lifetime, and
//! the query execution against the graph driver are collaborators' jobs,
//! explicitly excluded by spec section 1. This crate models only the
//! projection step, with persistence hidden behind a small trait the
//! runner binary satisfies in-memory.

use std::sync::Mutex;

use bridge_core::{Headers, Record, Value};

/// The single capability the source side exposes: project decoded graph
/// rows into outbound records. Mirrors the sink's `Handler` trait (spec
/// section 9's "single handler capability" pattern) but runs in reverse.
pub trait ChangeProjector: Send + Sync {
    fn project(&self, rows: Vec<Value>) -> Vec<Record>;
}

/// Wraps rows that are already CDC-shaped — the same `StreamsTransactionEvent`
/// envelope the sink's CDC-SchemaId/CDC-SourceId handlers consume — into
/// outbound records, so a change can round-trip sink -> source without
/// reshaping. The record key is the entity's `id` field out of whichever of
/// `payload.after`/`payload.before` is present.
pub struct CdcTailProjector {
    pub topic: String,
}

impl CdcTailProjector {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }

    fn entity_id(value: &Value) -> Value {
        value
            .as_map()
            .and_then(|root| root.get("payload"))
            .and_then(Value::as_map)
            .and_then(|payload| payload.get("after").or_else(|| payload.get("before")))
            .and_then(Value::as_map)
            .and_then(|entity| entity.get("id"))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

impl ChangeProjector for CdcTailProjector {
    fn project(&self, rows: Vec<Value>) -> Vec<Record> {
        rows.into_iter()
            .enumerate()
            .map(|(offset, value)| Record {
                topic: self.topic.clone(),
                partition: 0,
                offset: offset as i64,
                key: Self::entity_id(&value),
                value,
                timestamp: 0,
                headers: Headers::new(),
            })
            .collect()
    }
}

/// Persists and retrieves the cursor value a [`QueryPollProjector`] uses to
/// resume from the last-seen row on its next poll. Durable storage is out
/// of scope (spec section 1's exclusions); implementations here only need
/// to survive one process's lifetime.
pub trait CursorStore: Send + Sync {
    fn load(&self) -> Option<Value>;
    fn store(&self, cursor: Value);
}

/// In-memory `CursorStore`. Sufficient for the runner binary and for tests;
/// a durable variant (file, compacted topic, or database-backed) is a
/// collaborator's concern.
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursor: Mutex<Option<Value>>,
}

impl CursorStore for InMemoryCursorStore {
    fn load(&self) -> Option<Value> {
        self.cursor.lock().unwrap().clone()
    }

    fn store(&self, cursor: Value) {
        *self.cursor.lock().unwrap() = Some(cursor);
    }
}

/// Projects a polled query's result rows — each row a keyed mapping — into
/// outbound records, advancing the cursor store to the last-seen value of
/// `cursor_column` after each poll.
pub struct QueryPollProjector<C: CursorStore> {
    pub topic: String,
    pub cursor_column: String,
    cursor_store: C,
}

impl<C: CursorStore> QueryPollProjector<C> {
    pub fn new(topic: impl Into<String>, cursor_column: impl Into<String>, cursor_store: C) -> Self {
        Self { topic: topic.into(), cursor_column: cursor_column.into(), cursor_store }
    }

    /// The cursor value as of the last completed poll, for a caller that
    /// wants to parameterize the next query with it.
    pub fn last_cursor(&self) -> Option<Value> {
        self.cursor_store.load()
    }
}

impl<C: CursorStore> ChangeProjector for QueryPollProjector<C> {
    fn project(&self, rows: Vec<Value>) -> Vec<Record> {
        let mut out = Vec::with_capacity(rows.len());
        let mut latest_cursor = self.cursor_store.load();

        for (offset, value) in rows.into_iter().enumerate() {
            if let Some(cursor_value) = value.as_map().and_then(|row| row.get(&self.cursor_column)).cloned() {
                latest_cursor = Some(cursor_value);
            }
            out.push(Record {
                topic: self.topic.clone(),
                partition: 0,
                offset: offset as i64,
                key: Value::Null,
                value,
                timestamp: 0,
                headers: Headers::new(),
            });
        }

        if let Some(cursor) = latest_cursor {
            self.cursor_store.store(cursor);
        }
        out
    }
}
