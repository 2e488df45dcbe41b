//! Statement grouper (C4, spec section 4.4).
//!
//! Coalesces handler output that shares an identical statement string,
//! appending parameter lists in the order they were produced. Handlers are
//! invoked per-partition in offset order (spec section 5), so as long as
//! callers feed partitions into [`group`] without reordering within a
//! partition, the "order preserved per (topic, partition, identity-key)"
//! guarantee holds: this function never reorders, it only concatenates.

use indexmap::IndexMap;

use bridge_core::QueryEvents;

/// Coalesces a batch's `QueryEvents` by statement text, preserving the
/// relative order of parameter entries and of first-seen statements.
pub fn group(events: impl IntoIterator<Item = QueryEvents>) -> Vec<QueryEvents> {
    let mut by_statement: IndexMap<String, QueryEvents> = IndexMap::new();
    for event in events {
        by_statement
            .entry(event.statement.clone())
            .and_modify(|existing| existing.parameters.extend(event.parameters.clone()))
            .or_insert(event);
    }
    by_statement.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::Value;

    fn params(n: i64) -> Vec<bridge_core::EventParams> {
        let mut m = IndexMap::new();
        m.insert("id".to_string(), Value::Int(n));
        vec![m]
    }

    #[test]
    fn coalesces_identical_statements_preserving_order() {
        let a = QueryEvents::with_parameters("MERGE (n) SET n = $p", params(1));
        let b = QueryEvents::with_parameters("MERGE (n) SET n = $p", params(2));
        let c = QueryEvents::with_parameters("OTHER", params(3));

        let grouped = group(vec![a, b, c]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].parameters.len(), 2);
        assert_eq!(grouped[0].parameters[0]["id"], Value::Int(1));
        assert_eq!(grouped[0].parameters[1]["id"], Value::Int(2));
        assert_eq!(grouped[1].statement, "OTHER");
    }

    #[test]
    fn grouping_is_idempotent() {
        let a = QueryEvents::with_parameters("MERGE (n) SET n = $p", params(1));
        let b = QueryEvents::with_parameters("MERGE (n) SET n = $p", params(2));
        let once = group(vec![a, b]);
        let twice = group(once.clone());
        assert_eq!(once, twice);
    }
}
