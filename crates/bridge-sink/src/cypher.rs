//! Cypher strategy handler (spec section 4.3): wraps a user-provided
//! parameterized statement template in the `UNWIND $events AS event` iterate
//! prelude and binds whichever of key/value/header/timestamp the topic
//! config asked for.

use indexmap::IndexMap;

use bridge_core::{BridgeError, Handler, QueryEvents, Record, Value};

#[derive(Debug, Clone)]
pub struct CypherHandlerConfig {
    pub statement: String,
    pub bind_key: bool,
    pub bind_value: bool,
    pub bind_header: bool,
    pub bind_timestamp: bool,
}

pub struct CypherHandler {
    config: CypherHandlerConfig,
    wrapped_statement: String,
}

impl CypherHandler {
    pub fn new(config: CypherHandlerConfig) -> Self {
        let wrapped_statement = format!("UNWIND $events AS event\n{}", config.statement);
        Self { config, wrapped_statement }
    }

    fn build_event(&self, record: &Record) -> IndexMap<String, Value> {
        let mut event = IndexMap::new();
        if self.config.bind_key {
            event.insert("key".to_string(), record.key.clone());
        }
        if self.config.bind_value {
            event.insert("value".to_string(), record.value.clone());
        }
        if self.config.bind_header {
            let headers = record
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(String::from_utf8_lossy(v).into_owned())))
                .collect();
            event.insert("header".to_string(), Value::Map(headers));
        }
        if self.config.bind_timestamp {
            event.insert("timestamp".to_string(), Value::Int(record.timestamp));
        }
        event
    }
}

impl Handler for CypherHandler {
    fn handle(&self, records: &[Record]) -> Result<Vec<QueryEvents>, BridgeError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let parameters = records.iter().map(|r| self.build_event(r)).collect();
        Ok(vec![QueryEvents::with_parameters(self.wrapped_statement.clone(), parameters)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> Record {
        Record {
            topic: "t".into(),
            partition: 0,
            offset: 0,
            key: Value::Null,
            value,
            timestamp: 0,
            headers: Vec::new(),
        }
    }

    #[test]
    fn wraps_statement_with_unwind_prelude() {
        let handler = CypherHandler::new(CypherHandlerConfig {
            statement: "CREATE (n:Foo) SET n = event.value".into(),
            bind_key: false,
            bind_value: true,
            bind_header: false,
            bind_timestamp: false,
        });
        let events = handler.handle(&[record(Value::Int(1))]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].statement.starts_with("UNWIND $events AS event\n"));
        assert_eq!(events[0].parameters.len(), 1);
        assert_eq!(events[0].parameters[0]["value"], Value::Int(1));
        assert!(!events[0].parameters[0].contains_key("key"));
    }

    #[test]
    fn empty_batch_emits_nothing() {
        let handler = CypherHandler::new(CypherHandlerConfig {
            statement: "RETURN 1".into(),
            bind_key: false,
            bind_value: false,
            bind_header: false,
            bind_timestamp: false,
        });
        assert!(handler.handle(&[]).unwrap().is_empty());
    }
}
