//! Shared data model, error taxonomy, and configuration for the
//! neo4j-kafka-bridge connectors.
//!
//! Everything in this crate is immutable once constructed and shared
//! read-only across consumer tasks: parsed patterns, constraint tables, and
//! connector configuration are all built once at start-up (spec section 9).

mod config;
mod constraint;
mod error;
mod handler;
mod query_events;
mod record;
mod value;

pub use config::{
    DeadLetterPolicy, GraphConnectionConfig, RetryConfig, SinkConnectorConfig,
    SourceConnectorConfig, SourceQuerySpec, TopicStrategy,
};
pub use constraint::{
    get_node_keys, Constraint, ConstraintRef, ConstraintType, NodeSchemaMetadata,
    RelationshipSchemaMetadata,
};
pub use error::BridgeError;
pub use handler::Handler;
pub use query_events::{quote_identifier, EventParams, QueryEvents};
pub use record::{Headers, Record};
pub use value::Value;
