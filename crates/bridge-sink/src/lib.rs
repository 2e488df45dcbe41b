//! Strategy handlers, statement grouper, execution engine, and topic
//! registry for the neo4j-kafka-bridge sink (spec sections 4.2-4.6). This
//! is the hard core: five strategies translate heterogeneous record shapes
//! into `QueryEvents`, the grouper coalesces them per batch, and the
//! execution engine commits the result with retry and dead-letter routing.

mod cdc;
mod cdc_schema;
mod cdc_source_id;
mod cud;
mod cypher;
mod engine;
mod grouper;
mod node_pattern;
mod registry;
mod relationship_pattern;

pub use cdc_schema::CdcSchemaHandler;
pub use cdc_source_id::{CdcSourceIdConfig, CdcSourceIdHandler};
pub use cud::CudHandler;
pub use cypher::{CypherHandler, CypherHandlerConfig};
pub use engine::{BatchState, ExecutionEngine, GraphPool};
pub use grouper::group;
pub use node_pattern::NodePatternHandler;
pub use registry::TopicRegistry;
pub use relationship_pattern::RelationshipPatternHandler;
