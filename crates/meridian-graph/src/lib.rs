//! meridian-graph: Labeled property graph backends for the metadata store.
//!
//! Every read and write of the store goes through the [`GraphBackend`]
//! boundary. Two implementations ship here: the embedded [`MemoryGraph`]
//! used for tests and single-process deployments, and [`GraphClient`], which
//! stores the graph in Neo4j.

pub mod backend;
pub mod client;
pub mod cypher;
pub mod filter;
pub mod memory;
pub mod value;

pub use backend::{
    EdgeRecord, ElementKind, GraphBackend, GraphError, GraphTransaction, IndexKind, IndexMapping,
    IndexSpec, IndexStatus, SchemaAction, SchemaManagement, VertexRecord,
};
pub use client::{GraphClient, GraphConfig};
pub use filter::{CompiledFilter, CompiledPredicate, Filter, Predicate};
pub use memory::{MemoryGraph, MemoryGraphOptions};
pub use value::{Direction, Element, ElementId, PropertyMap, ScalarType, Value};
