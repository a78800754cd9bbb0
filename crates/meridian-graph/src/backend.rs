//! The labeled-property-graph boundary every backend implements.
//!
//! Data and schema changes go through separate transactions: a
//! [`GraphTransaction`] for vertices, edges and properties, and a
//! [`SchemaManagement`] transaction for labels, property keys and indexes.

use crate::filter::Filter;
use crate::value::{Direction, Element, ElementId, PropertyMap, ScalarType, Value};

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: ElementId },

    #[error("Unique constraint violated on {key} = {value}")]
    ConstraintViolation { key: String, value: String },

    #[error("Property {key} declared as {expected:?} cannot hold {found:?}")]
    TypeMismatch {
        key: String,
        expected: ScalarType,
        found: Value,
    },

    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// A vertex as read from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexRecord {
    pub id: ElementId,
    pub label: String,
    pub properties: PropertyMap,
}

impl VertexRecord {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }
}

/// An edge as read from the backend. `out_vertex` is the tail, `in_vertex` the head.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub id: ElementId,
    pub label: String,
    pub out_vertex: ElementId,
    pub in_vertex: ElementId,
    pub properties: PropertyMap,
}

impl EdgeRecord {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(Value::as_i64)
    }

    /// The endpoint opposite `vertex`.
    pub fn other_end(&self, vertex: ElementId) -> ElementId {
        if self.out_vertex == vertex {
            self.in_vertex
        } else {
            self.out_vertex
        }
    }
}

/// Whether an index covers vertices or edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Vertex,
    Edge,
}

/// How a mixed index analyzes string values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexMapping {
    /// Whole value; queried with full-match regular expressions.
    String,
    /// Tokenized; queried with per-token regular expressions.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Exact-match lookup, optionally enforcing uniqueness.
    Composite { unique: bool },
    Mixed(IndexMapping),
}

/// Definition of a single-key index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    pub name: String,
    pub element: ElementKind,
    pub label: String,
    pub key: String,
    pub kind: IndexKind,
}

/// Lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexStatus {
    Installed,
    Registered,
    Enabled,
    Disabled,
}

/// Transitions requested on an existing index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaAction {
    Register,
    Reindex,
    Enable,
}

/// A backend capable of opening data and schema transactions.
pub trait GraphBackend: Send + Sync {
    fn begin(&self) -> Result<Box<dyn GraphTransaction + '_>>;

    fn management(&self) -> Result<Box<dyn SchemaManagement + '_>>;

    /// Short backend name for log fields.
    fn name(&self) -> &'static str;
}

/// A data transaction. Nothing is visible to other transactions until `commit`.
pub trait GraphTransaction: Send {
    fn add_vertex(&mut self, label: &str) -> Result<ElementId>;

    fn add_edge(&mut self, label: &str, out: ElementId, into: ElementId) -> Result<ElementId>;

    fn vertex(&mut self, id: ElementId) -> Result<Option<VertexRecord>>;

    fn edge(&mut self, id: ElementId) -> Result<Option<EdgeRecord>>;

    fn set_property(&mut self, element: Element, key: &str, value: Value) -> Result<()>;

    fn set_properties(&mut self, element: Element, props: &PropertyMap) -> Result<()> {
        for (key, value) in props {
            self.set_property(element, key, value.clone())?;
        }
        Ok(())
    }

    fn remove_property(&mut self, element: Element, key: &str) -> Result<()>;

    /// Remove a vertex together with every edge incident to it.
    fn remove_vertex(&mut self, id: ElementId) -> Result<()>;

    fn remove_edge(&mut self, id: ElementId) -> Result<()>;

    fn edges(
        &mut self,
        vertex: ElementId,
        direction: Direction,
        label: Option<&str>,
    ) -> Result<Vec<EdgeRecord>>;

    fn find_vertices(&mut self, label: &str, filter: &Filter) -> Result<Vec<VertexRecord>>;

    fn find_edges(&mut self, label: &str, filter: &Filter) -> Result<Vec<EdgeRecord>>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// A schema transaction. Index definitions take effect on `commit`.
pub trait SchemaManagement: Send {
    fn contains_vertex_label(&mut self, label: &str) -> Result<bool>;

    fn make_vertex_label(&mut self, label: &str) -> Result<()>;

    fn contains_edge_label(&mut self, label: &str) -> Result<bool>;

    fn make_edge_label(&mut self, label: &str) -> Result<()>;

    fn contains_property_key(&mut self, key: &str) -> Result<bool>;

    fn make_property_key(&mut self, key: &str, scalar: ScalarType) -> Result<()>;

    fn contains_index(&mut self, name: &str) -> Result<bool>;

    fn build_index(&mut self, spec: &IndexSpec) -> Result<()>;

    fn index_status(&mut self, name: &str) -> Result<Option<IndexStatus>>;

    fn update_index(&mut self, name: &str, action: SchemaAction) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}
