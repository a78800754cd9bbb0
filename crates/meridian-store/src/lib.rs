//! meridian-store: the graph-backed metadata instance store.
//!
//! Typed instances are mapped onto a labeled property graph through any
//! [`meridian_graph::GraphBackend`]:
//! - [`qualifier`] derives type-qualified property keys (ancestor wins)
//! - [`mapper`] converts entities, proxies, classifications and relationships
//!   to and from vertices and edges
//! - [`index`] bootstraps the schema, validates store identity and drives the
//!   index lifecycle
//! - [`MetadataStore`] provides transactional CRUD, classification
//!   reconciliation and search
//! - [`planner`] decides whether search conditions can be pushed to the backend

pub mod classify;
pub mod error;
pub mod index;
pub mod keys;
pub mod mapper;
pub mod planner;
pub mod qualifier;
pub mod search;
pub mod store;

pub use error::{Result, StoreError};
pub use index::{ControlRecord, IndexManager};
pub use mapper::ElementMapper;
pub use planner::{PlanKind, PlanRequest, QueryPlan, QueryPlanner};
pub use search::{EntitySearch, RelationshipSearch};
pub use store::MetadataStore;
