//! Request types for traversal operations.

use serde::{Deserialize, Serialize};

use meridian_core::InstanceStatus;

/// Request for the neighborhood of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphRequest {
    pub root: String,
    /// Entity types (with subtypes) a reached entity must have.
    #[serde(default)]
    pub entity_types: Option<Vec<String>>,
    /// Relationship types (with subtypes) an edge must have to be followed.
    #[serde(default)]
    pub relationship_types: Option<Vec<String>>,
    /// Allowed statuses. If None, everything but DELETED.
    #[serde(default)]
    pub statuses: Option<Vec<InstanceStatus>>,
    /// A reached entity must carry at least one of these classifications.
    #[serde(default)]
    pub classifications: Option<Vec<String>>,
    /// Maximum hops from the root (default: 1).
    #[serde(default = "default_depth")]
    pub depth: usize,
}

/// Request for the entities and relationships linking two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsRequest {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub statuses: Option<Vec<InstanceStatus>>,
    /// Maximum number of paths to collect (default: 10).
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    /// Maximum hops per path (default: 5).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_depth() -> usize {
    1
}

fn default_max_paths() -> usize {
    10
}

fn default_max_depth() -> usize {
    5
}

impl SubgraphRequest {
    pub fn new(root: impl Into<String>, depth: usize) -> Self {
        Self {
            root: root.into(),
            entity_types: None,
            relationship_types: None,
            statuses: None,
            classifications: None,
            depth,
        }
    }
}

impl PathsRequest {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            statuses: None,
            max_paths: default_max_paths(),
            max_depth: default_max_depth(),
        }
    }
}
