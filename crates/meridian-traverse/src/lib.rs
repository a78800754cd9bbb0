//! meridian-traverse: Bounded graph traversal over the Meridian metadata store.
//!
//! Walks the entity/relationship graph held by a [`MetadataStore`] inside a
//! single read transaction: depth-bounded neighborhoods ([`TraversalEngine::get_sub_graph`])
//! and bounded simple paths between two entities ([`TraversalEngine::get_paths`]).
//! Any mapping failure on a visited element aborts the traversal.

pub mod paths;
pub mod subgraph;
pub mod types;
pub mod walk;

pub use types::{PathsRequest, SubgraphRequest};

use std::sync::Arc;

use meridian_core::InstanceGraph;
use meridian_store::mapper::find_entity_vertex;
use meridian_store::{MetadataStore, Result, StoreError};
use tracing::{debug, info};

use crate::walk::{StepFilter, Walker};

/// Traversal operations over one store.
#[derive(Clone)]
pub struct TraversalEngine {
    store: Arc<MetadataStore>,
}

impl TraversalEngine {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Entities and relationships within `depth` hops of the root.
    ///
    /// The root is included whatever the filters say; a proxy root is walked
    /// from but not listed among the entities.
    pub fn get_sub_graph(&self, request: &SubgraphRequest) -> Result<InstanceGraph> {
        let registry = self.store.registry();
        self.store.read(|tx, mapper| {
            let root = find_entity_vertex(tx, &request.root)?.ok_or_else(|| {
                StoreError::EntityNotKnown {
                    guid: request.root.clone(),
                }
            })?;
            let filter = StepFilter {
                entity_types: request.entity_types.as_deref(),
                relationship_types: request.relationship_types.as_deref(),
                statuses: request.statuses.as_deref(),
                classifications: request.classifications.as_deref(),
            };
            let mut walker = Walker::new(tx, mapper, registry, filter);
            let graph = subgraph::neighborhood(&mut walker, &root, request.depth)?;
            info!(
                root = %request.root,
                depth = request.depth,
                entities = graph.entities.len(),
                relationships = graph.relationships.len(),
                "Subgraph extracted"
            );
            Ok(graph)
        })
    }

    /// Up to `max_paths` simple paths of at most `max_depth` hops, merged into one graph.
    ///
    /// Returns `None` when the end entity is unknown or no such path exists.
    pub fn get_paths(&self, request: &PathsRequest) -> Result<Option<InstanceGraph>> {
        let registry = self.store.registry();
        self.store.read(|tx, mapper| {
            let start = find_entity_vertex(tx, &request.start)?.ok_or_else(|| {
                StoreError::EntityNotKnown {
                    guid: request.start.clone(),
                }
            })?;
            let Some(end) = find_entity_vertex(tx, &request.end)? else {
                debug!(end = %request.end, "Path end is not stored");
                return Ok(None);
            };
            let filter = StepFilter {
                statuses: request.statuses.as_deref(),
                ..StepFilter::default()
            };
            let mut walker = Walker::new(tx, mapper, registry, filter);
            let found = paths::enumerate_paths(
                &mut walker,
                start.id,
                end.id,
                request.max_depth,
                request.max_paths,
            )?;
            if found.is_empty() {
                debug!(start = %request.start, end = %request.end, "No path");
                return Ok(None);
            }
            let graph = paths::merge_paths(&mut walker, &found)?;
            info!(
                start = %request.start,
                end = %request.end,
                paths = found.len(),
                entities = graph.entities.len(),
                "Paths found"
            );
            Ok(Some(graph))
        })
    }
}
