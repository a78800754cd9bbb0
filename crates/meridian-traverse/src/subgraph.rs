//! Depth-bounded neighborhood extraction.

use std::collections::{BTreeMap, HashSet};

use meridian_core::{EntityDetail, InstanceGraph, Relationship};
use meridian_graph::{ElementId, VertexRecord};
use meridian_store::mapper::is_proxy;
use meridian_store::Result;
use tracing::debug;

use crate::walk::Walker;

/// Breadth-first walk from `root` up to `depth` hops.
///
/// The root is always part of the result. Every vertex is expanded at most
/// once, at the smallest depth it is reached, and no edge is followed twice.
/// Proxies appear only as relationship ends.
pub fn neighborhood(walker: &mut Walker<'_>, root: &VertexRecord, depth: usize) -> Result<InstanceGraph> {
    let mut reached: Vec<ElementId> = vec![root.id];
    let mut expanded: HashSet<ElementId> = HashSet::from([root.id]);
    let mut followed: HashSet<ElementId> = HashSet::new();
    let mut relationships: BTreeMap<String, Relationship> = BTreeMap::new();

    let mut frontier = vec![root.id];
    for hop in 0..depth {
        let mut next = Vec::new();
        for vertex in frontier {
            for (edge, far) in walker.step(vertex)? {
                if !followed.insert(edge.id) {
                    continue;
                }
                let relationship = walker.relationship(&edge)?;
                relationships.insert(relationship.guid.clone(), relationship);
                if expanded.insert(far) {
                    reached.push(far);
                    next.push(far);
                }
            }
        }
        debug!(hop = hop + 1, reached = next.len(), "Subgraph hop");
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    let mut entities: BTreeMap<String, EntityDetail> = BTreeMap::new();
    for id in reached {
        let vertex = walker.vertex(id)?;
        if is_proxy(&vertex) {
            continue;
        }
        let detail = walker.entity_detail(&vertex)?;
        entities.insert(detail.guid.clone(), detail);
    }

    Ok(InstanceGraph {
        entities: entities.into_values().collect(),
        relationships: relationships.into_values().collect(),
    })
}
