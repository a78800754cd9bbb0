//! Bounded simple-path enumeration between two entities.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use meridian_core::{InstanceGraph, Relationship};
use meridian_graph::{EdgeRecord, ElementId};
use meridian_store::mapper::is_proxy;
use meridian_store::Result;
use tracing::debug;

use crate::walk::Walker;

/// A simple path through the store graph.
#[derive(Debug, Clone)]
pub struct RawPath {
    /// Vertices along the path, start first.
    pub vertices: Vec<ElementId>,
    /// Edges along the path, in walking order.
    pub edges: Vec<EdgeRecord>,
}

/// Breadth-first enumeration of simple paths from `start` to `end`.
///
/// Edges are walked in either direction. A branch stops when it reaches
/// `end` or has used `max_depth` hops; branches that run out of hops are
/// discarded. Shorter paths are found first, and at most `max_paths` are
/// returned.
pub fn enumerate_paths(
    walker: &mut Walker<'_>,
    start: ElementId,
    end: ElementId,
    max_depth: usize,
    max_paths: usize,
) -> Result<Vec<RawPath>> {
    let mut found = Vec::new();
    if max_paths == 0 {
        return Ok(found);
    }
    if start == end {
        found.push(RawPath {
            vertices: vec![start],
            edges: Vec::new(),
        });
        return Ok(found);
    }

    let mut queue = VecDeque::from([RawPath {
        vertices: vec![start],
        edges: Vec::new(),
    }]);
    while let Some(path) = queue.pop_front() {
        if path.edges.len() >= max_depth {
            continue;
        }
        let Some(&tip) = path.vertices.last() else {
            continue;
        };
        for (edge, far) in walker.step(tip)? {
            if path.vertices.contains(&far) {
                continue;
            }
            let mut next = path.clone();
            next.vertices.push(far);
            next.edges.push(edge);
            if far == end {
                found.push(next);
                if found.len() >= max_paths {
                    return Ok(found);
                }
            } else {
                queue.push_back(next);
            }
        }
    }
    debug!(paths = found.len(), max_depth, "Path enumeration exhausted");
    Ok(found)
}

/// The union of the paths' entities and relationships. Proxies appear only as relationship ends.
pub fn merge_paths(walker: &mut Walker<'_>, paths: &[RawPath]) -> Result<InstanceGraph> {
    let vertices: BTreeSet<ElementId> = paths.iter().flat_map(|p| p.vertices.iter().copied()).collect();
    let mut edges: BTreeMap<ElementId, &EdgeRecord> = BTreeMap::new();
    for edge in paths.iter().flat_map(|p| p.edges.iter()) {
        edges.entry(edge.id).or_insert(edge);
    }

    let mut entities = BTreeMap::new();
    for id in vertices {
        let vertex = walker.vertex(id)?;
        if is_proxy(&vertex) {
            continue;
        }
        let detail = walker.entity_detail(&vertex)?;
        entities.insert(detail.guid.clone(), detail);
    }
    let mut relationships: BTreeMap<String, Relationship> = BTreeMap::new();
    for edge in edges.into_values() {
        let relationship = walker.relationship(edge)?;
        relationships.insert(relationship.guid.clone(), relationship);
    }

    Ok(InstanceGraph {
        entities: entities.into_values().collect(),
        relationships: relationships.into_values().collect(),
    })
}
