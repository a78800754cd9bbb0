//! Embedded in-memory backend.
//!
//! Data transactions are copy-on-write: the first write clones the committed
//! graph, and commit swaps the working copy in if no other transaction has
//! committed since. Schema follows the same lifecycle rules as a production
//! backend: an index over a key created in the same management transaction is
//! enabled on commit, while an index over a pre-existing key starts INSTALLED,
//! becomes REGISTERED after `registration_delay`, and needs a REINDEX to reach
//! ENABLED.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::backend::{
    EdgeRecord, ElementKind, GraphBackend, GraphError, GraphTransaction, IndexKind, IndexSpec,
    IndexStatus, Result, SchemaAction, SchemaManagement, VertexRecord,
};
use crate::filter::Filter;
use crate::value::{Direction, Element, ElementId, PropertyMap, ScalarType, Value};

/// Tuning for the embedded backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphOptions {
    /// Time an index over a pre-existing key spends INSTALLED before it is REGISTERED.
    pub registration_delay: Duration,
}

/// Thread-safe embedded graph. Clone is cheap (inner Arc).
#[derive(Clone, Default)]
pub struct MemoryGraph {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    data: RwLock<GraphData>,
    schema: Mutex<Schema>,
    next_id: AtomicI64,
    options: MemoryGraphOptions,
}

#[derive(Debug, Clone, Default)]
struct GraphData {
    version: u64,
    vertices: BTreeMap<ElementId, VertexRecord>,
    edges: BTreeMap<ElementId, EdgeRecord>,
    out_adj: BTreeMap<ElementId, BTreeSet<ElementId>>,
    in_adj: BTreeMap<ElementId, BTreeSet<ElementId>>,
}

#[derive(Debug, Clone, Default)]
struct Schema {
    vertex_labels: BTreeSet<String>,
    edge_labels: BTreeSet<String>,
    keys: BTreeMap<String, ScalarType>,
    indexes: BTreeMap<String, IndexState>,
}

#[derive(Debug, Clone)]
struct IndexState {
    spec: IndexSpec,
    status: IndexStatus,
    /// Set when an INSTALLED index is committed; drives automatic registration.
    installed_at: Option<Instant>,
}

impl IndexState {
    fn effective_status(&self, delay: Duration) -> IndexStatus {
        match (self.status, self.installed_at) {
            (IndexStatus::Installed, Some(at)) if at.elapsed() >= delay => IndexStatus::Registered,
            (status, _) => status,
        }
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MemoryGraphOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                ..Shared::default()
            }),
        }
    }

    /// Number of committed vertices.
    pub fn vertex_count(&self) -> usize {
        self.shared.data.read().vertices.len()
    }

    /// Number of committed edges.
    pub fn edge_count(&self) -> usize {
        self.shared.data.read().edges.len()
    }

    /// Commit counter; unchanged by empty or rolled-back transactions.
    pub fn version(&self) -> u64 {
        self.shared.data.read().version
    }

    fn allocate_id(&self) -> ElementId {
        ElementId(self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn declared_type(&self, key: &str) -> Option<ScalarType> {
        self.shared.schema.lock().keys.get(key).copied()
    }
}

impl GraphBackend for MemoryGraph {
    fn begin(&self) -> Result<Box<dyn GraphTransaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            graph: self,
            working: None,
            base_version: 0,
        }))
    }

    fn management(&self) -> Result<Box<dyn SchemaManagement + '_>> {
        let pending = self.shared.schema.lock().clone();
        Ok(Box::new(MemoryManagement {
            graph: self,
            pending,
            new_keys: BTreeSet::new(),
            new_indexes: BTreeSet::new(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTransaction<'g> {
    graph: &'g MemoryGraph,
    working: Option<GraphData>,
    base_version: u64,
}

impl MemoryTransaction<'_> {
    fn read<R>(&self, f: impl FnOnce(&GraphData) -> R) -> R {
        match &self.working {
            Some(data) => f(data),
            None => f(&self.graph.shared.data.read()),
        }
    }

    fn write(&mut self) -> &mut GraphData {
        if self.working.is_none() {
            let snapshot = self.graph.shared.data.read().clone();
            self.base_version = snapshot.version;
            self.working = Some(snapshot);
        }
        self.working.get_or_insert_with(GraphData::default)
    }

    fn props_mut(&mut self, element: Element) -> Result<&mut PropertyMap> {
        let data = self.write();
        match element {
            Element::Vertex(id) => data
                .vertices
                .get_mut(&id)
                .map(|v| &mut v.properties)
                .ok_or(GraphError::NotFound { kind: "vertex", id }),
            Element::Edge(id) => data
                .edges
                .get_mut(&id)
                .map(|e| &mut e.properties)
                .ok_or(GraphError::NotFound { kind: "edge", id }),
        }
    }
}

impl GraphData {
    fn detach_edge(&mut self, id: ElementId) -> Option<EdgeRecord> {
        let edge = self.edges.remove(&id)?;
        if let Some(set) = self.out_adj.get_mut(&edge.out_vertex) {
            set.remove(&id);
        }
        if let Some(set) = self.in_adj.get_mut(&edge.in_vertex) {
            set.remove(&id);
        }
        Some(edge)
    }

    /// Reject duplicate values under unique composite indexes.
    fn check_unique(&self, indexes: &BTreeMap<String, IndexState>) -> Result<()> {
        for state in indexes.values() {
            let spec = &state.spec;
            if spec.kind != (IndexKind::Composite { unique: true }) {
                continue;
            }
            let values: Box<dyn Iterator<Item = Option<&Value>>> = match spec.element {
                ElementKind::Vertex => Box::new(
                    self.vertices
                        .values()
                        .filter(|v| v.label == spec.label)
                        .map(|v| v.properties.get(&spec.key)),
                ),
                ElementKind::Edge => Box::new(
                    self.edges
                        .values()
                        .filter(|e| e.label == spec.label)
                        .map(|e| e.properties.get(&spec.key)),
                ),
            };
            let mut seen = HashSet::new();
            for value in values.flatten() {
                let rendered = serde_json::to_string(value)
                    .map_err(|e| GraphError::Serialization(e.to_string()))?;
                if !seen.insert(rendered.clone()) {
                    return Err(GraphError::ConstraintViolation {
                        key: spec.key.clone(),
                        value: rendered,
                    });
                }
            }
        }
        Ok(())
    }
}

impl GraphTransaction for MemoryTransaction<'_> {
    fn add_vertex(&mut self, label: &str) -> Result<ElementId> {
        let id = self.graph.allocate_id();
        self.write().vertices.insert(
            id,
            VertexRecord {
                id,
                label: label.to_string(),
                properties: PropertyMap::new(),
            },
        );
        Ok(id)
    }

    fn add_edge(&mut self, label: &str, out: ElementId, into: ElementId) -> Result<ElementId> {
        let id = self.graph.allocate_id();
        let data = self.write();
        for end in [out, into] {
            if !data.vertices.contains_key(&end) {
                return Err(GraphError::NotFound {
                    kind: "vertex",
                    id: end,
                });
            }
        }
        data.edges.insert(
            id,
            EdgeRecord {
                id,
                label: label.to_string(),
                out_vertex: out,
                in_vertex: into,
                properties: PropertyMap::new(),
            },
        );
        data.out_adj.entry(out).or_default().insert(id);
        data.in_adj.entry(into).or_default().insert(id);
        Ok(id)
    }

    fn vertex(&mut self, id: ElementId) -> Result<Option<VertexRecord>> {
        Ok(self.read(|d| d.vertices.get(&id).cloned()))
    }

    fn edge(&mut self, id: ElementId) -> Result<Option<EdgeRecord>> {
        Ok(self.read(|d| d.edges.get(&id).cloned()))
    }

    fn set_property(&mut self, element: Element, key: &str, value: Value) -> Result<()> {
        if let Some(expected) = self.graph.declared_type(key) {
            if !expected.accepts(&value) {
                return Err(GraphError::TypeMismatch {
                    key: key.to_string(),
                    expected,
                    found: value,
                });
            }
        }
        self.props_mut(element)?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_property(&mut self, element: Element, key: &str) -> Result<()> {
        self.props_mut(element)?.remove(key);
        Ok(())
    }

    fn remove_vertex(&mut self, id: ElementId) -> Result<()> {
        let data = self.write();
        if data.vertices.remove(&id).is_none() {
            return Err(GraphError::NotFound { kind: "vertex", id });
        }
        let incident: Vec<ElementId> = data
            .out_adj
            .remove(&id)
            .into_iter()
            .chain(data.in_adj.remove(&id))
            .flatten()
            .collect();
        for edge in incident {
            data.detach_edge(edge);
        }
        Ok(())
    }

    fn remove_edge(&mut self, id: ElementId) -> Result<()> {
        match self.write().detach_edge(id) {
            Some(_) => Ok(()),
            None => Err(GraphError::NotFound { kind: "edge", id }),
        }
    }

    fn edges(
        &mut self,
        vertex: ElementId,
        direction: Direction,
        label: Option<&str>,
    ) -> Result<Vec<EdgeRecord>> {
        Ok(self.read(|d| {
            let mut ids = BTreeSet::new();
            if matches!(direction, Direction::Out | Direction::Both) {
                ids.extend(d.out_adj.get(&vertex).into_iter().flatten().copied());
            }
            if matches!(direction, Direction::In | Direction::Both) {
                ids.extend(d.in_adj.get(&vertex).into_iter().flatten().copied());
            }
            ids.iter()
                .filter_map(|id| d.edges.get(id))
                .filter(|e| label.map_or(true, |l| e.label == l))
                .cloned()
                .collect()
        }))
    }

    fn find_vertices(&mut self, label: &str, filter: &Filter) -> Result<Vec<VertexRecord>> {
        let compiled = filter.compile()?;
        Ok(self.read(|d| {
            d.vertices
                .values()
                .filter(|v| v.label == label && compiled.matches(&v.properties))
                .cloned()
                .collect()
        }))
    }

    fn find_edges(&mut self, label: &str, filter: &Filter) -> Result<Vec<EdgeRecord>> {
        let compiled = filter.compile()?;
        Ok(self.read(|d| {
            d.edges
                .values()
                .filter(|e| e.label == label && compiled.matches(&e.properties))
                .cloned()
                .collect()
        }))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let Some(mut working) = self.working else {
            return Ok(());
        };
        let indexes = self.graph.shared.schema.lock().indexes.clone();
        let mut data = self.graph.shared.data.write();
        if data.version != self.base_version {
            return Err(GraphError::Conflict(format!(
                "graph changed from version {} to {} during the transaction",
                self.base_version, data.version
            )));
        }
        working.check_unique(&indexes)?;
        working.version = self.base_version + 1;
        *data = working;
        debug!(version = data.version, "memory graph commit");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct MemoryManagement<'g> {
    graph: &'g MemoryGraph,
    pending: Schema,
    new_keys: BTreeSet<String>,
    new_indexes: BTreeSet<String>,
}

impl MemoryManagement<'_> {
    fn index_mut(&mut self, name: &str) -> Result<&mut IndexState> {
        self.pending
            .indexes
            .get_mut(name)
            .ok_or_else(|| GraphError::Schema(format!("index {name} does not exist")))
    }
}

impl SchemaManagement for MemoryManagement<'_> {
    fn contains_vertex_label(&mut self, label: &str) -> Result<bool> {
        Ok(self.pending.vertex_labels.contains(label))
    }

    fn make_vertex_label(&mut self, label: &str) -> Result<()> {
        self.pending.vertex_labels.insert(label.to_string());
        Ok(())
    }

    fn contains_edge_label(&mut self, label: &str) -> Result<bool> {
        Ok(self.pending.edge_labels.contains(label))
    }

    fn make_edge_label(&mut self, label: &str) -> Result<()> {
        self.pending.edge_labels.insert(label.to_string());
        Ok(())
    }

    fn contains_property_key(&mut self, key: &str) -> Result<bool> {
        Ok(self.pending.keys.contains_key(key))
    }

    fn make_property_key(&mut self, key: &str, scalar: ScalarType) -> Result<()> {
        if self.pending.keys.contains_key(key) {
            return Err(GraphError::Schema(format!(
                "property key {key} is already defined"
            )));
        }
        self.pending.keys.insert(key.to_string(), scalar);
        self.new_keys.insert(key.to_string());
        Ok(())
    }

    fn contains_index(&mut self, name: &str) -> Result<bool> {
        Ok(self.pending.indexes.contains_key(name))
    }

    fn build_index(&mut self, spec: &IndexSpec) -> Result<()> {
        if self.pending.indexes.contains_key(&spec.name) {
            return Err(GraphError::Schema(format!(
                "index {} is already defined",
                spec.name
            )));
        }
        if !self.pending.keys.contains_key(&spec.key) {
            return Err(GraphError::Schema(format!(
                "index {} references undefined key {}",
                spec.name, spec.key
            )));
        }
        self.pending.indexes.insert(
            spec.name.clone(),
            IndexState {
                spec: spec.clone(),
                status: IndexStatus::Installed,
                installed_at: None,
            },
        );
        self.new_indexes.insert(spec.name.clone());
        Ok(())
    }

    fn index_status(&mut self, name: &str) -> Result<Option<IndexStatus>> {
        let delay = self.graph.shared.options.registration_delay;
        Ok(self
            .pending
            .indexes
            .get(name)
            .map(|s| s.effective_status(delay)))
    }

    fn update_index(&mut self, name: &str, action: SchemaAction) -> Result<()> {
        let delay = self.graph.shared.options.registration_delay;
        let state = self.index_mut(name)?;
        let current = state.effective_status(delay);
        let next = match (action, current) {
            (SchemaAction::Register, IndexStatus::Installed) => IndexStatus::Registered,
            (SchemaAction::Register, other) => other,
            (SchemaAction::Reindex, IndexStatus::Registered | IndexStatus::Enabled) => {
                IndexStatus::Enabled
            }
            (SchemaAction::Enable, IndexStatus::Registered | IndexStatus::Disabled) => {
                IndexStatus::Enabled
            }
            (SchemaAction::Enable, IndexStatus::Enabled) => IndexStatus::Enabled,
            (action, status) => {
                return Err(GraphError::Schema(format!(
                    "cannot apply {action:?} to index {name} in state {status:?}"
                )))
            }
        };
        state.status = next;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let now = Instant::now();
        for name in &self.new_indexes {
            let Some(state) = self.pending.indexes.get_mut(name) else {
                continue;
            };
            if state.status == IndexStatus::Installed {
                if self.new_keys.contains(&state.spec.key) {
                    state.status = IndexStatus::Enabled;
                } else {
                    state.installed_at = Some(now);
                }
            }
        }

        let mut schema = self.graph.shared.schema.lock();
        schema.vertex_labels.append(&mut self.pending.vertex_labels);
        schema.edge_labels.append(&mut self.pending.edge_labels);
        schema.keys.append(&mut self.pending.keys);
        schema.indexes.append(&mut self.pending.indexes);
        debug!(
            keys = self.new_keys.len(),
            indexes = self.new_indexes.len(),
            "memory graph schema commit"
        );
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Predicate;

    fn unique_guid_index() -> IndexSpec {
        IndexSpec {
            name: "by_guid".into(),
            element: ElementKind::Vertex,
            label: "Entity".into(),
            key: "guid".into(),
            kind: IndexKind::Composite { unique: true },
        }
    }

    #[test]
    fn uncommitted_writes_are_invisible() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().unwrap();
        let v = tx.add_vertex("Entity").unwrap();
        tx.set_property(Element::Vertex(v), "guid", "g1".into()).unwrap();
        assert!(tx.vertex(v).unwrap().is_some());
        assert_eq!(graph.vertex_count(), 0);
        tx.rollback().unwrap();
        assert_eq!(graph.vertex_count(), 0);
        assert_eq!(graph.version(), 0);
    }

    #[test]
    fn remove_vertex_detaches_edges() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().unwrap();
        let a = tx.add_vertex("Entity").unwrap();
        let b = tx.add_vertex("Entity").unwrap();
        let c = tx.add_vertex("Entity").unwrap();
        tx.add_edge("Relationship", a, b).unwrap();
        let keep = tx.add_edge("Relationship", b, c).unwrap();
        tx.commit().unwrap();

        let mut tx = graph.begin().unwrap();
        tx.remove_vertex(a).unwrap();
        let remaining = tx.edges(b, Direction::Both, None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep);
        tx.commit().unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn edges_respect_direction_and_label() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().unwrap();
        let a = tx.add_vertex("Entity").unwrap();
        let b = tx.add_vertex("Classification").unwrap();
        let c = tx.add_vertex("Entity").unwrap();
        tx.add_edge("Classifier", a, b).unwrap();
        tx.add_edge("Relationship", c, a).unwrap();
        assert_eq!(tx.edges(a, Direction::Out, None).unwrap().len(), 1);
        assert_eq!(tx.edges(a, Direction::In, None).unwrap().len(), 1);
        assert_eq!(
            tx.edges(a, Direction::Both, Some("Relationship"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn declared_key_types_are_enforced() {
        let graph = MemoryGraph::new();
        let mut mgmt = graph.management().unwrap();
        mgmt.make_property_key("count", ScalarType::Integer).unwrap();
        mgmt.commit().unwrap();

        let mut tx = graph.begin().unwrap();
        let v = tx.add_vertex("Entity").unwrap();
        let err = tx
            .set_property(Element::Vertex(v), "count", "many".into())
            .unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
    }

    #[test]
    fn unique_index_rejects_duplicates_on_commit() {
        let graph = MemoryGraph::new();
        let mut mgmt = graph.management().unwrap();
        mgmt.make_property_key("guid", ScalarType::String).unwrap();
        mgmt.build_index(&unique_guid_index()).unwrap();
        mgmt.commit().unwrap();

        let mut tx = graph.begin().unwrap();
        for _ in 0..2 {
            let v = tx.add_vertex("Entity").unwrap();
            tx.set_property(Element::Vertex(v), "guid", "same".into())
                .unwrap();
        }
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, GraphError::ConstraintViolation { .. }));
        assert_eq!(graph.vertex_count(), 0);
    }

    #[test]
    fn concurrent_writers_conflict() {
        let graph = MemoryGraph::new();
        let mut first = graph.begin().unwrap();
        let mut second = graph.begin().unwrap();
        first.add_vertex("Entity").unwrap();
        second.add_vertex("Entity").unwrap();
        first.commit().unwrap();
        assert!(matches!(
            second.commit().unwrap_err(),
            GraphError::Conflict(_)
        ));
    }

    #[test]
    fn index_on_new_key_is_enabled_at_commit() {
        let graph = MemoryGraph::new();
        let mut mgmt = graph.management().unwrap();
        mgmt.make_property_key("guid", ScalarType::String).unwrap();
        mgmt.build_index(&unique_guid_index()).unwrap();
        assert_eq!(
            mgmt.index_status("by_guid").unwrap(),
            Some(IndexStatus::Installed)
        );
        mgmt.commit().unwrap();

        let mut mgmt = graph.management().unwrap();
        assert_eq!(
            mgmt.index_status("by_guid").unwrap(),
            Some(IndexStatus::Enabled)
        );
    }

    #[test]
    fn index_on_existing_key_needs_reindex() {
        let graph = MemoryGraph::new();
        let mut mgmt = graph.management().unwrap();
        mgmt.make_property_key("guid", ScalarType::String).unwrap();
        mgmt.commit().unwrap();

        let mut mgmt = graph.management().unwrap();
        mgmt.build_index(&unique_guid_index()).unwrap();
        assert!(mgmt.update_index("by_guid", SchemaAction::Reindex).is_err());
        mgmt.commit().unwrap();

        let mut mgmt = graph.management().unwrap();
        assert_eq!(
            mgmt.index_status("by_guid").unwrap(),
            Some(IndexStatus::Registered)
        );
        mgmt.update_index("by_guid", SchemaAction::Reindex).unwrap();
        mgmt.commit().unwrap();

        let mut mgmt = graph.management().unwrap();
        assert_eq!(
            mgmt.index_status("by_guid").unwrap(),
            Some(IndexStatus::Enabled)
        );
    }

    #[test]
    fn registration_delay_holds_index_installed() {
        let graph = MemoryGraph::with_options(MemoryGraphOptions {
            registration_delay: Duration::from_secs(3600),
        });
        let mut mgmt = graph.management().unwrap();
        mgmt.make_property_key("guid", ScalarType::String).unwrap();
        mgmt.commit().unwrap();

        let mut mgmt = graph.management().unwrap();
        mgmt.build_index(&unique_guid_index()).unwrap();
        mgmt.commit().unwrap();

        let mut mgmt = graph.management().unwrap();
        assert_eq!(
            mgmt.index_status("by_guid").unwrap(),
            Some(IndexStatus::Installed)
        );
    }

    #[test]
    fn find_vertices_filters_by_label_and_predicate() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin().unwrap();
        for (label, name) in [("Entity", "alpha"), ("Entity", "beta"), ("Classification", "alpha")] {
            let v = tx.add_vertex(label).unwrap();
            tx.set_property(Element::Vertex(v), "name", name.into()).unwrap();
        }
        tx.commit().unwrap();

        let mut tx = graph.begin().unwrap();
        let found = tx
            .find_vertices("Entity", &Filter::has("name", Predicate::Regex("al.*".into())))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("name"), Some("alpha"));
    }
}
