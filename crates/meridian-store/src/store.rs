//! The metadata store: transactional CRUD over entities, proxies and relationships.
//!
//! Every operation runs inside the store's single critical section and one
//! backend transaction. A failure rolls the transaction back before the error
//! is returned, so callers never observe a partial write.

use std::collections::BTreeSet;
use std::sync::Arc;

use meridian_core::config::MeridianConfig;
use meridian_core::events::AuditSink;
use meridian_core::{
    Classification, EntityDetail, EntityProxy, InstanceStatus, Relationship, TypeRegistry,
};
use meridian_graph::{Direction, GraphBackend, GraphTransaction, VertexRecord};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::index::{ControlRecord, IndexManager};
use crate::keys::{self, Prefix};
use crate::mapper::{find_entity_vertex, find_relationship_edge, is_proxy, ElementMapper};
use crate::planner::QueryPlanner;

/// Graph-backed store for one metadata collection.
pub struct MetadataStore {
    backend: Arc<dyn GraphBackend>,
    registry: Arc<dyn TypeRegistry>,
    pub(crate) mapper: ElementMapper,
    pub(crate) indexes: IndexManager,
    pub(crate) planner: QueryPlanner,
    local_collection_id: String,
    control: ControlRecord,
    lock: Mutex<()>,
}

impl MetadataStore {
    /// Open the store for the configured collection, bootstrapping it on first use.
    pub fn open(
        backend: Arc<dyn GraphBackend>,
        registry: Arc<dyn TypeRegistry>,
        config: &MeridianConfig,
        audit: &dyn AuditSink,
    ) -> Result<Self> {
        let collection = config.store.metadata_collection_id.trim();
        if collection.is_empty() {
            return Err(StoreError::InvalidParameter {
                parameter: "metadata_collection_id".to_string(),
                method: "open",
                reason: "must not be blank".to_string(),
            });
        }
        let indexes = IndexManager::new(backend.clone(), registry.clone(), config.index.clone());
        let name = config
            .store
            .metadata_collection_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let control = indexes.open(collection, name, audit)?;
        Ok(Self {
            mapper: ElementMapper::new(registry.clone()),
            planner: QueryPlanner::new(registry.clone()),
            backend,
            registry,
            indexes,
            local_collection_id: collection.to_string(),
            control,
            lock: Mutex::new(()),
        })
    }

    pub fn local_collection_id(&self) -> &str {
        &self.local_collection_id
    }

    /// Identity record read (or written) when the store was opened.
    pub fn control(&self) -> &ControlRecord {
        &self.control
    }

    pub fn registry(&self) -> &dyn TypeRegistry {
        self.registry.as_ref()
    }

    /// Create the indexes for a type's properties. Idempotent.
    pub fn register_type(&self, type_name: &str) -> Result<()> {
        self.indexes.register_type(type_name)
    }

    pub(crate) fn register_types<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            self.indexes.register_type(name)?;
        }
        Ok(())
    }

    fn register_entity_types(&self, type_name: &str, classifications: &[Classification]) -> Result<()> {
        self.register_types(
            std::iter::once(type_name).chain(classifications.iter().map(|c| c.header.type_name())),
        )
    }

    /// Run `op` in one transaction: commit on success, roll back on error.
    pub(crate) fn in_transaction<T>(
        &self,
        method: &'static str,
        op: impl FnOnce(&mut dyn GraphTransaction) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.lock.lock();
        let mut tx = self.backend.begin()?;
        match op(&mut *tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(method, error = %rollback, "Rollback failed");
                }
                debug!(method, error = %e, "Transaction rolled back");
                Err(e)
            }
        }
    }

    /// Run a read-only `op` under the store lock; the transaction is always rolled back.
    pub fn read<T>(
        &self,
        op: impl FnOnce(&mut dyn GraphTransaction, &ElementMapper) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.lock.lock();
        let mut tx = self.backend.begin()?;
        let result = op(&mut *tx, &self.mapper);
        if let Err(e) = tx.rollback() {
            warn!(error = %e, "Rollback of read transaction failed");
        }
        result
    }

    // ── Entities ──────────────────────────────────────────────────

    /// Store a new entity. A proxy owned by another collection is promoted in place.
    pub fn create_entity(&self, detail: &EntityDetail) -> Result<()> {
        self.store_entity_detail("create_entity", detail)
    }

    /// Store a reference copy of an entity homed in another collection.
    ///
    /// Follows the same rules as [`create_entity`](Self::create_entity).
    pub fn save_entity_reference_copy(&self, detail: &EntityDetail) -> Result<()> {
        if detail.header.metadata_collection_id == self.local_collection_id {
            return Err(StoreError::InvalidParameter {
                parameter: "metadataCollectionId".to_string(),
                method: "save_entity_reference_copy",
                reason: format!(
                    "{} is the local collection; reference copies are homed elsewhere",
                    self.local_collection_id
                ),
            });
        }
        self.store_entity_detail("save_entity_reference_copy", detail)
    }

    fn store_entity_detail(&self, method: &'static str, detail: &EntityDetail) -> Result<()> {
        self.mapper.validate_entity_detail(detail)?;
        self.register_entity_types(detail.type_name(), &detail.classifications)?;
        self.in_transaction(method, |tx| {
            let guid = detail.guid.as_str();
            let vertex = match find_entity_vertex(tx, guid)? {
                None => {
                    let id = tx.add_vertex(keys::ENTITY_LABEL)?;
                    self.mapper.write_entity_detail(tx, id, detail, None)?;
                    id
                }
                Some(existing)
                    if is_proxy(&existing)
                        && stored_collection(&existing) != self.local_collection_id =>
                {
                    info!(guid = %guid, owner = %stored_collection(&existing), "Promoting entity proxy to detail");
                    self.mapper
                        .write_entity_detail(tx, existing.id, detail, Some(&existing.properties))?;
                    existing.id
                }
                Some(_) => {
                    return Err(StoreError::AlreadyExists {
                        guid: guid.to_string(),
                    })
                }
            };
            self.reconcile_classifications(tx, vertex, guid, &detail.classifications)?;
            debug!(guid = %guid, type_name = %detail.type_name(), method, "Stored entity");
            Ok(())
        })
    }

    /// Store a proxy for an entity not held locally.
    pub fn create_entity_proxy(&self, proxy: &EntityProxy) -> Result<()> {
        self.mapper.validate_entity_proxy(proxy)?;
        self.register_entity_types(proxy.type_name(), &proxy.classifications)?;
        self.in_transaction("create_entity_proxy", |tx| {
            if find_entity_vertex(tx, &proxy.guid)?.is_some() {
                return Err(StoreError::AlreadyExists {
                    guid: proxy.guid.clone(),
                });
            }
            let id = tx.add_vertex(keys::ENTITY_LABEL)?;
            self.mapper.write_entity_proxy(tx, id, proxy, None)?;
            self.reconcile_classifications(tx, id, &proxy.guid, &proxy.classifications)?;
            debug!(guid = %proxy.guid, type_name = %proxy.type_name(), "Stored entity proxy");
            Ok(())
        })
    }

    /// Replace a stored entity detail. Without one this commits nothing.
    pub fn update_entity(&self, detail: &EntityDetail) -> Result<()> {
        self.mapper.validate_entity_detail(detail)?;
        self.register_entity_types(detail.type_name(), &detail.classifications)?;
        self.in_transaction("update_entity", |tx| {
            match find_entity_vertex(tx, &detail.guid)? {
                Some(existing) if !is_proxy(&existing) => {
                    self.mapper
                        .write_entity_detail(tx, existing.id, detail, Some(&existing.properties))?;
                    self.reconcile_classifications(
                        tx,
                        existing.id,
                        &detail.guid,
                        &detail.classifications,
                    )?;
                    debug!(guid = %detail.guid, "Updated entity");
                }
                _ => debug!(guid = %detail.guid, "No entity detail to update"),
            }
            Ok(())
        })
    }

    /// Replace a stored entity proxy. Without one this commits nothing.
    pub fn update_entity_proxy(&self, proxy: &EntityProxy) -> Result<()> {
        self.mapper.validate_entity_proxy(proxy)?;
        self.register_entity_types(proxy.type_name(), &proxy.classifications)?;
        self.in_transaction("update_entity_proxy", |tx| {
            match find_entity_vertex(tx, &proxy.guid)? {
                Some(existing) if is_proxy(&existing) => {
                    self.mapper
                        .write_entity_proxy(tx, existing.id, proxy, Some(&existing.properties))?;
                    self.reconcile_classifications(
                        tx,
                        existing.id,
                        &proxy.guid,
                        &proxy.classifications,
                    )?;
                    debug!(guid = %proxy.guid, "Updated entity proxy");
                }
                _ => debug!(guid = %proxy.guid, "No entity proxy to update"),
            }
            Ok(())
        })
    }

    /// Delete an entity detail with its classifications and relationships.
    pub fn remove_entity(&self, guid: &str) -> Result<()> {
        self.remove_entity_vertex("remove_entity", guid, false)
    }

    /// Delete an entity proxy with its classifications and relationships.
    pub fn remove_entity_proxy(&self, guid: &str) -> Result<()> {
        self.remove_entity_vertex("remove_entity_proxy", guid, true)
    }

    fn remove_entity_vertex(&self, method: &'static str, guid: &str, proxy: bool) -> Result<()> {
        self.in_transaction(method, |tx| {
            match find_entity_vertex(tx, guid)? {
                Some(vertex) if is_proxy(&vertex) == proxy => {
                    for (classification, _edge) in self.mapper.attached_classifications(tx, vertex.id)? {
                        tx.remove_vertex(classification.id)?;
                    }
                    tx.remove_vertex(vertex.id)?;
                    debug!(guid = %guid, method, "Removed entity");
                }
                Some(_) => debug!(guid = %guid, method, "Entity kind differs; nothing removed"),
                None => debug!(guid = %guid, method, "No entity to remove"),
            }
            Ok(())
        })
    }

    pub fn get_entity_detail(&self, guid: &str) -> Result<EntityDetail> {
        self.read(|tx, mapper| {
            let vertex = find_entity_vertex(tx, guid)?.ok_or_else(|| StoreError::EntityNotKnown {
                guid: guid.to_string(),
            })?;
            mapper.read_entity_detail(tx, &vertex)
        })
    }

    /// The proxy view of any stored entity, detail or proxy.
    pub fn get_entity_proxy(&self, guid: &str) -> Result<EntityProxy> {
        self.read(|tx, mapper| {
            let vertex = find_entity_vertex(tx, guid)?.ok_or_else(|| StoreError::EntityNotKnown {
                guid: guid.to_string(),
            })?;
            mapper.read_entity_proxy(tx, &vertex)
        })
    }

    /// The entity detail, or `None` when absent or held only as a proxy.
    pub fn is_entity_known(&self, guid: &str) -> Result<Option<EntityDetail>> {
        self.read(|tx, mapper| match find_entity_vertex(tx, guid)? {
            Some(vertex) if !is_proxy(&vertex) => mapper.read_entity_detail(tx, &vertex).map(Some),
            _ => Ok(None),
        })
    }

    // ── Relationships ─────────────────────────────────────────────

    /// Store a relationship between two stored entities (details or proxies).
    pub fn create_relationship(&self, relationship: &Relationship) -> Result<()> {
        self.mapper.validate_relationship(relationship)?;
        self.register_type(relationship.type_name())?;
        self.in_transaction("create_relationship", |tx| {
            let guid = relationship.guid.as_str();
            if find_relationship_edge(tx, guid)?.is_some() {
                return Err(StoreError::AlreadyExists {
                    guid: guid.to_string(),
                });
            }
            let mut ends = Vec::with_capacity(2);
            for end in [&relationship.entity_one, &relationship.entity_two] {
                let vertex = find_entity_vertex(tx, &end.guid)?.ok_or_else(|| {
                    StoreError::RelationshipNotCreated {
                        guid: guid.to_string(),
                        missing_end: end.guid.clone(),
                    }
                })?;
                ends.push(vertex.id);
            }
            let edge = tx.add_edge(keys::RELATIONSHIP_LABEL, ends[0], ends[1])?;
            self.mapper.write_relationship(tx, edge, relationship, None)?;
            debug!(guid = %guid, type_name = %relationship.type_name(), "Stored relationship");
            Ok(())
        })
    }

    /// Replace a stored relationship's header and properties. Ends are not moved.
    pub fn update_relationship(&self, relationship: &Relationship) -> Result<()> {
        self.mapper.validate_relationship(relationship)?;
        self.register_type(relationship.type_name())?;
        self.in_transaction("update_relationship", |tx| {
            match find_relationship_edge(tx, &relationship.guid)? {
                Some(edge) => {
                    self.mapper
                        .write_relationship(tx, edge.id, relationship, Some(&edge.properties))?;
                    debug!(guid = %relationship.guid, "Updated relationship");
                }
                None => debug!(guid = %relationship.guid, "No relationship to update"),
            }
            Ok(())
        })
    }

    pub fn remove_relationship(&self, guid: &str) -> Result<()> {
        self.in_transaction("remove_relationship", |tx| {
            match find_relationship_edge(tx, guid)? {
                Some(edge) => {
                    tx.remove_edge(edge.id)?;
                    debug!(guid = %guid, "Removed relationship");
                }
                None => debug!(guid = %guid, "No relationship to remove"),
            }
            Ok(())
        })
    }

    pub fn get_relationship(&self, guid: &str) -> Result<Relationship> {
        self.read(|tx, mapper| {
            let edge = find_relationship_edge(tx, guid)?.ok_or_else(|| {
                StoreError::RelationshipNotKnown {
                    guid: guid.to_string(),
                }
            })?;
            mapper.read_relationship(tx, &edge)
        })
    }

    pub fn is_relationship_known(&self, guid: &str) -> Result<Option<Relationship>> {
        self.read(|tx, mapper| match find_relationship_edge(tx, guid)? {
            Some(edge) => mapper.read_relationship(tx, &edge).map(Some),
            None => Ok(None),
        })
    }

    /// Relationships attached to an entity, ordered by guid.
    ///
    /// `relationship_type` includes its subtypes; `statuses` of `None` keeps every status.
    pub fn get_relationships_for_entity(
        &self,
        guid: &str,
        relationship_type: Option<&str>,
        statuses: Option<&[InstanceStatus]>,
    ) -> Result<Vec<Relationship>> {
        let type_key = Prefix::Relationship.key(keys::TYPE_NAME);
        let status_key = Prefix::Relationship.key(keys::STATUS);
        self.read(|tx, mapper| {
            let vertex = find_entity_vertex(tx, guid)?.ok_or_else(|| StoreError::EntityNotKnown {
                guid: guid.to_string(),
            })?;
            let mut seen = BTreeSet::new();
            let mut out = Vec::new();
            for edge in tx.edges(vertex.id, Direction::Both, Some(keys::RELATIONSHIP_LABEL))? {
                if !seen.insert(edge.id) {
                    continue;
                }
                if let Some(wanted) = relationship_type {
                    let stored = edge.get_str(&type_key).unwrap_or_default();
                    if !self.registry.is_type_of(stored, wanted) {
                        continue;
                    }
                }
                if let Some(statuses) = statuses {
                    let status = InstanceStatus::from_ordinal(edge.get_i64(&status_key).unwrap_or(0));
                    if !statuses.contains(&status) {
                        continue;
                    }
                }
                out.push(mapper.read_relationship(tx, &edge)?);
            }
            out.sort_by(|a, b| a.guid.cmp(&b.guid));
            Ok(out)
        })
    }
}

fn stored_collection(vertex: &VertexRecord) -> &str {
    vertex
        .get_str(&Prefix::Entity.key(keys::METADATA_COLLECTION_ID))
        .unwrap_or_default()
}
