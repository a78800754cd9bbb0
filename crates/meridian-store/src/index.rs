//! Schema bootstrap, store identity and the index lifecycle.
//!
//! Index creation is idempotent and resumable: an index that exists but is
//! not yet enabled is driven forward (await REGISTERED, REINDEX, await
//! ENABLED) instead of being rebuilt. Waits poll a fresh management
//! transaction each time and give up after `IndexConfig::wait_timeout_ms`.
//!
//! The management transaction that builds an index commits before the wait
//! begins, so a timeout does not roll the index back. It stays INSTALLED or
//! REGISTERED, the type is not marked registered, and the next registration
//! of that type resumes the wait.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use meridian_core::config::IndexConfig;
use meridian_core::events::{AuditSink, EventPayload, StoreEvent};
use meridian_core::TypeRegistry;
use meridian_graph::{
    Element, ElementKind, Filter, GraphBackend, IndexKind, IndexMapping, IndexSpec, IndexStatus,
    ScalarType, SchemaAction, Value,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::keys::{self, Prefix};
use crate::mapper::ScalarBinding;
use crate::qualifier;

/// The identity record held on the control vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRecord {
    pub metadata_collection_id: String,
    pub metadata_collection_name: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub last_opened: Option<DateTime<Utc>>,
}

/// Owns the schema of one store.
pub struct IndexManager {
    backend: Arc<dyn GraphBackend>,
    registry: Arc<dyn TypeRegistry>,
    config: IndexConfig,
    registered_types: Mutex<HashSet<String>>,
    mappings: RwLock<HashMap<String, IndexMapping>>,
}

const VERTEX_LABELS: [&str; 3] = [
    keys::ENTITY_LABEL,
    keys::CLASSIFICATION_LABEL,
    keys::CONTROL_LABEL,
];
const EDGE_LABELS: [&str; 2] = [keys::RELATIONSHIP_LABEL, keys::CLASSIFIER_LABEL];

impl IndexManager {
    pub fn new(
        backend: Arc<dyn GraphBackend>,
        registry: Arc<dyn TypeRegistry>,
        config: IndexConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            config,
            registered_types: Mutex::new(HashSet::new()),
            mappings: RwLock::new(HashMap::new()),
        }
    }

    /// Validate store identity, bootstrapping the schema on first use.
    ///
    /// A configured collection name is recorded on the control vertex and
    /// replaces any name stored earlier.
    pub fn open(
        &self,
        metadata_collection_id: &str,
        metadata_collection_name: Option<&str>,
        audit: &dyn AuditSink,
    ) -> Result<ControlRecord> {
        let control_key = |field: &str| Prefix::Control.key(field);
        let mut tx = self.backend.begin()?;
        let existing = tx
            .find_vertices(keys::CONTROL_LABEL, &Filter::True)?
            .into_iter()
            .next();

        let Some(control) = existing else {
            tx.rollback()?;
            self.reconcile_schema()?;

            let now = stored_now();
            let mut tx = self.backend.begin()?;
            let id = tx.add_vertex(keys::CONTROL_LABEL)?;
            let element = Element::Vertex(id);
            tx.set_property(
                element,
                &control_key(keys::METADATA_COLLECTION_ID),
                metadata_collection_id.into(),
            )?;
            tx.set_property(element, &control_key(keys::CREATED), millis(now))?;
            tx.set_property(element, &control_key(keys::LAST_OPENED), millis(now))?;
            if let Some(name) = metadata_collection_name {
                tx.set_property(element, &control_key(keys::METADATA_COLLECTION_NAME), name.into())?;
            }
            tx.commit()?;

            info!(collection = %metadata_collection_id, backend = self.backend.name(), "Created metadata store");
            audit.emit(StoreEvent::new(
                metadata_collection_id,
                EventPayload::StoreCreated { created: now },
            ));
            return Ok(ControlRecord {
                metadata_collection_id: metadata_collection_id.to_string(),
                metadata_collection_name: metadata_collection_name.map(str::to_string),
                created: Some(now),
                last_opened: Some(now),
            });
        };

        let stored = control
            .get_str(&control_key(keys::METADATA_COLLECTION_ID))
            .unwrap_or_default()
            .to_string();
        if stored != metadata_collection_id {
            tx.rollback()?;
            audit.emit(StoreEvent::new(
                metadata_collection_id,
                EventPayload::IdentityMismatch {
                    stored_collection_id: stored.clone(),
                    requested_collection_id: metadata_collection_id.to_string(),
                },
            ));
            return Err(StoreError::IdentityMismatch {
                stored,
                requested: metadata_collection_id.to_string(),
            });
        }

        let created = control
            .get_i64(&control_key(keys::CREATED))
            .and_then(from_millis);
        let previous = control
            .get_i64(&control_key(keys::LAST_OPENED))
            .and_then(from_millis);
        let stored_name = control
            .get_str(&control_key(keys::METADATA_COLLECTION_NAME))
            .map(str::to_string);
        let now = stored_now();
        let element = Element::Vertex(control.id);
        tx.set_property(element, &control_key(keys::LAST_OPENED), millis(now))?;
        let name = match metadata_collection_name {
            Some(name) if stored_name.as_deref() != Some(name) => {
                debug!(collection = %metadata_collection_id, collection_name = name, "Recording collection name");
                tx.set_property(element, &control_key(keys::METADATA_COLLECTION_NAME), name.into())?;
                Some(name.to_string())
            }
            _ => stored_name,
        };
        tx.commit()?;

        self.reconcile_schema()?;
        info!(collection = %metadata_collection_id, backend = self.backend.name(), "Opened metadata store");
        audit.emit(StoreEvent::new(
            metadata_collection_id,
            EventPayload::StoreOpened {
                created,
                last_opened: previous,
            },
        ));
        Ok(ControlRecord {
            metadata_collection_id: stored,
            metadata_collection_name: name,
            created,
            last_opened: Some(now),
        })
    }

    /// Labels and baseline identity indexes. Safe to re-run.
    pub fn reconcile_schema(&self) -> Result<()> {
        let mut mgmt = self.backend.management()?;
        for label in VERTEX_LABELS {
            if !mgmt.contains_vertex_label(label)? {
                mgmt.make_vertex_label(label)?;
            }
        }
        for label in EDGE_LABELS {
            if !mgmt.contains_edge_label(label)? {
                mgmt.make_edge_label(label)?;
            }
        }
        mgmt.commit()?;

        for (prefix, field, kind) in baseline_indexes() {
            let spec = IndexSpec {
                name: index_name(prefix, &prefix.key(field)),
                element: prefix.element(),
                label: prefix.label().to_string(),
                key: prefix.key(field),
                kind,
            };
            self.ensure_index(&spec, ScalarType::String)?;
        }
        Ok(())
    }

    /// Create the mirror indexes of a type's primitive properties, once per type.
    pub fn register_type(&self, type_name: &str) -> Result<()> {
        if self.registered_types.lock().contains(type_name) {
            return Ok(());
        }
        let def = self
            .registry
            .type_def_by_name(type_name)
            .ok_or_else(|| StoreError::TypeNotKnown {
                name: type_name.to_string(),
            })?;
        let prefix = Prefix::for_category(def.category);
        let qualified = qualifier::qualified_property_names(self.registry.as_ref(), type_name)?;
        let attrs = qualifier::attribute_definitions(self.registry.as_ref(), type_name)?;

        for (short, name) in &qualified {
            let Some(category) = attrs.get(short).and_then(|a| a.primitive_category()) else {
                continue;
            };
            let key = prefix.mirror(name);
            let mapping = self.configured_mapping(short);
            let spec = IndexSpec {
                name: index_name(prefix, &key),
                element: prefix.element(),
                label: prefix.label().to_string(),
                key: key.clone(),
                kind: IndexKind::Mixed(mapping),
            };
            self.ensure_index(&spec, category.scalar_type())?;
            self.mappings.write().insert(key, mapping);
        }

        self.registered_types.lock().insert(type_name.to_string());
        debug!(type_name = %type_name, category = ?def.category, "Registered type indexes");
        Ok(())
    }

    /// How string values under a mirror key are analyzed.
    ///
    /// Keys not yet registered in this process fall back to the configured
    /// rule for their short name.
    pub fn mapping_for(&self, key: &str) -> IndexMapping {
        if let Some(mapping) = self.mappings.read().get(key) {
            return *mapping;
        }
        let short = key
            .rsplit(keys::QUALIFIER_SEPARATOR)
            .next()
            .unwrap_or(key);
        self.configured_mapping(short)
    }

    fn configured_mapping(&self, short_name: &str) -> IndexMapping {
        if self.config.text_properties.iter().any(|t| t == short_name) {
            IndexMapping::Text
        } else {
            IndexMapping::String
        }
    }

    /// Build `spec` if absent and drive it to ENABLED.
    pub fn ensure_index(&self, spec: &IndexSpec, scalar: ScalarType) -> Result<()> {
        let mut mgmt = self.backend.management()?;
        if mgmt.contains_index(&spec.name)? {
            let status = mgmt.index_status(&spec.name)?;
            mgmt.rollback()?;
            if status == Some(IndexStatus::Enabled) {
                return Ok(());
            }
            debug!(index = %spec.name, ?status, "Resuming index enablement");
            return self.await_enablement(&spec.name);
        }

        if !mgmt.contains_property_key(&spec.key)? {
            mgmt.make_property_key(&spec.key, scalar)?;
        }
        mgmt.build_index(spec)?;
        mgmt.commit()?;
        self.await_enablement(&spec.name)
    }

    fn await_enablement(&self, name: &str) -> Result<()> {
        let status = self.await_status(name, &[IndexStatus::Registered, IndexStatus::Enabled])?;
        if status == IndexStatus::Registered {
            let mut mgmt = self.backend.management()?;
            if let Err(e) = mgmt.update_index(name, SchemaAction::Reindex) {
                mgmt.rollback()?;
                return Err(StoreError::IndexNotReady {
                    index: name.to_string(),
                    reason: e.to_string(),
                });
            }
            mgmt.commit()?;
            self.await_status(name, &[IndexStatus::Enabled])?;
        }
        info!(index = %name, "Index enabled");
        Ok(())
    }

    fn await_status(&self, name: &str, targets: &[IndexStatus]) -> Result<IndexStatus> {
        let timeout = Duration::from_millis(self.config.wait_timeout_ms);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let deadline = Instant::now() + timeout;
        loop {
            let mut mgmt = self.backend.management()?;
            let status = mgmt.index_status(name)?;
            mgmt.rollback()?;

            match status {
                Some(s) if targets.contains(&s) => return Ok(s),
                Some(IndexStatus::Disabled) => {
                    return Err(StoreError::IndexNotReady {
                        index: name.to_string(),
                        reason: "index construction failed".to_string(),
                    })
                }
                None => {
                    return Err(StoreError::IndexNotReady {
                        index: name.to_string(),
                        reason: "index does not exist".to_string(),
                    })
                }
                Some(_) => {}
            }

            if Instant::now() >= deadline {
                warn!(index = %name, ?status, ?targets, "Timed out waiting on index status");
                return Err(StoreError::IndexNotReady {
                    index: name.to_string(),
                    reason: format!(
                        "still {status:?} after {}ms",
                        self.config.wait_timeout_ms
                    ),
                });
            }
            thread::sleep(poll);
        }
    }
}

fn baseline_indexes() -> Vec<(Prefix, &'static str, IndexKind)> {
    let unique = IndexKind::Composite { unique: true };
    let exact = IndexKind::Composite { unique: false };
    let text = IndexKind::Mixed(IndexMapping::Text);
    vec![
        (Prefix::Entity, keys::GUID, unique),
        (Prefix::Relationship, keys::GUID, unique),
        (Prefix::Entity, keys::TYPE_NAME, exact),
        (Prefix::Relationship, keys::TYPE_NAME, exact),
        (Prefix::Classification, keys::TYPE_NAME, exact),
        (Prefix::Classification, keys::CLASSIFICATION_NAME, exact),
        (Prefix::Entity, keys::MAINTAINED_BY, text),
        (Prefix::Relationship, keys::MAINTAINED_BY, text),
        (Prefix::Classification, keys::MAINTAINED_BY, text),
        (Prefix::Entity, keys::MAPPING_PROPERTIES, text),
        (Prefix::Relationship, keys::MAPPING_PROPERTIES, text),
        (Prefix::Classification, keys::MAPPING_PROPERTIES, text),
    ]
}

fn index_name(prefix: Prefix, key: &str) -> String {
    let element = match prefix.element() {
        ElementKind::Vertex => "v",
        ElementKind::Edge => "e",
    };
    format!("idx_{element}_{key}")
}

fn millis(time: DateTime<Utc>) -> Value {
    Value::Int(time.timestamp_millis())
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// The current time at the millisecond precision the control vertex keeps.
fn stored_now() -> DateTime<Utc> {
    let now = Utc::now();
    from_millis(now.timestamp_millis()).unwrap_or(now)
}
