//! Classification reconciliation.
//!
//! An entity's classifications are converged to a desired set: attached
//! names missing from the set are deleted, names in both are rewritten on
//! their existing vertex, and new names get a vertex plus a Classifier edge.
//! Leaving a name out of the desired set is the only way one is removed; the
//! single-classification operations below build the desired set and go
//! through the same path.

use std::collections::BTreeMap;

use meridian_core::Classification;
use meridian_graph::{ElementId, GraphTransaction, VertexRecord};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::mapper::{classification_name, find_entity_vertex};
use crate::store::MetadataStore;

impl MetadataStore {
    pub(crate) fn reconcile_classifications(
        &self,
        tx: &mut dyn GraphTransaction,
        entity: ElementId,
        guid: &str,
        desired: &[Classification],
    ) -> Result<()> {
        let mut existing: BTreeMap<String, VertexRecord> = BTreeMap::new();
        for (vertex, _edge) in self.mapper.attached_classifications(tx, entity)? {
            match classification_name(&vertex) {
                Some(name) => {
                    existing.insert(name, vertex);
                }
                None => {
                    warn!(guid = %guid, vertex = %vertex.id, "Removing unnamed classification vertex");
                    tx.remove_vertex(vertex.id)?;
                }
            }
        }

        let wanted: BTreeMap<&str, &Classification> =
            desired.iter().map(|c| (c.name.as_str(), c)).collect();

        for (name, vertex) in &existing {
            if !wanted.contains_key(name.as_str()) {
                tx.remove_vertex(vertex.id)?;
                debug!(guid = %guid, classification = %name, "Declassified");
            }
        }

        for (name, classification) in wanted {
            match existing.get(name) {
                Some(vertex) => {
                    self.mapper.write_classification(
                        tx,
                        vertex.id,
                        classification,
                        Some(&vertex.properties),
                    )?;
                }
                None => {
                    let vertex = tx.add_vertex(keys::CLASSIFICATION_LABEL)?;
                    self.mapper
                        .write_classification(tx, vertex, classification, None)?;
                    tx.add_edge(keys::CLASSIFIER_LABEL, entity, vertex)?;
                    debug!(guid = %guid, classification = %name, "Classified");
                }
            }
        }
        Ok(())
    }

    /// Attach a new classification to a stored entity.
    pub fn classify_entity(
        &self,
        guid: &str,
        classification: &Classification,
    ) -> Result<Vec<Classification>> {
        self.change_classifications("classify_entity", guid, classification, |current| {
            if current.iter().any(|c| c.name == classification.name) {
                return Err(StoreError::AlreadyExists {
                    guid: format!("{guid}/{}", classification.name),
                });
            }
            current.push(classification.clone());
            Ok(())
        })
    }

    /// Replace an attached classification's header and properties.
    pub fn update_entity_classification(
        &self,
        guid: &str,
        classification: &Classification,
    ) -> Result<Vec<Classification>> {
        self.change_classifications(
            "update_entity_classification",
            guid,
            classification,
            |current| match current.iter_mut().find(|c| c.name == classification.name) {
                Some(slot) => {
                    *slot = classification.clone();
                    Ok(())
                }
                None => Err(StoreError::ClassificationNotKnown {
                    guid: guid.to_string(),
                    name: classification.name.clone(),
                }),
            },
        )
    }

    /// Detach a classification by name.
    pub fn declassify_entity(&self, guid: &str, name: &str) -> Result<Vec<Classification>> {
        self.in_transaction("declassify_entity", |tx| {
            let (entity, mut current) = self.current_classifications(tx, guid)?;
            let before = current.len();
            current.retain(|c| c.name != name);
            if current.len() == before {
                return Err(StoreError::ClassificationNotKnown {
                    guid: guid.to_string(),
                    name: name.to_string(),
                });
            }
            self.reconcile_classifications(tx, entity, guid, &current)?;
            Ok(current)
        })
    }

    /// Classifications attached to a stored entity, detail or proxy, ordered by name.
    pub fn get_entity_classifications(&self, guid: &str) -> Result<Vec<Classification>> {
        self.read(|tx, mapper| {
            let vertex = find_entity_vertex(tx, guid)?.ok_or_else(|| StoreError::EntityNotKnown {
                guid: guid.to_string(),
            })?;
            mapper.read_classifications(tx, vertex.id)
        })
    }

    fn change_classifications(
        &self,
        method: &'static str,
        guid: &str,
        classification: &Classification,
        change: impl FnOnce(&mut Vec<Classification>) -> Result<()>,
    ) -> Result<Vec<Classification>> {
        self.mapper.validate_classification(classification, guid)?;
        self.register_type(classification.header.type_name())?;
        self.in_transaction(method, |tx| {
            let (entity, mut current) = self.current_classifications(tx, guid)?;
            change(&mut current)?;
            self.reconcile_classifications(tx, entity, guid, &current)?;
            current.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(current)
        })
    }

    fn current_classifications(
        &self,
        tx: &mut dyn GraphTransaction,
        guid: &str,
    ) -> Result<(ElementId, Vec<Classification>)> {
        let vertex = find_entity_vertex(tx, guid)?.ok_or_else(|| StoreError::EntityNotKnown {
            guid: guid.to_string(),
        })?;
        let current = self.mapper.read_classifications(tx, vertex.id)?;
        Ok((vertex.id, current))
    }
}
