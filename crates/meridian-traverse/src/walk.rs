//! One traversal step: the admissible edges out of a vertex and the vertices they reach.

use std::collections::HashMap;

use meridian_core::{EntityDetail, InstanceStatus, Relationship, TypeRegistry};
use meridian_graph::{Direction, EdgeRecord, ElementId, GraphTransaction, VertexRecord};
use meridian_store::keys::{self, Prefix};
use meridian_store::mapper::classification_name;
use meridian_store::{ElementMapper, Result, StoreError};

/// Filters applied to every edge and every vertex past the starting one.
#[derive(Debug, Default)]
pub struct StepFilter<'a> {
    pub entity_types: Option<&'a [String]>,
    pub relationship_types: Option<&'a [String]>,
    pub statuses: Option<&'a [InstanceStatus]>,
    pub classifications: Option<&'a [String]>,
}

impl StepFilter<'_> {
    fn status_allowed(&self, status: InstanceStatus) -> bool {
        match self.statuses {
            Some(allowed) => allowed.contains(&status),
            None => status != InstanceStatus::Deleted,
        }
    }

    fn admits_edge(&self, registry: &dyn TypeRegistry, edge: &EdgeRecord) -> bool {
        let type_name = edge
            .get_str(&Prefix::Relationship.key(keys::TYPE_NAME))
            .unwrap_or_default();
        let status = edge
            .get_i64(&Prefix::Relationship.key(keys::STATUS))
            .map_or(InstanceStatus::Unknown, InstanceStatus::from_ordinal);
        type_allowed(registry, self.relationship_types, type_name) && self.status_allowed(status)
    }

    fn admits_vertex(
        &self,
        registry: &dyn TypeRegistry,
        tx: &mut dyn GraphTransaction,
        mapper: &ElementMapper,
        vertex: &VertexRecord,
    ) -> Result<bool> {
        let type_name = vertex
            .get_str(&Prefix::Entity.key(keys::TYPE_NAME))
            .unwrap_or_default();
        let status = vertex
            .get_i64(&Prefix::Entity.key(keys::STATUS))
            .map_or(InstanceStatus::Unknown, InstanceStatus::from_ordinal);
        if !type_allowed(registry, self.entity_types, type_name) || !self.status_allowed(status) {
            return Ok(false);
        }
        let Some(wanted) = self.classifications else {
            return Ok(true);
        };
        Ok(mapper
            .attached_classifications(tx, vertex.id)?
            .iter()
            .filter_map(|(classification, _)| classification_name(classification))
            .any(|name| wanted.contains(&name)))
    }
}

fn type_allowed(registry: &dyn TypeRegistry, allowed: Option<&[String]>, type_name: &str) -> bool {
    allowed.map_or(true, |names| {
        names.iter().any(|name| registry.is_type_of(type_name, name))
    })
}

/// Reads the graph on behalf of one traversal, remembering vertices already fetched.
pub struct Walker<'t> {
    tx: &'t mut dyn GraphTransaction,
    mapper: &'t ElementMapper,
    registry: &'t dyn TypeRegistry,
    filter: StepFilter<'t>,
    vertices: HashMap<ElementId, VertexRecord>,
    admitted: HashMap<ElementId, bool>,
}

impl<'t> Walker<'t> {
    pub fn new(
        tx: &'t mut dyn GraphTransaction,
        mapper: &'t ElementMapper,
        registry: &'t dyn TypeRegistry,
        filter: StepFilter<'t>,
    ) -> Self {
        Self {
            tx,
            mapper,
            registry,
            filter,
            vertices: HashMap::new(),
            admitted: HashMap::new(),
        }
    }

    pub fn relationship(&mut self, edge: &EdgeRecord) -> Result<Relationship> {
        self.mapper.read_relationship(&mut *self.tx, edge)
    }

    pub fn entity_detail(&mut self, vertex: &VertexRecord) -> Result<EntityDetail> {
        self.mapper.read_entity_detail(&mut *self.tx, vertex)
    }

    pub fn vertex(&mut self, id: ElementId) -> Result<VertexRecord> {
        if let Some(vertex) = self.vertices.get(&id) {
            return Ok(vertex.clone());
        }
        let vertex = self.tx.vertex(id)?.ok_or_else(|| StoreError::Mapping {
            guid: id.to_string(),
            method: "traverse",
            reason: "edge end vertex is missing".to_string(),
        })?;
        self.vertices.insert(id, vertex.clone());
        Ok(vertex)
    }

    /// Admissible relationship edges of `vertex` paired with the vertex at their far end.
    pub fn step(&mut self, vertex: ElementId) -> Result<Vec<(EdgeRecord, ElementId)>> {
        let mut out = Vec::new();
        for edge in self
            .tx
            .edges(vertex, Direction::Both, Some(keys::RELATIONSHIP_LABEL))?
        {
            if !self.filter.admits_edge(self.registry, &edge) {
                continue;
            }
            let far = edge.other_end(vertex);
            if self.admits(far)? {
                out.push((edge, far));
            }
        }
        out.sort_by_key(|(edge, _)| edge.id);
        out.dedup_by_key(|(edge, _)| edge.id);
        Ok(out)
    }

    fn admits(&mut self, id: ElementId) -> Result<bool> {
        if let Some(admitted) = self.admitted.get(&id) {
            return Ok(*admitted);
        }
        let vertex = self.vertex(id)?;
        let admitted = self
            .filter
            .admits_vertex(self.registry, &mut *self.tx, self.mapper, &vertex)?;
        self.admitted.insert(id, admitted);
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{SimpleTypeRegistry, TypeDef, TypeDefCategory};

    #[test]
    fn type_filter_includes_subtypes() {
        let registry = SimpleTypeRegistry::with_types([
            TypeDef::new("t1", "Asset", TypeDefCategory::Entity),
            TypeDef::new("t2", "DataSet", TypeDefCategory::Entity).with_super_type("Asset"),
        ]);
        let allowed = vec!["Asset".to_string()];
        assert!(type_allowed(&registry, Some(&allowed), "DataSet"));
        assert!(type_allowed(&registry, None, "Anything"));
        let narrow = vec!["DataSet".to_string()];
        assert!(!type_allowed(&registry, Some(&narrow), "Asset"));
    }

    #[test]
    fn deleted_needs_an_explicit_status() {
        let default = StepFilter::default();
        assert!(!default.status_allowed(InstanceStatus::Deleted));
        assert!(default.status_allowed(InstanceStatus::Active));

        let deleted = [InstanceStatus::Deleted];
        let explicit = StepFilter {
            statuses: Some(&deleted),
            ..StepFilter::default()
        };
        assert!(explicit.status_allowed(InstanceStatus::Deleted));
        assert!(!explicit.status_allowed(InstanceStatus::Active));
    }
}
