use meridian_core::Relationship;
use meridian_graph::{EdgeRecord, Element, ElementId, GraphTransaction, PropertyMap};

use super::ElementMapper;
use crate::error::{Result, StoreError};
use crate::keys::{self, Prefix};

impl ElementMapper {
    pub fn validate_relationship(&self, relationship: &Relationship) -> Result<()> {
        let guid = relationship.guid.as_str();
        self.validate_header(&relationship.header, Some(guid), guid)?;
        self.validate_properties(&relationship.properties, guid)?;
        let ends = [
            ("entity_one", &relationship.entity_one),
            ("entity_two", &relationship.entity_two),
        ];
        for (end, proxy) in ends {
            if proxy.guid.trim().is_empty() {
                return Err(StoreError::PropertyError {
                    property: format!("{end}.{}", keys::GUID),
                    instance: guid.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn write_relationship(
        &self,
        tx: &mut dyn GraphTransaction,
        edge: ElementId,
        relationship: &Relationship,
        existing: Option<&PropertyMap>,
    ) -> Result<()> {
        let element = Element::Edge(edge);
        let prefix = Prefix::Relationship;
        let guid = relationship.guid.as_str();
        tx.set_property(element, &prefix.key(keys::GUID), guid.into())?;
        self.write_header(tx, element, prefix, &relationship.header, guid)?;
        self.write_properties(
            tx,
            element,
            prefix,
            relationship.type_name(),
            &relationship.properties,
            existing,
            guid,
        )
    }

    /// Materialize a relationship; both ends come back as proxies.
    pub fn read_relationship(
        &self,
        tx: &mut dyn GraphTransaction,
        edge: &EdgeRecord,
    ) -> Result<Relationship> {
        let method = "read_relationship";
        let prefix = Prefix::Relationship;
        let guid = edge
            .get_str(&prefix.key(keys::GUID))
            .map(str::to_string)
            .ok_or_else(|| StoreError::mapping(&edge.id.to_string(), method, "edge has no guid"))?;

        let mut ends = Vec::with_capacity(2);
        for id in [edge.out_vertex, edge.in_vertex] {
            let vertex = tx.vertex(id)?.ok_or_else(|| {
                StoreError::mapping(&guid, method, format!("end vertex {id} is missing"))
            })?;
            ends.push(self.read_entity_proxy(tx, &vertex)?);
        }
        let entity_two = ends.pop();
        let entity_one = ends.pop();
        let (Some(entity_one), Some(entity_two)) = (entity_one, entity_two) else {
            return Err(StoreError::mapping(&guid, method, "relationship ends incomplete"));
        };

        let props = &edge.properties;
        Ok(Relationship {
            header: self.read_header(props, prefix, &guid, method)?,
            properties: self.read_properties(props, prefix, &guid, method)?,
            entity_one,
            entity_two,
            guid,
        })
    }
}
