use meridian_core::{Classification, ClassificationOrigin};
use meridian_graph::{Element, ElementId, GraphTransaction, PropertyMap, Value, VertexRecord};

use super::{set_or_remove, ElementMapper};
use crate::error::{Result, StoreError};
use crate::keys::{self, Prefix};

impl ElementMapper {
    /// A classification needs a non-blank name besides the usual header fields.
    pub fn validate_classification(
        &self,
        classification: &Classification,
        entity: &str,
    ) -> Result<()> {
        let instance = format!("{entity}/{}", classification.name);
        if classification.name.trim().is_empty() {
            return Err(StoreError::PropertyError {
                property: keys::CLASSIFICATION_NAME.to_string(),
                instance,
            });
        }
        self.validate_header(&classification.header, None, &instance)?;
        self.validate_properties(&classification.properties, &instance)
    }

    pub fn write_classification(
        &self,
        tx: &mut dyn GraphTransaction,
        vertex: ElementId,
        classification: &Classification,
        existing: Option<&PropertyMap>,
    ) -> Result<()> {
        let element = Element::Vertex(vertex);
        let prefix = Prefix::Classification;
        let name = classification.name.as_str();
        tx.set_property(element, &prefix.key(keys::CLASSIFICATION_NAME), name.into())?;
        tx.set_property(
            element,
            &prefix.key(keys::ORIGIN),
            Value::Int(classification.origin.ordinal()),
        )?;
        set_or_remove(
            tx,
            element,
            &prefix.key(keys::ORIGIN_GUID),
            classification.origin_guid.as_deref().map(Value::from),
        )?;
        self.write_header(tx, element, prefix, &classification.header, name)?;
        self.write_properties(
            tx,
            element,
            prefix,
            classification.header.type_name(),
            &classification.properties,
            existing,
            name,
        )
    }

    pub fn read_classification(&self, vertex: &VertexRecord) -> Result<Classification> {
        let method = "read_classification";
        let prefix = Prefix::Classification;
        let name = classification_name(vertex).ok_or_else(|| {
            StoreError::mapping(&vertex.id.to_string(), method, "classification has no name")
        })?;
        let props = &vertex.properties;
        Ok(Classification {
            header: self.read_header(props, prefix, &name, method)?,
            properties: self.read_properties(props, prefix, &name, method)?,
            origin: ClassificationOrigin::from_ordinal(
                vertex.get_i64(&prefix.key(keys::ORIGIN)).unwrap_or(0),
            ),
            origin_guid: vertex
                .get_str(&prefix.key(keys::ORIGIN_GUID))
                .map(str::to_string),
            name,
        })
    }
}

/// The stored name of a classification vertex.
pub fn classification_name(vertex: &VertexRecord) -> Option<String> {
    vertex
        .get_str(&Prefix::Classification.key(keys::CLASSIFICATION_NAME))
        .map(str::to_string)
}
