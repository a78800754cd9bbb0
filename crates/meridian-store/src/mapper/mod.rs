//! Conversion between typed instances and graph elements.
//!
//! Every instance is written twice: the full property bag as a JSON blob,
//! which is the only thing read back, and each primitive property under its
//! qualified mirror key for indexed search. Writes are full replacements;
//! mirror keys no longer present in the bag are removed.

mod classification;
mod entity;
mod relationship;

pub use classification::classification_name;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use meridian_core::{
    InstanceAuditHeader, InstanceProperties, InstancePropertyValue, InstanceProvenanceType,
    InstanceStatus, PrimitiveDefCategory, PrimitiveValue, TypeRegistry,
};
use meridian_graph::{
    EdgeRecord, Element, Filter, GraphTransaction, PropertyMap, ScalarType, Value, VertexRecord,
};

use crate::error::{Result, StoreError};
use crate::keys::{self, Prefix};
use crate::qualifier;

/// Backend scalar type used to store a primitive category.
pub trait ScalarBinding {
    fn scalar_type(self) -> ScalarType;
}

impl ScalarBinding for PrimitiveDefCategory {
    fn scalar_type(self) -> ScalarType {
        match self {
            Self::Boolean => ScalarType::Boolean,
            Self::Byte | Self::Short | Self::Int => ScalarType::Integer,
            Self::Long => ScalarType::Long,
            Self::Float => ScalarType::Float,
            Self::Double => ScalarType::Double,
            Self::Date => ScalarType::Date,
            Self::Char | Self::String | Self::BigInteger | Self::BigDecimal => ScalarType::String,
        }
    }
}

/// The stored form of a primitive.
pub fn primitive_value(value: &PrimitiveValue) -> Value {
    match value {
        PrimitiveValue::Boolean(b) => Value::Bool(*b),
        PrimitiveValue::Byte(v) => Value::Int(i64::from(*v)),
        PrimitiveValue::Short(v) => Value::Int(i64::from(*v)),
        PrimitiveValue::Int(v) => Value::Int(i64::from(*v)),
        PrimitiveValue::Long(v) | PrimitiveValue::Date(v) => Value::Int(*v),
        PrimitiveValue::Float(v) => Value::Float(f64::from(*v)),
        PrimitiveValue::Double(v) => Value::Float(*v),
        PrimitiveValue::Char(c) => Value::Str(c.to_string()),
        PrimitiveValue::BigInteger(s) | PrimitiveValue::BigDecimal(s) | PrimitiveValue::String(s) => {
            Value::Str(s.clone())
        }
    }
}

/// Locate an entity vertex (detail or proxy) by guid.
pub fn find_entity_vertex(
    tx: &mut dyn GraphTransaction,
    guid: &str,
) -> Result<Option<VertexRecord>> {
    let filter = Filter::eq(Prefix::Entity.key(keys::GUID), guid);
    Ok(tx
        .find_vertices(keys::ENTITY_LABEL, &filter)?
        .into_iter()
        .next())
}

/// Locate a relationship edge by guid.
pub fn find_relationship_edge(
    tx: &mut dyn GraphTransaction,
    guid: &str,
) -> Result<Option<EdgeRecord>> {
    let filter = Filter::eq(Prefix::Relationship.key(keys::GUID), guid);
    Ok(tx
        .find_edges(keys::RELATIONSHIP_LABEL, &filter)?
        .into_iter()
        .next())
}

/// Whether an entity vertex carries only a proxy.
pub fn is_proxy(vertex: &VertexRecord) -> bool {
    vertex
        .get_bool(&Prefix::Entity.key(keys::IS_PROXY))
        .unwrap_or(false)
}

/// Maps instances onto graph elements using the registry's type definitions.
#[derive(Clone)]
pub struct ElementMapper {
    registry: Arc<dyn TypeRegistry>,
}

impl ElementMapper {
    pub fn new(registry: Arc<dyn TypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &dyn TypeRegistry {
        self.registry.as_ref()
    }

    /// Mandatory header fields must be present before anything is written.
    fn validate_header(
        &self,
        header: &InstanceAuditHeader,
        guid: Option<&str>,
        instance: &str,
    ) -> Result<()> {
        let missing = |property: &str| StoreError::PropertyError {
            property: property.to_string(),
            instance: instance.to_string(),
        };
        if guid.is_some_and(|g| g.trim().is_empty()) {
            return Err(missing(keys::GUID));
        }
        if header.type_name().trim().is_empty() {
            return Err(missing(keys::TYPE_NAME));
        }
        if header.metadata_collection_id.trim().is_empty() {
            return Err(missing(keys::METADATA_COLLECTION_ID));
        }
        Ok(())
    }

    /// Floating-point values must be finite; the blob encoding has no form for the rest.
    fn validate_properties(&self, props: &InstanceProperties, instance: &str) -> Result<()> {
        for (name, value) in props.iter() {
            if !is_finite(value) {
                return Err(StoreError::PropertyError {
                    property: name.clone(),
                    instance: instance.to_string(),
                });
            }
        }
        Ok(())
    }

    fn write_header(
        &self,
        tx: &mut dyn GraphTransaction,
        element: Element,
        prefix: Prefix,
        header: &InstanceAuditHeader,
        guid: &str,
    ) -> Result<()> {
        let method = "write_header";
        let maintained_by = serde_json::to_string(&header.maintained_by)
            .map_err(|e| StoreError::mapping(guid, method, e))?;
        let mapping_properties = serde_json::to_string(&header.mapping_properties)
            .map_err(|e| StoreError::mapping(guid, method, e))?;

        let fields: [(&str, Option<Value>); 15] = [
            (keys::TYPE_NAME, Some(header.type_name().into())),
            (
                keys::METADATA_COLLECTION_ID,
                Some(header.metadata_collection_id.as_str().into()),
            ),
            (
                keys::METADATA_COLLECTION_NAME,
                header.metadata_collection_name.as_deref().map(Value::from),
            ),
            (keys::VERSION, Some(Value::Int(header.version))),
            (keys::STATUS, Some(Value::Int(header.status.ordinal()))),
            (
                keys::STATUS_ON_DELETE,
                header.status_on_delete.map(|s| Value::Int(s.ordinal())),
            ),
            (
                keys::PROVENANCE,
                Some(Value::Int(header.provenance_type.ordinal())),
            ),
            (
                keys::REPLICATED_BY,
                header.replicated_by.as_deref().map(Value::from),
            ),
            (keys::CREATE_TIME, header.create_time.map(millis)),
            (keys::UPDATE_TIME, header.update_time.map(millis)),
            (keys::CREATED_BY, header.created_by.as_deref().map(Value::from)),
            (keys::UPDATED_BY, header.updated_by.as_deref().map(Value::from)),
            (keys::MAINTAINED_BY, Some(maintained_by.into())),
            (keys::MAPPING_PROPERTIES, Some(mapping_properties.into())),
            (
                keys::INSTANCE_LICENSE,
                header.instance_license.as_deref().map(Value::from),
            ),
        ];
        for (field, value) in fields {
            set_or_remove(tx, element, &prefix.key(field), value)?;
        }
        Ok(())
    }

    fn read_header(
        &self,
        props: &PropertyMap,
        prefix: Prefix,
        guid: &str,
        method: &'static str,
    ) -> Result<InstanceAuditHeader> {
        let get = |field: &str| props.get(&prefix.key(field));
        let get_str = |field: &str| get(field).and_then(Value::as_str).map(str::to_string);
        let get_i64 = |field: &str| get(field).and_then(Value::as_i64);

        let type_name = get_str(keys::TYPE_NAME)
            .ok_or_else(|| StoreError::mapping(guid, method, "stored element has no type name"))?;
        let instance_type = self.registry.instance_type(&type_name)?;

        let maintained_by = match get_str(keys::MAINTAINED_BY) {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| StoreError::mapping(guid, method, e))?
            }
            None => Vec::new(),
        };
        let mapping_properties = match get_str(keys::MAPPING_PROPERTIES) {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| StoreError::mapping(guid, method, e))?
            }
            None => Default::default(),
        };

        Ok(InstanceAuditHeader {
            instance_type,
            provenance_type: InstanceProvenanceType::from_ordinal(
                get_i64(keys::PROVENANCE).unwrap_or(0),
            ),
            metadata_collection_id: get_str(keys::METADATA_COLLECTION_ID).unwrap_or_default(),
            metadata_collection_name: get_str(keys::METADATA_COLLECTION_NAME),
            replicated_by: get_str(keys::REPLICATED_BY),
            instance_license: get_str(keys::INSTANCE_LICENSE),
            created_by: get_str(keys::CREATED_BY),
            updated_by: get_str(keys::UPDATED_BY),
            maintained_by,
            create_time: get_i64(keys::CREATE_TIME).and_then(from_millis),
            update_time: get_i64(keys::UPDATE_TIME).and_then(from_millis),
            version: get_i64(keys::VERSION).unwrap_or(0),
            status: InstanceStatus::from_ordinal(get_i64(keys::STATUS).unwrap_or(0)),
            status_on_delete: get_i64(keys::STATUS_ON_DELETE).map(InstanceStatus::from_ordinal),
            mapping_properties,
        })
    }

    /// Write the blob and replace the qualified mirror.
    #[allow(clippy::too_many_arguments)]
    fn write_properties(
        &self,
        tx: &mut dyn GraphTransaction,
        element: Element,
        prefix: Prefix,
        type_name: &str,
        props: &InstanceProperties,
        existing: Option<&PropertyMap>,
        guid: &str,
    ) -> Result<()> {
        let blob = serde_json::to_string(props)
            .map_err(|e| StoreError::mapping(guid, "write_properties", e))?;
        tx.set_property(element, &prefix.key(keys::PROPERTIES), blob.into())?;

        let qualified = qualifier::qualified_property_names(self.registry.as_ref(), type_name)?;
        let mut mirror = PropertyMap::new();
        for (short, value) in props.iter() {
            let (Some(name), Some(primitive)) = (qualified.get(short), value.as_primitive())
            else {
                continue;
            };
            mirror.insert(prefix.mirror(name), primitive_value(primitive));
        }

        if let Some(existing) = existing {
            let stale: BTreeSet<&String> = existing
                .keys()
                .filter(|k| prefix.is_mirror(k) && !mirror.contains_key(*k))
                .collect();
            for key in stale {
                tx.remove_property(element, key)?;
            }
        }
        tx.set_properties(element, &mirror)?;
        Ok(())
    }

    fn read_properties(
        &self,
        props: &PropertyMap,
        prefix: Prefix,
        guid: &str,
        method: &'static str,
    ) -> Result<InstanceProperties> {
        match props.get(&prefix.key(keys::PROPERTIES)).and_then(Value::as_str) {
            Some(blob) => {
                serde_json::from_str(blob).map_err(|e| StoreError::mapping(guid, method, e))
            }
            None => Ok(InstanceProperties::new()),
        }
    }
}

fn is_finite(value: &InstancePropertyValue) -> bool {
    match value {
        InstancePropertyValue::Primitive(PrimitiveValue::Float(v)) => v.is_finite(),
        InstancePropertyValue::Primitive(PrimitiveValue::Double(v)) => v.is_finite(),
        InstancePropertyValue::Primitive(_) | InstancePropertyValue::Enum { .. } => true,
        InstancePropertyValue::Array(items) => items.iter().all(is_finite),
        InstancePropertyValue::Map(fields) | InstancePropertyValue::Struct(fields) => {
            fields.values().all(is_finite)
        }
    }
}

fn millis(time: DateTime<Utc>) -> Value {
    Value::Int(time.timestamp_millis())
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn set_or_remove(
    tx: &mut dyn GraphTransaction,
    element: Element,
    key: &str,
    value: Option<Value>,
) -> Result<()> {
    match value {
        Some(v) => tx.set_property(element, key, v)?,
        None => tx.remove_property(element, key)?,
    }
    Ok(())
}
