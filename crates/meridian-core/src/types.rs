//! Instance model for the Meridian metadata store.
//!
//! These types represent the typed instances that the store maps onto graph
//! vertices and edges: entities (full detail or proxy), classifications
//! attached to entities, and relationships between two entities.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::typedef::TypeDefCategory;

// ── Primitive Values ──────────────────────────────────────────────

/// The primitive categories a type definition may declare for an attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveDefCategory {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    BigInteger,
    BigDecimal,
    String,
    Date,
}

/// A single primitive value carried by an instance property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PrimitiveValue {
    Boolean(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    BigInteger(String),
    BigDecimal(String),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
}

impl PrimitiveValue {
    pub fn category(&self) -> PrimitiveDefCategory {
        match self {
            Self::Boolean(_) => PrimitiveDefCategory::Boolean,
            Self::Byte(_) => PrimitiveDefCategory::Byte,
            Self::Char(_) => PrimitiveDefCategory::Char,
            Self::Short(_) => PrimitiveDefCategory::Short,
            Self::Int(_) => PrimitiveDefCategory::Int,
            Self::Long(_) => PrimitiveDefCategory::Long,
            Self::Float(_) => PrimitiveDefCategory::Float,
            Self::Double(_) => PrimitiveDefCategory::Double,
            Self::BigInteger(_) => PrimitiveDefCategory::BigInteger,
            Self::BigDecimal(_) => PrimitiveDefCategory::BigDecimal,
            Self::String(_) => PrimitiveDefCategory::String,
            Self::Date(_) => PrimitiveDefCategory::Date,
        }
    }

    /// The string content for string-like primitives.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::BigInteger(s) | Self::BigDecimal(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "{v}"),
            Self::Short(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) | Self::Date(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::BigInteger(v) | Self::BigDecimal(v) | Self::String(v) => f.write_str(v),
        }
    }
}

// ── Property Bags ─────────────────────────────────────────────────

/// A value stored under a type-defined property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum InstancePropertyValue {
    Primitive(PrimitiveValue),
    Enum {
        ordinal: i32,
        symbolic_name: String,
    },
    Array(Vec<InstancePropertyValue>),
    Map(BTreeMap<String, InstancePropertyValue>),
    Struct(BTreeMap<String, InstancePropertyValue>),
}

impl InstancePropertyValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::Primitive(PrimitiveValue::String(value.into()))
    }

    pub fn int(value: i32) -> Self {
        Self::Primitive(PrimitiveValue::Int(value))
    }

    pub fn long(value: i64) -> Self {
        Self::Primitive(PrimitiveValue::Long(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::Primitive(PrimitiveValue::Boolean(value))
    }

    pub fn as_primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            Self::Primitive(p) => Some(p),
            _ => None,
        }
    }
}

/// The type-defined property bag of an instance, keyed by short property name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct InstanceProperties(pub BTreeMap<String, InstancePropertyValue>);

impl InstanceProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: InstancePropertyValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: InstancePropertyValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&InstancePropertyValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InstancePropertyValue)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// ── Enumerations ──────────────────────────────────────────────────

/// Lifecycle status of an instance. Stored on the graph as its ordinal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Draft,
    Prepared,
    Proposed,
    Approved,
    Rejected,
    ApprovedConcept,
    UnderDevelopment,
    DevelopmentComplete,
    ApprovedForDeployment,
    Standby,
    Active,
    Failed,
    Disabled,
    Complete,
    Deprecated,
    Other,
    Deleted,
}

impl InstanceStatus {
    pub const ALL: [Self; 18] = [
        Self::Unknown,
        Self::Draft,
        Self::Prepared,
        Self::Proposed,
        Self::Approved,
        Self::Rejected,
        Self::ApprovedConcept,
        Self::UnderDevelopment,
        Self::DevelopmentComplete,
        Self::ApprovedForDeployment,
        Self::Standby,
        Self::Active,
        Self::Failed,
        Self::Disabled,
        Self::Complete,
        Self::Deprecated,
        Self::Other,
        Self::Deleted,
    ];

    pub fn ordinal(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Draft => 1,
            Self::Prepared => 2,
            Self::Proposed => 3,
            Self::Approved => 4,
            Self::Rejected => 5,
            Self::ApprovedConcept => 6,
            Self::UnderDevelopment => 7,
            Self::DevelopmentComplete => 8,
            Self::ApprovedForDeployment => 9,
            Self::Standby => 10,
            Self::Active => 15,
            Self::Failed => 20,
            Self::Disabled => 21,
            Self::Complete => 22,
            Self::Deprecated => 30,
            Self::Other => 50,
            Self::Deleted => 99,
        }
    }

    /// Unrecognised ordinals map to `Unknown`.
    pub fn from_ordinal(ordinal: i64) -> Self {
        Self::ALL
            .into_iter()
            .find(|s| s.ordinal() == ordinal)
            .unwrap_or(Self::Unknown)
    }
}

/// Where an instance came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceProvenanceType {
    #[default]
    Unknown,
    LocalCohort,
    ExportArchive,
    ContentPack,
    DeregisteredRepository,
    Configuration,
    ExternalSource,
}

impl InstanceProvenanceType {
    pub fn ordinal(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::LocalCohort => 1,
            Self::ExportArchive => 2,
            Self::ContentPack => 3,
            Self::DeregisteredRepository => 4,
            Self::Configuration => 5,
            Self::ExternalSource => 6,
        }
    }

    pub fn from_ordinal(ordinal: i64) -> Self {
        match ordinal {
            1 => Self::LocalCohort,
            2 => Self::ExportArchive,
            3 => Self::ContentPack,
            4 => Self::DeregisteredRepository,
            5 => Self::Configuration,
            6 => Self::ExternalSource,
            _ => Self::Unknown,
        }
    }
}

/// How a classification came to be attached to an entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationOrigin {
    #[default]
    Assigned,
    Propagated,
}

impl ClassificationOrigin {
    pub fn ordinal(self) -> i64 {
        match self {
            Self::Assigned => 0,
            Self::Propagated => 1,
        }
    }

    /// Unrecognised ordinals fall back to `Assigned`.
    pub fn from_ordinal(ordinal: i64) -> Self {
        match ordinal {
            1 => Self::Propagated,
            _ => Self::Assigned,
        }
    }
}

// ── Audit Header ──────────────────────────────────────────────────

/// The resolved type of an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceType {
    pub type_def_guid: String,
    pub type_def_name: String,
    pub category: TypeDefCategory,
    /// Supertype names, nearest first.
    pub super_type_names: Vec<String>,
}

impl InstanceType {
    /// A type reference carrying only a name, resolved on storage.
    pub fn named(name: impl Into<String>, category: TypeDefCategory) -> Self {
        Self {
            type_def_guid: String::new(),
            type_def_name: name.into(),
            category,
            super_type_names: Vec::new(),
        }
    }
}

/// Audit information shared by every instance kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceAuditHeader {
    pub instance_type: InstanceType,
    pub provenance_type: InstanceProvenanceType,
    pub metadata_collection_id: String,
    pub metadata_collection_name: Option<String>,
    pub replicated_by: Option<String>,
    pub instance_license: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub maintained_by: Vec<String>,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
    pub version: i64,
    pub status: InstanceStatus,
    pub status_on_delete: Option<InstanceStatus>,
    pub mapping_properties: BTreeMap<String, serde_json::Value>,
}

impl InstanceAuditHeader {
    pub fn new(instance_type: InstanceType, metadata_collection_id: impl Into<String>) -> Self {
        Self {
            instance_type,
            provenance_type: InstanceProvenanceType::LocalCohort,
            metadata_collection_id: metadata_collection_id.into(),
            metadata_collection_name: None,
            replicated_by: None,
            instance_license: None,
            created_by: None,
            updated_by: None,
            maintained_by: Vec::new(),
            create_time: None,
            update_time: None,
            version: 1,
            status: InstanceStatus::Active,
            status_on_delete: None,
            mapping_properties: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.instance_type.type_def_name
    }
}

// ── Instances ─────────────────────────────────────────────────────

/// A classification attached to an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub header: InstanceAuditHeader,
    /// The classification type name; never blank.
    pub name: String,
    pub properties: InstanceProperties,
    pub origin: ClassificationOrigin,
    pub origin_guid: Option<String>,
}

/// A full entity held by this store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityDetail {
    pub header: InstanceAuditHeader,
    pub guid: String,
    pub instance_url: Option<String>,
    pub properties: InstanceProperties,
    pub classifications: Vec<Classification>,
}

impl EntityDetail {
    pub fn type_name(&self) -> &str {
        self.header.type_name()
    }
}

/// A partial entity: identity plus unique properties only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityProxy {
    pub header: InstanceAuditHeader,
    pub guid: String,
    pub unique_properties: InstanceProperties,
    pub classifications: Vec<Classification>,
}

impl EntityProxy {
    pub fn type_name(&self) -> &str {
        self.header.type_name()
    }
}

/// A relationship between two entities, each end carried as a proxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub header: InstanceAuditHeader,
    pub guid: String,
    pub properties: InstanceProperties,
    pub entity_one: EntityProxy,
    pub entity_two: EntityProxy,
}

impl Relationship {
    pub fn type_name(&self) -> &str {
        self.header.type_name()
    }
}

/// A set of entities and the relationships between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceGraph {
    pub entities: Vec<EntityDetail>,
    pub relationships: Vec<Relationship>,
}

impl InstanceGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn entity_guids(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.guid.as_str()).collect()
    }

    pub fn relationship_guids(&self) -> Vec<&str> {
        self.relationships.iter().map(|r| r.guid.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordinals_roundtrip() {
        for status in InstanceStatus::ALL {
            assert_eq!(InstanceStatus::from_ordinal(status.ordinal()), status);
        }
    }

    #[test]
    fn unknown_ordinals_default() {
        assert_eq!(InstanceStatus::from_ordinal(42), InstanceStatus::Unknown);
        assert_eq!(InstanceStatus::from_ordinal(-1), InstanceStatus::Unknown);
        assert_eq!(
            InstanceProvenanceType::from_ordinal(77),
            InstanceProvenanceType::Unknown
        );
        assert_eq!(
            ClassificationOrigin::from_ordinal(9),
            ClassificationOrigin::Assigned
        );
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&InstanceStatus::ApprovedForDeployment).unwrap();
        assert_eq!(json, "\"APPROVED_FOR_DEPLOYMENT\"");
    }

    #[test]
    fn property_bag_serialization_roundtrip() {
        let props = InstanceProperties::new()
            .with("name", InstancePropertyValue::string("orders"))
            .with("replicas", InstancePropertyValue::int(3))
            .with(
                "tags",
                InstancePropertyValue::Array(vec![
                    InstancePropertyValue::string("pii"),
                    InstancePropertyValue::string("gold"),
                ]),
            )
            .with(
                "level",
                InstancePropertyValue::Enum {
                    ordinal: 2,
                    symbolic_name: "High".to_string(),
                },
            );

        let json = serde_json::to_string(&props).unwrap();
        let back: InstanceProperties = serde_json::from_str(&json).unwrap();
        assert_eq!(props, back);
    }

    #[test]
    fn primitive_category_matches_variant() {
        assert_eq!(
            PrimitiveValue::Date(0).category(),
            PrimitiveDefCategory::Date
        );
        assert_eq!(
            PrimitiveValue::BigDecimal("1.5".into()).as_str(),
            Some("1.5")
        );
        assert_eq!(PrimitiveValue::Int(1).as_str(), None);
    }
}
