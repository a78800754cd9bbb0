//! Labels and property keys of the persisted layout.
//!
//! Core keys are `<prefix>_<field>`; type-defined primitives are mirrored
//! under `<prefix>.<DefiningType>.<shortName>`.

use meridian_core::TypeDefCategory;
use meridian_graph::ElementKind;

pub const ENTITY_LABEL: &str = "Entity";
pub const CLASSIFICATION_LABEL: &str = "Classification";
pub const RELATIONSHIP_LABEL: &str = "Relationship";
pub const CLASSIFIER_LABEL: &str = "Classifier";
pub const CONTROL_LABEL: &str = "Control";

/// Separator between the defining type and the short name of a qualified property.
pub const QUALIFIER_SEPARATOR: char = '.';

// Audit-header fields shared by every instance kind.
pub const GUID: &str = "guid";
pub const TYPE_NAME: &str = "typeName";
pub const METADATA_COLLECTION_ID: &str = "metadataCollectionId";
pub const METADATA_COLLECTION_NAME: &str = "metadataCollectionName";
pub const VERSION: &str = "version";
pub const STATUS: &str = "status";
pub const STATUS_ON_DELETE: &str = "statusOnDelete";
pub const PROVENANCE: &str = "provenanceType";
pub const REPLICATED_BY: &str = "replicatedBy";
pub const CREATE_TIME: &str = "createTime";
pub const UPDATE_TIME: &str = "updateTime";
pub const CREATED_BY: &str = "createdBy";
pub const UPDATED_BY: &str = "updatedBy";
pub const MAINTAINED_BY: &str = "maintainedBy";
pub const MAPPING_PROPERTIES: &str = "mappingProperties";
pub const INSTANCE_LICENSE: &str = "instanceLicense";
/// JSON blob of the full property bag.
pub const PROPERTIES: &str = "properties";

// Entity-only fields.
pub const INSTANCE_URL: &str = "instanceUrl";
pub const IS_PROXY: &str = "isProxy";

// Classification-only fields.
pub const CLASSIFICATION_NAME: &str = "name";
pub const ORIGIN: &str = "origin";
pub const ORIGIN_GUID: &str = "originGuid";

// Control vertex fields.
pub const CREATED: &str = "created";
pub const LAST_OPENED: &str = "lastOpened";

/// Key prefix of one element kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    Entity,
    Classification,
    Relationship,
    Control,
}

impl Prefix {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "ve",
            Self::Classification => "vc",
            Self::Relationship => "er",
            Self::Control => "ctl",
        }
    }

    pub fn for_category(category: TypeDefCategory) -> Self {
        match category {
            TypeDefCategory::Entity => Self::Entity,
            TypeDefCategory::Classification => Self::Classification,
            TypeDefCategory::Relationship => Self::Relationship,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Entity => ENTITY_LABEL,
            Self::Classification => CLASSIFICATION_LABEL,
            Self::Relationship => RELATIONSHIP_LABEL,
            Self::Control => CONTROL_LABEL,
        }
    }

    pub fn element(self) -> ElementKind {
        match self {
            Self::Relationship => ElementKind::Edge,
            _ => ElementKind::Vertex,
        }
    }

    /// A core key such as `ve_guid`.
    pub fn key(self, field: &str) -> String {
        format!("{}_{field}", self.as_str())
    }

    /// A mirror key such as `ve.Asset.name`, from a qualified name `Asset.name`.
    pub fn mirror(self, qualified: &str) -> String {
        format!("{}{QUALIFIER_SEPARATOR}{qualified}", self.as_str())
    }

    /// Whether `key` is a mirror key of this prefix.
    pub fn is_mirror(self, key: &str) -> bool {
        key.strip_prefix(self.as_str())
            .is_some_and(|rest| rest.starts_with(QUALIFIER_SEPARATOR))
    }
}
