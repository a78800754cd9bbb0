//! Type definitions and the type-registry boundary.
//!
//! The store never owns type definitions; it resolves them through a
//! [`TypeRegistry`]. [`SimpleTypeRegistry`] is a self-contained registry used
//! by tests and the CLI, loaded programmatically or from a JSON file.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{InstanceType, PrimitiveDefCategory};

/// The category of instances a type definition describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TypeDefCategory {
    Entity,
    Relationship,
    Classification,
}

/// The declared type of an attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeType {
    Primitive { category: PrimitiveDefCategory },
    Enum { name: String },
    Collection { name: String },
}

/// An attribute declared directly on a type definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDefAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
    /// Unique attributes are carried on entity proxies.
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl TypeDefAttribute {
    pub fn primitive(name: impl Into<String>, category: PrimitiveDefCategory) -> Self {
        Self {
            name: name.into(),
            attribute_type: AttributeType::Primitive { category },
            unique: false,
            description: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// The primitive category, if this attribute is primitive.
    pub fn primitive_category(&self) -> Option<PrimitiveDefCategory> {
        match &self.attribute_type {
            AttributeType::Primitive { category } => Some(*category),
            _ => None,
        }
    }
}

/// A type definition with a single optional supertype.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDef {
    pub guid: String,
    pub name: String,
    pub category: TypeDefCategory,
    #[serde(default)]
    pub super_type: Option<String>,
    #[serde(default)]
    pub attributes: Vec<TypeDefAttribute>,
}

impl TypeDef {
    pub fn new(guid: impl Into<String>, name: impl Into<String>, category: TypeDefCategory) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            category,
            super_type: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_super_type(mut self, super_type: impl Into<String>) -> Self {
        self.super_type = Some(super_type.into());
        self
    }

    pub fn with_attribute(mut self, attribute: TypeDefAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// Resolves type names to definitions. Implemented outside the store.
pub trait TypeRegistry: Send + Sync {
    fn type_def_by_name(&self, name: &str) -> Option<TypeDef>;

    fn type_def_by_guid(&self, guid: &str) -> Option<TypeDef>;

    /// Every type currently active in the registry.
    fn active_type_defs(&self) -> Vec<TypeDef>;

    /// The type itself followed by its supertypes, nearest first.
    ///
    /// A cyclic chain is cut at the first repeated type.
    fn super_type_chain(&self, name: &str) -> Result<Vec<TypeDef>, CoreError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(name.to_string());
        while let Some(current) = next {
            if !seen.insert(current.clone()) {
                break;
            }
            let def = self
                .type_def_by_name(&current)
                .ok_or_else(|| CoreError::TypeNotKnown { name: current.clone() })?;
            next = def.super_type.clone();
            chain.push(def);
        }
        Ok(chain)
    }

    /// True if `type_name` is `super_type_name` or inherits from it.
    fn is_type_of(&self, type_name: &str, super_type_name: &str) -> bool {
        self.super_type_chain(type_name)
            .map(|chain| chain.iter().any(|t| t.name == super_type_name))
            .unwrap_or(false)
    }

    /// Active types of the same category that are `name` or inherit from it.
    fn subtypes_of(&self, name: &str) -> Vec<TypeDef> {
        let Some(root) = self.type_def_by_name(name) else {
            return Vec::new();
        };
        self.active_type_defs()
            .into_iter()
            .filter(|t| t.category == root.category && self.is_type_of(&t.name, name))
            .collect()
    }

    /// Resolve a type name into the `InstanceType` carried by instance headers.
    fn instance_type(&self, name: &str) -> Result<InstanceType, CoreError> {
        let chain = self.super_type_chain(name)?;
        let def = &chain[0];
        Ok(InstanceType {
            type_def_guid: def.guid.clone(),
            type_def_name: def.name.clone(),
            category: def.category,
            super_type_names: chain[1..].iter().map(|t| t.name.clone()).collect(),
        })
    }
}

/// A thread-safe in-memory registry.
#[derive(Debug, Default)]
pub struct SimpleTypeRegistry {
    types: RwLock<BTreeMap<String, TypeDef>>,
}

impl SimpleTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of definitions.
    pub fn with_types(types: impl IntoIterator<Item = TypeDef>) -> Self {
        let registry = Self::new();
        for def in types {
            registry.add(def);
        }
        registry
    }

    /// Add or replace a type definition.
    pub fn add(&self, def: TypeDef) {
        self.types.write().insert(def.name.clone(), def);
    }

    /// Parse a JSON array of type definitions.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let defs: Vec<TypeDef> = serde_json::from_str(json)?;
        Ok(Self::with_types(defs))
    }

    /// Load a JSON array of type definitions from a file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json_str(&json)
    }
}

impl TypeRegistry for SimpleTypeRegistry {
    fn type_def_by_name(&self, name: &str) -> Option<TypeDef> {
        self.types.read().get(name).cloned()
    }

    fn type_def_by_guid(&self, guid: &str) -> Option<TypeDef> {
        self.types.read().values().find(|t| t.guid == guid).cloned()
    }

    fn active_type_defs(&self) -> Vec<TypeDef> {
        self.types.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SimpleTypeRegistry {
        SimpleTypeRegistry::with_types([
            TypeDef::new("t-1", "Referenceable", TypeDefCategory::Entity).with_attribute(
                TypeDefAttribute::primitive("qualifiedName", PrimitiveDefCategory::String).unique(),
            ),
            TypeDef::new("t-2", "Asset", TypeDefCategory::Entity).with_super_type("Referenceable"),
            TypeDef::new("t-3", "DataSet", TypeDefCategory::Entity).with_super_type("Asset"),
            TypeDef::new("t-4", "Confidential", TypeDefCategory::Classification),
        ])
    }

    #[test]
    fn super_type_chain_nearest_first() {
        let chain = registry().super_type_chain("DataSet").unwrap();
        let names: Vec<_> = chain.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["DataSet", "Asset", "Referenceable"]);
    }

    #[test]
    fn missing_super_type_is_reported() {
        let reg = registry();
        reg.add(TypeDef::new("t-9", "Orphan", TypeDefCategory::Entity).with_super_type("Ghost"));
        let err = reg.super_type_chain("Orphan").unwrap_err();
        assert!(matches!(err, CoreError::TypeNotKnown { ref name } if name == "Ghost"));
    }

    #[test]
    fn cyclic_chain_is_cut() {
        let reg = SimpleTypeRegistry::with_types([
            TypeDef::new("a", "A", TypeDefCategory::Entity).with_super_type("B"),
            TypeDef::new("b", "B", TypeDefCategory::Entity).with_super_type("A"),
        ]);
        assert_eq!(reg.super_type_chain("A").unwrap().len(), 2);
    }

    #[test]
    fn subtypes_stay_within_category() {
        let reg = registry();
        let mut names: Vec<_> = reg.subtypes_of("Asset").into_iter().map(|t| t.name).collect();
        names.sort();
        assert_eq!(names, vec!["Asset", "DataSet"]);
        assert!(reg.is_type_of("DataSet", "Referenceable"));
        assert!(!reg.is_type_of("Referenceable", "DataSet"));
    }

    #[test]
    fn instance_type_lists_supertypes() {
        let it = registry().instance_type("DataSet").unwrap();
        assert_eq!(it.type_def_guid, "t-3");
        assert_eq!(it.super_type_names, vec!["Asset", "Referenceable"]);
    }

    #[test]
    fn registry_from_json() {
        let json = r#"[
            {"guid": "g1", "name": "Glossary", "category": "entity",
             "attributes": [{"name": "displayName",
                             "attribute_type": {"kind": "primitive", "category": "string"}}]}
        ]"#;
        let reg = SimpleTypeRegistry::from_json_str(json).unwrap();
        let def = reg.type_def_by_guid("g1").unwrap();
        assert_eq!(def.attributes[0].primitive_category(), Some(PrimitiveDefCategory::String));
    }
}
