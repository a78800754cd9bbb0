//! Type-qualified property names.
//!
//! A property visible on a type is qualified by the type that defines it:
//! the chain is walked from the type itself up through its supertypes and
//! every step overwrites, so when a short name is defined at several levels
//! the most ancestral definition wins.

use std::collections::BTreeMap;

use meridian_core::{TypeDefAttribute, TypeRegistry};

use crate::error::Result;
use crate::keys::QUALIFIER_SEPARATOR;

/// `DefiningType.shortName`.
pub fn qualify(defining_type: &str, short_name: &str) -> String {
    format!("{defining_type}{QUALIFIER_SEPARATOR}{short_name}")
}

/// Short name → qualified name for every attribute visible on `type_name`.
pub fn qualified_property_names(
    registry: &dyn TypeRegistry,
    type_name: &str,
) -> Result<BTreeMap<String, String>> {
    let mut names = BTreeMap::new();
    for def in registry.super_type_chain(type_name)? {
        for attr in &def.attributes {
            names.insert(attr.name.clone(), qualify(&def.name, &attr.name));
        }
    }
    Ok(names)
}

/// Like [`qualified_property_names`], restricted to the given short names.
pub fn qualify_referenced(
    registry: &dyn TypeRegistry,
    type_name: &str,
    short_names: &[String],
) -> Result<BTreeMap<String, String>> {
    let mut names = qualified_property_names(registry, type_name)?;
    names.retain(|short, _| short_names.contains(short));
    Ok(names)
}

/// Short name → attribute definition, deduplicated with the same ancestor-wins rule.
pub fn attribute_definitions(
    registry: &dyn TypeRegistry,
    type_name: &str,
) -> Result<BTreeMap<String, TypeDefAttribute>> {
    let mut attrs = BTreeMap::new();
    for def in registry.super_type_chain(type_name)? {
        for attr in def.attributes {
            attrs.insert(attr.name.clone(), attr);
        }
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{
        PrimitiveDefCategory, SimpleTypeRegistry, TypeDef, TypeDefCategory,
    };

    fn string_attr(name: &str) -> TypeDefAttribute {
        TypeDefAttribute::primitive(name, PrimitiveDefCategory::String)
    }

    fn hierarchy() -> SimpleTypeRegistry {
        SimpleTypeRegistry::with_types([
            TypeDef::new("1", "Referenceable", TypeDefCategory::Entity)
                .with_attribute(string_attr("qualifiedName").unique()),
            TypeDef::new("2", "Asset", TypeDefCategory::Entity)
                .with_super_type("Referenceable")
                .with_attribute(string_attr("name"))
                .with_attribute(string_attr("description")),
            TypeDef::new("3", "DataSet", TypeDefCategory::Entity)
                .with_super_type("Asset")
                .with_attribute(string_attr("name"))
                .with_attribute(string_attr("format")),
        ])
    }

    #[test]
    fn most_ancestral_definition_wins() {
        let reg = hierarchy();
        let names = qualified_property_names(&reg, "DataSet").unwrap();
        assert_eq!(names["name"], "Asset.name");
        assert_eq!(names["format"], "DataSet.format");
        assert_eq!(names["qualifiedName"], "Referenceable.qualifiedName");
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn referenced_subset_only() {
        let reg = hierarchy();
        let names = qualify_referenced(&reg, "DataSet", &["name".to_string()]).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names["name"], "Asset.name");
    }

    #[test]
    fn attribute_definitions_keep_unique_flag() {
        let reg = hierarchy();
        let attrs = attribute_definitions(&reg, "DataSet").unwrap();
        assert!(attrs["qualifiedName"].unique);
        assert!(!attrs["name"].unique);
    }

    #[test]
    fn unknown_supertype_fails() {
        let reg = SimpleTypeRegistry::with_types([TypeDef::new(
            "9",
            "Orphan",
            TypeDefCategory::Entity,
        )
        .with_super_type("Missing")]);
        assert!(qualified_property_names(&reg, "Orphan").is_err());
    }
}
