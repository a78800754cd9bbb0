//! Shared fixtures: a small type universe and instance builders.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use meridian_core::config::MeridianConfig;
use meridian_core::events::MemoryAuditSink;
use meridian_core::{
    Classification, ClassificationOrigin, EntityDetail, EntityProxy, InstanceAuditHeader,
    InstanceProperties, InstancePropertyValue, PrimitiveDefCategory, Relationship,
    SimpleTypeRegistry, TypeDef, TypeDefAttribute, TypeDefCategory, TypeRegistry,
};
use meridian_graph::MemoryGraph;
use meridian_store::MetadataStore;

pub const LOCAL: &str = "local-collection";
pub const REMOTE: &str = "remote-collection";

fn string(name: &str) -> TypeDefAttribute {
    TypeDefAttribute::primitive(name, PrimitiveDefCategory::String)
}

/// Referenceable ← Asset ← DataSet (redefines `name`), Asset ← Process,
/// an unrelated Person with its own `name`, three classifications and two
/// relationship types.
pub fn registry() -> Arc<SimpleTypeRegistry> {
    Arc::new(SimpleTypeRegistry::with_types([
        TypeDef::new("t-ref", "Referenceable", TypeDefCategory::Entity)
            .with_attribute(string("qualifiedName").unique()),
        TypeDef::new("t-asset", "Asset", TypeDefCategory::Entity)
            .with_super_type("Referenceable")
            .with_attribute(string("name"))
            .with_attribute(string("description"))
            .with_attribute(string("owner")),
        TypeDef::new("t-dataset", "DataSet", TypeDefCategory::Entity)
            .with_super_type("Asset")
            .with_attribute(string("name"))
            .with_attribute(string("format"))
            .with_attribute(TypeDefAttribute::primitive(
                "size",
                PrimitiveDefCategory::Long,
            )),
        TypeDef::new("t-process", "Process", TypeDefCategory::Entity)
            .with_super_type("Asset")
            .with_attribute(string("formula")),
        TypeDef::new("t-person", "Person", TypeDefCategory::Entity)
            .with_attribute(string("name"))
            .with_attribute(string("email")),
        TypeDef::new("t-conf", "Confidential", TypeDefCategory::Classification)
            .with_attribute(TypeDefAttribute::primitive(
                "level",
                PrimitiveDefCategory::Int,
            )),
        TypeDef::new("t-cert", "Certified", TypeDefCategory::Classification)
            .with_attribute(string("certifiedBy")),
        TypeDef::new("t-sens", "Sensitive", TypeDefCategory::Classification)
            .with_attribute(string("reason")),
        TypeDef::new("t-flow", "DataFlow", TypeDefCategory::Relationship)
            .with_attribute(string("label")),
        TypeDef::new("t-owner", "Ownership", TypeDefCategory::Relationship)
            .with_attribute(string("role")),
    ]))
}

pub fn config() -> MeridianConfig {
    let mut config = MeridianConfig::default();
    config.store.metadata_collection_id = LOCAL.to_string();
    config.index.wait_timeout_ms = 2_000;
    config.index.poll_interval_ms = 5;
    config
}

pub struct Fixture {
    pub graph: Arc<MemoryGraph>,
    pub registry: Arc<SimpleTypeRegistry>,
    pub audit: MemoryAuditSink,
    pub store: MetadataStore,
}

pub fn open() -> Fixture {
    let graph = Arc::new(MemoryGraph::new());
    let registry = registry();
    let audit = MemoryAuditSink::new();
    let store = MetadataStore::open(graph.clone(), registry.clone(), &config(), &audit)
        .expect("store opens");
    Fixture {
        graph,
        registry,
        audit,
        store,
    }
}

/// A fixed timestamp at millisecond precision.
pub fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().expect("valid millis")
}

pub fn header(type_name: &str, collection: &str) -> InstanceAuditHeader {
    let instance_type = registry()
        .instance_type(type_name)
        .expect("fixture type exists");
    let mut header = InstanceAuditHeader::new(instance_type, collection);
    header.created_by = Some("tester".to_string());
    header.create_time = Some(at(1_700_000_000_123));
    header
}

pub fn props(pairs: &[(&str, &str)]) -> InstanceProperties {
    pairs.iter().fold(InstanceProperties::new(), |acc, (k, v)| {
        acc.with(*k, InstancePropertyValue::string(*v))
    })
}

pub fn entity(guid: &str, type_name: &str, properties: InstanceProperties) -> EntityDetail {
    EntityDetail {
        header: header(type_name, LOCAL),
        guid: guid.to_string(),
        instance_url: None,
        properties,
        classifications: Vec::new(),
    }
}

pub fn proxy(guid: &str, type_name: &str, collection: &str) -> EntityProxy {
    EntityProxy {
        header: header(type_name, collection),
        guid: guid.to_string(),
        unique_properties: InstanceProperties::new(),
        classifications: Vec::new(),
    }
}

pub fn classification(name: &str, properties: InstanceProperties) -> Classification {
    Classification {
        header: header(name, LOCAL),
        name: name.to_string(),
        properties,
        origin: ClassificationOrigin::Assigned,
        origin_guid: None,
    }
}

pub fn relationship(guid: &str, type_name: &str, one: &str, two: &str) -> Relationship {
    Relationship {
        header: header(type_name, LOCAL),
        guid: guid.to_string(),
        properties: InstanceProperties::new(),
        entity_one: proxy(one, "Asset", LOCAL),
        entity_two: proxy(two, "Asset", LOCAL),
    }
}
