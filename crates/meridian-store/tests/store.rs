//! End-to-end CRUD behavior of the store on the embedded backend.

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use meridian_core::events::{EventPayload, MemoryAuditSink};
use meridian_core::{ErrorCode, InstanceProvenanceType, InstancePropertyValue, PrimitiveValue};
use meridian_graph::{
    ElementId, GraphBackend, MemoryGraph, MemoryGraphOptions, ScalarType, VertexRecord,
};
use meridian_store::mapper::find_entity_vertex;
use meridian_store::{ElementMapper, MetadataStore, StoreError};

fn stored_vertex(fx: &Fixture, guid: &str) -> Option<VertexRecord> {
    let mut tx = fx.graph.begin().unwrap();
    let vertex = find_entity_vertex(tx.as_mut(), guid).unwrap();
    tx.rollback().unwrap();
    vertex
}

fn mirror_keys(vertex: &VertexRecord) -> BTreeSet<String> {
    vertex
        .properties
        .keys()
        .filter(|k| k.starts_with("ve."))
        .cloned()
        .collect()
}

fn classification_vertices(fx: &Fixture, guid: &str) -> BTreeMap<String, ElementId> {
    let mapper = ElementMapper::new(fx.registry.clone());
    let mut tx = fx.graph.begin().unwrap();
    let entity = find_entity_vertex(tx.as_mut(), guid).unwrap().unwrap();
    let attached = mapper
        .attached_classifications(tx.as_mut(), entity.id)
        .unwrap();
    tx.rollback().unwrap();
    attached
        .into_iter()
        .map(|(vertex, _)| {
            let name = meridian_store::mapper::classification_name(&vertex).unwrap();
            (name, vertex.id)
        })
        .collect()
}

#[test]
fn created_entity_reads_back_equal() {
    let fx = open();
    let mut detail = entity(
        "g1",
        "DataSet",
        props(&[("qualifiedName", "db.orders"), ("name", "orders"), ("format", "parquet")])
            .with("size", InstancePropertyValue::long(4096)),
    );
    detail.instance_url = Some("https://meta.example/g1".to_string());
    detail.header.maintained_by = vec!["team-a".to_string(), "team-b".to_string()];
    detail
        .header
        .mapping_properties
        .insert("source".to_string(), serde_json::json!({"system": "hive"}));

    fx.store.create_entity(&detail).unwrap();
    assert_eq!(fx.store.get_entity_detail("g1").unwrap(), detail);

    let vertex = stored_vertex(&fx, "g1").unwrap();
    assert_eq!(
        mirror_keys(&vertex),
        BTreeSet::from([
            "ve.Asset.name".to_string(),
            "ve.DataSet.format".to_string(),
            "ve.DataSet.size".to_string(),
            "ve.Referenceable.qualifiedName".to_string(),
        ])
    );
}

#[test]
fn duplicate_create_is_rejected() {
    let fx = open();
    let detail = entity("g1", "Asset", props(&[("name", "a")]));
    fx.store.create_entity(&detail).unwrap();
    let version = fx.graph.version();

    let err = fx.store.create_entity(&detail).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
    assert_eq!(err.code(), ErrorCode::AlreadyExists);
    assert_eq!(fx.graph.version(), version);
}

#[test]
fn missing_mandatory_field_fails_before_writing() {
    let fx = open();
    let mut detail = entity("g1", "Asset", props(&[]));
    detail.header.metadata_collection_id = String::new();
    let version = fx.graph.version();

    let err = fx.store.create_entity(&detail).unwrap_err();
    assert!(matches!(err, StoreError::PropertyError { ref property, .. } if property == "metadataCollectionId"));
    assert_eq!(fx.graph.version(), version);
}

#[test]
fn non_finite_floats_are_refused_before_writing() {
    let fx = open();
    let infinite = props(&[("name", "gauge")]).with(
        "weight",
        InstancePropertyValue::Primitive(PrimitiveValue::Double(f64::INFINITY)),
    );
    let version = fx.graph.version();

    let err = fx
        .store
        .create_entity(&entity("g1", "Asset", infinite))
        .unwrap_err();
    assert!(matches!(err, StoreError::PropertyError { ref property, .. } if property == "weight"));
    assert_eq!(err.code(), ErrorCode::PropertyError);
    assert_eq!(fx.graph.version(), version);
    assert!(stored_vertex(&fx, "g1").is_none());

    let finite = props(&[("name", "gauge")])
        .with("weight", InstancePropertyValue::Primitive(PrimitiveValue::Double(0.25)));
    let detail = entity("g1", "Asset", finite);
    fx.store.create_entity(&detail).unwrap();

    let mut update = detail.clone();
    update.properties.insert(
        "readings",
        InstancePropertyValue::Array(vec![InstancePropertyValue::Primitive(
            PrimitiveValue::Float(f32::NAN),
        )]),
    );
    assert!(fx.store.update_entity(&update).is_err());
    assert_eq!(fx.store.get_entity_detail("g1").unwrap(), detail);
}

#[test]
fn remote_proxy_is_promoted_in_place() {
    let fx = open();
    fx.store
        .create_entity_proxy(&proxy("g2", "Asset", REMOTE))
        .unwrap();
    let proxy_vertex = stored_vertex(&fx, "g2").unwrap();

    let mut copy = entity("g2", "Asset", props(&[("name", "remote asset")]));
    copy.header.metadata_collection_id = REMOTE.to_string();
    copy.header.provenance_type = InstanceProvenanceType::ExternalSource;
    fx.store.create_entity(&copy).unwrap();

    let promoted = stored_vertex(&fx, "g2").unwrap();
    assert_eq!(promoted.id, proxy_vertex.id);
    assert_eq!(fx.store.get_entity_detail("g2").unwrap(), copy);
}

#[test]
fn local_proxy_is_not_promoted() {
    let fx = open();
    fx.store
        .create_entity_proxy(&proxy("g2", "Asset", LOCAL))
        .unwrap();
    let err = fx
        .store
        .create_entity(&entity("g2", "Asset", props(&[])))
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
}

#[test]
fn proxy_create_requires_absence() {
    let fx = open();
    fx.store
        .create_entity(&entity("g1", "Asset", props(&[])))
        .unwrap();
    assert!(matches!(
        fx.store.create_entity_proxy(&proxy("g1", "Asset", REMOTE)),
        Err(StoreError::AlreadyExists { .. })
    ));
}

#[test]
fn reference_copy_must_be_homed_elsewhere() {
    let fx = open();
    let local = entity("g1", "Asset", props(&[]));
    assert!(matches!(
        fx.store.save_entity_reference_copy(&local),
        Err(StoreError::InvalidParameter { .. })
    ));

    fx.store
        .create_entity_proxy(&proxy("g9", "Asset", REMOTE))
        .unwrap();
    let mut copy = entity("g9", "Asset", props(&[("name", "copied")]));
    copy.header.metadata_collection_id = REMOTE.to_string();
    fx.store.save_entity_reference_copy(&copy).unwrap();
    assert_eq!(fx.store.get_entity_detail("g9").unwrap(), copy);
}

#[test]
fn proxy_vertices_refuse_detail_reads() {
    let fx = open();
    let mut p = proxy("g3", "DataSet", REMOTE);
    p.unique_properties = props(&[("qualifiedName", "db.remote")]);
    fx.store.create_entity_proxy(&p).unwrap();

    let err = fx.store.get_entity_detail("g3").unwrap_err();
    assert!(matches!(err, StoreError::EntityProxyOnly { .. }));
    assert_eq!(err.code(), ErrorCode::EntityProxyOnly);
    assert_eq!(fx.store.get_entity_proxy("g3").unwrap(), p);
    assert!(fx.store.is_entity_known("g3").unwrap().is_none());

    // the proxy view of a detail keeps only unique properties
    let detail = entity(
        "g4",
        "DataSet",
        props(&[("qualifiedName", "db.local"), ("name", "local")]),
    );
    fx.store.create_entity(&detail).unwrap();
    let view = fx.store.get_entity_proxy("g4").unwrap();
    assert_eq!(view.unique_properties, props(&[("qualifiedName", "db.local")]));
    assert!(fx.store.is_entity_known("g4").unwrap().is_some());
}

#[test]
fn update_replaces_the_whole_property_bag() {
    let fx = open();
    let mut detail = entity(
        "g1",
        "DataSet",
        props(&[("description", "daily orders"), ("owner", "ops")]),
    );
    fx.store.create_entity(&detail).unwrap();

    detail.properties = props(&[("owner", "finance"), ("format", "csv")]);
    detail.header.version = 2;
    fx.store.update_entity(&detail).unwrap();

    assert_eq!(fx.store.get_entity_detail("g1").unwrap(), detail);
    let vertex = stored_vertex(&fx, "g1").unwrap();
    assert_eq!(
        mirror_keys(&vertex),
        BTreeSet::from(["ve.Asset.owner".to_string(), "ve.DataSet.format".to_string()])
    );
}

#[test]
fn update_without_a_matching_instance_changes_nothing() {
    let fx = open();
    let version = fx.graph.version();
    fx.store
        .update_entity(&entity("nobody", "Asset", props(&[])))
        .unwrap();
    assert_eq!(fx.graph.version(), version);

    // a detail update never rewrites a proxy
    fx.store
        .create_entity_proxy(&proxy("g2", "Asset", REMOTE))
        .unwrap();
    let version = fx.graph.version();
    fx.store
        .update_entity(&entity("g2", "Asset", props(&[("name", "x")])))
        .unwrap();
    assert_eq!(fx.graph.version(), version);
    assert!(fx.store.get_entity_proxy("g2").unwrap().unique_properties.is_empty());
}

#[test]
fn classifications_converge_to_the_desired_set() {
    let fx = open();
    let mut detail = entity("g1", "Asset", props(&[("name", "a")]));
    detail.classifications = vec![
        classification("Confidential", props(&[]).with("level", InstancePropertyValue::int(2))),
        classification("Certified", props(&[("certifiedBy", "alice")])),
    ];
    fx.store.create_entity(&detail).unwrap();
    let before = classification_vertices(&fx, "g1");
    assert_eq!(before.len(), 2);

    detail.classifications = vec![
        classification("Certified", props(&[("certifiedBy", "bob")])),
        classification("Sensitive", props(&[("reason", "pii")])),
    ];
    fx.store.update_entity(&detail).unwrap();
    let after = classification_vertices(&fx, "g1");

    assert_eq!(
        after.keys().cloned().collect::<Vec<_>>(),
        ["Certified", "Sensitive"]
    );
    assert_eq!(after["Certified"], before["Certified"]);
    assert!(!before.values().any(|id| *id == after["Sensitive"]));

    let mut tx = fx.graph.begin().unwrap();
    assert!(tx.vertex(before["Confidential"]).unwrap().is_none());
    tx.rollback().unwrap();

    let stored = fx.store.get_entity_detail("g1").unwrap();
    assert_eq!(stored.classifications, detail.classifications);
}

#[test]
fn classification_operations_route_through_reconciliation() {
    let fx = open();
    fx.store
        .create_entity(&entity("g1", "Asset", props(&[])))
        .unwrap();

    let conf = classification("Confidential", props(&[]).with("level", InstancePropertyValue::int(1)));
    let attached = fx.store.classify_entity("g1", &conf).unwrap();
    assert_eq!(attached, vec![conf.clone()]);
    assert!(matches!(
        fx.store.classify_entity("g1", &conf),
        Err(StoreError::AlreadyExists { .. })
    ));

    let raised = classification("Confidential", props(&[]).with("level", InstancePropertyValue::int(3)));
    fx.store.update_entity_classification("g1", &raised).unwrap();
    assert_eq!(fx.store.get_entity_classifications("g1").unwrap(), vec![raised]);

    let missing = classification("Certified", props(&[]));
    let err = fx
        .store
        .update_entity_classification("g1", &missing)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ClassificationNotKnown);

    assert!(fx.store.declassify_entity("g1", "Confidential").unwrap().is_empty());
    assert!(matches!(
        fx.store.declassify_entity("g1", "Confidential"),
        Err(StoreError::ClassificationNotKnown { .. })
    ));
    assert!(matches!(
        fx.store.classify_entity("nobody", &conf),
        Err(StoreError::EntityNotKnown { .. })
    ));
}

#[test]
fn blank_classification_name_is_rejected() {
    let fx = open();
    let mut detail = entity("g1", "Asset", props(&[]));
    let mut blank = classification("Certified", props(&[]));
    blank.name = "  ".to_string();
    detail.classifications = vec![blank];
    let err = fx.store.create_entity(&detail).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PropertyError);
    assert!(stored_vertex(&fx, "g1").is_none());
}

#[test]
fn relationships_link_details_and_proxies() {
    let fx = open();
    fx.store
        .create_entity(&entity("g1", "Asset", props(&[])))
        .unwrap();
    fx.store
        .create_entity_proxy(&proxy("g2", "Asset", REMOTE))
        .unwrap();

    let mut flow = relationship("r1", "DataFlow", "g1", "g2");
    flow.properties = props(&[("label", "nightly")]);
    fx.store.create_relationship(&flow).unwrap();

    let found = fx.store.get_relationships_for_entity("g1", None, None).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].guid, "r1");
    assert_eq!(found[0].properties, flow.properties);
    assert_eq!(found[0].entity_one.guid, "g1");
    assert_eq!(found[0].entity_two.guid, "g2");
    assert_eq!(found[0].entity_two.header.metadata_collection_id, REMOTE);

    assert_eq!(
        fx.store.get_relationships_for_entity("g2", None, None).unwrap().len(),
        1
    );
    assert!(fx
        .store
        .get_relationships_for_entity("g1", Some("Ownership"), None)
        .unwrap()
        .is_empty());
    assert!(matches!(
        fx.store.create_relationship(&flow),
        Err(StoreError::AlreadyExists { .. })
    ));
}

#[test]
fn relationship_needs_both_ends() {
    let fx = open();
    fx.store
        .create_entity(&entity("g1", "Asset", props(&[])))
        .unwrap();
    let version = fx.graph.version();

    let err = fx
        .store
        .create_relationship(&relationship("r1", "DataFlow", "g1", "ghost"))
        .unwrap_err();
    match &err {
        StoreError::RelationshipNotCreated { missing_end, .. } => assert_eq!(missing_end, "ghost"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.code(), ErrorCode::RelationshipNotCreated);
    assert_eq!(fx.graph.version(), version);
}

#[test]
fn relationship_update_and_remove() {
    let fx = open();
    for guid in ["g1", "g2"] {
        fx.store
            .create_entity(&entity(guid, "Asset", props(&[])))
            .unwrap();
    }
    let mut rel = relationship("r1", "Ownership", "g1", "g2");
    rel.properties = props(&[("role", "steward")]);
    fx.store.create_relationship(&rel).unwrap();

    rel.properties = props(&[("role", "owner")]);
    fx.store.update_relationship(&rel).unwrap();
    assert_eq!(fx.store.get_relationship("r1").unwrap().properties, rel.properties);

    fx.store.remove_relationship("r1").unwrap();
    assert!(fx.store.is_relationship_known("r1").unwrap().is_none());
    assert!(matches!(
        fx.store.get_relationship("r1"),
        Err(StoreError::RelationshipNotKnown { .. })
    ));
    // removing again is a no-op
    fx.store.remove_relationship("r1").unwrap();
}

#[test]
fn remove_cascades_to_classifications_and_relationships() {
    let fx = open();
    let mut detail = entity("g1", "Asset", props(&[]));
    detail.classifications = vec![classification("Certified", props(&[]))];
    fx.store.create_entity(&detail).unwrap();
    fx.store
        .create_entity(&entity("g2", "Asset", props(&[])))
        .unwrap();
    fx.store
        .create_relationship(&relationship("r1", "DataFlow", "g1", "g2"))
        .unwrap();
    let vertices = fx.graph.vertex_count();

    fx.store.remove_entity("g1").unwrap();
    assert_eq!(fx.graph.vertex_count(), vertices - 2);
    assert_eq!(fx.graph.edge_count(), 0);
    assert!(matches!(
        fx.store.get_entity_detail("g1"),
        Err(StoreError::EntityNotKnown { .. })
    ));
}

#[test]
fn remove_respects_instance_kind() {
    let fx = open();
    fx.store
        .create_entity_proxy(&proxy("g2", "Asset", REMOTE))
        .unwrap();
    fx.store.remove_entity("g2").unwrap();
    assert!(stored_vertex(&fx, "g2").is_some());

    fx.store.remove_entity_proxy("g2").unwrap();
    assert!(stored_vertex(&fx, "g2").is_none());
}

#[test]
fn reopening_keeps_identity_and_data() {
    let graph = Arc::new(MemoryGraph::new());
    let audit = MemoryAuditSink::new();
    let store = MetadataStore::open(graph.clone(), registry(), &config(), &audit).unwrap();
    store
        .create_entity(&entity("g1", "Asset", props(&[("name", "kept")])))
        .unwrap();
    let created = store.control().created;
    drop(store);

    let store = MetadataStore::open(graph.clone(), registry(), &config(), &audit).unwrap();
    assert_eq!(store.control().created, created);
    assert_eq!(
        store.get_entity_detail("g1").unwrap().properties,
        props(&[("name", "kept")])
    );
    let events = audit.events();
    assert!(matches!(events[0].payload, EventPayload::StoreCreated { .. }));
    assert!(matches!(events[1].payload, EventPayload::StoreOpened { .. }));
}

#[test]
fn configured_collection_name_is_kept_on_the_control_vertex() {
    let graph = Arc::new(MemoryGraph::new());
    let audit = MemoryAuditSink::new();
    let mut named = config();
    named.store.metadata_collection_name = Some("Sales catalog".to_string());
    let store = MetadataStore::open(graph.clone(), registry(), &named, &audit).unwrap();
    assert_eq!(
        store.control().metadata_collection_name.as_deref(),
        Some("Sales catalog")
    );
    drop(store);

    let store = MetadataStore::open(graph.clone(), registry(), &config(), &audit).unwrap();
    assert_eq!(
        store.control().metadata_collection_name.as_deref(),
        Some("Sales catalog")
    );
    drop(store);

    named.store.metadata_collection_name = Some("Finance catalog".to_string());
    MetadataStore::open(graph.clone(), registry(), &named, &audit).unwrap();
    let store = MetadataStore::open(graph, registry(), &config(), &audit).unwrap();
    assert_eq!(
        store.control().metadata_collection_name.as_deref(),
        Some("Finance catalog")
    );
}

#[test]
fn foreign_store_is_refused_without_mutation() {
    let fx = open();
    fx.store
        .create_entity(&entity("g1", "Asset", props(&[])))
        .unwrap();
    let version = fx.graph.version();

    let mut other = config();
    other.store.metadata_collection_id = "someone-else".to_string();
    let err = MetadataStore::open(fx.graph.clone(), registry(), &other, &fx.audit)
        .err()
        .expect("identity mismatch");
    assert_eq!(err.code(), ErrorCode::IdentityMismatch);
    assert_eq!(fx.graph.version(), version);
    assert!(matches!(
        fx.audit.events().last().map(|e| &e.payload),
        Some(EventPayload::IdentityMismatch { .. })
    ));
}

#[test]
fn stalled_index_surfaces_not_ready_and_writes_nothing() {
    let graph = Arc::new(MemoryGraph::with_options(MemoryGraphOptions {
        registration_delay: Duration::from_secs(3600),
    }));
    let mut mgmt = graph.management().unwrap();
    mgmt.make_property_key("ve.Asset.name", ScalarType::String)
        .unwrap();
    mgmt.commit().unwrap();

    let mut config = config();
    config.index.wait_timeout_ms = 50;
    let audit = MemoryAuditSink::new();
    let store = MetadataStore::open(graph.clone(), registry(), &config, &audit).unwrap();
    let vertices = graph.vertex_count();

    let err = store
        .create_entity(&entity("g1", "Asset", props(&[("name", "a")])))
        .unwrap_err();
    assert!(matches!(err, StoreError::IndexNotReady { .. }));
    assert_eq!(graph.vertex_count(), vertices);

    // other types are unaffected
    store
        .create_entity(&entity("p1", "Person", props(&[("name", "ann")])))
        .unwrap();
}
