//! meridian-core: Shared model for the Meridian metadata instance store.
//!
//! This crate provides the foundational types used across all Meridian components:
//! - Instance types (entities, proxies, classifications, relationships)
//! - Type definitions and the `TypeRegistry` boundary
//! - Search condition trees and match criteria
//! - Audit events emitted by the store lifecycle
//! - The stable error-code catalog and store configuration

pub mod config;
pub mod error;
pub mod events;
pub mod search;
pub mod typedef;
pub mod types;

pub use error::{CoreError, ErrorCode};
pub use typedef::{SimpleTypeRegistry, TypeDef, TypeDefAttribute, TypeDefCategory, TypeRegistry};
pub use types::{
    Classification, ClassificationOrigin, EntityDetail, EntityProxy, InstanceAuditHeader,
    InstanceGraph, InstanceProperties, InstancePropertyValue, InstanceProvenanceType,
    InstanceStatus, InstanceType, PrimitiveDefCategory, PrimitiveValue, Relationship,
};
