//! Property and classification search.
//!
//! The backend narrows candidates by type, status and (when the plan
//! delegates) the property conditions; anything else runs in process. A
//! candidate that fails to map is dropped with a warning instead of failing
//! the whole search.

use std::collections::BTreeSet;

use meridian_core::search::{MatchCriteria, SearchProperties};
use meridian_core::{
    EntityDetail, InstanceProperties, InstancePropertyValue, InstanceStatus, Relationship,
    TypeDefCategory,
};
use meridian_graph::{Direction, Filter, Predicate, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::keys::{self, Prefix};
use crate::mapper::is_proxy;
use crate::planner::{PlanRequest, QueryPlan};
use crate::store::MetadataStore;

/// A search over entity details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySearch {
    /// Restrict to this type and its subtypes.
    pub type_name: Option<String>,
    /// Further restrict the valid types to these names.
    pub subtype_names: Option<Vec<String>>,
    pub conditions: Option<SearchProperties>,
    /// Allowed statuses; `None` means every status except DELETED.
    pub statuses: Option<Vec<InstanceStatus>>,
    /// Every named classification must be attached.
    pub classifications: Option<Vec<String>>,
    pub from: usize,
    /// Zero means no limit.
    pub page_size: usize,
}

/// A search over relationships.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipSearch {
    pub type_name: Option<String>,
    pub subtype_names: Option<Vec<String>>,
    pub conditions: Option<SearchProperties>,
    pub statuses: Option<Vec<InstanceStatus>>,
    pub from: usize,
    pub page_size: usize,
}

impl MetadataStore {
    pub fn find_entities(&self, search: &EntitySearch) -> Result<Vec<EntityDetail>> {
        let method = "find_entities";
        let plan = self.plan(
            method,
            TypeDefCategory::Entity,
            search.type_name.as_deref(),
            search.subtype_names.as_deref(),
            search.conditions.as_ref(),
        )?;
        let required = search.classifications.as_deref().unwrap_or_default();
        let found = self.collect_entities(method, &plan, search.statuses.as_deref(), |detail| {
            required
                .iter()
                .all(|name| detail.classifications.iter().any(|c| &c.name == name))
        })?;
        Ok(page(found, search.from, search.page_size))
    }

    pub fn find_relationships(&self, search: &RelationshipSearch) -> Result<Vec<Relationship>> {
        let method = "find_relationships";
        let plan = self.plan(
            method,
            TypeDefCategory::Relationship,
            search.type_name.as_deref(),
            search.subtype_names.as_deref(),
            search.conditions.as_ref(),
        )?;
        let found = self.collect_relationships(method, &plan, search.statuses.as_deref(), |_| true)?;
        Ok(page(found, search.from, search.page_size))
    }

    /// Flat match properties combined by `criterion` (ALL, ANY or NONE).
    ///
    /// String values match as regular expressions, everything else exactly.
    pub fn find_entities_by_property(
        &self,
        type_name: Option<&str>,
        match_properties: &InstanceProperties,
        criterion: &str,
    ) -> Result<Vec<EntityDetail>> {
        let criteria: MatchCriteria = criterion.parse()?;
        self.find_entities(&EntitySearch {
            type_name: type_name.map(str::to_string),
            conditions: Some(SearchProperties::from_match_properties(
                match_properties,
                criteria,
            )),
            ..EntitySearch::default()
        })
    }

    pub fn find_relationships_by_property(
        &self,
        type_name: Option<&str>,
        match_properties: &InstanceProperties,
        criterion: &str,
    ) -> Result<Vec<Relationship>> {
        let criteria: MatchCriteria = criterion.parse()?;
        self.find_relationships(&RelationshipSearch {
            type_name: type_name.map(str::to_string),
            conditions: Some(SearchProperties::from_match_properties(
                match_properties,
                criteria,
            )),
            ..RelationshipSearch::default()
        })
    }

    /// Entities carrying a classification, optionally matching its properties.
    pub fn find_entities_by_classification(
        &self,
        type_name: Option<&str>,
        classification: &str,
        match_properties: Option<&InstanceProperties>,
        criterion: &str,
    ) -> Result<Vec<EntityDetail>> {
        let method = "find_entities_by_classification";
        let criteria: MatchCriteria = criterion.parse()?;
        if classification.trim().is_empty() {
            return Err(StoreError::InvalidParameter {
                parameter: "classificationName".to_string(),
                method,
                reason: "must not be blank".to_string(),
            });
        }

        let entity_plan = self.plan(method, TypeDefCategory::Entity, type_name, None, None)?;
        let classification_type = self
            .registry()
            .type_def_by_name(classification)
            .filter(|d| d.category == TypeDefCategory::Classification)
            .map(|d| d.name);
        let conditions =
            match_properties.map(|p| SearchProperties::from_match_properties(p, criteria));
        let classification_plan = self.plan(
            method,
            TypeDefCategory::Classification,
            classification_type.as_deref(),
            None,
            conditions.as_ref(),
        )?;
        if entity_plan.valid_types().is_empty() {
            return Ok(Vec::new());
        }

        let filter = Filter::and(vec![
            Filter::eq(
                Prefix::Classification.key(keys::CLASSIFICATION_NAME),
                classification,
            ),
            classification_plan.pushdown().clone(),
        ]);
        let entity_filter = base_filter(Prefix::Entity, entity_plan.valid_types(), None)
            .compile()
            .map_err(StoreError::from)?;

        let mut found = self.read(|tx, mapper| {
            let mut seen = BTreeSet::new();
            let mut out = Vec::new();
            for vertex in tx.find_vertices(keys::CLASSIFICATION_LABEL, &filter)? {
                let attached = match mapper.read_classification(&vertex) {
                    Ok(c) => c,
                    Err(StoreError::Graph(e)) => return Err(e.into()),
                    Err(e) => {
                        warn!(vertex = %vertex.id, error = %e, method, "Dropping classification from search");
                        continue;
                    }
                };
                if !classification_plan.matches(&attached.properties) {
                    continue;
                }
                for edge in tx.edges(vertex.id, Direction::In, Some(keys::CLASSIFIER_LABEL))? {
                    let Some(entity) = tx.vertex(edge.out_vertex)? else {
                        continue;
                    };
                    if is_proxy(&entity)
                        || !entity_filter.matches(&entity.properties)
                        || !seen.insert(entity.id)
                    {
                        continue;
                    }
                    match mapper.read_entity_detail(tx, &entity) {
                        Ok(detail) => out.push(detail),
                        Err(StoreError::Graph(e)) => return Err(e.into()),
                        Err(e) => {
                            warn!(vertex = %entity.id, error = %e, method, "Dropping entity from search")
                        }
                    }
                }
            }
            Ok(out)
        })?;
        found.sort_by(|a, b| a.guid.cmp(&b.guid));
        debug!(classification = %classification, results = found.len(), "Classification search");
        Ok(found)
    }

    /// Entities with any string property fully matching `pattern`.
    pub fn find_entities_by_property_value(
        &self,
        type_name: Option<&str>,
        pattern: &str,
    ) -> Result<Vec<EntityDetail>> {
        let method = "find_entities_by_property_value";
        let regex = value_regex(pattern, method)?;
        let plan = self.plan(method, TypeDefCategory::Entity, type_name, None, None)?;
        self.collect_entities(method, &plan, None, |detail| {
            any_string_matches(&detail.properties, &regex)
        })
    }

    /// Relationships with any string property fully matching `pattern`.
    pub fn find_relationships_by_property_value(
        &self,
        type_name: Option<&str>,
        pattern: &str,
    ) -> Result<Vec<Relationship>> {
        let method = "find_relationships_by_property_value";
        let regex = value_regex(pattern, method)?;
        let plan = self.plan(method, TypeDefCategory::Relationship, type_name, None, None)?;
        self.collect_relationships(method, &plan, None, |relationship| {
            any_string_matches(&relationship.properties, &regex)
        })
    }

    fn plan(
        &self,
        method: &'static str,
        category: TypeDefCategory,
        type_name: Option<&str>,
        subtype_names: Option<&[String]>,
        conditions: Option<&SearchProperties>,
    ) -> Result<QueryPlan> {
        let plan = self.planner.plan(
            &PlanRequest {
                category,
                type_name,
                subtype_names,
                conditions,
            },
            method,
            |key| self.indexes.mapping_for(key),
        )?;
        self.register_types(plan.defining_types())?;
        Ok(plan)
    }

    fn collect_entities(
        &self,
        method: &'static str,
        plan: &QueryPlan,
        statuses: Option<&[InstanceStatus]>,
        keep: impl Fn(&EntityDetail) -> bool,
    ) -> Result<Vec<EntityDetail>> {
        if plan.valid_types().is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::and(vec![
            base_filter(Prefix::Entity, plan.valid_types(), statuses),
            Filter::eq(Prefix::Entity.key(keys::IS_PROXY), false),
            plan.pushdown().clone(),
        ]);
        let mut found = self.read(|tx, mapper| {
            let mut out = Vec::new();
            for vertex in tx.find_vertices(keys::ENTITY_LABEL, &filter)? {
                match mapper.read_entity_detail(tx, &vertex) {
                    Ok(detail) if plan.matches(&detail.properties) && keep(&detail) => {
                        out.push(detail)
                    }
                    Ok(_) => {}
                    Err(StoreError::Graph(e)) => return Err(e.into()),
                    Err(e) => {
                        warn!(vertex = %vertex.id, error = %e, method, "Dropping entity from search")
                    }
                }
            }
            Ok(out)
        })?;
        found.sort_by(|a, b| a.guid.cmp(&b.guid));
        debug!(method, kind = ?plan.kind(), results = found.len(), "Entity search");
        Ok(found)
    }

    fn collect_relationships(
        &self,
        method: &'static str,
        plan: &QueryPlan,
        statuses: Option<&[InstanceStatus]>,
        keep: impl Fn(&Relationship) -> bool,
    ) -> Result<Vec<Relationship>> {
        if plan.valid_types().is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::and(vec![
            base_filter(Prefix::Relationship, plan.valid_types(), statuses),
            plan.pushdown().clone(),
        ]);
        let mut found = self.read(|tx, mapper| {
            let mut out = Vec::new();
            for edge in tx.find_edges(keys::RELATIONSHIP_LABEL, &filter)? {
                match mapper.read_relationship(tx, &edge) {
                    Ok(r) if plan.matches(&r.properties) && keep(&r) => out.push(r),
                    Ok(_) => {}
                    Err(StoreError::Graph(e)) => return Err(e.into()),
                    Err(e) => {
                        warn!(edge = %edge.id, error = %e, method, "Dropping relationship from search")
                    }
                }
            }
            Ok(out)
        })?;
        found.sort_by(|a, b| a.guid.cmp(&b.guid));
        debug!(method, kind = ?plan.kind(), results = found.len(), "Relationship search");
        Ok(found)
    }
}

/// Type and status restriction shared by every search.
pub(crate) fn base_filter(
    prefix: Prefix,
    valid_types: &[String],
    statuses: Option<&[InstanceStatus]>,
) -> Filter {
    let types = valid_types.iter().map(|t| Value::from(t.as_str())).collect();
    Filter::and(vec![
        Filter::has(prefix.key(keys::TYPE_NAME), Predicate::Within(types)),
        Filter::has(prefix.key(keys::STATUS), Predicate::Within(status_ordinals(statuses))),
    ])
}

/// Ordinals of the allowed statuses; by default everything but DELETED.
pub(crate) fn status_ordinals(statuses: Option<&[InstanceStatus]>) -> Vec<Value> {
    match statuses {
        Some(list) => list.iter().map(|s| Value::Int(s.ordinal())).collect(),
        None => InstanceStatus::ALL
            .into_iter()
            .filter(|s| *s != InstanceStatus::Deleted)
            .map(|s| Value::Int(s.ordinal()))
            .collect(),
    }
}

fn value_regex(pattern: &str, method: &'static str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| StoreError::InvalidParameter {
        parameter: "searchCriteria".to_string(),
        method,
        reason: e.to_string(),
    })
}

fn any_string_matches(properties: &InstanceProperties, regex: &Regex) -> bool {
    properties.iter().any(|(_, value)| value_matches(value, regex))
}

fn value_matches(value: &InstancePropertyValue, regex: &Regex) -> bool {
    match value {
        InstancePropertyValue::Primitive(p) => p.as_str().is_some_and(|s| regex.is_match(s)),
        InstancePropertyValue::Enum { symbolic_name, .. } => regex.is_match(symbolic_name),
        InstancePropertyValue::Array(items) => items.iter().any(|v| value_matches(v, regex)),
        InstancePropertyValue::Map(entries) | InstancePropertyValue::Struct(entries) => {
            entries.values().any(|v| value_matches(v, regex))
        }
    }
}

fn page<T>(items: Vec<T>, from: usize, page_size: usize) -> Vec<T> {
    let rest = items.into_iter().skip(from);
    if page_size == 0 {
        rest.collect()
    } else {
        rest.take(page_size).collect()
    }
}
