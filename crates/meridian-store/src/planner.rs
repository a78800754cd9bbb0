//! Chooses between index-delegated and in-process property filtering.
//!
//! A query names properties by short name. Every valid type resolves each
//! referenced short name to a qualified mirror key; when all valid types agree
//! on one key per short name the whole condition tree can be pushed to the
//! backend as a [`Filter`] (Delegate). When some short name resolves to
//! different keys on different types, or a condition compares a value the
//! mirror cannot hold, the backend only narrows by type and status and the
//! tree is evaluated against each instance's property bag (Iterate).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use meridian_core::search::{MatchCriteria, PropertyComparisonOperator, SearchProperties};
use meridian_core::{InstanceProperties, InstancePropertyValue, TypeDefCategory, TypeRegistry};
use meridian_graph::{CompiledPredicate, Filter, IndexMapping, Predicate};
use regex::Regex;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::keys::{Prefix, QUALIFIER_SEPARATOR};
use crate::mapper::primitive_value;
use crate::qualifier;

type Op = PropertyComparisonOperator;

/// How property conditions are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanKind {
    /// Conditions are pushed to the backend.
    Delegate,
    /// The backend filters by type and status only; conditions run in process.
    Iterate { reason: String },
}

/// The outcome of planning one search.
#[derive(Debug)]
pub struct QueryPlan {
    valid_types: Vec<String>,
    qualified: BTreeMap<String, BTreeSet<String>>,
    kind: PlanKind,
    pushdown: Filter,
    residual: Option<Condition>,
}

impl QueryPlan {
    /// Type names a result may have. Empty means nothing can match.
    pub fn valid_types(&self) -> &[String] {
        &self.valid_types
    }

    pub fn kind(&self) -> &PlanKind {
        &self.kind
    }

    /// Qualified names a short name resolves to across the valid types.
    pub fn qualified(&self, short_name: &str) -> Vec<&str> {
        self.qualified
            .get(short_name)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Types defining the properties the conditions reference.
    pub fn defining_types(&self) -> BTreeSet<&str> {
        self.qualified
            .values()
            .flatten()
            .filter_map(|name| name.rsplit_once(QUALIFIER_SEPARATOR).map(|(owner, _)| owner))
            .collect()
    }

    /// The condition part of the backend filter; `True` when iterating.
    pub fn pushdown(&self) -> &Filter {
        &self.pushdown
    }

    /// In-process check of a candidate's property bag. Always true when delegating.
    pub fn matches(&self, properties: &InstanceProperties) -> bool {
        self.residual
            .as_ref()
            .map_or(true, |condition| condition.matches(properties))
    }
}

/// What to plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub category: TypeDefCategory,
    pub type_name: Option<&'a str>,
    pub subtype_names: Option<&'a [String]>,
    pub conditions: Option<&'a SearchProperties>,
}

pub struct QueryPlanner {
    registry: Arc<dyn TypeRegistry>,
}

impl QueryPlanner {
    pub fn new(registry: Arc<dyn TypeRegistry>) -> Self {
        Self { registry }
    }

    /// Validate a request and decide how its conditions run.
    ///
    /// `mapping` reports how string values under a mirror key are indexed.
    pub fn plan(
        &self,
        request: &PlanRequest<'_>,
        method: &'static str,
        mapping: impl Fn(&str) -> IndexMapping,
    ) -> Result<QueryPlan> {
        if let Some(conditions) = request.conditions {
            validate_group(conditions, method)?;
        }
        let valid_types = self.valid_types(request, method)?;
        let prefix = Prefix::for_category(request.category);

        let referenced = request
            .conditions
            .map(SearchProperties::referenced_properties)
            .unwrap_or_default();
        let mut qualified: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut non_primitive: BTreeSet<String> = BTreeSet::new();
        if !referenced.is_empty() {
            let registry = self.registry.as_ref();
            for type_name in &valid_types {
                for (short, name) in qualifier::qualify_referenced(registry, type_name, &referenced)? {
                    qualified.entry(short).or_default().insert(name);
                }
                for (short, attr) in qualifier::attribute_definitions(registry, type_name)? {
                    if referenced.contains(&short) && attr.primitive_category().is_none() {
                        non_primitive.insert(short);
                    }
                }
            }
        }

        let kind = decide(&qualified, &non_primitive, request.conditions);
        let context = Context {
            prefix,
            qualified: &qualified,
            mapping: &mapping,
        };
        let (pushdown, residual) = match (&kind, request.conditions) {
            (_, None) => (Filter::True, None),
            (PlanKind::Delegate, Some(c)) => (context.group_filter(c), None),
            (PlanKind::Iterate { .. }, Some(c)) => {
                (Filter::True, Some(context.group_condition(c, method)?))
            }
        };

        debug!(
            method,
            category = ?request.category,
            valid_types = valid_types.len(),
            ?kind,
            "Planned search"
        );
        Ok(QueryPlan {
            valid_types,
            qualified,
            kind,
            pushdown,
            residual,
        })
    }

    fn valid_types(&self, request: &PlanRequest<'_>, method: &'static str) -> Result<Vec<String>> {
        let mut names: Vec<String> = match request.type_name {
            Some(name) => {
                let def = self
                    .registry
                    .type_def_by_name(name)
                    .ok_or_else(|| StoreError::TypeNotKnown {
                        name: name.to_string(),
                    })?;
                if def.category != request.category {
                    return Err(StoreError::InvalidParameter {
                        parameter: "typeName".to_string(),
                        method,
                        reason: format!(
                            "{name} is a {:?} type, expected {:?}",
                            def.category, request.category
                        ),
                    });
                }
                self.registry
                    .subtypes_of(name)
                    .into_iter()
                    .map(|t| t.name)
                    .collect()
            }
            None => self
                .registry
                .active_type_defs()
                .into_iter()
                .filter(|t| t.category == request.category)
                .map(|t| t.name)
                .collect(),
        };
        if let Some(limit) = request.subtype_names {
            names.retain(|t| limit.contains(t));
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

fn decide(
    qualified: &BTreeMap<String, BTreeSet<String>>,
    non_primitive: &BTreeSet<String>,
    conditions: Option<&SearchProperties>,
) -> PlanKind {
    if let Some((short, names)) = qualified.iter().find(|(_, names)| names.len() > 1) {
        return PlanKind::Iterate {
            reason: format!("property {short} resolves to {names:?} across valid types"),
        };
    }
    if let Some(short) = non_primitive.iter().next() {
        return PlanKind::Iterate {
            reason: format!("property {short} is not a primitive on every valid type"),
        };
    }
    if let Some(short) = conditions.and_then(first_non_scalar_leaf) {
        return PlanKind::Iterate {
            reason: format!("condition on {short} compares a non-primitive value"),
        };
    }
    PlanKind::Delegate
}

fn first_non_scalar_leaf(group: &SearchProperties) -> Option<String> {
    group.conditions.iter().find_map(|c| match (&c.nested, &c.property) {
        (Some(nested), _) => first_non_scalar_leaf(nested),
        (None, Some(property)) => {
            let scalar = match (c.operator, &c.value) {
                (Some(Op::IsNull | Op::NotNull), _) | (_, None) => true,
                (Some(Op::In), Some(InstancePropertyValue::Array(items))) => {
                    items.iter().all(|i| i.as_primitive().is_some())
                }
                (_, Some(value)) => value.as_primitive().is_some(),
            };
            (!scalar).then(|| property.clone())
        }
        (None, None) => None,
    })
}

// ── Validation ────────────────────────────────────────────────────

fn invalid(method: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidParameter {
        parameter: "searchProperties".to_string(),
        method,
        reason: reason.into(),
    }
}

fn validate_group(group: &SearchProperties, method: &'static str) -> Result<()> {
    for condition in &group.conditions {
        match (&condition.property, condition.operator, &condition.nested) {
            (None, None, Some(nested)) if condition.value.is_none() => {
                validate_group(nested, method)?
            }
            (Some(property), Some(op), None) if !property.trim().is_empty() => {
                validate_leaf(property, op, condition.value.as_ref(), method)?
            }
            _ => {
                return Err(invalid(
                    method,
                    "each condition must be either a property test or a nested group",
                ))
            }
        }
    }
    Ok(())
}

fn validate_leaf(
    property: &str,
    op: PropertyComparisonOperator,
    value: Option<&InstancePropertyValue>,
    method: &'static str,
) -> Result<()> {
    match (op, value) {
        (Op::IsNull | Op::NotNull, _) => Ok(()),
        (_, None) => Err(invalid(method, format!("condition on {property} has no value"))),
        (Op::Like, Some(v)) => match v.as_primitive().and_then(|p| p.as_str()) {
            Some(pattern) => Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| invalid(method, format!("pattern for {property}: {e}"))),
            None => Err(invalid(method, format!("LIKE on {property} needs a string pattern"))),
        },
        (Op::In, Some(InstancePropertyValue::Array(_))) => Ok(()),
        (Op::In, Some(_)) => Err(invalid(method, format!("IN on {property} needs an array value"))),
        (Op::Lt | Op::Lte | Op::Gt | Op::Gte, Some(v)) if v.as_primitive().is_none() => Err(
            invalid(method, format!("ordering on {property} needs a primitive value")),
        ),
        _ => Ok(()),
    }
}

// ── Translation ───────────────────────────────────────────────────

struct Context<'a> {
    prefix: Prefix,
    qualified: &'a BTreeMap<String, BTreeSet<String>>,
    mapping: &'a dyn Fn(&str) -> IndexMapping,
}

impl Context<'_> {
    fn key_for(&self, short: &str) -> Option<String> {
        self.qualified
            .get(short)
            .and_then(|names| names.iter().next())
            .map(|name| self.prefix.mirror(name))
    }

    fn mapping_for(&self, short: &str) -> IndexMapping {
        self.key_for(short)
            .map_or(IndexMapping::String, |key| (self.mapping)(&key))
    }

    fn group_filter(&self, group: &SearchProperties) -> Filter {
        if group.conditions.is_empty() {
            return Filter::True;
        }
        let members: Vec<Filter> = group
            .conditions
            .iter()
            .map(|c| match (&c.nested, &c.property, c.operator) {
                (Some(nested), _, _) => self.group_filter(nested),
                (None, Some(property), Some(op)) => self.leaf_filter(property, op, c.value.as_ref()),
                _ => Filter::Or(Vec::new()),
            })
            .collect();
        match group.match_criteria {
            MatchCriteria::All => Filter::and(members),
            MatchCriteria::Any => Filter::Or(members),
            MatchCriteria::None => Filter::not(Filter::Or(members)),
        }
    }

    fn leaf_filter(
        &self,
        property: &str,
        op: PropertyComparisonOperator,
        value: Option<&InstancePropertyValue>,
    ) -> Filter {
        let Some(key) = self.key_for(property) else {
            // no valid type defines it, so it is absent everywhere
            return if op == Op::IsNull {
                Filter::True
            } else {
                Filter::Or(Vec::new())
            };
        };
        let mapping = (self.mapping)(&key);
        match predicate(op, value, mapping) {
            Some(p) => Filter::has(key, p),
            None => Filter::Or(Vec::new()),
        }
    }

    fn group_condition(&self, group: &SearchProperties, method: &'static str) -> Result<Condition> {
        let mut members = Vec::with_capacity(group.conditions.len());
        for c in &group.conditions {
            let member = match (&c.nested, &c.property, c.operator) {
                (Some(nested), _, _) => self.group_condition(nested, method)?,
                (None, Some(property), Some(op)) => Condition::Leaf {
                    property: property.clone(),
                    test: self.leaf_test(property, op, c.value.as_ref(), method)?,
                },
                _ => return Err(invalid(method, "malformed condition")),
            };
            members.push(member);
        }
        Ok(Condition::Group {
            criteria: group.match_criteria,
            members,
        })
    }

    fn leaf_test(
        &self,
        property: &str,
        op: PropertyComparisonOperator,
        value: Option<&InstancePropertyValue>,
        method: &'static str,
    ) -> Result<LeafTest> {
        if let Some(p) = predicate(op, value, self.mapping_for(property)) {
            let compiled = CompiledPredicate::new(&p)
                .map_err(|e| invalid(method, format!("condition on {property}: {e}")))?;
            return Ok(LeafTest::Scalar(compiled));
        }
        match (op, value) {
            (Op::Eq, Some(v)) => Ok(LeafTest::Equals(v.clone())),
            (Op::Neq, Some(v)) => Ok(LeafTest::NotEquals(v.clone())),
            (Op::In, Some(InstancePropertyValue::Array(items))) => {
                Ok(LeafTest::Within(items.clone()))
            }
            _ => Err(invalid(
                method,
                format!("condition on {property} cannot be evaluated"),
            )),
        }
    }
}

/// The backend predicate for a leaf, if its value is expressible as scalars.
fn predicate(
    op: PropertyComparisonOperator,
    value: Option<&InstancePropertyValue>,
    mapping: IndexMapping,
) -> Option<Predicate> {
    let scalar = || value.and_then(InstancePropertyValue::as_primitive).map(primitive_value);
    Some(match op {
        Op::Eq => Predicate::Eq(scalar()?),
        Op::Neq => Predicate::Neq(scalar()?),
        Op::Lt => Predicate::Lt(scalar()?),
        Op::Lte => Predicate::Lte(scalar()?),
        Op::Gt => Predicate::Gt(scalar()?),
        Op::Gte => Predicate::Gte(scalar()?),
        Op::Like => {
            let pattern = value
                .and_then(InstancePropertyValue::as_primitive)
                .and_then(|p| p.as_str())?
                .to_string();
            match mapping {
                IndexMapping::String => Predicate::Regex(pattern),
                IndexMapping::Text => Predicate::TextContainsRegex(pattern),
            }
        }
        Op::In => match value? {
            InstancePropertyValue::Array(items) => Predicate::Within(
                items
                    .iter()
                    .map(|i| i.as_primitive().map(primitive_value))
                    .collect::<Option<Vec<_>>>()?,
            ),
            _ => return None,
        },
        Op::IsNull => Predicate::NotExists,
        Op::NotNull => Predicate::Exists,
    })
}

// ── In-process evaluation ─────────────────────────────────────────

#[derive(Debug)]
enum Condition {
    Leaf { property: String, test: LeafTest },
    Group {
        criteria: MatchCriteria,
        members: Vec<Condition>,
    },
}

#[derive(Debug)]
enum LeafTest {
    Scalar(CompiledPredicate),
    Equals(InstancePropertyValue),
    NotEquals(InstancePropertyValue),
    Within(Vec<InstancePropertyValue>),
}

impl Condition {
    fn matches(&self, properties: &InstanceProperties) -> bool {
        match self {
            Self::Leaf { property, test } => test.matches(properties.get(property)),
            Self::Group { members, .. } if members.is_empty() => true,
            Self::Group { criteria, members } => match criteria {
                MatchCriteria::All => members.iter().all(|m| m.matches(properties)),
                MatchCriteria::Any => members.iter().any(|m| m.matches(properties)),
                MatchCriteria::None => !members.iter().any(|m| m.matches(properties)),
            },
        }
    }
}

impl LeafTest {
    fn matches(&self, actual: Option<&InstancePropertyValue>) -> bool {
        match self {
            Self::Scalar(predicate) => match actual {
                None => predicate.matches(None),
                Some(InstancePropertyValue::Primitive(p)) => {
                    predicate.matches(Some(&primitive_value(p)))
                }
                Some(_) => matches!(predicate, CompiledPredicate::Plain(Predicate::Exists)),
            },
            Self::Equals(expected) => actual == Some(expected),
            Self::NotEquals(expected) => actual.is_some_and(|a| a != expected),
            Self::Within(options) => actual.is_some_and(|a| options.contains(a)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::search::PropertyCondition;
    use meridian_core::{PrimitiveDefCategory, SimpleTypeRegistry, TypeDef, TypeDefAttribute};

    fn attr(name: &str) -> TypeDefAttribute {
        TypeDefAttribute::primitive(name, PrimitiveDefCategory::String)
    }

    /// A{name} ← B{name} ← C{name}, plus an unrelated X{name}.
    fn registry() -> Arc<SimpleTypeRegistry> {
        Arc::new(SimpleTypeRegistry::with_types([
            TypeDef::new("a", "A", TypeDefCategory::Entity)
                .with_attribute(attr("name"))
                .with_attribute(attr("description")),
            TypeDef::new("b", "B", TypeDefCategory::Entity)
                .with_super_type("A")
                .with_attribute(attr("name")),
            TypeDef::new("c", "C", TypeDefCategory::Entity)
                .with_super_type("B")
                .with_attribute(attr("name"))
                .with_attribute(TypeDefAttribute::primitive(
                    "size",
                    PrimitiveDefCategory::Long,
                )),
            TypeDef::new("x", "X", TypeDefCategory::Entity).with_attribute(attr("name")),
            TypeDef::new("r", "Link", TypeDefCategory::Relationship),
        ]))
    }

    fn name_is(value: &str) -> SearchProperties {
        SearchProperties::new(MatchCriteria::All).with(PropertyCondition::leaf(
            "name",
            Op::Eq,
            Some(InstancePropertyValue::string(value)),
        ))
    }

    fn plan(type_name: Option<&str>, conditions: &SearchProperties) -> Result<QueryPlan> {
        let planner = QueryPlanner::new(registry());
        planner.plan(
            &PlanRequest {
                category: TypeDefCategory::Entity,
                type_name,
                subtype_names: None,
                conditions: Some(conditions),
            },
            "test",
            |_| IndexMapping::String,
        )
    }

    #[test]
    fn vertical_duplicates_resolve_to_the_root_definition() {
        let conditions = name_is("foo");
        let plan = plan(Some("A"), &conditions).unwrap();
        assert_eq!(plan.valid_types(), ["A", "B", "C"]);
        assert_eq!(plan.qualified("name"), ["A.name"]);
        assert_eq!(plan.defining_types(), BTreeSet::from(["A"]));
        assert_eq!(plan.kind(), &PlanKind::Delegate);
        assert_eq!(
            plan.pushdown(),
            &Filter::eq("ve.A.name", "foo")
        );

        // starting below the root gives the same answer
        let plan = self::plan(Some("C"), &conditions).unwrap();
        assert_eq!(plan.qualified("name"), ["A.name"]);
        assert_eq!(plan.kind(), &PlanKind::Delegate);
    }

    #[test]
    fn horizontal_collision_iterates() {
        let plan = plan(None, &name_is("foo")).unwrap();
        assert_eq!(plan.valid_types(), ["A", "B", "C", "X"]);
        assert_eq!(plan.qualified("name"), ["A.name", "X.name"]);
        assert_eq!(plan.defining_types(), BTreeSet::from(["A", "X"]));
        assert!(matches!(plan.kind(), PlanKind::Iterate { .. }));
        assert_eq!(plan.pushdown(), &Filter::True);

        let hit = InstanceProperties::new().with("name", InstancePropertyValue::string("foo"));
        let miss = InstanceProperties::new().with("name", InstancePropertyValue::string("bar"));
        assert!(plan.matches(&hit));
        assert!(!plan.matches(&miss));
    }

    #[test]
    fn unreferenced_collisions_do_not_matter() {
        let conditions = SearchProperties::new(MatchCriteria::All).with(PropertyCondition::leaf(
            "size",
            Op::Gt,
            Some(InstancePropertyValue::long(10)),
        ));
        let plan = plan(None, &conditions).unwrap();
        assert_eq!(plan.kind(), &PlanKind::Delegate);
    }

    #[test]
    fn subtype_limit_narrows_valid_types() {
        let planner = QueryPlanner::new(registry());
        let limit = vec!["C".to_string(), "X".to_string()];
        let plan = planner
            .plan(
                &PlanRequest {
                    category: TypeDefCategory::Entity,
                    type_name: Some("A"),
                    subtype_names: Some(&limit),
                    conditions: None,
                },
                "test",
                |_| IndexMapping::String,
            )
            .unwrap();
        assert_eq!(plan.valid_types(), ["C"]);
    }

    #[test]
    fn malformed_nodes_are_rejected() {
        let mixed = PropertyCondition {
            nested: Some(name_is("x")),
            ..PropertyCondition::leaf("name", Op::Eq, Some(InstancePropertyValue::string("y")))
        };
        let conditions = SearchProperties::new(MatchCriteria::All).with(mixed);
        assert!(matches!(
            plan(Some("A"), &conditions),
            Err(StoreError::InvalidParameter { .. })
        ));

        let no_value = SearchProperties::new(MatchCriteria::All)
            .with(PropertyCondition::leaf("name", Op::Eq, None));
        assert!(plan(Some("A"), &no_value).is_err());

        let bad_regex = SearchProperties::new(MatchCriteria::All).with(PropertyCondition::leaf(
            "name",
            Op::Like,
            Some(InstancePropertyValue::string("(")),
        ));
        assert!(plan(Some("A"), &bad_regex).is_err());

        let empty = SearchProperties::new(MatchCriteria::All).with(PropertyCondition::default());
        assert!(plan(Some("A"), &empty).is_err());
    }

    #[test]
    fn criteria_combine_filters() {
        let conditions = SearchProperties::new(MatchCriteria::None)
            .with(PropertyCondition::leaf(
                "name",
                Op::Like,
                Some(InstancePropertyValue::string("fo.*")),
            ))
            .with(PropertyCondition::leaf("description", Op::IsNull, None));
        let planner = QueryPlanner::new(registry());
        let plan = planner
            .plan(
                &PlanRequest {
                    category: TypeDefCategory::Entity,
                    type_name: Some("A"),
                    subtype_names: None,
                    conditions: Some(&conditions),
                },
                "test",
                |key| {
                    if key.ends_with(".description") {
                        IndexMapping::Text
                    } else {
                        IndexMapping::String
                    }
                },
            )
            .unwrap();
        assert_eq!(
            plan.pushdown(),
            &Filter::not(Filter::Or(vec![
                Filter::has("ve.A.name", Predicate::Regex("fo.*".to_string())),
                Filter::has("ve.A.description", Predicate::NotExists),
            ]))
        );
    }

    #[test]
    fn unknown_property_matches_nothing() {
        let conditions = SearchProperties::new(MatchCriteria::All).with(PropertyCondition::leaf(
            "colour",
            Op::Eq,
            Some(InstancePropertyValue::string("red")),
        ));
        let plan = plan(Some("A"), &conditions).unwrap();
        assert_eq!(plan.pushdown(), &Filter::Or(Vec::new()));
    }

    #[test]
    fn structured_values_force_iteration() {
        let wanted = InstancePropertyValue::Array(vec![InstancePropertyValue::string("a")]);
        let conditions = SearchProperties::new(MatchCriteria::All).with(PropertyCondition::leaf(
            "name",
            Op::Eq,
            Some(wanted.clone()),
        ));
        let plan = plan(Some("A"), &conditions).unwrap();
        assert!(matches!(plan.kind(), PlanKind::Iterate { .. }));
        assert!(plan.matches(&InstanceProperties::new().with("name", wanted)));
        assert!(!plan.matches(
            &InstanceProperties::new().with("name", InstancePropertyValue::string("a"))
        ));
    }

    #[test]
    fn category_mismatch_is_invalid() {
        let conditions = name_is("x");
        assert!(matches!(
            plan(Some("Link"), &conditions),
            Err(StoreError::InvalidParameter { .. })
        ));
        assert!(matches!(
            plan(Some("Nope"), &conditions),
            Err(StoreError::TypeNotKnown { .. })
        ));
    }
}
