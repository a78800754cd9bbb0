//! Search conditions: flat match properties and nested condition trees.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{InstanceProperties, InstancePropertyValue};

/// How per-property predicates combine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCriteria {
    #[default]
    All,
    Any,
    None,
}

impl FromStr for MatchCriteria {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "ANY" => Ok(Self::Any),
            "NONE" => Ok(Self::None),
            _ => Err(CoreError::InvalidMatchCriteria(s.to_string())),
        }
    }
}

impl fmt::Display for MatchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "ALL",
            Self::Any => "ANY",
            Self::None => "NONE",
        })
    }
}

/// Comparison applied by a leaf condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyComparisonOperator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Regular-expression match on string values.
    Like,
    /// Value is an array; matches if the property equals any element.
    In,
    IsNull,
    NotNull,
}

/// One node of a condition tree: either a leaf or a nested group, never both.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PropertyCondition {
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub operator: Option<PropertyComparisonOperator>,
    #[serde(default)]
    pub value: Option<InstancePropertyValue>,
    #[serde(default)]
    pub nested: Option<SearchProperties>,
}

impl PropertyCondition {
    pub fn leaf(
        property: impl Into<String>,
        operator: PropertyComparisonOperator,
        value: Option<InstancePropertyValue>,
    ) -> Self {
        Self {
            property: Some(property.into()),
            operator: Some(operator),
            value,
            nested: None,
        }
    }

    pub fn group(nested: SearchProperties) -> Self {
        Self {
            nested: Some(nested),
            ..Self::default()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.nested.is_none()
    }
}

/// A group of conditions combined by a match criterion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchProperties {
    pub conditions: Vec<PropertyCondition>,
    #[serde(default)]
    pub match_criteria: MatchCriteria,
}

impl SearchProperties {
    pub fn new(match_criteria: MatchCriteria) -> Self {
        Self {
            conditions: Vec::new(),
            match_criteria,
        }
    }

    pub fn with(mut self, condition: PropertyCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Convert a flat match-properties bag into a one-level condition group.
    ///
    /// String values are treated as regular expressions, everything else as
    /// an exact match.
    pub fn from_match_properties(props: &InstanceProperties, criteria: MatchCriteria) -> Self {
        let conditions = props
            .iter()
            .map(|(name, value)| {
                let op = match value.as_primitive().and_then(|p| p.as_str()) {
                    Some(_) => PropertyComparisonOperator::Like,
                    None => PropertyComparisonOperator::Eq,
                };
                PropertyCondition::leaf(name.clone(), op, Some(value.clone()))
            })
            .collect();
        Self {
            conditions,
            match_criteria: criteria,
        }
    }

    /// Every property short name referenced anywhere in the tree.
    pub fn referenced_properties(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_properties(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_properties(&self, out: &mut Vec<String>) {
        for c in &self.conditions {
            if let Some(p) = &c.property {
                out.push(p.clone());
            }
            if let Some(n) = &c.nested {
                n.collect_properties(out);
            }
        }
    }
}
