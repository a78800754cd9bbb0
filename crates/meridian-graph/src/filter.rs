//! Property predicates pushed down to a backend.
//!
//! A [`Filter`] is backend-neutral: the embedded backend evaluates it
//! directly (after [`Filter::compile`]), the Neo4j backend translates it into
//! a Cypher `WHERE` clause.

use regex::Regex;

use crate::backend::GraphError;
use crate::value::{PropertyMap, Value};

/// A test applied to a single property.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Neq(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    /// Whole-value regular-expression match (String mapping).
    Regex(String),
    /// Any token of the value matches the expression, case-insensitive (Text mapping).
    TextContainsRegex(String),
    Within(Vec<Value>),
    Exists,
    NotExists,
}

/// A boolean combination of property predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    True,
    Has { key: String, predicate: Predicate },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn has(key: impl Into<String>, predicate: Predicate) -> Self {
        Self::Has {
            key: key.into(),
            predicate,
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::has(key, Predicate::Eq(value.into()))
    }

    /// Conjunction that drops trivially-true members.
    pub fn and(filters: Vec<Filter>) -> Self {
        let filters: Vec<_> = filters.into_iter().filter(|f| *f != Self::True).collect();
        match filters.len() {
            0 => Self::True,
            1 => filters.into_iter().next().unwrap_or(Self::True),
            _ => Self::And(filters),
        }
    }

    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Precompile regular expressions for repeated evaluation.
    pub fn compile(&self) -> Result<CompiledFilter, GraphError> {
        Ok(match self {
            Self::True => CompiledFilter::True,
            Self::Has { key, predicate } => CompiledFilter::Has {
                key: key.clone(),
                predicate: CompiledPredicate::new(predicate)?,
            },
            Self::And(fs) => {
                CompiledFilter::And(fs.iter().map(Filter::compile).collect::<Result<_, _>>()?)
            }
            Self::Or(fs) => {
                CompiledFilter::Or(fs.iter().map(Filter::compile).collect::<Result<_, _>>()?)
            }
            Self::Not(f) => CompiledFilter::Not(Box::new(f.compile()?)),
        })
    }
}

/// A [`Filter`] ready for in-process evaluation.
#[derive(Debug)]
pub enum CompiledFilter {
    True,
    Has {
        key: String,
        predicate: CompiledPredicate,
    },
    And(Vec<CompiledFilter>),
    Or(Vec<CompiledFilter>),
    Not(Box<CompiledFilter>),
}

impl CompiledFilter {
    pub fn matches(&self, props: &PropertyMap) -> bool {
        match self {
            Self::True => true,
            Self::Has { key, predicate } => predicate.matches(props.get(key)),
            Self::And(fs) => fs.iter().all(|f| f.matches(props)),
            Self::Or(fs) => fs.iter().any(|f| f.matches(props)),
            Self::Not(f) => !f.matches(props),
        }
    }
}

#[derive(Debug)]
pub enum CompiledPredicate {
    Plain(Predicate),
    Regex(Regex),
    TextRegex(Regex),
}

impl CompiledPredicate {
    pub fn new(predicate: &Predicate) -> Result<Self, GraphError> {
        Ok(match predicate {
            Predicate::Regex(pattern) => Self::Regex(full_match(pattern, false)?),
            Predicate::TextContainsRegex(pattern) => Self::TextRegex(full_match(pattern, true)?),
            other => Self::Plain(other.clone()),
        })
    }

    /// A missing property satisfies only `NotExists`.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return matches!(self, Self::Plain(Predicate::NotExists));
        };
        match self {
            Self::Regex(re) => value.as_str().is_some_and(|s| re.is_match(s)),
            Self::TextRegex(re) => value
                .as_str()
                .is_some_and(|s| tokenize(s).iter().any(|t| re.is_match(t))),
            Self::Plain(p) => match p {
                Predicate::Eq(v) => value.loosely_equals(v),
                Predicate::Neq(v) => !value.loosely_equals(v),
                Predicate::Lt(v) => value.compare(v).is_some_and(|o| o.is_lt()),
                Predicate::Lte(v) => value.compare(v).is_some_and(|o| o.is_le()),
                Predicate::Gt(v) => value.compare(v).is_some_and(|o| o.is_gt()),
                Predicate::Gte(v) => value.compare(v).is_some_and(|o| o.is_ge()),
                Predicate::Within(vs) => vs.iter().any(|v| value.loosely_equals(v)),
                Predicate::Exists => true,
                Predicate::NotExists => false,
                Predicate::Regex(_) | Predicate::TextContainsRegex(_) => false,
            },
        }
    }
}

fn full_match(pattern: &str, case_insensitive: bool) -> Result<Regex, GraphError> {
    let flags = if case_insensitive { "(?i)" } else { "" };
    Regex::new(&format!("{flags}^(?:{pattern})$"))
        .map_err(|e| GraphError::InvalidPredicate(format!("{pattern}: {e}")))
}

/// Split text into lowercase alphanumeric tokens, the way a Text mapping indexes it.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
