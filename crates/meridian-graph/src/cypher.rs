//! Cypher rendering of backend filters.
//!
//! Every leaf is wrapped in `coalesce(.., false)` so a missing property
//! evaluates to false rather than null; `NOT` over a missing property is
//! therefore true, matching the embedded backend.

use crate::filter::{Filter, Predicate};
use crate::value::Value;

/// Pattern used to tokenize text-mapped values, mirroring [`crate::filter::tokenize`].
pub const TOKEN_SPLIT: &str = "[^\\p{L}\\p{N}]+";

/// A rendered `WHERE` expression and its positional parameters (`$p0`, `$p1`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct CypherFilter {
    pub clause: String,
    pub params: Vec<(String, Value)>,
}

/// Quote an identifier with backticks.
pub fn ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Render `filter` against the variable `alias`.
pub fn render(alias: &str, filter: &Filter) -> CypherFilter {
    let mut params = Vec::new();
    let clause = render_node(alias, filter, &mut params);
    CypherFilter { clause, params }
}

fn render_node(alias: &str, filter: &Filter, params: &mut Vec<(String, Value)>) -> String {
    match filter {
        Filter::True => "true".to_string(),
        Filter::Has { key, predicate } => render_leaf(alias, key, predicate, params),
        Filter::And(fs) if fs.is_empty() => "true".to_string(),
        Filter::Or(fs) if fs.is_empty() => "false".to_string(),
        Filter::And(fs) => join(alias, fs, " AND ", params),
        Filter::Or(fs) => join(alias, fs, " OR ", params),
        Filter::Not(f) => format!("NOT ({})", render_node(alias, f, params)),
    }
}

fn join(alias: &str, fs: &[Filter], op: &str, params: &mut Vec<(String, Value)>) -> String {
    let parts: Vec<String> = fs.iter().map(|f| render_node(alias, f, params)).collect();
    format!("({})", parts.join(op))
}

fn bind(params: &mut Vec<(String, Value)>, value: Value) -> String {
    let name = format!("p{}", params.len());
    params.push((name.clone(), value));
    format!("${name}")
}

fn render_leaf(
    alias: &str,
    key: &str,
    predicate: &Predicate,
    params: &mut Vec<(String, Value)>,
) -> String {
    let prop = format!("{alias}.{}", ident(key));
    let expr = match predicate {
        Predicate::Eq(v) => format!("{prop} = {}", bind(params, v.clone())),
        Predicate::Neq(v) => format!("{prop} <> {}", bind(params, v.clone())),
        Predicate::Lt(v) => format!("{prop} < {}", bind(params, v.clone())),
        Predicate::Lte(v) => format!("{prop} <= {}", bind(params, v.clone())),
        Predicate::Gt(v) => format!("{prop} > {}", bind(params, v.clone())),
        Predicate::Gte(v) => format!("{prop} >= {}", bind(params, v.clone())),
        Predicate::Regex(pattern) => format!("{prop} =~ {}", bind(params, pattern.as_str().into())),
        Predicate::TextContainsRegex(pattern) => {
            let p = bind(params, format!("(?i){pattern}").into());
            let split = bind(params, TOKEN_SPLIT.into());
            format!(
                "any(t IN apoc.text.split(toLower({prop}), {split}) WHERE t <> '' AND t =~ {p})"
            )
        }
        Predicate::Within(values) => {
            let leaves: Vec<Filter> = values
                .iter()
                .map(|v| Filter::has(key, Predicate::Eq(v.clone())))
                .collect();
            return render_node(alias, &Filter::Or(leaves), params);
        }
        Predicate::Exists => format!("{prop} IS NOT NULL"),
        Predicate::NotExists => format!("{prop} IS NULL"),
    };
    format!("coalesce({expr}, false)")
}
