//! `where` clauses for the `getTransactions` query.
//!
//! A [`Filter`] is a small boolean tree over transaction fields. It renders
//! to a GraphQL input literal and can also be evaluated locally, which keeps
//! the server-side filter and the client-side re-check in one place.

use std::fmt;

use tracklog_core::types::{EventQuery, SourceEvent};

/// A transaction field the indexer can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    BlockHeight,
    TxIndex,
    /// `pkg_path` of any `GnoEvent` in the transaction response.
    EventPkgPath,
    /// `type` of any `GnoEvent` in the transaction response.
    EventType,
}

impl Field {
    /// Path from the transaction root to the scalar.
    fn path(self) -> &'static [&'static str] {
        match self {
            Self::BlockHeight => &["block_height"],
            Self::TxIndex => &["index"],
            Self::EventPkgPath => &["response", "events", "GnoEvent", "pkg_path"],
            Self::EventType => &["response", "events", "GnoEvent", "type"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Lt,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Gt => "gt",
            Self::Lt => "lt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            // JSON string escaping is valid GraphQL string escaping.
            Self::Str(s) => match serde_json::to_string(s) {
                Ok(quoted) => f.write_str(&quoted),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Cmp { field: Field, op: Op, value: Value },
}

impl Filter {
    pub fn cmp(field: Field, op: Op, value: Value) -> Self {
        Self::Cmp { field, op, value }
    }

    /// `field == value` for one value, an `_or` of equalities for several,
    /// `None` for an empty list.
    pub fn any_of(field: Field, values: &[String]) -> Option<Self> {
        let mut eqs: Vec<Filter> = values
            .iter()
            .map(|v| Self::cmp(field, Op::Eq, Value::Str(v.clone())))
            .collect();
        match eqs.len() {
            0 => None,
            1 => eqs.pop(),
            _ => Some(Self::Or(eqs)),
        }
    }

    /// Evaluate against one transaction. Event fields match when any event does.
    pub fn matches(&self, height: i64, index: i64, events: &[SourceEvent]) -> bool {
        match self {
            Self::And(fs) => fs.iter().all(|f| f.matches(height, index, events)),
            Self::Or(fs) => fs.iter().any(|f| f.matches(height, index, events)),
            Self::Cmp { field, op, value } => match (field, value) {
                (Field::BlockHeight, Value::Int(v)) => compare(height, *op, *v),
                (Field::TxIndex, Value::Int(v)) => compare(index, *op, *v),
                (Field::EventPkgPath, Value::Str(v)) => {
                    events.iter().any(|e| compare_str(&e.pkg_path, *op, v))
                }
                (Field::EventType, Value::Str(v)) => {
                    events.iter().any(|e| compare_str(&e.event_type, *op, v))
                }
                _ => false,
            },
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Self::And(fs) => render_list(out, "_and", fs),
            Self::Or(fs) => render_list(out, "_or", fs),
            Self::Cmp { field, op, value } => {
                let path = field.path();
                for key in path {
                    out.push_str("{ ");
                    out.push_str(key);
                    out.push_str(": ");
                }
                out.push_str(&format!("{{ {}: {} }}", op.name(), value));
                for _ in path {
                    out.push_str(" }");
                }
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out);
        f.write_str(&out)
    }
}

fn render_list(out: &mut String, key: &str, items: &[Filter]) {
    out.push_str("{ ");
    out.push_str(key);
    out.push_str(": [");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.render(out);
    }
    out.push_str("] }");
}

fn compare(lhs: i64, op: Op, rhs: i64) -> bool {
    match op {
        Op::Eq => lhs == rhs,
        Op::Gt => lhs > rhs,
        Op::Lt => lhs < rhs,
    }
}

fn compare_str(lhs: &str, op: Op, rhs: &str) -> bool {
    match op {
        Op::Eq => lhs == rhs,
        Op::Gt => lhs > rhs,
        Op::Lt => lhs < rhs,
    }
}

/// Transactions strictly after `query.after`, up to and including
/// `query.latest_height`.
pub fn range_filter(query: &EventQuery) -> Filter {
    let after = query.after;
    Filter::Or(vec![
        Filter::And(vec![
            Filter::cmp(Field::BlockHeight, Op::Gt, Value::Int(after.height)),
            // inclusive upper bound
            Filter::cmp(
                Field::BlockHeight,
                Op::Lt,
                Value::Int(query.latest_height.saturating_add(1)),
            ),
        ]),
        Filter::And(vec![
            Filter::cmp(Field::BlockHeight, Op::Eq, Value::Int(after.height)),
            Filter::cmp(Field::TxIndex, Op::Gt, Value::Int(after.tx_index)),
        ]),
    ])
}

/// The full `where` clause for one poll: range AND packages AND event types.
pub fn build_where(query: &EventQuery) -> Filter {
    let mut clauses = vec![range_filter(query)];
    clauses.extend(Filter::any_of(Field::EventPkgPath, &query.packages));
    clauses.extend(Filter::any_of(Field::EventType, &query.event_types));
    match clauses.len() {
        1 => clauses.remove(0),
        _ => Filter::And(clauses),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklog_core::types::Position;

    fn query(packages: &[&str], types: &[&str]) -> EventQuery {
        EventQuery {
            packages: packages.iter().map(|s| s.to_string()).collect(),
            event_types: types.iter().map(|s| s.to_string()).collect(),
            after: Position::new(100, 5),
            latest_height: 120,
        }
    }

    fn ev(pkg: &str, ty: &str) -> SourceEvent {
        SourceEvent {
            event_type: ty.into(),
            pkg_path: pkg.into(),
            attrs: vec![],
        }
    }

    #[test]
    fn range_matches_query_predicate() {
        let q = query(&[], &[]);
        let f = build_where(&q);
        let cases = [
            ((100, 5), false),
            ((100, 6), true),
            ((101, 0), true),
            ((120, 9), true),
            ((121, 0), false),
            ((99, 9), false),
        ];
        for ((h, i), want) in cases {
            assert_eq!(f.matches(h, i, &[]), want, "({h}, {i})");
            assert_eq!(q.matches_position(h, i), want, "({h}, {i})");
        }
    }

    #[test]
    fn renders_range_clause() {
        let f = build_where(&query(&[], &[]));
        assert_eq!(
            f.to_string(),
            "{ _or: [\
             { _and: [{ block_height: { gt: 100 } }, { block_height: { lt: 121 } }] }, \
             { _and: [{ block_height: { eq: 100 } }, { index: { gt: 5 } }] }\
             ] }"
        );
    }

    #[test]
    fn single_package_uses_eq() {
        let f = Filter::any_of(Field::EventPkgPath, &["gno.land/r/demo/boards".into()]).unwrap();
        assert_eq!(
            f.to_string(),
            r#"{ response: { events: { GnoEvent: { pkg_path: { eq: "gno.land/r/demo/boards" } } } } }"#
        );
    }

    #[test]
    fn several_packages_use_or() {
        let f = Filter::any_of(Field::EventPkgPath, &["a".into(), "b".into()]).unwrap();
        assert!(matches!(&f, Filter::Or(v) if v.len() == 2));
        assert!(f.to_string().starts_with("{ _or: ["));
        assert!(Filter::any_of(Field::EventType, &[]).is_none());
    }

    #[test]
    fn filters_combine_with_and() {
        let f = build_where(&query(&["pkg/a", "pkg/b"], &["Transfer"]));
        assert!(f.matches(110, 0, &[ev("pkg/b", "Transfer")]));
        assert!(!f.matches(110, 0, &[ev("pkg/c", "Transfer")]));
        assert!(!f.matches(110, 0, &[ev("pkg/a", "Mint")]));
        assert!(!f.matches(130, 0, &[ev("pkg/a", "Transfer")]));
    }

    #[test]
    fn string_values_are_escaped() {
        let f = Filter::cmp(Field::EventType, Op::Eq, Value::Str("a\"b".into()));
        assert!(f.to_string().contains(r#"{ eq: "a\"b" }"#));
    }
}
