//! Structural query descriptions.
//!
//! A `QueryDescription` is the operator tree of a relation with predicates
//! and sort keys rendered to text. A persistence layer can walk it (or
//! its `Display` form) to fetch the rows a relation needs.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Operator tree of a relation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryDescription {
    Set {
        name: String,
    },
    Selection {
        operand: Box<QueryDescription>,
        predicate: String,
    },
    InnerJoin {
        left: Box<QueryDescription>,
        right: Box<QueryDescription>,
        predicate: String,
    },
    SetProjection {
        operand: Box<QueryDescription>,
        set: String,
    },
    AttributesProjection {
        operand: Box<QueryDescription>,
        attributes: Vec<String>,
    },
    Ordering {
        operand: Box<QueryDescription>,
        keys: Vec<String>,
    },
    Singleton {
        operand: Box<QueryDescription>,
    },
}

impl QueryDescription {
    /// Names of the base sets referenced, left to right, without repeats.
    pub fn set_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_set_names(&mut out);
        out
    }

    fn collect_set_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            QueryDescription::Set { name } => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            QueryDescription::InnerJoin { left, right, .. } => {
                left.collect_set_names(out);
                right.collect_set_names(out);
            }
            QueryDescription::Selection { operand, .. }
            | QueryDescription::SetProjection { operand, .. }
            | QueryDescription::AttributesProjection { operand, .. }
            | QueryDescription::Ordering { operand, .. }
            | QueryDescription::Singleton { operand } => operand.collect_set_names(out),
        }
    }

    /// Number of nodes on the longest path down to a base set, inclusive.
    pub fn depth(&self) -> usize {
        match self {
            QueryDescription::Set { .. } => 1,
            QueryDescription::InnerJoin { left, right, .. } => 1 + left.depth().max(right.depth()),
            QueryDescription::Selection { operand, .. }
            | QueryDescription::SetProjection { operand, .. }
            | QueryDescription::AttributesProjection { operand, .. }
            | QueryDescription::Ordering { operand, .. }
            | QueryDescription::Singleton { operand } => 1 + operand.depth(),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[String]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "]")
}

impl fmt::Display for QueryDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryDescription::Set { name } => write!(f, "{}", name),
            QueryDescription::Selection { operand, predicate } => {
                write!(f, "select({}, {})", operand, predicate)
            }
            QueryDescription::InnerJoin { left, right, predicate } => {
                write!(f, "join({}, {}, {})", left, right, predicate)
            }
            QueryDescription::SetProjection { operand, set } => write!(f, "project({}, {})", operand, set),
            QueryDescription::AttributesProjection { operand, attributes } => {
                write!(f, "project({}, ", operand)?;
                write_list(f, attributes)?;
                write!(f, ")")
            }
            QueryDescription::Ordering { operand, keys } => {
                write!(f, "order({}, ", operand)?;
                write_list(f, keys)?;
                write!(f, ")")
            }
            QueryDescription::Singleton { operand } => write!(f, "first({})", operand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    fn set(name: &str) -> Box<QueryDescription> {
        Box::new(QueryDescription::Set { name: name.into() })
    }

    #[test]
    fn test_display() {
        let query = QueryDescription::Singleton {
            operand: Box::new(QueryDescription::Ordering {
                operand: Box::new(QueryDescription::InnerJoin {
                    left: set("users"),
                    right: Box::new(QueryDescription::Selection {
                        operand: set("photos"),
                        predicate: "photos.public = true".into(),
                    }),
                    predicate: "photos.user_id = users.id".into(),
                }),
                keys: vec!["users.name asc".into()],
            }),
        };
        assert_eq!(
            query.to_string(),
            "first(order(join(users, select(photos, photos.public = true), photos.user_id = users.id), [users.name asc]))"
        );
        assert_eq!(query.depth(), 5);
    }

    #[test]
    fn test_set_names_dedup() {
        let query = QueryDescription::InnerJoin {
            left: set("users"),
            right: Box::new(QueryDescription::AttributesProjection {
                operand: set("users"),
                attributes: vec!["users.name".into()],
            }),
            predicate: "users.id = users.id".into(),
        };
        assert_eq!(query.set_names(), vec!["users"]);
        assert!(query.to_string().contains("project(users, [users.name])"));
    }
}
