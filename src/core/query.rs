//! Datastore queries
//!
//! A [`Query`] is an immutable value: every builder method consumes the
//! query and returns a new one, so composers and filters can be layered
//! without sharing mutable state.

use crate::core::field::FieldValue;
use crate::core::key::Key;
use crate::core::model::PropertyPath;
use std::fmt;

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn is_inequality(&self) -> bool {
        !matches!(self, Operator::Eq)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

/// A single `property <op> value` restriction
#[derive(Debug, Clone)]
pub struct Predicate {
    pub path: PropertyPath,
    pub op: Operator,
    pub value: FieldValue,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.path.name(), self.op.symbol(), self.value)
    }
}

/// A sort order on one property
#[derive(Debug, Clone)]
pub struct Order {
    pub path: PropertyPath,
    pub descending: bool,
}

/// An immutable datastore query
#[derive(Debug, Clone)]
pub struct Query {
    kind: String,
    ancestor: Option<Key>,
    predicates: Vec<Predicate>,
    orders: Vec<Order>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestor: None,
            predicates: Vec::new(),
            orders: Vec::new(),
        }
    }

    /// Restrict results to descendants of `ancestor`
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn filter(mut self, path: PropertyPath, op: Operator, value: FieldValue) -> Self {
        self.predicates.push(Predicate { path, op, value });
        self
    }

    pub fn order(mut self, path: PropertyPath, descending: bool) -> Self {
        self.orders.push(Order { path, descending });
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn ancestor_key(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Distinct property names carrying an inequality predicate
    pub fn inequality_properties(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for predicate in self.predicates.iter().filter(|p| p.op.is_inequality()) {
            let name = predicate.path.name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

/// Slice of a query's results to fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl FetchOptions {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    /// Merge options contributed by several composers; later values win
    pub fn merge(self, other: FetchOptions) -> Self {
        Self {
            limit: other.limit.or(self.limit),
            offset: if other.offset > 0 { other.offset } else { self.offset },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ModelSchema, PropertyDef, PropertyType};

    fn schema() -> ModelSchema {
        ModelSchema::new("Book")
            .property(PropertyDef::new("year", PropertyType::Integer))
            .property(PropertyDef::new("title", PropertyType::String))
    }

    #[test]
    fn test_query_is_a_value() {
        let schema = schema();
        let base = Query::new("Book");
        let filtered = base.clone().filter(
            schema.resolve("year").unwrap(),
            Operator::Gt,
            FieldValue::Integer(1900),
        );
        assert!(base.predicates().is_empty());
        assert_eq!(filtered.predicates().len(), 1);
        assert_eq!(filtered.kind(), "Book");
    }

    #[test]
    fn test_inequality_properties_are_distinct() {
        let schema = schema();
        let year = schema.resolve("year").unwrap();
        let query = Query::new("Book")
            .filter(year.clone(), Operator::Gt, FieldValue::Integer(1900))
            .filter(year, Operator::Lt, FieldValue::Integer(2000))
            .filter(
                schema.resolve("title").unwrap(),
                Operator::Eq,
                FieldValue::from("Emma"),
            );
        assert_eq!(query.inequality_properties(), vec!["year".to_string()]);
    }

    #[test]
    fn test_fetch_options_merge() {
        let merged = FetchOptions::default().merge(FetchOptions::page(20, 40));
        assert_eq!(merged, FetchOptions::page(20, 40));
        let kept = FetchOptions::page(20, 40).merge(FetchOptions::default());
        assert_eq!(kept, FetchOptions::page(20, 40));
    }
}
