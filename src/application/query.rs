//! Query vocabulary shared by the repository facade and entity stores.
//!
//! Everything here is plain data: it serializes canonically so that it can
//! feed cache-key derivation, and stores interpret it however they query.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator for a single attribute predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "like")]
    Like,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "like",
        }
    }

    /// Parse an operator symbol. `<>` is accepted as an alias of `!=`.
    pub fn parse(symbol: &str) -> Option<Self> {
        match symbol.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Some(Operator::Eq),
            "!=" | "<>" => Some(Operator::Ne),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Ge),
            "like" => Some(Operator::Like),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of one `find_where` entry.
///
/// Serializes the way callers write conditions by hand: a bare value for
/// equality, or an `[attribute, operator, value]` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Compare(String, Operator, Value),
    Equals(Value),
}

/// Conjunctive set of `find_where` conditions keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(BTreeMap<String, Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `attribute = value`.
    pub fn equals(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0
            .insert(attribute.into(), Condition::Equals(value.into()));
        self
    }

    /// Entry `key` holding the triple `(attribute, operator, value)`.
    pub fn compare(
        mut self,
        key: impl Into<String>,
        attribute: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.0.insert(
            key.into(),
            Condition::Compare(attribute.into(), operator, value.into()),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_predicates(&self) -> Vec<Predicate> {
        self.0
            .iter()
            .map(|(key, condition)| match condition {
                Condition::Equals(value) => Predicate::Compare {
                    attribute: key.clone(),
                    operator: Operator::Eq,
                    value: value.clone(),
                },
                Condition::Compare(attribute, operator, value) => Predicate::Compare {
                    attribute: attribute.clone(),
                    operator: *operator,
                    value: value.clone(),
                },
            })
            .collect()
    }
}

impl From<&crate::domain::entities::Attributes> for Conditions {
    fn from(attributes: &crate::domain::entities::Attributes) -> Self {
        Self(
            attributes
                .iter()
                .map(|(name, value)| (name.clone(), Condition::Equals(value.clone())))
                .collect(),
        )
    }
}

/// A single filter understood by entity stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        attribute: String,
        operator: Operator,
        value: Value,
    },
    In {
        attribute: String,
        values: Vec<Value>,
    },
    NotIn {
        attribute: String,
        values: Vec<Value>,
    },
    Between {
        attribute: String,
        low: Value,
        high: Value,
    },
}

impl Predicate {
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare {
            attribute: attribute.into(),
            operator: Operator::Eq,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }

    /// Anything other than `desc` (case-insensitive) sorts ascending.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("desc") {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// Column projection. The default selects every column (`["*"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Columns(Vec<String>);

impl Columns {
    pub const ALL: &'static str = "*";

    pub fn all() -> Self {
        Self(vec![Self::ALL.to_string()])
    }

    pub fn only<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Self::all();
        }
        Self(columns)
    }

    pub fn is_all(&self) -> bool {
        self.0.iter().any(|column| column == Self::ALL)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for Columns {
    fn default() -> Self {
        Self::all()
    }
}

/// Relationship names accepted by [`QueryState::add_relations`].
///
/// A string may hold several comma-delimited names.
pub trait IntoRelations {
    fn into_relations(self) -> Vec<String>;
}

fn split_relations(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

impl IntoRelations for &str {
    fn into_relations(self) -> Vec<String> {
        split_relations(self)
    }
}

impl IntoRelations for String {
    fn into_relations(self) -> Vec<String> {
        split_relations(&self)
    }
}

impl IntoRelations for Vec<String> {
    fn into_relations(self) -> Vec<String> {
        self.iter().flat_map(|name| split_relations(name)).collect()
    }
}

impl IntoRelations for Vec<&str> {
    fn into_relations(self) -> Vec<String> {
        self.into_iter().flat_map(split_relations).collect()
    }
}

impl IntoRelations for &[&str] {
    fn into_relations(self) -> Vec<String> {
        self.iter().flat_map(|name| split_relations(name)).collect()
    }
}

impl<const N: usize> IntoRelations for [&str; N] {
    fn into_relations(self) -> Vec<String> {
        self.into_iter().flat_map(split_relations).collect()
    }
}

/// Eager loads and ordering accumulated on a repository before a read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    with: Vec<String>,
    order: Vec<OrderBy>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append relationship names, skipping ones already pending.
    pub fn add_relations(&mut self, relations: impl IntoRelations) {
        for name in relations.into_relations() {
            if !self.with.contains(&name) {
                self.with.push(name);
            }
        }
    }

    pub fn push_order(&mut self, column: impl Into<String>, direction: Direction) {
        self.order.push(OrderBy {
            column: column.into(),
            direction,
        });
    }

    pub fn relations(&self) -> &[String] {
        &self.with
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.with.is_empty() && self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.with.clear();
        self.order.clear();
    }

    /// Copy of this state with extra relations merged in.
    pub fn merged_with(&self, relations: &[String]) -> Self {
        let mut merged = self.clone();
        merged.add_relations(relations.to_vec());
        merged
    }

    /// Normalized textual form used as the query-shape part of cache keys.
    ///
    /// Relation order is irrelevant to the result, so names are sorted;
    /// ordering clauses keep their sequence because it changes the result.
    pub fn signature(&self) -> String {
        let mut relations = self.with.clone();
        relations.sort();
        let order = self
            .order
            .iter()
            .map(|clause| format!("{}:{}", clause.column, clause.direction.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        format!("with=[{}];order=[{}]", relations.join(","), order)
    }
}

/// Column projection plus per-call eager loads for a single read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Select {
    pub columns: Columns,
    pub with: Vec<String>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Columns::only(columns);
        self
    }

    pub fn with(mut self, relations: impl IntoRelations) -> Self {
        for name in relations.into_relations() {
            if !self.with.contains(&name) {
                self.with.push(name);
            }
        }
        self
    }
}
