//! Filter AST
//!
//! One recursive, typed predicate language shared by the store query
//! compiler and the in-memory matcher.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryAndOr {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Long,
    Double,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Match,
    Eq,
    NotEq,
    Lte,
    Gte,
    Lt,
    Gt,
    Exist,
    NotExist,
    In,
    NotIn,
    AlwaysTrue,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Double => "double",
            Self::Bool => "bool",
        }
    }

    /// Query types a caller-supplied filter may use on this field type
    pub fn query_types(&self) -> &'static [QueryType] {
        use QueryType::*;
        match self {
            Self::String => &[Match, Eq, NotEq, In, NotIn, Exist, NotExist],
            Self::Long | Self::Double => &[Eq, NotEq, Lt, Lte, Gt, Gte, In, NotIn, Exist, NotExist],
            Self::Bool => &[Eq],
        }
    }

    pub fn supports(&self, query_type: QueryType) -> bool {
        self.query_types().contains(&query_type)
    }
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Eq => "eq",
            Self::NotEq => "not_eq",
            Self::Lte => "lte",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Exist => "exist",
            Self::NotExist => "not_exist",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::AlwaysTrue => "always_true",
        }
    }
}

/// A list of predicates joined by `query_and_or` (AND when unset)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_and_or: Option<QueryAndOr>,
    #[serde(default)]
    pub filter_fields: Vec<FilterField>,
}

/// A single predicate, optionally narrowed by a nested filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterField {
    #[serde(default)]
    pub field_name: String,
    pub field_type: FieldType,
    pub query_type: QueryType,
    #[serde(default)]
    pub values: Vec<String>,
    /// Carried for wire compatibility; a leaf always ANDs with its sub-filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_and_or: Option<QueryAndOr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_filter: Option<Box<FilterFields>>,
}

impl FilterFields {
    pub fn and(filter_fields: Vec<FilterField>) -> Self {
        Self {
            query_and_or: Some(QueryAndOr::And),
            filter_fields,
        }
    }

    pub fn or(filter_fields: Vec<FilterField>) -> Self {
        Self {
            query_and_or: Some(QueryAndOr::Or),
            filter_fields,
        }
    }

    pub fn op(&self) -> QueryAndOr {
        self.query_and_or.unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.filter_fields.is_empty()
    }

    /// Visit every leaf in document order, sub-filters included
    pub fn traverse<E, F>(&self, f: &mut F) -> Result<(), E>
    where
        F: FnMut(&FilterField) -> Result<(), E>,
    {
        for field in &self.filter_fields {
            f(field)?;
            if let Some(sub) = &field.sub_filter {
                sub.traverse(f)?;
            }
        }
        Ok(())
    }
}

impl FilterField {
    pub fn new<I, S>(
        field_name: impl Into<String>,
        field_type: FieldType,
        query_type: QueryType,
        values: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field_name: field_name.into(),
            field_type,
            query_type,
            values: values.into_iter().map(Into::into).collect(),
            query_and_or: None,
            sub_filter: None,
        }
    }

    /// An `always_true` leaf whose only effect is its nested filter
    pub fn wrap(filter: FilterFields) -> Self {
        Self {
            field_name: String::new(),
            field_type: FieldType::String,
            query_type: QueryType::AlwaysTrue,
            values: Vec::new(),
            query_and_or: None,
            sub_filter: Some(Box::new(filter)),
        }
    }

    pub fn with_sub_filter(mut self, filter: FilterFields) -> Self {
        self.sub_filter = Some(Box::new(filter));
        self
    }
}
