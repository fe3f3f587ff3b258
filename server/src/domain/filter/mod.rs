//! Tag and filter engine
//!
//! - `types` - the filter AST and the field/query type table
//! - `validate` - caller filter validation
//! - `matcher` - in-memory evaluation over any [`Filterable`]
//! - `value` - typed values and operand parsing
//!
//! The ClickHouse compiler for the same AST lives in
//! `data::clickhouse::filter`.

mod matcher;
mod types;
mod validate;
mod value;

pub use types::{FieldType, FilterField, FilterFields, QueryAndOr, QueryType};
pub use value::{FieldValue, Filterable, parse_bool, parse_value};
