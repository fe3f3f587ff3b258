//! Filter compilation to ClickHouse SQL
//!
//! Produces a WHERE fragment with `?` placeholders plus the values to bind,
//! in placeholder order. Field names and tag keys are always bound, never
//! interpolated.

use clickhouse::query::Query;

use crate::domain::filter::{
    FieldType, FieldValue, FilterField, FilterFields, QueryAndOr, QueryType, parse_value,
};
use crate::domain::span::fields;

use super::ClickhouseError;

/// A value bound to one placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    String(String),
    Long(i64),
    Double(f64),
    UInt8(u8),
}

impl From<FieldValue> for QueryParam {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::String(s) => Self::String(s),
            FieldValue::Long(v) => Self::Long(v),
            FieldValue::Double(v) => Self::Double(v),
            FieldValue::Bool(v) => Self::UInt8(u8::from(v)),
        }
    }
}

/// Bind `params` to the next placeholders of `query`
pub fn bind_params(mut query: Query, params: &[QueryParam]) -> Query {
    for param in params {
        query = match param {
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Long(v) => query.bind(*v),
            QueryParam::Double(v) => query.bind(*v),
            QueryParam::UInt8(v) => query.bind(*v),
        };
    }
    query
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

pub fn compile_filter(filter: &FilterFields) -> Result<CompiledFilter, ClickhouseError> {
    let mut params = Vec::new();
    let sql = compile_fields(filter, &mut params)?;
    Ok(CompiledFilter { sql, params })
}

fn compile_fields(
    filter: &FilterFields,
    params: &mut Vec<QueryParam>,
) -> Result<String, ClickhouseError> {
    let (joiner, empty) = match filter.op() {
        QueryAndOr::And => (" AND ", "1 = 1"),
        QueryAndOr::Or => (" OR ", "1 = 0"),
    };
    if filter.filter_fields.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = filter
        .filter_fields
        .iter()
        .map(|field| compile_field(field, params))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(joiner)))
}

fn compile_field(
    field: &FilterField,
    params: &mut Vec<QueryParam>,
) -> Result<String, ClickhouseError> {
    let leaf = compile_leaf(field, params)?;
    match &field.sub_filter {
        Some(sub) => {
            let sub_sql = compile_fields(sub, params)?;
            Ok(format!("({leaf} AND {sub_sql})"))
        }
        None => Ok(leaf),
    }
}

fn compile_leaf(
    field: &FilterField,
    params: &mut Vec<QueryParam>,
) -> Result<String, ClickhouseError> {
    if field.query_type == QueryType::AlwaysTrue {
        return Ok("1 = 1".to_string());
    }
    if field.field_name.is_empty() {
        return Err(ClickhouseError::Filter("empty field name".to_string()));
    }

    let operands = field
        .values
        .iter()
        .map(|raw| {
            parse_value(field.field_type, raw).map(QueryParam::from).ok_or_else(|| {
                ClickhouseError::Filter(format!(
                    "value {raw:?} of {} is not a {}",
                    field.field_name,
                    field.field_type.as_str()
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let column = resolve_column(&field.field_name, field.field_type);
    let zero = zero_literal(field.field_type);

    let sql = match field.query_type {
        QueryType::Exist => format!("{} != {zero}", column.emit(params)),
        QueryType::NotExist => format!("{} = {zero}", column.emit(params)),
        QueryType::Match => {
            if operands.is_empty() {
                return Ok("1 = 0".to_string());
            }
            let mut parts = Vec::with_capacity(operands.len());
            for op in operands {
                parts.push(format!("position({}, ?) > 0", column.emit(params)));
                params.push(op);
            }
            format!("({})", parts.join(" OR "))
        }
        QueryType::In | QueryType::NotIn => {
            let is_in = field.query_type == QueryType::In;
            if operands.is_empty() {
                return Ok(if is_in { "1 = 0" } else { "1 = 1" }.to_string());
            }
            let placeholders = vec!["?"; operands.len()].join(", ");
            let expr = column.emit(params);
            params.extend(operands);
            let op = if is_in { "IN" } else { "NOT IN" };
            format!("{expr} {op} ({placeholders})")
        }
        QueryType::Eq
        | QueryType::NotEq
        | QueryType::Lt
        | QueryType::Lte
        | QueryType::Gt
        | QueryType::Gte => {
            if field.field_type == FieldType::Bool
                && !matches!(field.query_type, QueryType::Eq | QueryType::NotEq)
            {
                return Ok("1 = 0".to_string());
            }
            let Some(first) = operands.into_iter().next() else {
                return Ok("1 = 0".to_string());
            };
            let op = match field.query_type {
                QueryType::Eq => "=",
                QueryType::NotEq => "!=",
                QueryType::Lt => "<",
                QueryType::Lte => "<=",
                QueryType::Gt => ">",
                _ => ">=",
            };
            let expr = column.emit(params);
            params.push(first);
            format!("{expr} {op} ?")
        }
        QueryType::AlwaysTrue => "1 = 1".to_string(),
    };
    Ok(sql)
}

/// A column expression and the tag-key parameters its placeholders take
struct Column {
    expr: String,
    keys: Vec<QueryParam>,
}

impl Column {
    /// Expression text, pushing its key parameters for this occurrence
    fn emit(&self, params: &mut Vec<QueryParam>) -> &str {
        params.extend(self.keys.iter().cloned());
        &self.expr
    }
}

/// Tag map columns read for a custom field of this type, in lookup order
///
/// A key missing from every map reads as the last map's default.
fn tag_columns(field_type: FieldType) -> &'static [&'static str] {
    match field_type {
        FieldType::String => &["tags_string", "tags_byte", "system_tags_string"],
        FieldType::Long => &["tags_long", "system_tags_long"],
        FieldType::Double => &["tags_float", "system_tags_float"],
        FieldType::Bool => &["tags_bool"],
    }
}

/// Built-in fields map to their columns, nullable ones read as empty
/// strings. Other names read the first tag map of the declared type that
/// contains the key.
fn resolve_column(name: &str, field_type: FieldType) -> Column {
    if let Some(column) = builtin_column(name) {
        return Column {
            expr: column.to_string(),
            keys: Vec::new(),
        };
    }

    let key = QueryParam::String(name.to_string());
    let Some((last, leading)) = tag_columns(field_type).split_last() else {
        return Column {
            expr: "''".to_string(),
            keys: Vec::new(),
        };
    };
    if leading.is_empty() {
        return Column {
            expr: format!("{last}[?]"),
            keys: vec![key],
        };
    }

    let mut branches = Vec::with_capacity(leading.len() * 2 + 1);
    let mut keys = Vec::with_capacity(leading.len() * 2 + 1);
    for map in leading {
        branches.push(format!("mapContains({map}, ?)"));
        branches.push(format!("{map}[?]"));
        keys.push(key.clone());
        keys.push(key.clone());
    }
    branches.push(format!("{last}[?]"));
    keys.push(key);

    Column {
        expr: format!("multiIf({})", branches.join(", ")),
        keys,
    }
}

fn builtin_column(name: &str) -> Option<&'static str> {
    let column = match name {
        fields::START_TIME => "start_time",
        fields::SPAN_ID => "span_id",
        fields::PARENT_ID => "parent_id",
        fields::TRACE_ID => "trace_id",
        fields::DURATION => "duration",
        fields::WORKSPACE_ID => "space_id",
        fields::SPAN_NAME => "span_name",
        fields::SPAN_TYPE => "span_type",
        fields::STATUS_CODE => "status_code",
        fields::CALL_TYPE => "ifNull(call_type, '')",
        fields::PSM => "ifNull(psm, '')",
        fields::LOG_ID => "ifNull(logid, '')",
        fields::METHOD => "ifNull(method, '')",
        fields::INPUT => "input",
        fields::OUTPUT => "output",
        fields::OBJECT_STORAGE => "ifNull(object_storage, '')",
        fields::LOGIC_DELETE_TIME => "logic_delete_date",
        _ => return None,
    };
    Some(column)
}

fn zero_literal(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "''",
        _ => "0",
    }
}
