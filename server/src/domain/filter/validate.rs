//! Filter validation

use super::types::{FilterField, FilterFields, QueryType};
use super::value::parse_value;
use crate::domain::error::{TraceError, TraceResult};

impl FilterFields {
    /// Check every (field_type, query_type) pair and pre-parse all values
    pub fn validate(&self) -> TraceResult<()> {
        self.traverse(&mut |field: &FilterField| field.validate_leaf())
    }
}

impl FilterField {
    fn validate_leaf(&self) -> TraceResult<()> {
        if self.field_name.is_empty() {
            return Err(TraceError::InvalidFilter(
                "filter field name is empty".to_string(),
            ));
        }
        if !self.field_type.supports(self.query_type) {
            return Err(TraceError::InvalidFilter(format!(
                "field {} of type {} does not support {}",
                self.field_name,
                self.field_type.as_str(),
                self.query_type.as_str()
            )));
        }
        if matches!(self.query_type, QueryType::Exist | QueryType::NotExist) {
            return Ok(());
        }
        for raw in &self.values {
            if parse_value(self.field_type, raw).is_none() {
                return Err(TraceError::InvalidFilter(format!(
                    "value {raw:?} of field {} is not a valid {}",
                    self.field_name,
                    self.field_type.as_str()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filter::FieldType;

    const ALL_FIELD_TYPES: [FieldType; 4] = [
        FieldType::String,
        FieldType::Long,
        FieldType::Double,
        FieldType::Bool,
    ];

    const ALL_QUERY_TYPES: [QueryType; 12] = [
        QueryType::Match,
        QueryType::Eq,
        QueryType::NotEq,
        QueryType::Lte,
        QueryType::Gte,
        QueryType::Lt,
        QueryType::Gt,
        QueryType::Exist,
        QueryType::NotExist,
        QueryType::In,
        QueryType::NotIn,
        QueryType::AlwaysTrue,
    ];

    fn sample_value(field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::String => "abc",
            FieldType::Long => "-12",
            FieldType::Double => "3.5",
            FieldType::Bool => "true",
        }
    }

    #[test]
    fn test_validity_table_is_complete() {
        let listed: &[(FieldType, &[QueryType])] = &[
            (
                FieldType::String,
                &[
                    QueryType::Match,
                    QueryType::Eq,
                    QueryType::NotEq,
                    QueryType::In,
                    QueryType::NotIn,
                    QueryType::Exist,
                    QueryType::NotExist,
                ],
            ),
            (
                FieldType::Long,
                &[
                    QueryType::Eq,
                    QueryType::NotEq,
                    QueryType::Lt,
                    QueryType::Lte,
                    QueryType::Gt,
                    QueryType::Gte,
                    QueryType::In,
                    QueryType::NotIn,
                    QueryType::Exist,
                    QueryType::NotExist,
                ],
            ),
            (
                FieldType::Double,
                &[
                    QueryType::Eq,
                    QueryType::NotEq,
                    QueryType::Lt,
                    QueryType::Lte,
                    QueryType::Gt,
                    QueryType::Gte,
                    QueryType::In,
                    QueryType::NotIn,
                    QueryType::Exist,
                    QueryType::NotExist,
                ],
            ),
            (FieldType::Bool, &[QueryType::Eq]),
        ];

        for field_type in ALL_FIELD_TYPES {
            let allowed = listed
                .iter()
                .find(|(t, _)| *t == field_type)
                .map(|(_, q)| *q)
                .unwrap();
            for query_type in ALL_QUERY_TYPES {
                let filter = FilterFields::and(vec![FilterField::new(
                    "f",
                    field_type,
                    query_type,
                    [sample_value(field_type)],
                )]);
                let result = filter.validate();
                if allowed.contains(&query_type) {
                    assert!(result.is_ok(), "{field_type:?} x {query_type:?} should pass");
                } else {
                    let err = result.unwrap_err();
                    assert_eq!(err.code(), "filter.invalid", "{field_type:?} x {query_type:?}");
                }
            }
        }
    }

    #[test]
    fn test_unparseable_values_rejected() {
        let cases = [
            (FieldType::Long, "1.5"),
            (FieldType::Long, "abc"),
            (FieldType::Double, "nope"),
            (FieldType::Bool, "yes"),
        ];
        for (field_type, raw) in cases {
            let filter = FilterFields::and(vec![FilterField::new(
                "f",
                field_type,
                QueryType::Eq,
                [raw],
            )]);
            assert!(filter.validate().is_err(), "{field_type:?} {raw}");
        }
    }

    #[test]
    fn test_nested_invalid_leaf_rejected() {
        let filter = FilterFields::and(vec![
            FilterField::new("ok", FieldType::String, QueryType::Eq, ["a"]).with_sub_filter(
                FilterFields::or(vec![FilterField::new(
                    "bad",
                    FieldType::Bool,
                    QueryType::Gt,
                    ["true"],
                )]),
            ),
        ]);
        let err = filter.validate().unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_empty_field_name_rejected() {
        let filter = FilterFields::and(vec![FilterField::new(
            "",
            FieldType::String,
            QueryType::Eq,
            ["a"],
        )]);
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_exist_ignores_values() {
        let filter = FilterFields::and(vec![FilterField::new(
            "latency",
            FieldType::Long,
            QueryType::Exist,
            Vec::<String>::new(),
        )]);
        assert!(filter.validate().is_ok());
    }
}
