use std::cmp::Ordering;
use std::str::FromStr;

use relay_db::mappings::models::FilterCondition;
use relay_db::records::models::{FieldValue, LocalRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Neq,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    IsNull,
    IsNotNull,
}

impl FromStr for FilterOperator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" => Ok(Self::Eq),
            "neq" | "ne" | "!=" | "<>" => Ok(Self::Neq),
            "in" => Ok(Self::In),
            "not_in" | "nin" => Ok(Self::NotIn),
            "gt" | ">" => Ok(Self::Gt),
            "gte" | ">=" => Ok(Self::Gte),
            "lt" | "<" => Ok(Self::Lt),
            "lte" | "<=" => Ok(Self::Lte),
            "contains" => Ok(Self::Contains),
            "is_null" => Ok(Self::IsNull),
            "is_not_null" => Ok(Self::IsNotNull),
            _ => Err(format!("unknown filter operator: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("unknown operator `{operator}` on field `{field}`")]
    UnknownOperator { field: String, operator: String },

    #[error("invalid comparison value for `{field}` ({operator}): {reason}")]
    InvalidValue {
        field: String,
        operator: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Comparand {
    None,
    Scalar(FieldValue),
    List(Vec<FieldValue>),
}

/// A condition with its operator and comparison value already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    field: String,
    operator: FilterOperator,
    comparand: Comparand,
}

impl CompiledFilter {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn matches(&self, record: &LocalRecord) -> bool {
        let actual = record.get(&self.field);
        match (&self.operator, &self.comparand) {
            (FilterOperator::IsNull, _) => actual.is_null(),
            (FilterOperator::IsNotNull, _) => !actual.is_null(),
            (FilterOperator::Eq, Comparand::Scalar(expected)) => values_equal(actual, expected),
            (FilterOperator::Neq, Comparand::Scalar(expected)) => !values_equal(actual, expected),
            (FilterOperator::In, Comparand::List(options)) => {
                options.iter().any(|o| values_equal(actual, o))
            }
            (FilterOperator::NotIn, Comparand::List(options)) => {
                !options.iter().any(|o| values_equal(actual, o))
            }
            (FilterOperator::Gt, Comparand::Scalar(expected)) => {
                compare(actual, expected) == Some(Ordering::Greater)
            }
            (FilterOperator::Gte, Comparand::Scalar(expected)) => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            (FilterOperator::Lt, Comparand::Scalar(expected)) => {
                compare(actual, expected) == Some(Ordering::Less)
            }
            (FilterOperator::Lte, Comparand::Scalar(expected)) => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            (FilterOperator::Contains, Comparand::Scalar(expected)) => {
                match (actual.as_text(), expected.as_text()) {
                    (Some(haystack), Some(needle)) => haystack.contains(needle),
                    _ => false,
                }
            }
            // compile_filters never pairs an operator with the wrong comparand shape.
            _ => false,
        }
    }
}

fn numeric(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) => n.as_f64(),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(actual: &FieldValue, expected: &FieldValue) -> bool {
    match (actual, expected) {
        (FieldValue::Number(_), _) | (_, FieldValue::Number(_)) => {
            match (numeric(actual), numeric(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => actual == expected,
    }
}

fn compare(actual: &FieldValue, expected: &FieldValue) -> Option<Ordering> {
    match (actual, expected) {
        (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
        _ => numeric(actual)?.partial_cmp(&numeric(expected)?),
    }
}

fn scalar(condition: &FilterCondition, value: &serde_json::Value) -> Result<FieldValue, FilterError> {
    FieldValue::try_from(value.clone()).map_err(|_| FilterError::InvalidValue {
        field: condition.field.clone(),
        operator: condition.operator.clone(),
        reason: "expected a string, number, boolean or null".to_string(),
    })
}

/// Validate conditions once per batch. Unknown operators are a configuration
/// error, never a silent pass.
pub fn compile_filters(conditions: &[FilterCondition]) -> Result<Vec<CompiledFilter>, FilterError> {
    conditions
        .iter()
        .map(|condition| {
            let operator = FilterOperator::from_str(&condition.operator).map_err(|_| {
                FilterError::UnknownOperator {
                    field: condition.field.clone(),
                    operator: condition.operator.clone(),
                }
            })?;

            let comparand = match operator {
                FilterOperator::IsNull | FilterOperator::IsNotNull => Comparand::None,
                FilterOperator::In | FilterOperator::NotIn => {
                    let items = condition.value.as_array().ok_or_else(|| {
                        FilterError::InvalidValue {
                            field: condition.field.clone(),
                            operator: condition.operator.clone(),
                            reason: "expected an array".to_string(),
                        }
                    })?;
                    Comparand::List(
                        items
                            .iter()
                            .map(|item| scalar(condition, item))
                            .collect::<Result<_, _>>()?,
                    )
                }
                _ => Comparand::Scalar(scalar(condition, &condition.value)?),
            };

            Ok(CompiledFilter {
                field: condition.field.clone(),
                operator,
                comparand,
            })
        })
        .collect()
}

/// True iff the record satisfies every filter. An empty list admits everything.
pub fn matches_all(record: &LocalRecord, filters: &[CompiledFilter]) -> bool {
    filters.iter().all(|f| f.matches(record))
}

/// Compile and evaluate in one step.
pub fn evaluate(record: &LocalRecord, conditions: &[FilterCondition]) -> Result<bool, FilterError> {
    let compiled = compile_filters(conditions)?;
    Ok(matches_all(record, &compiled))
}
