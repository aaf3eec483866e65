use chrono::NaiveDate;
use relay_db::mappings::models::FieldTransform;
use relay_db::records::models::FieldValue;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct TransformError {
    pub reason: String,
}

impl TransformError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub fn transform_name(transform: &FieldTransform) -> &'static str {
    match transform {
        FieldTransform::Uppercase => "uppercase",
        FieldTransform::Lowercase => "lowercase",
        FieldTransform::Trim => "trim",
        FieldTransform::ToString => "to_string",
        FieldTransform::ToNumber => "to_number",
        FieldTransform::ToBoolean => "to_boolean",
        FieldTransform::Default { .. } => "default",
        FieldTransform::Prefix { .. } => "prefix",
        FieldTransform::DateOnly => "date_only",
    }
}

/// Transforms that map an external value straight back onto the local column.
pub fn is_reversible(transform: Option<&FieldTransform>) -> bool {
    matches!(
        transform,
        None | Some(FieldTransform::Trim) | Some(FieldTransform::ToString)
    )
}

fn render(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Bool(b) => Some(b.to_string()),
        FieldValue::Number(n) => Some(n.to_string()),
        FieldValue::Text(s) => Some(s.clone()),
    }
}

fn parse_number(raw: &str) -> Option<FieldValue> {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        return Some(FieldValue::from(i));
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(FieldValue::from_f64)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Calendar-valid `YYYY-MM-DD`, in that exact shape.
fn parse_iso_date(candidate: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(candidate, "%Y-%m-%d")
        .ok()
        .filter(|date| date.format("%Y-%m-%d").to_string() == candidate)
}

/// Apply one transform. Null passes through everything except `default`.
pub fn apply_transform(
    transform: &FieldTransform,
    value: FieldValue,
) -> Result<FieldValue, TransformError> {
    if let FieldTransform::Default { value: fallback } = transform {
        return Ok(if value.is_null() {
            fallback.clone()
        } else {
            value
        });
    }
    if value.is_null() {
        return Ok(FieldValue::Null);
    }

    match transform {
        FieldTransform::Uppercase => Ok(match value {
            FieldValue::Text(s) => FieldValue::Text(s.to_uppercase()),
            other => other,
        }),
        FieldTransform::Lowercase => Ok(match value {
            FieldValue::Text(s) => FieldValue::Text(s.to_lowercase()),
            other => other,
        }),
        FieldTransform::Trim => Ok(match value {
            FieldValue::Text(s) => FieldValue::Text(s.trim().to_string()),
            other => other,
        }),
        FieldTransform::ToString => Ok(render(&value).map_or(FieldValue::Null, FieldValue::Text)),
        FieldTransform::ToNumber => match value {
            FieldValue::Number(_) => Ok(value),
            FieldValue::Bool(b) => Ok(FieldValue::from(i64::from(b))),
            FieldValue::Text(s) => parse_number(&s)
                .ok_or_else(|| TransformError::new(format!("{s:?} is not a number"))),
            FieldValue::Null => Ok(FieldValue::Null),
        },
        FieldTransform::ToBoolean => match value {
            FieldValue::Bool(_) => Ok(value),
            FieldValue::Number(ref n) => Ok(FieldValue::Bool(n.as_f64() != Some(0.0))),
            FieldValue::Text(s) => parse_bool(&s)
                .map(FieldValue::Bool)
                .ok_or_else(|| TransformError::new(format!("{s:?} is not a boolean"))),
            FieldValue::Null => Ok(FieldValue::Null),
        },
        FieldTransform::Prefix { value: prefix } => Ok(render(&value)
            .map_or(FieldValue::Null, |s| FieldValue::Text(format!("{prefix}{s}")))),
        FieldTransform::DateOnly => match value {
            FieldValue::Text(s) => {
                let head = s.get(..10).unwrap_or_default();
                match parse_iso_date(head) {
                    Some(date) => Ok(FieldValue::Text(date.format("%Y-%m-%d").to_string())),
                    None => Err(TransformError::new(format!(
                        "{s:?} does not start with a valid YYYY-MM-DD date"
                    ))),
                }
            }
            other => Err(TransformError::new(format!(
                "expected a date string, got {}",
                other.type_name()
            ))),
        },
        FieldTransform::Default { .. } => Ok(value),
    }
}
