//! Conversion of stored scalar values to their canonical external form.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

use super::schema::AttributeType;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
/// Decimal digits an `f64` carries without loss. Longer decimals stay text.
const F64_EXACT_DIGITS: usize = 15;
const DATETIME_INPUT_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A stored value that does not fit its declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot convert {value} to {expected}")]
pub struct ConversionError {
    /// Human-readable name of the target type.
    pub expected: &'static str,
    /// The offending stored value, rendered as JSON.
    pub value: String,
}

impl ConversionError {
    fn new(expected: &'static str, value: &Value) -> Self {
        Self {
            expected,
            value: value.to_string(),
        }
    }
}

/// Convert a stored scalar to its canonical representation.
///
/// Nulls stay null for every type. Reference types are not scalars and are
/// returned unchanged.
///
/// # Examples
/// ```
/// use eventproducer::domain::conversion::convert_scalar;
/// use eventproducer::domain::schema::AttributeType;
/// use serde_json::json;
///
/// let value = convert_scalar(AttributeType::Date, &json!("2021-03-04 10:00:00")).unwrap();
/// assert_eq!(value, json!("2021-03-04"));
/// ```
pub fn convert_scalar(
    attribute_type: AttributeType,
    value: &Value,
) -> Result<Value, ConversionError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match attribute_type {
        AttributeType::String | AttributeType::Character => Ok(to_text(value)),
        AttributeType::Integer => to_integer(value),
        AttributeType::Decimal => to_decimal(value),
        AttributeType::Boolean => to_boolean(value),
        AttributeType::Date => to_date(value),
        AttributeType::DateTime => to_datetime(value),
        AttributeType::Json
        | AttributeType::Geometry
        | AttributeType::Reference
        | AttributeType::ManyReference
        | AttributeType::Other => Ok(value.clone()),
    }
}

fn to_text(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        other => Value::String(other.to_string()),
    }
}

fn to_integer(value: &Value) -> Result<Value, ConversionError> {
    match value {
        Value::Number(number) if number.is_i64() || number.is_u64() => Ok(value.clone()),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ConversionError::new("integer", value)),
        _ => Err(ConversionError::new("integer", value)),
    }
}

fn to_decimal(value: &Value) -> Result<Value, ConversionError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(text) => {
            let trimmed = text.trim();
            let digits =
                significant_digits(trimmed).ok_or_else(|| ConversionError::new("decimal", value))?;
            if digits > F64_EXACT_DIGITS {
                return Ok(Value::String(trimmed.to_owned()));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| ConversionError::new("decimal", value))
        }
        _ => Err(ConversionError::new("decimal", value)),
    }
}

/// Significant digits of a plain or exponent-notation decimal, or `None`
/// when `text` is not one.
fn significant_digits(text: &str) -> Option<usize> {
    let is_sign = |ch: char| ch == '+' || ch == '-';
    let unsigned = text.strip_prefix(is_sign).unwrap_or(text);
    let (mantissa, exponent) = match unsigned.split_once(|ch: char| ch == 'e' || ch == 'E') {
        Some((mantissa, exponent)) => (mantissa, Some(exponent)),
        None => (unsigned, None),
    };
    if let Some(exponent) = exponent {
        let digits = exponent.strip_prefix(is_sign).unwrap_or(exponent);
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
    }
    let (integer, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = || integer.chars().chain(fraction.chars());
    if (integer.is_empty() && fraction.is_empty()) || !digits().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(digits().skip_while(|ch| *ch == '0').count())
}

fn to_boolean(value: &Value) -> Result<Value, ConversionError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "j" | "y" | "1" => Ok(Value::Bool(true)),
            "false" | "f" | "n" | "0" => Ok(Value::Bool(false)),
            _ => Err(ConversionError::new("boolean", value)),
        },
        _ => Err(ConversionError::new("boolean", value)),
    }
}

fn to_date(value: &Value) -> Result<Value, ConversionError> {
    let text = value
        .as_str()
        .ok_or_else(|| ConversionError::new("date", value))?;
    let date = parse_datetime(text)
        .map(|datetime| datetime.date())
        .or_else(|| NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok())
        .ok_or_else(|| ConversionError::new("date", value))?;
    Ok(Value::String(date.format(DATE_FORMAT).to_string()))
}

fn to_datetime(value: &Value) -> Result<Value, ConversionError> {
    let text = value
        .as_str()
        .ok_or_else(|| ConversionError::new("datetime", value))?;
    let datetime = parse_datetime(text)
        .or_else(|| {
            NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ConversionError::new("datetime", value))?;
    Ok(Value::String(
        datetime.format(DATETIME_OUTPUT_FORMAT).to_string(),
    ))
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(with_offset.naive_local());
    }
    DATETIME_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(AttributeType::String, json!("abc"), json!("abc"))]
    #[case(AttributeType::String, json!(12), json!("12"))]
    #[case(AttributeType::Integer, json!(12), json!(12))]
    #[case(AttributeType::Integer, json!(" 42 "), json!(42))]
    #[case(AttributeType::Decimal, json!("1.5"), json!(1.5))]
    #[case(AttributeType::Decimal, json!(2), json!(2))]
    #[case(AttributeType::Decimal, json!("-0.000123456789012345"), json!(-0.000123456789012345))]
    #[case(AttributeType::Decimal, json!("12345678901234.56789"), json!("12345678901234.56789"))]
    #[case(AttributeType::Decimal, json!(" 0.1234567890123456789 "), json!("0.1234567890123456789"))]
    #[case(AttributeType::Boolean, json!("J"), json!(true))]
    #[case(AttributeType::Boolean, json!(false), json!(false))]
    #[case(AttributeType::Date, json!("2021-03-04"), json!("2021-03-04"))]
    #[case(AttributeType::Date, json!("2021-03-04T10:11:12"), json!("2021-03-04"))]
    #[case(AttributeType::DateTime, json!("2021-03-04 10:11:12"), json!("2021-03-04T10:11:12"))]
    #[case(AttributeType::DateTime, json!("2021-03-04T10:11:12.500"), json!("2021-03-04T10:11:12.500"))]
    #[case(AttributeType::DateTime, json!("2021-03-04"), json!("2021-03-04T00:00:00"))]
    #[case(AttributeType::DateTime, json!("2021-03-04T10:11:12+02:00"), json!("2021-03-04T10:11:12"))]
    #[case(AttributeType::Json, json!({"a": [1]}), json!({"a": [1]}))]
    #[case(AttributeType::Geometry, json!("POINT (1 2)"), json!("POINT (1 2)"))]
    #[case(AttributeType::Integer, json!(null), json!(null))]
    fn converts_to_canonical_values(
        #[case] attribute_type: AttributeType,
        #[case] stored: Value,
        #[case] expected: Value,
    ) {
        assert_eq!(convert_scalar(attribute_type, &stored), Ok(expected));
    }

    #[rstest]
    #[case(AttributeType::Integer, json!("twelve"))]
    #[case(AttributeType::Decimal, json!("NaN"))]
    #[case(AttributeType::Decimal, json!("1.2.3"))]
    #[case(AttributeType::Decimal, json!("1e"))]
    #[case(AttributeType::Boolean, json!("maybe"))]
    #[case(AttributeType::Date, json!(20210304))]
    #[case(AttributeType::DateTime, json!("yesterday"))]
    fn rejects_unconvertible_values(#[case] attribute_type: AttributeType, #[case] stored: Value) {
        let error = convert_scalar(attribute_type, &stored).expect_err("conversion fails");
        assert_eq!(error.value, stored.to_string());
    }
}
