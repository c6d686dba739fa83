//! Best-effort value coercion.
//!
//! Nothing in this module fails in lenient mode. Input fields are coerced to
//! their declared kind and comparison operands are normalized to numbers or
//! timestamps, substituting a default when the value cannot be interpreted.
//!
//! The one observable hazard is [`calculated_value`]: an operand that is neither
//! numeric nor a recognizable timestamp becomes the current time. Callers that
//! prefer a hard failure enable strict mode through
//! [`EngineConfig::strict_coercion`](crate::config::EngineConfig).

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};
use tracing::debug;

use crate::error::ValidationError;
use crate::model::{FieldDescriptor, FieldKind};

/// String spellings that stand for an explicit null in operand position.
pub const NULL_SENTINELS: [&str; 3] = ["NULL", "Null", "null"];

/// Returns true when `value` is one of the null sentinels.
pub fn is_null_sentinel(value: &Value) -> bool {
    matches!(value, Value::String(s) if NULL_SENTINELS.contains(&s.as_str()))
}

/// Replaces a null sentinel with `Value::Null`, leaving anything else untouched.
pub fn normalize_null(value: Value) -> Value {
    if is_null_sentinel(&value) {
        Value::Null
    } else {
        value
    }
}

/// Returns true when the value carries no information (null, blank string,
/// empty array or empty object).
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// A comparison operand after normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Calculated {
    /// A numeric operand.
    Number(f64),
    /// A point in time.
    Timestamp(DateTime<Utc>),
}

impl Calculated {
    /// Renders the operand back into the engine's value conventions.
    pub fn to_value(self) -> Value {
        match self {
            Calculated::Number(n) => float_value(n),
            Calculated::Timestamp(ts) => Value::String(format_timestamp(&ts)),
        }
    }

    /// Returns false when values of `kind` never order against this operand:
    /// a timestamp against a numeric field, or a number against a date field.
    pub fn comparable_with(self, kind: Option<FieldKind>) -> bool {
        !matches!(
            (self, kind),
            (Calculated::Timestamp(_), Some(FieldKind::Number | FieldKind::Float))
                | (Calculated::Number(_), Some(FieldKind::Date))
        )
    }
}

/// Normalizes an ordering operand.
///
/// Numbers and numeric strings become numbers; everything else is parsed as a
/// timestamp. When no format matches the operand falls back to the current
/// time, unless `strict` is set, in which case a validation error is returned.
pub fn calculated_value(
    field: &str,
    value: &Value,
    strict: bool,
) -> Result<Calculated, ValidationError> {
    if let Some(n) = numeric(value) {
        return Ok(Calculated::Number(n));
    }

    if let Some(ts) = timestamp_of(value) {
        return Ok(Calculated::Timestamp(ts));
    }

    if strict {
        return Err(ValidationError::UncoercibleOperand {
            field: field.to_string(),
            value: value.to_string(),
        });
    }

    debug!(field, operand = %value, "operand is not a number or timestamp, using current time");
    Ok(Calculated::Timestamp(Utc::now()))
}

/// Returns the numeric interpretation of a number or numeric string.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Builds a JSON number from a float, preferring an integer representation
/// when the value is integral.
pub fn float_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Formats a timestamp in the canonical storage form (RFC 3339, milliseconds, `Z`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Interprets a stored or supplied value as a timestamp.
pub fn timestamp_of(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

/// Parses a timestamp against the fixed list of accepted layouts.
///
/// Layouts, in order: date only, date and time separated by a space, Unix
/// `date` output, RFC 3339, RFC 2822, RFC 822, time only, RFC 850, and an
/// ISO 8601 local date-time without offset (read as UTC).
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }

    if let Some(dt) = parse_with_utc_zone(s, "%a %b %e %H:%M:%S %Y") {
        return Some(dt);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(dt) = parse_with_utc_zone(s, "%d %b %y %H:%M") {
        return Some(dt);
    }

    if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
        let epoch = NaiveDate::from_ymd_opt(0, 1, 1)?;
        return Some(Utc.from_utc_datetime(&epoch.and_time(time)));
    }

    if let Some(dt) = parse_with_utc_zone(s, "%A, %d-%b-%y %H:%M:%S") {
        return Some(dt);
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&dt));
    }

    None
}

/// Parses layouts that carry a textual zone abbreviation, accepting only the
/// UTC spellings. The zone may sit before the year (Unix `date`) or at the end.
fn parse_with_utc_zone(s: &str, layout: &str) -> Option<DateTime<Utc>> {
    for zone in ["UTC", "GMT", "Z"] {
        let stripped = if let Some(rest) = s.strip_suffix(zone) {
            rest.trim_end().to_string()
        } else if let Some((head, tail)) = s.rsplit_once(&format!(" {zone} ")) {
            format!("{head} {tail}")
        } else {
            continue;
        };

        if let Ok(dt) = NaiveDateTime::parse_from_str(&stripped, layout) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    None
}

/// Coerces an input value to the declared kind of `field`.
///
/// Empty values pass through untouched. Identifier values are rendered as
/// strings; each backend promotes them to its native identifier type.
pub fn coerce_input(field: &FieldDescriptor, value: Value) -> Value {
    if is_empty(&value) {
        return value;
    }

    if field.foreign_key.is_some() || field.kind == FieldKind::Id {
        return identifier_value(value);
    }

    match field.kind {
        FieldKind::Date => {
            let ts = timestamp_of(&value).unwrap_or_else(|| {
                debug!(field = %field.name, value = %value, "unparseable date input, using current time");
                Utc::now()
            });
            Value::String(format_timestamp(&ts))
        }
        FieldKind::Number => {
            let n = numeric(&value).map(|n| n.trunc() as i64).unwrap_or(0);
            Value::Number(Number::from(n))
        }
        FieldKind::Float => float_value(numeric(&value).unwrap_or(0.0)),
        FieldKind::Bool => match value {
            Value::String(s) => Value::Bool(matches!(s.trim(), "true" | "1" | "yes")),
            Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|n| n != 0.0)),
            other => other,
        },
        _ => value,
    }
}

/// Renders identifier-like values as strings, element-wise for arrays.
pub fn identifier_value(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Array(items) => Value::Array(items.into_iter().map(identifier_value).collect()),
        other => other,
    }
}

/// Coerces an equality or set operand to the declared kind of `field`.
///
/// Unlike [`coerce_input`] this never substitutes a default: an operand that
/// does not fit the kind is compared as given.
pub fn coerce_operand(field: Option<&FieldDescriptor>, value: Value) -> Value {
    let value = normalize_null(value);
    let Some(field) = field else {
        return value;
    };

    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| coerce_operand(Some(field), item))
                .collect(),
        ),
        Value::String(s) => {
            if field.foreign_key.is_some() || field.kind == FieldKind::Id {
                return Value::String(s);
            }
            match field.kind {
                FieldKind::Number | FieldKind::Float => match s.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() => float_value(n),
                    _ => Value::String(s),
                },
                FieldKind::Date => match parse_timestamp(&s) {
                    Some(ts) => Value::String(format_timestamp(&ts)),
                    None => Value::String(s),
                },
                FieldKind::Bool => match s.trim() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => Value::String(s),
                },
                _ => Value::String(s),
            }
        }
        Value::Number(n) if field.foreign_key.is_some() || field.kind == FieldKind::Id => {
            Value::String(n.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn field(kind: FieldKind) -> FieldDescriptor {
        FieldDescriptor::new("value", kind)
    }

    #[test]
    fn test_null_sentinels() {
        assert!(is_null_sentinel(&json!("NULL")));
        assert!(is_null_sentinel(&json!("Null")));
        assert!(is_null_sentinel(&json!("null")));
        assert!(!is_null_sentinel(&json!("nUll")));
        assert_eq!(normalize_null(json!("NULL")), Value::Null);
        assert_eq!(normalize_null(json!("keep")), json!("keep"));
    }

    #[test]
    fn test_calculated_numeric() {
        assert_eq!(
            calculated_value("age", &json!("42"), false).unwrap(),
            Calculated::Number(42.0)
        );
        assert_eq!(
            calculated_value("age", &json!(3.5), false).unwrap(),
            Calculated::Number(3.5)
        );
    }

    #[test]
    fn test_calculated_timestamp_formats() {
        let cases = [
            "2024-03-05",
            "2024-03-05 10:20:30",
            "2024-03-05T10:20:30Z",
            "2024-03-05T10:20:30+00:00",
            "Tue, 05 Mar 2024 10:20:30 +0000",
            "Tue Mar  5 10:20:30 UTC 2024",
            "2024-03-05T10:20:30",
        ];
        for case in cases {
            match calculated_value("createdAt", &json!(case), true) {
                Ok(Calculated::Timestamp(ts)) => {
                    assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 3, 5), "{case}");
                }
                other => panic!("{case} parsed as {other:?}"),
            }
        }
    }

    #[test]
    fn test_time_only_layout() {
        let ts = parse_timestamp("10:20:30").unwrap();
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (10, 20, 30));
        assert_eq!(ts.year(), 0);
    }

    #[test]
    fn test_calculated_fallback_to_now() {
        let before = Utc::now();
        let result = calculated_value("createdAt", &json!("not a date"), false).unwrap();
        match result {
            Calculated::Timestamp(ts) => assert!(ts >= before),
            other => panic!("expected timestamp fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_calculated_strict_mode_rejects() {
        let err = calculated_value("createdAt", &json!("not a date"), true).unwrap_err();
        assert!(matches!(err, ValidationError::UncoercibleOperand { .. }));
    }

    #[test]
    fn test_format_timestamp_is_canonical() {
        let ts = parse_timestamp("2024-03-05 10:20:30").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-05T10:20:30.000Z");
    }

    #[test]
    fn test_coerce_input_by_kind() {
        assert_eq!(coerce_input(&field(FieldKind::Number), json!("12")), json!(12));
        assert_eq!(coerce_input(&field(FieldKind::Number), json!(12.9)), json!(12));
        assert_eq!(coerce_input(&field(FieldKind::Number), json!("abc")), json!(0));
        assert_eq!(coerce_input(&field(FieldKind::Float), json!("2.5")), json!(2.5));
        assert_eq!(coerce_input(&field(FieldKind::Bool), json!("true")), json!(true));
        assert_eq!(
            coerce_input(&field(FieldKind::Date), json!("2024-03-05")),
            json!("2024-03-05T00:00:00.000Z")
        );
        assert_eq!(coerce_input(&field(FieldKind::String), json!("")), json!(""));
        assert_eq!(coerce_input(&field(FieldKind::Id), json!(7)), json!("7"));
    }

    #[test]
    fn test_coerce_operand_by_kind() {
        assert_eq!(
            coerce_operand(Some(&field(FieldKind::Number)), json!("5")),
            json!(5)
        );
        assert_eq!(
            coerce_operand(Some(&field(FieldKind::Number)), json!(["1", "2"])),
            json!([1, 2])
        );
        assert_eq!(
            coerce_operand(Some(&field(FieldKind::Bool)), json!("false")),
            json!(false)
        );
        assert_eq!(
            coerce_operand(Some(&field(FieldKind::String)), json!("NULL")),
            Value::Null
        );
        assert_eq!(coerce_operand(None, json!("5")), json!("5"));
    }
}
