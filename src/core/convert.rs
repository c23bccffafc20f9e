// ============================================================================
// String <-> typed value conversion
// ============================================================================

use super::{EntityError, FieldType, FieldValue, Result, TIMESTAMP_TEXT_FORMAT};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Coerces text from textual interfaces into a field's declared type and back.
pub trait ValueConverter: Send + Sync {
    fn convert_from_string(&self, field_type: FieldType, text: &str) -> Result<FieldValue>;

    fn convert_to_string(&self, field_type: FieldType, value: &FieldValue) -> Option<String>;
}

/// Converter used when the context does not supply one.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConverter;

impl DefaultConverter {
    fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Some(ts.with_timezone(&Utc));
        }
        for format in [TIMESTAMP_TEXT_FORMAT, "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
        // epoch millis
        text.parse::<i64>()
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }
}

impl ValueConverter for DefaultConverter {
    fn convert_from_string(&self, field_type: FieldType, text: &str) -> Result<FieldValue> {
        if field_type == FieldType::Text {
            return Ok(FieldValue::Text(text.to_string()));
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(FieldValue::Null);
        }

        let mismatch = || {
            EntityError::Conversion(format!(
                "Cannot convert '{}' to {}",
                trimmed, field_type
            ))
        };

        match field_type {
            FieldType::Text => unreachable!("handled above"),
            FieldType::Integer => trimmed
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| mismatch()),
            FieldType::Decimal => Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .map(FieldValue::Decimal)
                .map_err(|_| mismatch()),
            FieldType::Timestamp => Self::parse_timestamp(trimmed)
                .map(FieldValue::Timestamp)
                .ok_or_else(mismatch),
            FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" | "1" => Ok(FieldValue::Boolean(true)),
                "n" | "no" | "false" | "0" => Ok(FieldValue::Boolean(false)),
                _ => Err(mismatch()),
            },
            FieldType::Binary => BASE64
                .decode(trimmed)
                .map(FieldValue::Binary)
                .map_err(|_| mismatch()),
        }
    }

    fn convert_to_string(&self, _field_type: FieldType, value: &FieldValue) -> Option<String> {
        value.to_plain_string()
    }
}
