//! Textual value grammar shared by sensor-data fields and control parameters.
//!
//! Values travel as strings and are kept verbatim (no re-formatting or
//! rounding); this module only decides whether a string is acceptable for a
//! given kind of value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

/// The syntactic class of a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// Floating-point decimal literal
    Decimal,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// Free text
    Text,
    /// `true`, `false`, `1` or `0`
    Boolean,
    /// `YYYY-MM-DD`
    Date,
    /// ISO-8601 date and time, offset optional
    DateTime,
    /// ISO-8601 duration
    Duration,
    /// `HH:MM` or `HH:MM:SS[.fff]`
    Time,
    /// 6 or 8 hexadecimal digits
    Color,
}

impl Syntax {
    /// Check a value, returning the reason it was rejected.
    ///
    /// # Errors
    ///
    /// Returns a short description when the value does not match.
    pub fn check(self, value: &str) -> Result<(), &'static str> {
        let ok = match self {
            Syntax::Text => true,
            Syntax::Decimal => {
                decimal_pattern().is_match(value) && value.parse::<f64>().is_ok()
            }
            Syntax::Int32 => value.parse::<i32>().is_ok(),
            Syntax::Int64 => value.parse::<i64>().is_ok(),
            Syntax::Boolean => parse_boolean(value).is_some(),
            Syntax::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
            Syntax::DateTime => {
                DateTime::parse_from_rfc3339(value).is_ok()
                    || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            }
            Syntax::Time => {
                NaiveTime::parse_from_str(value, "%H:%M:%S%.f").is_ok()
                    || NaiveTime::parse_from_str(value, "%H:%M").is_ok()
            }
            Syntax::Duration => {
                duration_pattern().is_match(value)
                    && value.bytes().any(|b| b.is_ascii_digit())
                    && !value.ends_with('T')
            }
            Syntax::Color => color_pattern().is_match(value),
        };

        if ok {
            Ok(())
        } else {
            Err(self.expectation())
        }
    }

    fn expectation(self) -> &'static str {
        match self {
            Syntax::Text => "expected text",
            Syntax::Decimal => "expected a decimal number",
            Syntax::Int32 => "expected a 32-bit integer",
            Syntax::Int64 => "expected a 64-bit integer",
            Syntax::Boolean => "expected true, false, 1 or 0",
            Syntax::Date => "expected YYYY-MM-DD",
            Syntax::DateTime => "expected an ISO-8601 date and time",
            Syntax::Duration => "expected an ISO-8601 duration",
            Syntax::Time => "expected HH:MM or HH:MM:SS",
            Syntax::Color => "color must be 6 or 8 hexadecimal digits",
        }
    }
}

/// Parse a boolean literal.
#[must_use]
pub fn parse_boolean(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Validate a value of the given kind.
///
/// `kind` names the value's type in the error message.
///
/// # Errors
///
/// Returns [`DecodeError::MalformedValue`] if the value does not match.
pub fn validate(kind: &str, syntax: Syntax, value: &str) -> Result<(), DecodeError> {
    syntax
        .check(value)
        .map_err(|reason| DecodeError::malformed(kind, value, reason))
}

/// Validate a localization step string such as `1|Temp,2|Sensor|x`.
///
/// # Errors
///
/// Returns [`DecodeError::MalformedValue`] if the string does not match.
pub fn validate_localization(loc: &str) -> Result<(), DecodeError> {
    if localization_pattern().is_match(loc) {
        Ok(())
    } else {
        Err(DecodeError::malformed(
            "localization",
            loc,
            "malformed localization string",
        ))
    }
}

fn decimal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?$")
            .expect("decimal pattern is valid")
    })
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^-?P(?:\d+Y)?(?:\d+M)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:\.\d+)?S)?)?$")
            .expect("duration pattern is valid")
    })
}

fn color_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$").expect("color pattern is valid")
    })
}

fn localization_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d+(?:\|[^,]*){0,2}(?:,\d+(?:\|[^,]*){0,2})*$")
            .expect("localization pattern is valid")
    })
}

/// Errors raised while building or decoding typed values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The type tag is not a recognized kind
    #[error("unknown type '{0}'")]
    UnknownType(String),
    /// The value does not match its type's syntax
    #[error("malformed {kind} value '{value}': {reason}")]
    MalformedValue {
        /// The type the value was checked against
        kind: String,
        /// The rejected value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

impl DecodeError {
    pub(crate) fn malformed(
        kind: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedValue {
            kind: kind.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers() {
        assert!(Syntax::Decimal.check("-12.42").is_ok());
        assert!(Syntax::Decimal.check("1e3").is_ok());
        assert!(Syntax::Decimal.check("").is_err());
        assert!(Syntax::Decimal.check("12,5").is_err());
        assert!(Syntax::Decimal.check(".5").is_ok());
        for bad in ["NaN", "nan", "inf", "-inf", "infinity", "-infinity", "+", "1e", "0x10"] {
            assert!(Syntax::Decimal.check(bad).is_err(), "{bad}");
        }

        assert!(Syntax::Int32.check("-42").is_ok());
        assert!(Syntax::Int32.check("2147483648").is_err());
        assert!(Syntax::Int64.check("-90983243827489374").is_ok());
        assert!(Syntax::Int64.check("1.0").is_err());
    }

    #[test]
    fn dates_and_times() {
        assert!(Syntax::Date.check("2012-01-01").is_ok());
        assert!(Syntax::Date.check("2012-13-01").is_err());

        assert!(Syntax::DateTime.check("1979-01-01T00:00:00").is_ok());
        assert!(Syntax::DateTime.check("2013-03-07T16:24:30.125Z").is_ok());
        assert!(Syntax::DateTime.check("2013-03-07T16:24:30+02:00").is_ok());
        assert!(Syntax::DateTime.check("1900-12-03 12:30").is_err());

        assert!(Syntax::Time.check("23:59").is_ok());
        assert!(Syntax::Time.check("12:00:01.5").is_ok());
        assert!(Syntax::Time.check("25:00").is_err());
    }

    #[test]
    fn durations() {
        for ok in ["P5Y", "PT2M1S", "P1DT12H", "-P3M", "PT0.5S"] {
            assert!(Syntax::Duration.check(ok).is_ok(), "{ok}");
        }
        for bad in ["P", "PT", "P5YT", "5Y", "P1S"] {
            assert!(Syntax::Duration.check(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn colors() {
        assert!(Syntax::Color.check("FF00FF").is_ok());
        assert!(Syntax::Color.check("00ff00aa").is_ok());
        assert!(Syntax::Color.check("FF00F").is_err());
        assert!(Syntax::Color.check("FF00FF0").is_err());
        assert!(Syntax::Color.check("GG00FF").is_err());
    }

    #[test]
    fn localization_strings() {
        assert!(validate_localization("1").is_ok());
        assert!(validate_localization("1|Temp,2|Sensor|x").is_ok());
        assert!(validate_localization("").is_err());
        assert!(validate_localization("a|b").is_err());
        assert!(validate_localization("1,").is_err());
    }

    #[test]
    fn validate_reports_kind() {
        let err = validate("int32", Syntax::Int32, "abc").unwrap_err();
        match err {
            DecodeError::MalformedValue { kind, value, .. } => {
                assert_eq!(kind, "int32");
                assert_eq!(value, "abc");
            }
            DecodeError::UnknownType(_) => panic!("wrong error"),
        }
    }
}
