//! Typed sensor-data fields.
//!
//! A field is one named reading of one of ten value kinds. The kind is carried
//! by the private variant inside [`FieldValue`], so a unit can only exist on a
//! quantity and an enumeration type name exists exactly on enum values.

use crate::flags::{Category, FlagSet, Quality};
use crate::keyed::Keyed;
use crate::syntax::{validate, validate_localization, DecodeError, Syntax};
use std::collections::BTreeMap;

/// The ten value kinds of sensor-data fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Physical quantity: decimal value with optional unit
    Quantity,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// Free text
    String,
    /// Boolean
    Boolean,
    /// Calendar date
    Date,
    /// Date and time
    DateTime,
    /// Time span
    Duration,
    /// Time of day
    Time,
    /// Value of a named enumeration
    Enum,
}

impl FieldType {
    /// Every field type, in wire-code order.
    pub const ALL: [FieldType; 10] = [
        FieldType::Quantity,
        FieldType::Int32,
        FieldType::Int64,
        FieldType::String,
        FieldType::Boolean,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Duration,
        FieldType::Time,
        FieldType::Enum,
    ];

    /// Wire code (element name) of this type.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            FieldType::Quantity => "q",
            FieldType::Int32 => "i",
            FieldType::Int64 => "l",
            FieldType::String => "s",
            FieldType::Boolean => "b",
            FieldType::Date => "d",
            FieldType::DateTime => "dt",
            FieldType::Duration => "dr",
            FieldType::Time => "t",
            FieldType::Enum => "e",
        }
    }

    /// Look a type up by wire code.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownType`] for unrecognized codes.
    pub fn from_code(code: &str) -> Result<Self, DecodeError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or_else(|| DecodeError::UnknownType(code.to_string()))
    }

    /// The value grammar for this type.
    #[must_use]
    pub fn syntax(self) -> Syntax {
        match self {
            FieldType::Quantity => Syntax::Decimal,
            FieldType::Int32 => Syntax::Int32,
            FieldType::Int64 => Syntax::Int64,
            FieldType::String | FieldType::Enum => Syntax::Text,
            FieldType::Boolean => Syntax::Boolean,
            FieldType::Date => Syntax::Date,
            FieldType::DateTime => Syntax::DateTime,
            FieldType::Duration => Syntax::Duration,
            FieldType::Time => Syntax::Time,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Quantity => "quantity",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "dateTime",
            FieldType::Duration => "duration",
            FieldType::Time => "time",
            FieldType::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// A validated value in its canonical textual form.
///
/// Only [`FieldValue::new`] and [`FieldValue::quantity`] build values, so
/// every value encodes to text its type's grammar accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue(Value);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    /// Decimal quantity with optional unit
    Quantity {
        /// Decimal literal
        value: String,
        /// Unit of measure
        unit: Option<String>,
    },
    /// 32-bit integer literal
    Int32(String),
    /// 64-bit integer literal
    Int64(String),
    /// Text
    String(String),
    /// Boolean literal
    Boolean(String),
    /// `YYYY-MM-DD`
    Date(String),
    /// ISO-8601 date and time
    DateTime(String),
    /// ISO-8601 duration
    Duration(String),
    /// Time of day
    Time(String),
    /// Enumeration member
    Enum {
        /// Member name
        value: String,
        /// Name of the enumeration domain
        type_name: String,
    },
}

impl FieldValue {
    /// Build and validate a value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedValue`] if the value does not match the
    /// type's syntax, if a unit is given for a non-quantity, or if the enum
    /// type name is missing on an enum or present on anything else.
    pub fn new(
        kind: FieldType,
        value: impl Into<String>,
        unit: Option<String>,
        enum_type: Option<String>,
    ) -> Result<Self, DecodeError> {
        let value = value.into();
        validate(&kind.to_string(), kind.syntax(), &value)?;

        if unit.is_some() && kind != FieldType::Quantity {
            return Err(DecodeError::malformed(
                kind.to_string(),
                value,
                "unit is only allowed on quantities",
            ));
        }
        if enum_type.is_some() && kind != FieldType::Enum {
            return Err(DecodeError::malformed(
                kind.to_string(),
                value,
                "type name is only allowed on enums",
            ));
        }

        Ok(FieldValue(match kind {
            FieldType::Quantity => Value::Quantity { value, unit },
            FieldType::Int32 => Value::Int32(value),
            FieldType::Int64 => Value::Int64(value),
            FieldType::String => Value::String(value),
            FieldType::Boolean => Value::Boolean(value),
            FieldType::Date => Value::Date(value),
            FieldType::DateTime => Value::DateTime(value),
            FieldType::Duration => Value::Duration(value),
            FieldType::Time => Value::Time(value),
            FieldType::Enum => {
                let Some(type_name) = enum_type else {
                    return Err(DecodeError::malformed(
                        kind.to_string(),
                        value,
                        "enum value requires a type name",
                    ));
                };
                Value::Enum { value, type_name }
            }
        }))
    }

    /// Build a quantity.
    ///
    /// # Errors
    ///
    /// Returns error if `value` is not a decimal literal.
    pub fn quantity(value: impl Into<String>, unit: Option<&str>) -> Result<Self, DecodeError> {
        Self::new(
            FieldType::Quantity,
            value,
            unit.map(ToString::to_string),
            None,
        )
    }

    /// The value's type.
    #[must_use]
    pub fn kind(&self) -> FieldType {
        match &self.0 {
            Value::Quantity { .. } => FieldType::Quantity,
            Value::Int32(_) => FieldType::Int32,
            Value::Int64(_) => FieldType::Int64,
            Value::String(_) => FieldType::String,
            Value::Boolean(_) => FieldType::Boolean,
            Value::Date(_) => FieldType::Date,
            Value::DateTime(_) => FieldType::DateTime,
            Value::Duration(_) => FieldType::Duration,
            Value::Time(_) => FieldType::Time,
            Value::Enum { .. } => FieldType::Enum,
        }
    }

    /// The textual value.
    #[must_use]
    pub fn text(&self) -> &str {
        match &self.0 {
            Value::Quantity { value, .. } | Value::Enum { value, .. } => value,
            Value::Int32(value)
            | Value::Int64(value)
            | Value::String(value)
            | Value::Boolean(value)
            | Value::Date(value)
            | Value::DateTime(value)
            | Value::Duration(value)
            | Value::Time(value) => value,
        }
    }

    /// Unit of a quantity.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        match &self.0 {
            Value::Quantity { unit, .. } => unit.as_deref(),
            _ => None,
        }
    }

    /// Enumeration domain of an enum value.
    #[must_use]
    pub fn enum_type(&self) -> Option<&str> {
        match &self.0 {
            Value::Enum { type_name, .. } => Some(type_name),
            _ => None,
        }
    }
}

/// A named, typed reading with its flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    value: FieldValue,
    /// Category flags
    pub categories: FlagSet<Category>,
    /// Quality flags
    pub qualities: FlagSet<Quality>,
    localization_namespace: Option<String>,
    localization: Option<String>,
}

impl Field {
    /// Create a field without flags.
    #[must_use]
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            categories: FlagSet::new(),
            qualities: FlagSet::new(),
            localization_namespace: None,
            localization: None,
        }
    }

    /// Set a category flag, builder style.
    #[must_use]
    pub fn with_category(mut self, category: Category, value: bool) -> Self {
        self.categories.set(category, value);
        self
    }

    /// Set a quality flag, builder style.
    #[must_use]
    pub fn with_quality(mut self, quality: Quality, value: bool) -> Self {
        self.qualities.set(quality, value);
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field value.
    #[must_use]
    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Field type.
    #[must_use]
    pub fn kind(&self) -> FieldType {
        self.value.kind()
    }

    /// All present flags as `code -> "true"|"false"`.
    #[must_use]
    pub fn get_flags(&self) -> BTreeMap<String, String> {
        let mut flags = BTreeMap::new();
        self.categories.write_map(&mut flags);
        self.qualities.write_map(&mut flags);
        flags
    }

    /// Replace all flags from a `code -> value` mapping.
    ///
    /// # Errors
    ///
    /// Returns error if a flag value is not a boolean literal; the field is
    /// left unchanged in that case.
    pub fn set_flags(&mut self, flags: &BTreeMap<String, String>) -> Result<(), DecodeError> {
        let mut categories = FlagSet::new();
        let mut qualities = FlagSet::new();
        categories.read_map(flags)?;
        qualities.read_map(flags)?;
        self.categories = categories;
        self.qualities = qualities;
        Ok(())
    }

    /// Localization step string (`loc`).
    #[must_use]
    pub fn localization(&self) -> Option<&str> {
        self.localization.as_deref()
    }

    /// Localization namespace (`lns`).
    #[must_use]
    pub fn localization_namespace(&self) -> Option<&str> {
        self.localization_namespace.as_deref()
    }

    /// Set the localization step string, validating it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedValue`] for a malformed string.
    pub fn set_localization(&mut self, loc: impl Into<String>) -> Result<(), DecodeError> {
        let loc = loc.into();
        validate_localization(&loc)?;
        self.localization = Some(loc);
        Ok(())
    }

    /// Set or clear the localization namespace.
    pub fn set_localization_namespace(&mut self, lns: Option<String>) {
        self.localization_namespace = lns;
    }
}

impl Keyed for Field {
    fn key(&self) -> &str {
        &self.name
    }
}
