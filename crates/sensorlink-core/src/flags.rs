//! Category and quality flag vocabularies.
//!
//! Flags are tri-state on the wire: absent, `true` or `false`. An absent flag
//! reads as `false` but is never written out, so a [`FlagSet`] only stores the
//! flags that were explicitly set.

use crate::syntax::{parse_boolean, DecodeError};
use std::collections::BTreeMap;

/// A flag with a short wire code.
pub trait Flag: Copy + Ord + 'static {
    /// Every flag of this vocabulary.
    const ALL: &'static [Self];

    /// The attribute name used on the wire.
    fn code(self) -> &'static str;

    /// Look a flag up by its wire code.
    #[must_use]
    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|flag| flag.code() == code)
    }
}

/// Field categories, also used as the category filter of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Momentary value
    Momentary,
    /// Peak value
    Peak,
    /// Status value
    Status,
    /// Computed value
    Computed,
    /// Identity value
    Identity,
    /// Historical value
    Historical,
}

impl Flag for Category {
    const ALL: &'static [Self] = &[
        Self::Momentary,
        Self::Peak,
        Self::Status,
        Self::Computed,
        Self::Identity,
        Self::Historical,
    ];

    fn code(self) -> &'static str {
        match self {
            Self::Momentary => "m",
            Self::Peak => "p",
            Self::Status => "s",
            Self::Computed => "c",
            Self::Identity => "i",
            Self::Historical => "h",
        }
    }
}

/// Quality-of-service status codes attached to a field reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quality {
    /// The value is missing
    Missing,
    /// Readout still in progress
    InProgress,
    /// Automatically estimated
    AutomaticEstimate,
    /// Manually estimated
    ManualEstimate,
    /// Manually read out
    ManualReadout,
    /// Automatically read out
    AutomaticReadout,
    /// Out of the expected range
    OutOfRange,
    /// Warning raised with the value
    Warning,
    /// Error raised with the value
    Error,
    /// Signed value
    Signed,
    /// Invalid value
    Invalid,
    /// Last value of a series
    EndOfSeries,
    /// Power failure around the readout
    PowerFailure,
    /// Interpolated value
    Interpolated,
}

impl Flag for Quality {
    const ALL: &'static [Self] = &[
        Self::Missing,
        Self::InProgress,
        Self::AutomaticEstimate,
        Self::ManualEstimate,
        Self::ManualReadout,
        Self::AutomaticReadout,
        Self::OutOfRange,
        Self::Warning,
        Self::Error,
        Self::Signed,
        Self::Invalid,
        Self::EndOfSeries,
        Self::PowerFailure,
        Self::Interpolated,
    ];

    fn code(self) -> &'static str {
        match self {
            Self::Missing => "ms",
            Self::InProgress => "pr",
            Self::AutomaticEstimate => "ae",
            Self::ManualEstimate => "me",
            Self::ManualReadout => "mr",
            Self::AutomaticReadout => "ar",
            Self::OutOfRange => "of",
            Self::Warning => "w",
            Self::Error => "er",
            Self::Signed => "so",
            Self::Invalid => "iv",
            Self::EndOfSeries => "eos",
            Self::PowerFailure => "pf",
            Self::Interpolated => "ic",
        }
    }
}

/// The explicitly set flags of one vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSet<F: Flag> {
    values: BTreeMap<F, bool>,
}

impl<F: Flag> Default for FlagSet<F> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }
}

impl<F: Flag> FlagSet<F> {
    /// Create a set with no flags present.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag to an explicit value.
    pub fn set(&mut self, flag: F, value: bool) {
        self.values.insert(flag, value);
    }

    /// Make a flag absent again.
    pub fn clear(&mut self, flag: F) {
        self.values.remove(&flag);
    }

    /// The explicit value of a flag, `None` when absent.
    #[must_use]
    pub fn get(&self, flag: F) -> Option<bool> {
        self.values.get(&flag).copied()
    }

    /// Whether a flag is present and `true`.
    #[must_use]
    pub fn is_set(&self, flag: F) -> bool {
        self.get(flag) == Some(true)
    }

    /// Iterate over present flags.
    pub fn iter(&self) -> impl Iterator<Item = (F, bool)> + '_ {
        self.values.iter().map(|(flag, value)| (*flag, *value))
    }

    /// Check if no flag is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write present flags into `map` as `code -> "true"|"false"`.
    pub fn write_map(&self, map: &mut BTreeMap<String, String>) {
        for (flag, value) in self.iter() {
            map.insert(flag.code().to_string(), value.to_string());
        }
    }

    /// Replace the whole set from a `code -> value` mapping.
    ///
    /// Keys that are not codes of this vocabulary are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if a flag value is not a boolean literal.
    pub fn read_map(&mut self, map: &BTreeMap<String, String>) -> Result<(), DecodeError> {
        let mut values = BTreeMap::new();
        for flag in F::ALL {
            if let Some(raw) = map.get(flag.code()) {
                let value = parse_boolean(raw).ok_or_else(|| DecodeError::MalformedValue {
                    kind: format!("flag '{}'", flag.code()),
                    value: raw.clone(),
                    reason: "expected a boolean".to_string(),
                })?;
                values.insert(*flag, value);
            }
        }
        self.values = values;
        Ok(())
    }
}

impl<F: Flag> FromIterator<(F, bool)> for FlagSet<F> {
    fn from_iter<I: IntoIterator<Item = (F, bool)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
