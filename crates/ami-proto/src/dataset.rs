//! Dataset identifiers and pointings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a dataset: the raw filename as listed by `reduce`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    /// Creates a new dataset ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the filename with its extension removed.
    ///
    /// `LKHA-130318.raw` becomes `LKHA-130318`.
    pub fn stem(&self) -> &str {
        match self.0.rfind('.') {
            Some(idx) if idx > 0 => &self.0[..idx],
            _ => &self.0,
        }
    }

    /// Returns the target part of the name, i.e. everything before the first `-`.
    pub fn target_name(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DatasetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sky position a dataset was tracking, as printed by `reduce`.
///
/// Both coordinates are kept in their sexagesimal string form
/// (`"12 30 00"`, `"-45 00 00"`); conversion to degrees happens downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pointing {
    /// Right ascension (hours, minutes, seconds).
    pub ra: String,
    /// Declination (degrees, arcminutes, arcseconds).
    pub dec: String,
}

impl Pointing {
    pub fn new(ra: impl Into<String>, dec: impl Into<String>) -> Self {
        Self {
            ra: ra.into(),
            dec: dec.into(),
        }
    }
}

impl fmt::Display for Pointing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ra, self.dec)
    }
}
