//! Array configuration selected at session start.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which AMI array the session reduces data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArrayMode {
    /// Large Array. Selected with `set def la` after startup.
    #[default]
    #[serde(rename = "LA")]
    Large,
    /// Small Array. The tool's default, nothing to send.
    #[serde(rename = "SA")]
    Small,
}

impl ArrayMode {
    /// Returns the short code used in configuration (`LA` / `SA`).
    pub fn code(self) -> &'static str {
        match self {
            ArrayMode::Large => "LA",
            ArrayMode::Small => "SA",
        }
    }
}

impl FromStr for ArrayMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LA" => Ok(ArrayMode::Large),
            "SA" => Ok(ArrayMode::Small),
            other => Err(Error::Configuration(format!(
                "array must be 'LA' or 'SA', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ArrayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
