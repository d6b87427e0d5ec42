//! Error types for the AMI reduce driver.

use crate::DatasetId;
use std::fmt;

/// Result alias using the driver's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while driving `reduce`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The process never reached its first prompt.
    #[error("reduce failed to start: {0}")]
    Startup(String),

    /// The prompt did not come back after a command. The session is unusable.
    #[error("prompt not observed after `{command}`: {reason}")]
    ProtocolStall { command: String, reason: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown dataset: {0}")]
    UnknownDataset(DatasetId),

    #[error("no active dataset selected")]
    NoActiveDataset,

    #[error("no calibrator known for {0}")]
    MissingCalibrator(DatasetId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which fact a parser was trying to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseKind {
    Coordinates,
    RainCorrection,
    Flagging,
    Noise,
}

impl fmt::Display for ParseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseKind::Coordinates => "coordinates",
            ParseKind::RainCorrection => "rain correction",
            ParseKind::Flagging => "flagging",
            ParseKind::Noise => "noise estimate",
        };
        f.write_str(name)
    }
}

/// An expected pattern was absent or malformed in a block of tool output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("could not parse {kind}{}: {snippet:?}", dataset_suffix(.dataset.as_ref()))]
pub struct ParseError {
    pub kind: ParseKind,
    pub dataset: Option<DatasetId>,
    /// The offending line, or the start of the block when no line matched.
    pub snippet: String,
}

impl ParseError {
    pub fn new(kind: ParseKind, snippet: impl Into<String>) -> Self {
        Self {
            kind,
            dataset: None,
            snippet: snippet.into(),
        }
    }

    pub fn for_dataset(mut self, dataset: Option<&DatasetId>) -> Self {
        self.dataset = dataset.cloned();
        self
    }
}

fn dataset_suffix(dataset: Option<&DatasetId>) -> String {
    dataset.map(|d| format!(" for {d}")).unwrap_or_default()
}
