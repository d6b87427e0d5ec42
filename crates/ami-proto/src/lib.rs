//! # ami-proto
//!
//! Shared types and error definitions for the AMI reduce driver.
//!
//! This crate provides the foundational abstractions used across all driver crates:
//! - Dataset identifiers and sky pointings as reported by `reduce`
//! - Array configuration modes
//! - The error taxonomy (startup, protocol stall, parse, configuration)

mod array;
mod dataset;
mod error;

pub use array::ArrayMode;
pub use dataset::{DatasetId, Pointing};
pub use error::{Error, ParseError, ParseKind, Result};
