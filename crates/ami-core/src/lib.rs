//! # ami-core
//!
//! Core functionality for driving AMI `reduce`.
//!
//! This crate provides:
//! - Configuration loading and validation
//! - Parsers that recover typed facts from `reduce`'s free-text output
//! - The routing table that decides which parser applies to a command
//! - The dataset registry and its tagged field updates
//! - Pointing grouping by angular separation
//! - Per-dataset transcript logs
//! - `ReduceDriver`, the high-level reduction workflow operations

mod command_router;
mod config;
mod dataset_log;
mod dataset_registry;
pub mod output_parser;
mod pointing_grouper;
mod reduce_driver;
mod sky_position;
pub mod testing;

pub use command_router::{CommandRouter, Route, RouteKind};
pub use config::{
    AmiConfig, ConfigError, ConfigWarning, GroupingConfig, LoggingConfig, SessionSettings,
};
pub use dataset_log::DatasetLog;
pub use dataset_registry::{DatasetRecord, DatasetRegistry, FieldUpdate};
pub use output_parser::ListingEntry;
pub use pointing_grouper::{GroupingOutcome, PointingGroup, PointingGrouper};
pub use reduce_driver::ReduceDriver;
pub use sky_position::{AngularSeparation, Haversine, SkyPosition};
