//! Dataset registry: everything learned about each dataset so far.
//!
//! Records are only ever changed through `FieldUpdate`, one variant per field.
//! That keeps the per-field write rules in one place: `FlaggedMax` accumulates
//! by maximum, every other update overwrites.

use ami_proto::{DatasetId, Error, Pointing, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything known about one dataset. All fields start out unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointing: Option<Pointing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibrator: Option<DatasetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rain_correction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flagged_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flagged_final: Option<f64>,
    /// Noise estimate in Jy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_noise: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibrator_output_path: Option<PathBuf>,
}

/// A single tagged change to a dataset record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Comment(String),
    Pointing(Pointing),
    /// `None` records that the observation names no calibrator.
    Calibrator(Option<DatasetId>),
    RainCorrection(f64),
    /// Replaces the stored value only if larger. Non-finite values are ignored.
    FlaggedMax(f64),
    /// `None` records that the final summary reported nothing.
    FlaggedFinal(Option<f64>),
    EstimatedNoise(f64),
    GroupName(String),
    OutputPaths { target: PathBuf, calibrator: PathBuf },
}

impl DatasetRecord {
    /// Applies one update according to its field's write rule.
    pub fn apply(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::Comment(comment) => self.comment = Some(comment),
            FieldUpdate::Pointing(pointing) => self.pointing = Some(pointing),
            FieldUpdate::Calibrator(calibrator) => self.calibrator = calibrator,
            FieldUpdate::RainCorrection(factor) => self.rain_correction = Some(factor),
            FieldUpdate::FlaggedMax(percent) => {
                if percent.is_finite()
                    && self.flagged_max.is_none_or(|current| percent > current)
                {
                    self.flagged_max = Some(percent);
                }
            }
            FieldUpdate::FlaggedFinal(percent) => self.flagged_final = percent,
            FieldUpdate::EstimatedNoise(noise) => self.estimated_noise = Some(noise),
            FieldUpdate::GroupName(name) => self.group_name = Some(name),
            FieldUpdate::OutputPaths { target, calibrator } => {
                self.target_output_path = Some(target);
                self.calibrator_output_path = Some(calibrator);
            }
        }
    }
}

/// Mapping from dataset ID to its record, ordered by ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetRegistry {
    records: BTreeMap<DatasetId, DatasetRecord>,
}

impl DatasetRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dataset if it is not known yet. Returns true if it was added.
    pub fn discover(&mut self, id: DatasetId) -> bool {
        if self.records.contains_key(&id) {
            return false;
        }
        debug!(dataset = %id, "Discovered dataset");
        self.records.insert(id, DatasetRecord::default());
        true
    }

    /// Applies an update to a known dataset.
    pub fn apply(&mut self, id: &DatasetId, update: FieldUpdate) -> Result<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| Error::UnknownDataset(id.clone()))?;
        record.apply(update);
        Ok(())
    }

    /// Gets a record by ID.
    pub fn get(&self, id: &DatasetId) -> Option<&DatasetRecord> {
        self.records.get(id)
    }

    /// Returns true if the dataset is registered.
    pub fn contains(&self, id: &DatasetId) -> bool {
        self.records.contains_key(id)
    }

    /// Iterates over all records in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&DatasetId, &DatasetRecord)> {
        self.records.iter()
    }

    /// Returns all dataset IDs in order.
    pub fn ids(&self) -> impl Iterator<Item = &DatasetId> {
        self.records.keys()
    }

    /// Returns the IDs of datasets whose pointing is still unknown.
    pub fn missing_pointing(&self) -> Vec<DatasetId> {
        self.records
            .iter()
            .filter(|(_, record)| record.pointing.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Returns the number of registered datasets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no datasets are registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forgets every dataset.
    pub fn reset(&mut self) {
        debug!(count = self.records.len(), "Resetting dataset registry");
        self.records.clear();
    }

    /// Serialises the registry as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Io(e.into()))
    }

    /// Writes the registry to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Loads a registry previously written by `save`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::Io(e.into()))
    }
}
