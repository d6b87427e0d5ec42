//! High-level reduction workflow on top of a `reduce` session.
//!
//! `ReduceDriver` owns the session, the dataset registry and the notion of an
//! *active* dataset. Commands run through [`ReduceDriver::run_command`] are
//! logged to the active dataset's transcript and their output is routed to
//! the parsers, so facts such as the rain correction or the noise estimate
//! land in the registry as a side effect of running a normal reduction script.

use crate::command_router::CommandRouter;
use crate::config::AmiConfig;
use crate::dataset_log::DatasetLog;
use crate::dataset_registry::{DatasetRecord, DatasetRegistry, FieldUpdate};
use crate::output_parser;
use crate::pointing_grouper::{GroupingOutcome, PointingGrouper};
use ami_adapters::{PromptSession, PtyTransport, SessionState, Transport};
use ami_proto::{ArrayMode, DatasetId, Error, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Command that switches `reduce` to Large Array defaults.
const LARGE_ARRAY_COMMAND: &str = "set def la";

/// Drives one `reduce` process through a reduction.
pub struct ReduceDriver<T: Transport> {
    session: PromptSession<T>,
    registry: DatasetRegistry,
    router: CommandRouter,
    active: Option<DatasetId>,
    log: Option<DatasetLog<BufWriter<File>>>,
    array: ArrayMode,
    config: AmiConfig,
}

impl ReduceDriver<PtyTransport> {
    /// Spawns `reduce` in a pseudo-terminal and prepares it for use.
    ///
    /// The configuration is validated before anything is spawned.
    pub async fn start(config: AmiConfig) -> Result<Self> {
        for warning in config.validate()? {
            warn!("{warning}");
        }

        let pty_config = config.pty_config();
        info!(
            program = %pty_config.program,
            working_dir = %config.effective_working_dir().display(),
            "Starting reduce"
        );
        let transport = PtyTransport::spawn(&pty_config).map_err(|e| {
            Error::Startup(format!("failed to spawn '{}': {e}", pty_config.program))
        })?;

        Self::with_transport(transport, config).await
    }
}

impl<T: Transport> ReduceDriver<T> {
    /// Prepares a session over an already-running transport.
    ///
    /// Waits for the prompt, switches to the Large Array when configured, then
    /// discovers the available datasets.
    pub async fn with_transport(transport: T, config: AmiConfig) -> Result<Self> {
        let array = config.array_mode()?;
        let session = PromptSession::start(transport, config.session_config()).await?;

        let mut driver = Self {
            session,
            registry: DatasetRegistry::new(),
            router: CommandRouter::new(),
            active: None,
            log: None,
            array: ArrayMode::Small,
            config,
        };

        if array == ArrayMode::Large {
            driver.switch_to_large_array().await?;
        } else {
            driver.update_files().await?;
        }

        info!(
            array = array.code(),
            datasets = driver.registry.len(),
            "reduce ready"
        );
        Ok(driver)
    }

    /// Switches to Large Array defaults and rebuilds the registry from the
    /// new file listing. The active dataset is cleared.
    pub async fn switch_to_large_array(&mut self) -> Result<()> {
        self.session.send(LARGE_ARRAY_COMMAND).await?;
        self.registry.reset();
        self.active = None;
        self.log = None;
        self.array = ArrayMode::Large;
        self.update_files().await?;
        Ok(())
    }

    /// Registers every dataset `reduce` lists, with its comment.
    ///
    /// Returns the number of datasets that were not known before.
    pub async fn update_files(&mut self) -> Result<usize> {
        let listing = self.session.send(r"list files \ ").await?;
        let discovered = output_parser::parse_file_listing(&listing)
            .into_iter()
            .filter(|entry| self.registry.discover(entry.id.clone()))
            .count();

        let comments = self.session.send(r"list comment \ ").await?;
        for entry in output_parser::parse_comment_listing(&comments) {
            let Some(comment) = entry.comment else {
                continue;
            };
            // Comments for datasets missing from the file listing are ignored
            if self.registry.contains(&entry.id) {
                self.registry.apply(&entry.id, FieldUpdate::Comment(comment))?;
            }
        }

        debug!(discovered, total = self.registry.len(), "Updated file list");
        Ok(discovered)
    }

    /// Reads a dataset's pointing and calibrator from `list observation`.
    ///
    /// Datasets not yet in the registry are added.
    pub async fn get_obs_details(&mut self, id: &DatasetId) -> Result<&DatasetRecord> {
        let block = self
            .session
            .send(&format!(r"list observation {id} \ "))
            .await?;

        let pointing = output_parser::parse_pointing(Some(id), &block)?;
        let calibrator = output_parser::parse_calibrator(&block);
        debug!(dataset = %id, %pointing, calibrator = ?calibrator, "Observation details");

        self.registry.discover(id.clone());
        self.registry.apply(id, FieldUpdate::Pointing(pointing))?;
        self.registry.apply(id, FieldUpdate::Calibrator(calibrator))?;
        self.registry
            .get(id)
            .ok_or_else(|| Error::UnknownDataset(id.clone()))
    }

    /// Makes a dataset the target of subsequent commands.
    ///
    /// Opens the dataset's transcript logs (in `log_dir`, else the configured
    /// log directory) when logging is enabled or a directory is given, loads the
    /// file in `reduce`, then reads its observation details.
    pub async fn set_active_file(
        &mut self,
        id: impl AsRef<str>,
        log_dir: Option<&Path>,
    ) -> Result<()> {
        let id = DatasetId::new(id.as_ref().trim());
        info!(dataset = %id, "Active file");
        self.active = Some(id.clone());

        self.log = if self.config.logging.enabled || log_dir.is_some() {
            let dir = log_dir
                .map(Path::to_path_buf)
                .or_else(|| self.config.logging.log_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            Some(DatasetLog::create(&dir, &id)?)
        } else {
            None
        };

        self.run_command(&format!(r"file {id} \ ")).await?;
        self.get_obs_details(&id).await?;
        Ok(())
    }

    /// Runs one command against the active dataset.
    ///
    /// The output is logged and routed to the parsers its command text selects.
    /// Returns the output lines, command echo included.
    pub async fn run_command(&mut self, command: &str) -> Result<Vec<String>> {
        let routed = self.router.routes_for(command).next().is_some();
        if routed && self.active.is_none() {
            return Err(Error::NoActiveDataset);
        }

        if let Some(log) = self.log.as_mut() {
            log.record_command(command);
        }
        let block = self.session.send(command).await?;
        if let Some(log) = self.log.as_mut() {
            log.record_output(self.session.prompt(), &block);
        }

        if let Some(active) = self.active.clone() {
            let updates = self.router.dispatch(command, Some(&active), &block)?;
            for update in updates {
                match &update {
                    FieldUpdate::RainCorrection(factor) => {
                        info!(dataset = %active, factor, "Rain mean amplitude correction factor");
                    }
                    FieldUpdate::EstimatedNoise(noise) => {
                        info!(dataset = %active, noise_mjy = noise * 1000.0, "Estimated noise");
                    }
                    _ => {}
                }
                self.registry.discover(active.clone());
                self.registry.apply(&active, update)?;
            }
        }

        Ok(output_parser::split_lines(&block)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Runs a multi-line script, one command per line. Blank lines are skipped.
    pub async fn run_script(&mut self, script: &str) -> Result<()> {
        for command in script.lines().filter(|line| !line.trim().is_empty()) {
            self.run_command(command.trim_end_matches('\r')).await?;
        }
        Ok(())
    }

    /// Records the final flagging summary for the active dataset.
    pub async fn update_flagging_info(&mut self) -> Result<Option<f64>> {
        let active = self.active.clone().ok_or(Error::NoActiveDataset)?;
        let lines = self.run_command(r"show flagging no yes \ ").await?;
        let final_flagging = output_parser::parse_flagging(Some(&active), &lines.join("\n"))?;

        self.registry
            .apply(&active, FieldUpdate::FlaggedFinal(final_flagging))?;
        match final_flagging {
            Some(percent) => info!(dataset = %active, percent, "Final flagging estimate"),
            None => warn!(dataset = %active, "No final flagging summary reported"),
        }
        Ok(final_flagging)
    }

    /// Writes target and calibrator UVFITS for a dataset into `output_dir`.
    ///
    /// `reduce` cannot handle long paths, so it writes short temporary names in
    /// its working directory and the files are moved afterwards. The target
    /// lands at `<stem>.fits`, the calibrator at `<calibrator>-<date>C.fits`.
    pub async fn write_files(
        &mut self,
        id: &DatasetId,
        output_dir: &Path,
    ) -> Result<(PathBuf, PathBuf)> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| Error::UnknownDataset(id.clone()))?;
        let calibrator = record
            .calibrator
            .clone()
            .ok_or_else(|| Error::MissingCalibrator(id.clone()))?;

        std::fs::create_dir_all(output_dir)?;
        let stem = id.stem();
        let date = stem.rsplit('-').next().unwrap_or(stem);
        let target_path = output_dir.join(format!("{stem}.fits"));
        let calibrator_path = output_dir.join(format!("{calibrator}-{date}C.fits"));

        let working_dir = self.config.effective_working_dir();
        let target_temp = reserve_temp_name(&working_dir)?;
        let calibrator_temp = reserve_temp_name(&working_dir)?;

        self.run_command(&format!(
            r"write fits no no all 3-8 all {} {} \ ",
            file_name(&target_temp),
            file_name(&calibrator_temp),
        ))
        .await?;

        debug!(from = %target_temp.display(), to = %target_path.display(), "Renaming tempfile");
        move_file(&target_temp, &target_path)?;
        debug!(from = %calibrator_temp.display(), to = %calibrator_path.display(), "Renaming tempfile");
        move_file(&calibrator_temp, &calibrator_path)?;

        let target_path = std::fs::canonicalize(&target_path)?;
        let calibrator_path = std::fs::canonicalize(&calibrator_path)?;
        info!(
            dataset = %id,
            target = %target_path.display(),
            calibrator = %calibrator_path.display(),
            "Wrote target and calibrator UVFITS"
        );

        self.registry.apply(
            id,
            FieldUpdate::OutputPaths {
                target: target_path.clone(),
                calibrator: calibrator_path.clone(),
            },
        )?;
        Ok((target_path, calibrator_path))
    }

    /// Groups all datasets by pointing, inspecting any whose pointing is
    /// still unknown first.
    pub async fn group_pointings(&mut self, tolerance_deg: f64) -> Result<GroupingOutcome> {
        for id in self.registry.missing_pointing() {
            self.get_obs_details(&id).await?;
        }

        let outcome = PointingGrouper::new(tolerance_deg).assign(&mut self.registry)?;
        info!(
            groups = outcome.groups.len(),
            collisions = outcome.collisions.len(),
            "Grouped pointings"
        );
        Ok(outcome)
    }

    /// Returns everything known about the datasets.
    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    /// Returns the active dataset, if any.
    pub fn active(&self) -> Option<&DatasetId> {
        self.active.as_ref()
    }

    /// Returns the array mode currently in effect.
    pub fn array(&self) -> ArrayMode {
        self.array
    }

    /// Returns the protocol state of the underlying session.
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn config(&self) -> &AmiConfig {
        &self.config
    }

    /// Terminates `reduce`.
    pub async fn close(self) -> Result<()> {
        info!(datasets = self.registry.len(), "Closing reduce");
        self.session.close().await
    }
}

/// Picks an unused `ami_*.fits` name in `dir`.
///
/// The placeholder file is removed again so `reduce` can create it.
fn reserve_temp_name(dir: &Path) -> Result<PathBuf> {
    let placeholder = tempfile::Builder::new()
        .prefix("ami_")
        .suffix(".fits")
        .tempfile_in(dir)?;
    let path = placeholder.path().to_path_buf();
    placeholder.close()?;
    Ok(path)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Renames, falling back to copy-and-delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_temp_names_are_short_and_free() {
        let dir = tempfile::tempdir().unwrap();
        let first = reserve_temp_name(dir.path()).unwrap();
        let second = reserve_temp_name(dir.path()).unwrap();

        assert_ne!(first, second);
        for path in [&first, &second] {
            let name = file_name(path);
            assert!(name.starts_with("ami_") && name.ends_with(".fits"), "{name}");
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_move_file() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("ami_x.fits");
        let to = dir.path().join("out").join("A-1.fits");
        std::fs::create_dir_all(to.parent().unwrap()).unwrap();
        std::fs::write(&from, b"data").unwrap();

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"data");
    }
}
