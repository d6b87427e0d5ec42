//! Per-dataset transcript logs.
//!
//! Every active dataset gets two streams: the full session transcript
//! (`<stem>.ami.log`, prompt followed by the tool's output) and the bare
//! commands (`<stem>.ami.commands`), which can be replayed later as a
//! `reduce` script. Lines are flushed as they are written so a crashed
//! session still leaves a complete record.

use ami_proto::DatasetId;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extension of the transcript log.
pub const TRANSCRIPT_EXTENSION: &str = "ami.log";

/// Extension of the command log.
pub const COMMANDS_EXTENSION: &str = "ami.commands";

/// Transcript and command writers for one dataset.
pub struct DatasetLog<W: Write> {
    dataset: DatasetId,
    transcript: W,
    commands: W,
}

impl DatasetLog<BufWriter<File>> {
    /// Creates the log files for a dataset in `dir`, truncating any from an
    /// earlier activation.
    pub fn create(dir: &Path, dataset: &DatasetId) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (transcript_path, commands_path) = Self::paths(dir, dataset);
        debug!(
            dataset = %dataset,
            transcript = %transcript_path.display(),
            "Opening dataset logs"
        );

        let open = |path: &Path| {
            File::options()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .map(BufWriter::new)
        };

        Ok(Self::new(
            dataset.clone(),
            open(&transcript_path)?,
            open(&commands_path)?,
        ))
    }

    /// Returns the transcript and command log paths for a dataset.
    pub fn paths(dir: &Path, dataset: &DatasetId) -> (PathBuf, PathBuf) {
        let stem = dataset.stem();
        (
            dir.join(format!("{stem}.{TRANSCRIPT_EXTENSION}")),
            dir.join(format!("{stem}.{COMMANDS_EXTENSION}")),
        )
    }
}

impl<W: Write> DatasetLog<W> {
    /// Wraps existing writers.
    pub fn new(dataset: DatasetId, transcript: W, commands: W) -> Self {
        Self {
            dataset,
            transcript,
            commands,
        }
    }

    /// Returns the dataset these logs belong to.
    pub fn dataset(&self) -> &DatasetId {
        &self.dataset
    }

    /// Appends a command to the command log.
    pub fn record_command(&mut self, command: &str) {
        let result = writeln!(self.commands, "{command}").and_then(|()| self.commands.flush());
        self.report(result, "commands");
    }

    /// Appends one prompt/response exchange to the transcript.
    pub fn record_output(&mut self, prompt: &str, block: &str) {
        let result = writeln!(self.transcript, "{prompt}{block}")
            .and_then(|()| self.transcript.flush());
        self.report(result, "transcript");
    }

    /// Consumes the log, returning the transcript and command writers.
    pub fn into_inner(self) -> (W, W) {
        (self.transcript, self.commands)
    }

    // Log failures must never interrupt a reduction
    fn report(&self, result: io::Result<()>, stream: &str) {
        if let Err(e) = result {
            warn!(dataset = %self.dataset, stream, error = %e, "Failed to write dataset log");
        }
    }
}
