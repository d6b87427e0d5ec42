//! PTY transport for the interactive `reduce` tool.
//!
//! Spawns the tool in a pseudo-terminal so it behaves exactly as it does for a
//! human at a terminal (line-buffered output, prompt without trailing newline).
//!
//! Architecture:
//! - PTY creation via `portable-pty`
//! - A dedicated blocking reader thread forwards output chunks over a tokio channel
//! - Termination sends SIGTERM, waits a short grace period, then SIGKILL

// PIDs are always within i32 range in practice
#![allow(clippy::cast_possible_wrap)]

use crate::transport::Transport;
use async_trait::async_trait;
use portable_pty::{CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Configuration for spawning the tool in a PTY.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Program to run.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory. Output products are written here.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Start from the current process environment (otherwise only `env` is set).
    pub inherit_env: bool,
    /// Terminal width. Kept wide so listings are never wrapped.
    pub cols: u16,
    /// Terminal height.
    pub rows: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            program: "tcsh".to_string(),
            args: vec!["-c".to_string(), "reduce".to_string()],
            cwd: None,
            env: HashMap::new(),
            inherit_env: true,
            cols: 200,
            rows: 50,
        }
    }
}

/// Output events from the PTY reader thread.
#[derive(Debug)]
enum OutputEvent {
    /// Data received from PTY.
    Data(Vec<u8>),
    /// PTY reached EOF (process exited).
    Eof,
    /// Error reading from PTY.
    Error(String),
}

/// A live `reduce` process attached to a pseudo-terminal.
pub struct PtyTransport {
    child: Box<dyn portable_pty::Child + Send>,
    writer: Box<dyn Write + Send>,
    output_rx: mpsc::Receiver<OutputEvent>,
    should_terminate: Arc<AtomicBool>,
    // Closing the master hangs up the terminal, so it lives as long as the transport.
    _master: Box<dyn MasterPty + Send>,
    closed: bool,
}

impl PtyTransport {
    /// Spawns the configured program in a new PTY.
    ///
    /// # Errors
    ///
    /// Returns an error if PTY allocation fails or the command cannot be spawned.
    pub fn spawn(config: &PtyConfig) -> io::Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| io::Error::other(e.to_string()))?;

        let mut cmd_builder = CommandBuilder::new(&config.program);
        cmd_builder.args(&config.args);

        let cwd = match &config.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| {
                io::Error::other(format!("Failed to get current directory: {}", e))
            })?,
        };
        cmd_builder.cwd(&cwd);

        if !config.inherit_env {
            cmd_builder.env_clear();
        }
        // Plain terminal: no colour codes from tcsh or the tool
        cmd_builder.env("TERM", "dumb");
        for (key, value) in &config.env {
            cmd_builder.env(key, value);
        }

        debug!(
            program = %config.program,
            args = ?config.args,
            cwd = ?cwd,
            "Spawning reduce in PTY"
        );

        let child = pair
            .slave
            .spawn_command(cmd_builder)
            .map_err(|e| io::Error::other(e.to_string()))?;

        // Drop the slave to signal EOF when the child exits
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| io::Error::other(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| io::Error::other(e.to_string()))?;

        let should_terminate = Arc::new(AtomicBool::new(false));
        let (output_tx, output_rx) = mpsc::channel::<OutputEvent>(256);
        let should_terminate_reader = Arc::clone(&should_terminate);

        debug!("Spawning PTY output reader thread");
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = [0u8; 4096];

            loop {
                if should_terminate_reader.load(Ordering::SeqCst) {
                    debug!("PTY reader: termination requested");
                    break;
                }

                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("PTY reader: EOF");
                        let _ = output_tx.blocking_send(OutputEvent::Eof);
                        break;
                    }
                    Ok(n) => {
                        if output_tx
                            .blocking_send(OutputEvent::Data(buf[..n].to_vec()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        // EIO is how Linux reports a hung-up PTY once the child is gone
                        debug!(error = %e, "PTY reader error");
                        let _ = output_tx.blocking_send(OutputEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            writer,
            output_rx,
            should_terminate,
            _master: pair.master,
            closed: false,
        })
    }

    /// Returns the child's process ID, if it is still known.
    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Terminates the child process.
    ///
    /// Sends SIGTERM and waits up to 2 seconds before SIGKILL.
    async fn terminate_child(&mut self) -> io::Result<()> {
        if self
            .child
            .try_wait()
            .map_err(|e| io::Error::other(e.to_string()))?
            .is_some()
        {
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(id) = self.child.process_id() {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(id as i32);
            debug!(pid = %pid, "Sending SIGTERM");
            let _ = kill(pid, Signal::SIGTERM);

            let grace_period = Duration::from_secs(2);
            let start = Instant::now();
            while start.elapsed() < grace_period {
                if self
                    .child
                    .try_wait()
                    .map_err(|e| io::Error::other(e.to_string()))?
                    .is_some()
                {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            debug!(pid = %pid, "Grace period expired, sending SIGKILL");
        }

        if let Err(e) = self.child.kill() {
            warn!(error = %e, "Failed to kill reduce process");
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for PtyTransport {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.output_rx.recv().await {
            Some(OutputEvent::Data(data)) => Ok(Some(data)),
            Some(OutputEvent::Eof) | None => Ok(None),
            Some(OutputEvent::Error(e)) => {
                // A read error after the child exited is just the hang-up
                if self
                    .child
                    .try_wait()
                    .map_err(|err| io::Error::other(err.to_string()))?
                    .is_some()
                {
                    Ok(None)
                } else {
                    Err(io::Error::other(e))
                }
            }
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.should_terminate.store(true, Ordering::SeqCst);
        self.terminate_child().await
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        self.should_terminate.store(true, Ordering::SeqCst);
        if !self.closed && matches!(self.child.try_wait(), Ok(None)) {
            debug!("Killing reduce process on drop");
            let _ = self.child.kill();
        }
    }
}
