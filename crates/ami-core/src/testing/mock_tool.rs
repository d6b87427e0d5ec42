//! Scripted stand-in for the `reduce` process.
//!
//! `MockTool` implements [`Transport`] and behaves like the tool seen through a
//! terminal: it prints a banner and the prompt on startup, echoes each command,
//! then prints the scripted response followed by the prompt again. Clones share
//! state, so a test can keep one handle to inspect the commands the driver sent.
//!
//! # Example
//!
//! ```
//! use ami_core::testing::MockTool;
//!
//! let tool = MockTool::new().on("list files", "\n A-1.raw\n\n\n Total\n");
//! let observer = tool.clone();
//! assert_eq!(observer.command_count(), 0);
//! ```

use ami_adapters::{DEFAULT_PROMPT, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Rule {
    prefix: String,
    response: String,
}

#[derive(Debug)]
struct MockState {
    prompt: String,
    banner: String,
    rules: Vec<Rule>,
    stall_prefix: Option<String>,
    fits_dir: Option<PathBuf>,
    silent: bool,
    started: bool,
    outbox: VecDeque<Vec<u8>>,
    commands: Vec<String>,
    eof: bool,
    closed: bool,
}

/// A scripted `reduce` replacement for tests.
#[derive(Debug, Clone)]
pub struct MockTool {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTool {
    /// Creates a tool that answers every command with an empty response.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                prompt: DEFAULT_PROMPT.to_string(),
                banner: "\r\n  AMI reduce (mock)\r\n\r\n".to_string(),
                rules: Vec::new(),
                stall_prefix: None,
                fits_dir: None,
                silent: false,
                started: false,
                outbox: VecDeque::new(),
                commands: Vec::new(),
                eof: false,
                closed: false,
            })),
        }
    }

    /// Uses a different prompt string.
    pub fn with_prompt(self, prompt: impl Into<String>) -> Self {
        self.lock().prompt = prompt.into();
        self
    }

    /// Answers commands starting with `prefix` with `response`.
    ///
    /// Rules are checked in the order they were added; the first match wins.
    /// `\n` in the response is sent as `\r\n`, like a terminal would.
    pub fn on(self, prefix: impl Into<String>, response: impl Into<String>) -> Self {
        self.lock().rules.push(Rule {
            prefix: prefix.into(),
            response: response.into(),
        });
        self
    }

    /// Makes the tool die (EOF, no prompt) when a command starting with
    /// `prefix` is sent.
    pub fn stall_on(self, prefix: impl Into<String>) -> Self {
        self.lock().stall_prefix = Some(prefix.into());
        self
    }

    /// Makes the tool exit without ever printing the prompt.
    pub fn silent(self) -> Self {
        self.lock().silent = true;
        self
    }

    /// Creates the two files named by `write fits` commands in `dir`.
    pub fn writes_fits_to(self, dir: impl Into<PathBuf>) -> Self {
        self.lock().fits_dir = Some(dir.into());
        self
    }

    /// Returns every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Returns the number of commands received.
    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    /// Returns true once the transport has been shut down.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MockState {
    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        if self.silent {
            self.eof = true;
            return;
        }
        let greeting = format!("{}{}", self.banner, self.prompt);
        self.outbox.push_back(greeting.into_bytes());
    }

    fn respond(&mut self, command: &str) -> io::Result<()> {
        let echo = format!("{command}\r\n");

        if self
            .stall_prefix
            .as_deref()
            .is_some_and(|prefix| command.starts_with(prefix))
        {
            self.outbox.push_back(echo.into_bytes());
            self.eof = true;
            return Ok(());
        }

        if command.starts_with("write fits") {
            self.create_fits(command)?;
        }

        let response = self
            .rules
            .iter()
            .find(|rule| command.starts_with(&rule.prefix))
            .map_or("", |rule| rule.response.as_str());

        let mut body = response.replace("\r\n", "\n").replace('\n', "\r\n");
        if !body.is_empty() && !body.ends_with('\n') {
            body.push_str("\r\n");
        }

        // Echo, body and prompt arrive as separate chunks to exercise reassembly
        self.outbox.push_back(echo.into_bytes());
        if !body.is_empty() {
            self.outbox.push_back(body.into_bytes());
        }
        self.outbox.push_back(self.prompt.clone().into_bytes());
        Ok(())
    }

    fn create_fits(&self, command: &str) -> io::Result<()> {
        let Some(dir) = &self.fits_dir else {
            return Ok(());
        };
        let names: Vec<&str> = command
            .split_whitespace()
            .filter(|token| *token != "\\")
            .collect();
        for name in names.iter().rev().take(2) {
            std::fs::write(dir.join(name), b"SIMPLE  =                    T")?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTool {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut state = self.lock();
        if state.closed || state.eof {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock tool exited"));
        }
        state.start();
        state.commands.push(line.to_string());
        state.respond(line)
    }

    async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut state = self.lock();
        state.start();
        Ok(state.outbox.pop_front())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        state.closed = true;
        state.outbox.clear();
        Ok(())
    }
}
