//! Request/response session over a prompt-based text interface.
//!
//! `reduce` has no framing beyond its prompt: a command is complete when
//! `AMI-reduce>` shows up again. `PromptSession` turns that into a strict cycle:
//!
//! ```text
//!   Ready --send--> AwaitingPrompt --prompt seen--> Ready
//!                          |
//!                          +--EOF / idle timeout / I/O error--> Stalled (terminal)
//! ```
//!
//! Every call that returns `Ok` leaves the session `Ready`. A stalled session rejects
//! all further commands; callers must start a new one.

use crate::transport::Transport;
use ami_proto::{Error, Result};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// The prompt printed by `reduce` when it is ready for input.
pub const DEFAULT_PROMPT: &str = "AMI-reduce>";

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The prompt was just matched; a command may be sent.
    Ready,
    /// A command (or startup) is in flight.
    AwaitingPrompt,
    /// The prompt never came back. The session cannot be used again.
    Stalled,
}

/// Timing and prompt settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Prompt string that marks the end of each response.
    pub prompt: String,
    /// Upper bound on the wait for the first prompt.
    pub startup_timeout: Duration,
    /// Longest silence tolerated while awaiting a prompt (`None` = wait forever).
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            startup_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Why a prompt wait ended without a prompt.
#[derive(Debug)]
enum WaitError {
    Eof,
    Idle(Duration),
    Io(std::io::Error),
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Eof => f.write_str("process closed its output"),
            WaitError::Idle(d) => write!(f, "no output for {}s", d.as_secs()),
            WaitError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

/// A live `reduce` session with exclusive ownership of its transport.
pub struct PromptSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    /// Output received after the last matched prompt (ANSI-stripped on match).
    pending: Vec<u8>,
}

impl<T: Transport> PromptSession<T> {
    /// Waits for the first prompt on a freshly spawned transport.
    ///
    /// The transport is shut down if the prompt does not appear within
    /// `startup_timeout`.
    pub async fn start(transport: T, config: SessionConfig) -> Result<Self> {
        let mut session = Self {
            transport,
            config,
            state: SessionState::AwaitingPrompt,
            pending: Vec::new(),
        };

        let startup_timeout = session.config.startup_timeout;
        let outcome = tokio::time::timeout(startup_timeout, session.read_until_prompt()).await;

        let reason = match outcome {
            Ok(Ok(banner)) => {
                session.state = SessionState::Ready;
                debug!(banner_len = banner.len(), "reduce prompt reached");
                return Ok(session);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "prompt '{}' not seen within {}s",
                session.config.prompt,
                startup_timeout.as_secs()
            ),
        };

        session.state = SessionState::Stalled;
        if let Err(e) = session.transport.shutdown().await {
            warn!(error = %e, "Failed to shut down transport after startup failure");
        }
        Err(Error::Startup(reason))
    }

    /// Sends one command and returns everything printed before the next prompt.
    ///
    /// The returned block starts with the terminal's echo of the command.
    /// Parsers are expected to skip it.
    pub async fn send(&mut self, command: &str) -> Result<String> {
        if self.state == SessionState::Stalled {
            return Err(Error::ProtocolStall {
                command: command.to_string(),
                reason: "session already stalled".to_string(),
            });
        }
        if command.contains('\n') {
            return Err(Error::Configuration(format!(
                "command must be a single line: {command:?}"
            )));
        }

        trace!(command, "-> reduce");
        self.state = SessionState::AwaitingPrompt;

        if let Err(e) = self.transport.write_line(command).await {
            self.state = SessionState::Stalled;
            return Err(Error::ProtocolStall {
                command: command.to_string(),
                reason: format!("write failed: {e}"),
            });
        }

        match self.read_until_prompt().await {
            Ok(block) => {
                self.state = SessionState::Ready;
                trace!(bytes = block.len(), "<- reduce");
                Ok(block)
            }
            Err(e) => {
                warn!(command, reason = %e, "reduce stalled");
                self.state = SessionState::Stalled;
                Err(Error::ProtocolStall {
                    command: command.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Terminates the tool and releases the transport.
    pub async fn close(mut self) -> Result<()> {
        debug!(state = ?self.state, "Closing reduce session");
        self.state = SessionState::Stalled;
        self.transport.shutdown().await?;
        Ok(())
    }

    /// Returns the current protocol state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if a command may be sent.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Returns the prompt this session synchronises on.
    pub fn prompt(&self) -> &str {
        &self.config.prompt
    }

    /// Reads until the prompt appears, returning the text before it.
    async fn read_until_prompt(&mut self) -> std::result::Result<String, WaitError> {
        loop {
            if let Some(block) = self.take_block() {
                return Ok(block);
            }

            let chunk = match self.config.idle_timeout {
                Some(idle) => tokio::time::timeout(idle, self.transport.read_chunk())
                    .await
                    .map_err(|_| WaitError::Idle(idle))?,
                None => self.transport.read_chunk().await,
            };

            match chunk {
                Ok(Some(data)) => self.pending.extend_from_slice(&data),
                Ok(None) => return Err(WaitError::Eof),
                Err(e) => return Err(WaitError::Io(e)),
            }
        }
    }

    /// Splits the pending output at the first prompt, keeping what follows it.
    fn take_block(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = strip_ansi(&self.pending);
        let idx = text.find(&self.config.prompt)?;
        let block = text[..idx].to_string();
        self.pending = text[idx + self.config.prompt.len()..].as_bytes().to_vec();
        Some(block)
    }
}

/// Strips ANSI escape sequences from raw bytes, keeping tabs and carriage returns.
///
/// `strip_ansi_escapes` drops every control byte except `\n`, so the text is
/// cut at `\t` and `\r` and each piece is stripped on its own.
fn strip_ansi(bytes: &[u8]) -> String {
    let is_kept = |b: &u8| matches!(b, b'\t' | b'\r');
    let mut out = Vec::with_capacity(bytes.len());
    for segment in bytes.split_inclusive(is_kept) {
        match segment.split_last() {
            Some((last, body)) if is_kept(last) => {
                out.extend(strip_ansi_escapes::strip(body));
                out.push(*last);
            }
            _ => out.extend(strip_ansi_escapes::strip(segment)),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;

    /// Transport that replies to each written line with the next canned chunk list.
    struct CannedTransport {
        queued: VecDeque<Vec<u8>>,
        replies: VecDeque<Vec<Vec<u8>>>,
        written: Vec<String>,
        hang_when_empty: bool,
        shut_down: bool,
    }

    impl CannedTransport {
        fn new(banner: &[&str], replies: Vec<Vec<&str>>) -> Self {
            Self {
                queued: banner.iter().map(|s| s.as_bytes().to_vec()).collect(),
                replies: replies
                    .into_iter()
                    .map(|r| r.into_iter().map(|s| s.as_bytes().to_vec()).collect())
                    .collect(),
                written: Vec::new(),
                hang_when_empty: false,
                shut_down: false,
            }
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.written.push(line.to_string());
            if let Some(chunks) = self.replies.pop_front() {
                self.queued.extend(chunks);
            }
            Ok(())
        }

        async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
            match self.queued.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None if self.hang_when_empty => {
                    std::future::pending::<()>().await;
                    Ok(None)
                }
                None => Ok(None),
            }
        }

        async fn shutdown(&mut self) -> io::Result<()> {
            self.shut_down = true;
            Ok(())
        }
    }

    fn quick_config() -> SessionConfig {
        SessionConfig {
            startup_timeout: Duration::from_millis(200),
            idle_timeout: Some(Duration::from_millis(200)),
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_waits_for_prompt_split_across_chunks() {
        let transport = CannedTransport::new(&["Welcome to reduce\r\nAMI-re", "duce>"], vec![]);
        let session = PromptSession::start(transport, quick_config()).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_start_fails_when_process_exits_before_prompt() {
        let transport = CannedTransport::new(&["tcsh: reduce: Command not found.\r\n"], vec![]);
        let result = PromptSession::start(transport, quick_config()).await;
        assert!(matches!(result, Err(Error::Startup(msg)) if msg.contains("closed")));
    }

    #[tokio::test]
    async fn test_start_times_out_without_prompt() {
        let mut transport = CannedTransport::new(&["loading..."], vec![]);
        transport.hang_when_empty = true;
        let config = SessionConfig {
            idle_timeout: None,
            ..quick_config()
        };
        let result = PromptSession::start(transport, config).await;
        assert!(matches!(result, Err(Error::Startup(msg)) if msg.contains("not seen")));
    }

    #[tokio::test]
    async fn test_send_returns_text_between_prompts() {
        let transport = CannedTransport::new(
            &["AMI-reduce>"],
            vec![vec![" list files \\ \r\n\r\n", "A-1.raw\r\n", "AMI-reduce>"]],
        );
        let mut session = PromptSession::start(transport, quick_config()).await.unwrap();

        let block = session.send(r"list files \ ").await.unwrap();

        assert_eq!(block, " list files \\ \r\n\r\nA-1.raw\r\n");
        assert!(session.is_ready());
        assert_eq!(session.transport.written, vec![r"list files \ "]);
    }

    #[tokio::test]
    async fn test_ansi_sequences_are_stripped() {
        let transport = CannedTransport::new(
            &["\x1b[1mAMI-reduce>\x1b[0m"],
            vec![vec!["\x1b[32mdone\x1b[0m\r\n\x1b[1mAMI-reduce>"]],
        );
        let mut session = PromptSession::start(transport, quick_config()).await.unwrap();
        let block = session.send("go").await.unwrap();
        assert_eq!(block, "done\r\n");
    }

    #[test]
    fn test_strip_ansi_keeps_tabs_and_carriage_returns() {
        assert_eq!(
            strip_ansi(b"a\r\nTracking\t: 12\r\n"),
            "a\r\nTracking\t: 12\r\n"
        );
        assert_eq!(strip_ansi(b"\x1b[1mnoise\x1b[0m\t0.03\tJy"), "noise\t0.03\tJy");
    }

    #[tokio::test]
    async fn test_tab_separated_output_survives() {
        let transport = CannedTransport::new(
            &["AMI-reduce>"],
            vec![vec!["reweight\r\n", "estimated noise\t0.0312\tJy\r\n", "AMI-reduce>"]],
        );
        let mut session = PromptSession::start(transport, quick_config()).await.unwrap();
        let block = session.send("reweight").await.unwrap();
        assert_eq!(block, "reweight\r\nestimated noise\t0.0312\tJy\r\n");
    }

    #[tokio::test]
    async fn test_session_ready_after_every_send() {
        let replies = (0..5)
            .map(|_| vec!["whatever the tool says\r\n", "AMI-reduce>"])
            .collect();
        let transport = CannedTransport::new(&["AMI-reduce>"], replies);
        let mut session = PromptSession::start(transport, quick_config()).await.unwrap();

        for cmd in ["a", "b", "c", "d", "e"] {
            session.send(cmd).await.unwrap();
            assert_eq!(session.state(), SessionState::Ready);
        }
    }

    #[tokio::test]
    async fn test_eof_mid_command_stalls_session_permanently() {
        let transport = CannedTransport::new(&["AMI-reduce>"], vec![vec!["Segmentation fault\r\n"]]);
        let mut session = PromptSession::start(transport, quick_config()).await.unwrap();

        let err = session.send("crash").await.unwrap_err();
        assert!(matches!(err, Error::ProtocolStall { ref command, .. } if command == "crash"));
        assert_eq!(session.state(), SessionState::Stalled);

        let err = session.send("list files").await.unwrap_err();
        assert!(matches!(err, Error::ProtocolStall { reason, .. } if reason.contains("already stalled")));
    }

    #[tokio::test]
    async fn test_idle_timeout_stalls_session() {
        let mut transport = CannedTransport::new(&["AMI-reduce>"], vec![vec!["working...\r\n"]]);
        transport.hang_when_empty = true;
        let mut session = PromptSession::start(transport, quick_config()).await.unwrap();

        let err = session.send("hang").await.unwrap_err();
        assert!(matches!(err, Error::ProtocolStall { reason, .. } if reason.contains("no output")));
        assert_eq!(session.state(), SessionState::Stalled);
    }

    #[tokio::test]
    async fn test_multiline_command_rejected_without_state_change() {
        let transport = CannedTransport::new(&["AMI-reduce>"], vec![]);
        let mut session = PromptSession::start(transport, quick_config()).await.unwrap();

        let err = session.send("a\nb").await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(session.is_ready());
        assert!(session.transport.written.is_empty());
    }

    #[tokio::test]
    async fn test_close_after_start() {
        let transport = CannedTransport::new(&["AMI-reduce>"], vec![]);
        let session = PromptSession::start(transport, quick_config()).await.unwrap();
        assert!(!session.transport.shut_down);
        session.close().await.unwrap();
    }
}
