//! # ami-adapters
//!
//! Session layer for driving the interactive `reduce` tool.
//!
//! The tool is a prompt-based REPL: it prints `AMI-reduce>` when it is ready for the
//! next command. This crate turns that text stream into a strict request/response
//! protocol:
//!
//! - `transport` defines the byte-level seam (`Transport`) between the session and
//!   whatever is producing output.
//! - `pty_transport` spawns the real tool in a pseudo-terminal.
//! - `prompt_session` enforces the send-command/await-prompt cycle and tracks the
//!   protocol state (`Ready`, `AwaitingPrompt`, `Stalled`).

mod prompt_session;
mod pty_transport;
mod transport;

pub use prompt_session::{DEFAULT_PROMPT, PromptSession, SessionConfig, SessionState};
pub use pty_transport::{PtyConfig, PtyTransport};
pub use transport::Transport;
