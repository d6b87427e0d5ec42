//! Byte-level seam between a prompt session and the process it drives.

use async_trait::async_trait;
use std::io;

/// A bidirectional line/byte channel to an interactive process.
///
/// Implementations must deliver output in arrival order. `read_chunk` returns
/// `Ok(None)` once the process has closed its output (EOF or exit); after that
/// no more data will arrive.
#[async_trait]
pub trait Transport: Send {
    /// Writes one command line, appending the line terminator.
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Waits for the next chunk of output.
    async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Terminates the process and releases its resources.
    async fn shutdown(&mut self) -> io::Result<()>;
}
