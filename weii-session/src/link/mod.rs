pub mod mock;
pub mod stream;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link is closed")]
    Closed,
}

/// An already-established byte connection to the board.
///
/// A session owns its link exclusively and never issues overlapping reads
/// or writes.
#[async_trait]
pub trait LinkChannel: Send {
    /// Wait for the next bytes from the board.
    ///
    /// The bytes may hold any part of one or more frames. Returns `None` once
    /// the link has closed. Must be cancel safe: dropping the future before
    /// it completes loses no data.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError>;

    /// Send one complete host-to-board frame.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Release the link.
    async fn close(&mut self) -> Result<(), LinkError>;
}
