use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use weii_core::protocol::{INPUT_MARKER, OUTPUT_MARKER};

use super::{LinkChannel, LinkError};

const READ_BUFFER_SIZE: usize = 256;

/// A link over any tokio byte stream.
pub struct StreamLink<S> {
    stream: S,
    buf: [u8; READ_BUFFER_SIZE],
    hidraw: bool,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: [0; READ_BUFFER_SIZE],
            hidraw: false,
        }
    }

    /// The stream carries bare HID reports, one per read, without the
    /// Bluetooth transaction header byte.
    pub fn hidraw(mut self) -> Self {
        self.hidraw = true;
        self
    }
}

impl StreamLink<tokio::fs::File> {
    /// Open a device node the OS has already connected to the board.
    pub async fn open(path: &Path, hidraw: bool) -> Result<Self, LinkError> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await?;
        info!(path = %path.display(), hidraw, "Opened board device");

        let link = Self::new(file);
        Ok(if hidraw { link.hidraw() } else { link })
    }
}

#[async_trait]
impl<S> LinkChannel for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        let n = self.stream.read(&mut self.buf).await?;
        if n == 0 {
            debug!("Board stream reached end of file");
            return Ok(None);
        }

        let mut bytes = Vec::with_capacity(n + 1);
        if self.hidraw {
            bytes.push(INPUT_MARKER);
        }
        bytes.extend_from_slice(&self.buf[..n]);
        Ok(Some(bytes))
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let frame = match frame.split_first() {
            Some((&OUTPUT_MARKER, rest)) if self.hidraw => rest,
            _ => frame,
        };

        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
