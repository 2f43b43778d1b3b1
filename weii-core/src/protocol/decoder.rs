use std::time::Instant;

use super::{BoardEvent, INPUT_MARKER, MAX_FRAME_SIZE, ParseResult, ProtocolError, ReportId};

/// Reassembles board frames from transport chunks of arbitrary size.
///
/// Bytes are buffered until a complete frame is available; nothing else is
/// carried from one frame to the next.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_FRAME_SIZE * 4),
        }
    }

    /// Append bytes read from the link.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// Returns `None` once the buffer holds only a partial frame. Errors
    /// consume the offending bytes, so calling again makes progress.
    pub fn next_event(&mut self, received_at: Instant) -> Option<ParseResult<BoardEvent>> {
        if self.buf.is_empty() {
            return None;
        }

        if self.buf[0] != INPUT_MARKER {
            let marker = self.buf[0];
            let skipped = self
                .buf
                .iter()
                .position(|&b| b == INPUT_MARKER)
                .unwrap_or(self.buf.len());
            self.buf.drain(..skipped);
            return Some(Err(ProtocolError::InvalidMarker { marker, skipped }));
        }

        if self.buf.len() < 2 {
            return None;
        }

        let id = match ReportId::try_from(self.buf[1]) {
            Ok(id) => id,
            Err(e) => {
                // drop the marker and rescan from the id byte
                self.buf.drain(..1);
                return Some(Err(e));
            }
        };

        let len = id.frame_len();
        if self.buf.len() < len {
            return None;
        }

        let result = BoardEvent::from_frame(&self.buf[..len], received_at);
        self.buf.drain(..len);
        Some(result)
    }
}
