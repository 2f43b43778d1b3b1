pub type ParseResult<T> = core::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid frame marker {marker:#04X}, skipped {skipped} bytes")]
    InvalidMarker { marker: u8, skipped: usize },

    #[error("unknown report id {0:#04X}")]
    UnknownReport(u8),

    #[error("insufficient data: needed {needed}, available {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("memory read at {offset:#06X} failed with error code {code}")]
    MemoryRead { offset: u16, code: u8 },

    #[error("unknown command id {0:#04X}")]
    UnknownCommand(u8),

    #[error("command payload too large: {size} bytes, max {max}")]
    PayloadTooLarge { size: usize, max: usize },
}
