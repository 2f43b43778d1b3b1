mod command;
mod decoder;
mod error;
mod report;

pub use command::{Command, ReportingMode};
pub use decoder::FrameDecoder;
pub use error::{ParseResult, ProtocolError};
pub use report::{BoardEvent, CalibrationChunk, ReportId};

/// Bluetooth HID transaction header for board-to-host data.
pub const INPUT_MARKER: u8 = 0xA1;
/// Bluetooth HID transaction header for host-to-board data.
pub const OUTPUT_MARKER: u8 = 0xA2;

/// Longest frame the board sends (marker + id + 21 bytes).
pub const MAX_FRAME_SIZE: usize = 23;

/// Register-space address of the calibration block.
pub const CALIBRATION_ADDRESS: u32 = 0xA4_0024;
/// Size of the calibration block: 3 reference loads x 4 sensors x u16.
pub const CALIBRATION_BLOCK_SIZE: usize = 24;
/// Offset reported back in memory-read frames for the calibration block.
pub const CALIBRATION_OFFSET: u16 = (CALIBRATION_ADDRESS & 0xFFFF) as u16;

/// Extension initialisation registers, written in this order.
pub const EXTENSION_INIT: [(u32, u8); 2] = [(0xA4_00F0, 0x55), (0xA4_00FB, 0x00)];
