use std::time::Instant;

use super::{INPUT_MARKER, ParseResult, ProtocolError};
use crate::{Quad, RawReport};

// frame structure: marker(1) + report id(1) + payload, length fixed by the id

/// Input report ids the board sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportId {
    Status = 0x20,
    ReadMemory = 0x21,
    Acknowledge = 0x22,
    Buttons = 0x30,
    ButtonsExt8 = 0x32,
    ButtonsExt19 = 0x34,
    Ext21 = 0x3D,
}

impl TryFrom<u8> for ReportId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x20 => Ok(ReportId::Status),
            0x21 => Ok(ReportId::ReadMemory),
            0x22 => Ok(ReportId::Acknowledge),
            0x30 => Ok(ReportId::Buttons),
            0x32 => Ok(ReportId::ButtonsExt8),
            0x34 => Ok(ReportId::ButtonsExt19),
            0x3D => Ok(ReportId::Ext21),
            _ => Err(ProtocolError::UnknownReport(value)),
        }
    }
}

impl ReportId {
    /// Total frame length, marker and id included.
    pub const fn frame_len(self) -> usize {
        match self {
            ReportId::Status => 8,
            ReportId::ReadMemory => 23,
            ReportId::Acknowledge => 6,
            ReportId::Buttons => 4,
            ReportId::ButtonsExt8 => 12,
            ReportId::ButtonsExt19 => 23,
            ReportId::Ext21 => 23,
        }
    }
}

/// Status flag set while the pressure plate extension is active.
const STATUS_EXTENSION_ACTIVE: u8 = 0x02;
/// Button A in the second core-button byte; the board's front button.
const BUTTON_A: u8 = 0x08;

/// A chunk of board memory returned by a read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationChunk {
    /// Low 16 bits of the address the chunk starts at.
    pub offset: u16,
    pub data: Vec<u8>,
}

/// A decoded board-to-host frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// The pressure plate reported itself active.
    Activation { battery: u8 },
    /// The pressure plate went inactive.
    Deactivation,
    /// Four raw sensor counts.
    Raw(RawReport),
    /// Part of the calibration block.
    Calibration(CalibrationChunk),
    /// A well-formed frame the pipeline has no use for.
    Unrecognized { report_id: u8 },
}

impl BoardEvent {
    /// Parse one complete frame. `frame` must start with the input marker and
    /// be exactly as long as its report id declares.
    pub fn from_frame(frame: &[u8], received_at: Instant) -> ParseResult<Self> {
        if frame.len() < 2 {
            return Err(ProtocolError::InsufficientData {
                needed: 2,
                available: frame.len(),
            });
        }

        if frame[0] != INPUT_MARKER {
            return Err(ProtocolError::InvalidMarker {
                marker: frame[0],
                skipped: 0,
            });
        }

        let id = ReportId::try_from(frame[1])?;
        let needed = id.frame_len();
        if frame.len() < needed {
            return Err(ProtocolError::InsufficientData {
                needed,
                available: frame.len(),
            });
        }

        let payload = &frame[2..needed];

        let event = match id {
            ReportId::Status => {
                if payload[2] & STATUS_EXTENSION_ACTIVE != 0 {
                    BoardEvent::Activation {
                        battery: payload[5],
                    }
                } else {
                    BoardEvent::Deactivation
                }
            }
            ReportId::ReadMemory => {
                let size = (payload[2] >> 4) as usize + 1;
                let code = payload[2] & 0x0F;
                let offset = u16::from_be_bytes([payload[3], payload[4]]);

                if code != 0 {
                    return Err(ProtocolError::MemoryRead { offset, code });
                }

                BoardEvent::Calibration(CalibrationChunk {
                    offset,
                    data: payload[5..5 + size].to_vec(),
                })
            }
            ReportId::Acknowledge | ReportId::Buttons => BoardEvent::Unrecognized {
                report_id: id as u8,
            },
            ReportId::ButtonsExt8 | ReportId::ButtonsExt19 => BoardEvent::Raw(RawReport {
                counts: sensor_counts(&payload[2..10]),
                button_pressed: payload[1] & BUTTON_A != 0,
                received_at,
            }),
            ReportId::Ext21 => BoardEvent::Raw(RawReport {
                counts: sensor_counts(&payload[..8]),
                button_pressed: false,
                received_at,
            }),
        };

        Ok(event)
    }
}

/// Extension bytes carry big-endian counts in board order TR, BR, TL, BL.
fn sensor_counts(ext: &[u8]) -> Quad<u16> {
    let word = |i: usize| u16::from_be_bytes([ext[i], ext[i + 1]]);

    Quad {
        tr: word(0),
        br: word(2),
        tl: word(4),
        bl: word(6),
    }
}
