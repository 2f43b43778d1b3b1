use super::{OUTPUT_MARKER, ParseResult, ProtocolError};

/// Register-space flag in the first address byte of memory commands.
const REGISTER_SPACE: u8 = 0x04;
/// Largest payload a single register write can carry.
const MAX_WRITE_SIZE: usize = 16;

/// How often the board sends sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingMode {
    /// Only when a value changes.
    OnChange,
    /// Continuously, whether or not values change.
    Continuous,
}

/// Host-to-board requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RequestStatus,
    SetReportMode { mode: ReportingMode, report_id: u8 },
    WriteRegister { address: u32, data: Vec<u8> },
    ReadMemory { address: u32, size: u16 },
}

impl Command {
    const SET_REPORT_MODE: u8 = 0x12;
    const REQUEST_STATUS: u8 = 0x15;
    const WRITE_REGISTER: u8 = 0x16;
    const READ_MEMORY: u8 = 0x17;

    pub fn to_bytes(&self) -> ParseResult<Vec<u8>> {
        let bytes = match self {
            Command::RequestStatus => vec![OUTPUT_MARKER, Self::REQUEST_STATUS, 0x00],
            Command::SetReportMode { mode, report_id } => {
                let flags = match mode {
                    ReportingMode::OnChange => 0x00,
                    ReportingMode::Continuous => 0x04,
                };
                vec![OUTPUT_MARKER, Self::SET_REPORT_MODE, flags, *report_id]
            }
            Command::WriteRegister { address, data } => {
                if data.len() > MAX_WRITE_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: data.len(),
                        max: MAX_WRITE_SIZE,
                    });
                }

                let mut bytes = Vec::with_capacity(7 + MAX_WRITE_SIZE);
                bytes.push(OUTPUT_MARKER);
                bytes.push(Self::WRITE_REGISTER);
                bytes.extend_from_slice(&register_address(*address));
                bytes.push(data.len() as u8);
                bytes.extend_from_slice(data);
                bytes.resize(7 + MAX_WRITE_SIZE, 0);
                bytes
            }
            Command::ReadMemory { address, size } => {
                let mut bytes = vec![OUTPUT_MARKER, Self::READ_MEMORY];
                bytes.extend_from_slice(&register_address(*address));
                bytes.extend_from_slice(&size.to_be_bytes());
                bytes
            }
        };

        Ok(bytes)
    }

    /// Parse a host-to-board frame. Used by the simulated board.
    pub fn from_bytes(bytes: &[u8]) -> ParseResult<Self> {
        if bytes.len() < 3 {
            return Err(ProtocolError::InsufficientData {
                needed: 3,
                available: bytes.len(),
            });
        }

        if bytes[0] != OUTPUT_MARKER {
            return Err(ProtocolError::InvalidMarker {
                marker: bytes[0],
                skipped: 0,
            });
        }

        let need = |needed: usize| {
            if bytes.len() < needed {
                Err(ProtocolError::InsufficientData {
                    needed,
                    available: bytes.len(),
                })
            } else {
                Ok(())
            }
        };

        match bytes[1] {
            Self::REQUEST_STATUS => Ok(Command::RequestStatus),
            Self::SET_REPORT_MODE => {
                need(4)?;
                let mode = if bytes[2] & 0x04 != 0 {
                    ReportingMode::Continuous
                } else {
                    ReportingMode::OnChange
                };
                Ok(Command::SetReportMode {
                    mode,
                    report_id: bytes[3],
                })
            }
            Self::WRITE_REGISTER => {
                need(7)?;
                let len = (bytes[6] as usize).min(MAX_WRITE_SIZE);
                need(7 + len)?;
                Ok(Command::WriteRegister {
                    address: parse_address(&bytes[3..6]),
                    data: bytes[7..7 + len].to_vec(),
                })
            }
            Self::READ_MEMORY => {
                need(8)?;
                Ok(Command::ReadMemory {
                    address: parse_address(&bytes[3..6]),
                    size: u16::from_be_bytes([bytes[6], bytes[7]]),
                })
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

fn register_address(address: u32) -> [u8; 4] {
    let [_, hi, mid, lo] = address.to_be_bytes();
    [REGISTER_SPACE, hi, mid, lo]
}

fn parse_address(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}
