use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use weii_core::protocol::{
    CALIBRATION_ADDRESS, CALIBRATION_BLOCK_SIZE, CALIBRATION_OFFSET, Command, INPUT_MARKER, ReportId,
};
use weii_core::{CalibrationError, CalibrationTable, Quad};

use super::{LinkChannel, LinkError};

/// Zero-load counts per sensor, in block order TR, BR, TL, BL.
const ZERO_COUNTS: [u16; 4] = [1900, 2100, 2000, 1950];
/// The simulated sensors are linear at this many counts per kilogram.
const COUNTS_PER_KG: f64 = 100.0;
/// Share of the load each sensor carries.
const LOAD_SHARE: Quad<f64> = Quad {
    tl: 0.24,
    tr: 0.26,
    bl: 0.24,
    br: 0.26,
};
const BATTERY_LEVEL: u8 = 0xC0;
/// Largest chunk handed out per read, so frames arrive split.
const MAX_CHUNK: usize = 16;

#[derive(Debug, Clone)]
pub struct MockBoardConfig {
    /// Weight of the simulated user.
    pub weight_kg: f64,
    /// Delay between reports starting and the user stepping on.
    pub step_on_after: Duration,
    /// Delay between reports starting and the user stepping off, if ever.
    pub step_off_after: Option<Duration>,
    /// Interval between sensor reports.
    pub report_interval: Duration,
    /// Uniform noise added to every sensor.
    pub noise_kg: f64,
    /// Seed for reproducible noise and chunking.
    pub seed: Option<u64>,
}

impl Default for MockBoardConfig {
    fn default() -> Self {
        Self {
            weight_kg: 85.2,
            step_on_after: Duration::from_secs(2),
            step_off_after: None,
            report_interval: Duration::from_millis(10),
            noise_kg: 0.2,
            seed: None,
        }
    }
}

/// A simulated board that answers host commands and streams sensor reports.
pub struct MockBoard {
    config: MockBoardConfig,
    rng: StdRng,
    pending: VecDeque<u8>,
    streaming_since: Option<Instant>,
    next_report: Instant,
    closed: bool,
}

impl MockBoard {
    pub fn new(config: MockBoardConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        Self {
            config,
            rng,
            pending: VecDeque::new(),
            streaming_since: None,
            next_report: Instant::now(),
            closed: false,
        }
    }

    /// The calibration the simulated board reports.
    pub fn calibration_table() -> Result<CalibrationTable, CalibrationError> {
        CalibrationTable::from_board_block(&calibration_block())
    }

    fn handle_command(&mut self, command: Command) {
        debug!(?command, "Mock board received command");

        match command {
            Command::RequestStatus => {
                let mut frame = frame(ReportId::Status);
                frame[4] = 0x02;
                frame[7] = BATTERY_LEVEL;
                self.pending.extend(frame);
            }
            Command::WriteRegister { .. } => {
                let mut frame = frame(ReportId::Acknowledge);
                frame[4] = 0x16;
                self.pending.extend(frame);
            }
            Command::ReadMemory { address, size } => {
                if address != CALIBRATION_ADDRESS || usize::from(size) != CALIBRATION_BLOCK_SIZE {
                    warn!(address, size, "Mock board only serves the calibration block");
                    let mut frame = frame(ReportId::ReadMemory);
                    frame[4] = 0x08;
                    frame[5..7].copy_from_slice(&((address & 0xFFFF) as u16).to_be_bytes());
                    self.pending.extend(frame);
                    return;
                }

                let block = calibration_block();
                for (i, chunk) in block.chunks(16).enumerate() {
                    let offset = CALIBRATION_OFFSET + (i * 16) as u16;
                    let mut frame = frame(ReportId::ReadMemory);
                    frame[4] = ((chunk.len() - 1) as u8) << 4;
                    frame[5..7].copy_from_slice(&offset.to_be_bytes());
                    frame[7..7 + chunk.len()].copy_from_slice(chunk);
                    self.pending.extend(frame);
                }
            }
            Command::SetReportMode { report_id, .. } => {
                if report_id != ReportId::ButtonsExt8 as u8 {
                    warn!(report_id, "Mock board only streams extension reports");
                }
                let now = Instant::now();
                info!("Mock board streaming sensor reports");
                self.streaming_since = Some(now);
                self.next_report = now;
            }
        }
    }

    fn sensor_frame(&mut self, elapsed: Duration) -> Vec<u8> {
        let on_board = elapsed >= self.config.step_on_after
            && self.config.step_off_after.is_none_or(|off| elapsed < off);
        let load = if on_board { self.config.weight_kg } else { 0.0 };

        let noise = self.config.noise_kg.abs();
        let mut count = |zero: u16, share: f64| {
            let kg = load * share + self.rng.random_range(-noise..=noise);
            (f64::from(zero) + kg * COUNTS_PER_KG)
                .round()
                .clamp(0.0, f64::from(u16::MAX)) as u16
        };

        let [tr0, br0, tl0, bl0] = ZERO_COUNTS;
        let words = [
            count(tr0, LOAD_SHARE.tr),
            count(br0, LOAD_SHARE.br),
            count(tl0, LOAD_SHARE.tl),
            count(bl0, LOAD_SHARE.bl),
        ];

        let mut frame = frame(ReportId::ButtonsExt8);
        for (i, word) in words.iter().enumerate() {
            frame[4 + i * 2..6 + i * 2].copy_from_slice(&word.to_be_bytes());
        }
        frame
    }
}

#[async_trait]
impl LinkChannel for MockBoard {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        if self.closed {
            return Ok(None);
        }

        if self.pending.is_empty() {
            let since = match self.streaming_since {
                Some(since) => since,
                // nothing to say until the host asks for something
                None => std::future::pending().await,
            };

            tokio::time::sleep_until(self.next_report).await;
            let elapsed = self.next_report.duration_since(since);
            self.next_report += self.config.report_interval;

            let frame = self.sensor_frame(elapsed);
            self.pending.extend(frame);
        }

        let n = self.rng.random_range(1..=self.pending.len().min(MAX_CHUNK));
        Ok(Some(self.pending.drain(..n).collect()))
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }

        match Command::from_bytes(frame) {
            Ok(command) => self.handle_command(command),
            Err(e) => warn!(error = %e, "Mock board ignoring malformed command"),
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        info!("Mock board link closed");
        self.closed = true;
        Ok(())
    }
}

fn frame(id: ReportId) -> Vec<u8> {
    let mut frame = vec![0u8; id.frame_len()];
    frame[0] = INPUT_MARKER;
    frame[1] = id as u8;
    frame
}

fn calibration_block() -> Vec<u8> {
    [0.0, 17.0, 34.0]
        .iter()
        .flat_map(|kg: &f64| {
            ZERO_COUNTS
                .map(|zero| zero + (kg * COUNTS_PER_KG) as u16)
                .into_iter()
                .flat_map(u16::to_be_bytes)
        })
        .collect()
}
