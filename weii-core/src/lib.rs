pub mod calibration;
pub mod metrics;
pub mod protocol;
pub mod units;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use calibration::{CalibrationAssembler, CalibrationError, CalibrationTable, Calibrator};
pub use metrics::{Balance, BalanceMetrics, Heavier, MetricsEngine};
pub use units::{DisplayUnit, UnsupportedUnit, to_display};

/// Unique identifier for one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One of the four pressure sensors under the board's feet.
///
/// "Top" is the end of the board facing away from the user, i.e. the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Sensor {
    pub const ALL: [Sensor; 4] = [
        Sensor::TopLeft,
        Sensor::TopRight,
        Sensor::BottomLeft,
        Sensor::BottomRight,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Sensor::TopLeft => "TL",
            Sensor::TopRight => "TR",
            Sensor::BottomLeft => "BL",
            Sensor::BottomRight => "BR",
        };
        f.write_str(name)
    }
}

/// A value per sensor, laid out TL, TR, BL, BR.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quad<T> {
    pub tl: T,
    pub tr: T,
    pub bl: T,
    pub br: T,
}

impl<T: Copy> Quad<T> {
    pub fn new(tl: T, tr: T, bl: T, br: T) -> Self {
        Self { tl, tr, bl, br }
    }

    pub fn get(&self, sensor: Sensor) -> T {
        match sensor {
            Sensor::TopLeft => self.tl,
            Sensor::TopRight => self.tr,
            Sensor::BottomLeft => self.bl,
            Sensor::BottomRight => self.br,
        }
    }

    pub fn try_map<U, E>(self, mut f: impl FnMut(Sensor, T) -> Result<U, E>) -> Result<Quad<U>, E> {
        Ok(Quad {
            tl: f(Sensor::TopLeft, self.tl)?,
            tr: f(Sensor::TopRight, self.tr)?,
            bl: f(Sensor::BottomLeft, self.bl)?,
            br: f(Sensor::BottomRight, self.br)?,
        })
    }
}

impl Quad<f64> {
    pub fn total(&self) -> f64 {
        self.tl + self.tr + self.bl + self.br
    }
}

/// Uncalibrated counts from one sensor report frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReport {
    /// Raw sensor counts.
    pub counts: Quad<u16>,
    /// Whether the board's front button was held in this report.
    pub button_pressed: bool,
    /// When the frame carrying this report was completed.
    pub received_at: Instant,
}

/// Sensor values converted to kilograms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratedReport {
    pub weights_kg: Quad<f64>,
    pub received_at: Instant,
}

impl CalibratedReport {
    pub fn total_kg(&self) -> f64 {
        self.weights_kg.total()
    }
}

/// The aggregate result of one capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Session that produced this measurement.
    pub session_id: SessionId,
    /// Mean weight per sensor across accepted samples, in kilograms.
    pub mean_kg: Quad<f64>,
    /// Median of the per-sample totals, in kilograms.
    pub median_total_kg: f64,
    /// Number of samples the means were taken over.
    pub sample_count: usize,
    /// Wall-clock time the measurement was completed.
    pub taken_at: jiff::Timestamp,
}

impl Measurement {
    pub fn total_kg(&self) -> f64 {
        self.mean_kg.total()
    }
}
