use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::{CALIBRATION_BLOCK_SIZE, CALIBRATION_OFFSET, CalibrationChunk};
use crate::{CalibratedReport, Quad, RawReport, Sensor};

/// Reference loads behind the three rows of the board's calibration block.
pub const REFERENCE_LOADS_KG: [f64; 3] = [0.0, 17.0, 34.0];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("no calibration table loaded")]
    Missing,

    #[error("sensor {sensor} has {count} reference points, need at least 2")]
    TooFewPoints { sensor: Sensor, count: usize },

    #[error("sensor {sensor} reference points are not strictly increasing")]
    NotIncreasing { sensor: Sensor },

    #[error("calibration block is {actual} bytes, expected {expected}")]
    BlockSize { expected: usize, actual: usize },
}

/// A known load and the raw count a sensor reported under it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub raw: u16,
    pub weight_kg: f64,
}

/// Reference points for all four sensors, validated on construction.
///
/// Deserializing goes through [`CalibrationTable::new`], so a stored table
/// is held to the same rules as one built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TablePoints", into = "TablePoints")]
pub struct CalibrationTable {
    points: [Box<[ReferencePoint]>; 4],
}

/// Serialized shape of a [`CalibrationTable`].
#[derive(Serialize, Deserialize)]
struct TablePoints {
    points: [Vec<ReferencePoint>; 4],
}

impl TryFrom<TablePoints> for CalibrationTable {
    type Error = CalibrationError;

    fn try_from(table: TablePoints) -> Result<Self, Self::Error> {
        Self::new(table.points)
    }
}

impl From<CalibrationTable> for TablePoints {
    fn from(table: CalibrationTable) -> Self {
        Self {
            points: table.points.map(Vec::from),
        }
    }
}

impl CalibrationTable {
    /// Build a table, ordered TL, TR, BL, BR.
    ///
    /// Raw counts must be strictly increasing and weights non-decreasing
    /// within each sensor, which keeps the calibrated curve monotonic.
    pub fn new(points: [Vec<ReferencePoint>; 4]) -> Result<Self, CalibrationError> {
        for sensor in Sensor::ALL {
            let pts = &points[sensor.index()];
            if pts.len() < 2 {
                return Err(CalibrationError::TooFewPoints {
                    sensor,
                    count: pts.len(),
                });
            }

            let ordered = pts
                .windows(2)
                .all(|w| w[0].raw < w[1].raw && w[0].weight_kg <= w[1].weight_kg);
            let finite = pts.iter().all(|p| p.weight_kg.is_finite());
            if !ordered || !finite {
                return Err(CalibrationError::NotIncreasing { sensor });
            }
        }

        Ok(Self {
            points: points.map(Vec::into_boxed_slice),
        })
    }

    /// Parse the board's 24-byte calibration block.
    ///
    /// The block holds one row per reference load, each row four big-endian
    /// counts in board order TR, BR, TL, BL.
    pub fn from_board_block(block: &[u8]) -> Result<Self, CalibrationError> {
        if block.len() != CALIBRATION_BLOCK_SIZE {
            return Err(CalibrationError::BlockSize {
                expected: CALIBRATION_BLOCK_SIZE,
                actual: block.len(),
            });
        }

        let mut points: [Vec<ReferencePoint>; 4] = Default::default();

        for (row, &weight_kg) in block.chunks_exact(8).zip(REFERENCE_LOADS_KG.iter()) {
            let word = |i: usize| u16::from_be_bytes([row[i], row[i + 1]]);
            let counts = Quad {
                tr: word(0),
                br: word(2),
                tl: word(4),
                bl: word(6),
            };

            for sensor in Sensor::ALL {
                points[sensor.index()].push(ReferencePoint {
                    raw: counts.get(sensor),
                    weight_kg,
                });
            }
        }

        Self::new(points)
    }

    /// The same reference points for every sensor.
    pub fn uniform(points: &[ReferencePoint]) -> Result<Self, CalibrationError> {
        Self::new([
            points.to_vec(),
            points.to_vec(),
            points.to_vec(),
            points.to_vec(),
        ])
    }

    pub fn points(&self, sensor: Sensor) -> &[ReferencePoint] {
        &self.points[sensor.index()]
    }

    /// Piecewise-linear weight for `raw`, extrapolating past either end.
    pub fn weight_kg(&self, sensor: Sensor, raw: u16) -> f64 {
        let points = self.points(sensor);
        let x = f64::from(raw);

        // segment whose upper point is the first one above x, kept inside the table
        let upper = points
            .partition_point(|p| p.raw <= raw)
            .clamp(1, points.len() - 1);
        let (a, b) = (points[upper - 1], points[upper]);

        let slope = (b.weight_kg - a.weight_kg) / (f64::from(b.raw) - f64::from(a.raw));
        a.weight_kg + (x - f64::from(a.raw)) * slope
    }
}

/// Converts raw counts to kilograms using a session's calibration table.
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    table: Option<Arc<CalibrationTable>>,
}

impl Calibrator {
    pub fn new() -> Self {
        Self { table: None }
    }

    pub fn with_table(table: Arc<CalibrationTable>) -> Self {
        Self { table: Some(table) }
    }

    pub fn load(&mut self, table: Arc<CalibrationTable>) {
        self.table = Some(table);
    }

    pub fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    pub fn table(&self) -> Option<&Arc<CalibrationTable>> {
        self.table.as_ref()
    }

    pub fn calibrate(&self, sensor: Sensor, raw_count: u16) -> Result<f64, CalibrationError> {
        let table = self.table.as_ref().ok_or(CalibrationError::Missing)?;
        Ok(table.weight_kg(sensor, raw_count))
    }

    pub fn calibrate_report(&self, report: &RawReport) -> Result<CalibratedReport, CalibrationError> {
        let weights_kg = report
            .counts
            .try_map(|sensor, raw| self.calibrate(sensor, raw))?;

        Ok(CalibratedReport {
            weights_kg,
            received_at: report.received_at,
        })
    }
}

/// Collects memory-read chunks until the whole calibration block is present.
#[derive(Debug, Clone)]
pub struct CalibrationAssembler {
    block: [u8; CALIBRATION_BLOCK_SIZE],
    filled: [bool; CALIBRATION_BLOCK_SIZE],
}

impl Default for CalibrationAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationAssembler {
    pub fn new() -> Self {
        Self {
            block: [0; CALIBRATION_BLOCK_SIZE],
            filled: [false; CALIBRATION_BLOCK_SIZE],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.filled.iter().all(|&f| f)
    }

    /// Add a chunk; bytes outside the calibration block are ignored.
    ///
    /// Returns the parsed table once every byte of the block has arrived.
    pub fn insert(
        &mut self,
        chunk: &CalibrationChunk,
    ) -> Option<Result<CalibrationTable, CalibrationError>> {
        let base = usize::from(CALIBRATION_OFFSET);
        let start = usize::from(chunk.offset);

        for (i, &byte) in chunk.data.iter().enumerate() {
            let Some(pos) = (start + i).checked_sub(base) else {
                continue;
            };
            if pos < CALIBRATION_BLOCK_SIZE {
                self.block[pos] = byte;
                self.filled[pos] = true;
            }
        }

        debug!(
            offset = chunk.offset,
            len = chunk.data.len(),
            filled = self.filled.iter().filter(|&&f| f).count(),
            "Calibration chunk received"
        );

        self.is_complete()
            .then(|| CalibrationTable::from_board_block(&self.block))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn assert_close(actual: Result<f64, CalibrationError>, expected: f64) {
        let actual = actual.unwrap();
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn linear_table() -> CalibrationTable {
        CalibrationTable::uniform(&[
            ReferencePoint {
                raw: 0,
                weight_kg: 0.0,
            },
            ReferencePoint {
                raw: 1000,
                weight_kg: 50.0,
            },
            ReferencePoint {
                raw: 2000,
                weight_kg: 100.0,
            },
        ])
        .unwrap()
    }

    fn board_table() -> CalibrationTable {
        CalibrationTable::uniform(&[
            ReferencePoint {
                raw: 2000,
                weight_kg: 0.0,
            },
            ReferencePoint {
                raw: 3700,
                weight_kg: 17.0,
            },
            ReferencePoint {
                raw: 5500,
                weight_kg: 34.0,
            },
        ])
        .unwrap()
    }

    #[test]
    fn missing_table_is_an_error() {
        let calibrator = Calibrator::new();
        assert_eq!(
            calibrator.calibrate(Sensor::TopLeft, 1234),
            Err(CalibrationError::Missing)
        );
    }

    #[test]
    fn interpolates_between_reference_points() {
        let calibrator = Calibrator::with_table(Arc::new(board_table()));

        assert_close(calibrator.calibrate(Sensor::TopLeft, 2000), 0.0);
        assert_close(calibrator.calibrate(Sensor::TopLeft, 2850), 8.5);
        assert_close(calibrator.calibrate(Sensor::TopLeft, 3700), 17.0);
        assert_close(calibrator.calibrate(Sensor::TopLeft, 4600), 25.5);
    }

    #[test]
    fn extrapolates_beyond_reference_points() {
        let calibrator = Calibrator::with_table(Arc::new(board_table()));

        // 1800 counts per 17 kg above the top reference
        assert_close(calibrator.calibrate(Sensor::BottomRight, 7300), 51.0);
        // 1700 counts per 17 kg below zero
        assert_close(calibrator.calibrate(Sensor::BottomRight, 1830), -1.7);
    }

    #[test]
    fn calibration_is_monotonic() {
        let table = board_table();

        for sensor in Sensor::ALL {
            let mut previous = f64::NEG_INFINITY;
            for raw in (0..=u16::MAX).step_by(7) {
                let w = table.weight_kg(sensor, raw);
                assert!(w >= previous, "{sensor} not monotonic at {raw}");
                previous = w;
            }
        }
    }

    #[test]
    fn calibration_is_repeatable() {
        let calibrator = Calibrator::with_table(Arc::new(board_table()));

        let first = calibrator.calibrate(Sensor::TopRight, 4321).unwrap();
        let second = calibrator.calibrate(Sensor::TopRight, 4321).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn calibrates_a_whole_report() {
        let calibrator = Calibrator::with_table(Arc::new(linear_table()));
        let report = RawReport {
            counts: Quad::new(500, 500, 500, 500),
            button_pressed: false,
            received_at: Instant::now(),
        };

        let calibrated = calibrator.calibrate_report(&report).unwrap();
        for sensor in Sensor::ALL {
            assert_close(Ok(calibrated.weights_kg.get(sensor)), 25.0);
        }
        assert_close(Ok(calibrated.total_kg()), 100.0);
    }

    #[test]
    fn rejects_non_increasing_points() {
        let points = [
            ReferencePoint {
                raw: 100,
                weight_kg: 0.0,
            },
            ReferencePoint {
                raw: 100,
                weight_kg: 17.0,
            },
        ];

        assert_eq!(
            CalibrationTable::uniform(&points),
            Err(CalibrationError::NotIncreasing {
                sensor: Sensor::TopLeft
            })
        );
    }

    #[test]
    fn rejects_single_point() {
        let points = [ReferencePoint {
            raw: 100,
            weight_kg: 0.0,
        }];

        assert_eq!(
            CalibrationTable::uniform(&points),
            Err(CalibrationError::TooFewPoints {
                sensor: Sensor::TopLeft,
                count: 1
            })
        );
    }

    #[test]
    fn deserializing_validates_the_table() {
        let valid = r#"
points = [
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
]
"#;
        let table: CalibrationTable = toml::from_str(valid).unwrap();
        assert_eq!(table.points(Sensor::BottomRight).len(), 2);
        assert_eq!(
            toml::from_str::<CalibrationTable>(&toml::to_string(&table).unwrap()).unwrap(),
            table
        );

        let empty_sensor = r#"
points = [
    [],
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
]
"#;
        let err = toml::from_str::<CalibrationTable>(empty_sensor).unwrap_err();
        assert!(err.to_string().contains("need at least 2"), "{err}");

        let decreasing = r#"
points = [
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
    [{ raw = 2000, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
    [{ raw = 0, weight_kg = 0.0 }, { raw = 1000, weight_kg = 17.0 }],
]
"#;
        let err = toml::from_str::<CalibrationTable>(decreasing).unwrap_err();
        assert!(err.to_string().contains("not strictly increasing"), "{err}");
    }

    fn board_block() -> Vec<u8> {
        // rows of TR, BR, TL, BL
        let rows: [[u16; 4]; 3] = [
            [1000, 1100, 1200, 1300],
            [2000, 2100, 2200, 2300],
            [3000, 3100, 3200, 3300],
        ];
        rows.iter()
            .flat_map(|row| row.iter().flat_map(|w| w.to_be_bytes()))
            .collect()
    }

    #[test]
    fn board_block_maps_sensor_order() {
        let table = CalibrationTable::from_board_block(&board_block()).unwrap();

        assert_eq!(table.points(Sensor::TopRight)[0].raw, 1000);
        assert_eq!(table.points(Sensor::BottomRight)[1].raw, 2100);
        assert_eq!(table.points(Sensor::TopLeft)[2].raw, 3200);
        assert_eq!(table.points(Sensor::BottomLeft)[2].weight_kg, 34.0);
    }

    #[test]
    fn assembler_accepts_chunks_in_any_order() {
        let block = board_block();
        let mut assembler = CalibrationAssembler::new();

        let tail = CalibrationChunk {
            offset: CALIBRATION_OFFSET + 16,
            data: block[16..].to_vec(),
        };
        let head = CalibrationChunk {
            offset: CALIBRATION_OFFSET,
            data: block[..16].to_vec(),
        };

        assert!(assembler.insert(&tail).is_none());
        let table = assembler.insert(&head).unwrap().unwrap();
        assert_eq!(table, CalibrationTable::from_board_block(&block).unwrap());
    }

    #[test]
    fn assembler_ignores_bytes_outside_block() {
        let block = board_block();
        let mut assembler = CalibrationAssembler::new();

        // starts four bytes early, as a read of the whole 0x20 page would
        let mut data = vec![0xFF; 4];
        data.extend_from_slice(&block[..12]);
        let early = CalibrationChunk {
            offset: CALIBRATION_OFFSET - 4,
            data,
        };
        let rest = CalibrationChunk {
            offset: CALIBRATION_OFFSET + 12,
            data: block[12..].to_vec(),
        };

        assert!(assembler.insert(&early).is_none());
        assert!(matches!(assembler.insert(&rest), Some(Ok(_))));
    }
}
