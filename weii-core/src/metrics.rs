use serde::{Deserialize, Serialize};

use crate::{DisplayUnit, Measurement, Quad};

/// Totals at or below this are treated as an empty board.
const MIN_TOTAL_KG: f64 = 1e-6;
/// Differences smaller than this count as perfectly even.
const EVEN_EPSILON_KG: f64 = 1e-9;

/// Which half of the board carries more weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Heavier {
    Left,
    Right,
    Front,
    Back,
    Even,
}

impl std::fmt::Display for Heavier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Heavier::Left => "Left",
            Heavier::Right => "Right",
            Heavier::Front => "Front",
            Heavier::Back => "Back",
            Heavier::Even => "Even",
        };
        f.write_str(name)
    }
}

/// Weight split between two opposing halves of the board.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub heavier: Heavier,
    /// Absolute difference between the halves, in the display unit.
    pub delta: f64,
    /// Share of the total carried by the heavier half, 0-100.
    /// `None` when the board carried no weight.
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceMetrics {
    pub unit: DisplayUnit,
    /// Total weight, including any configured adjustment.
    pub total: f64,
    pub left: f64,
    pub right: f64,
    pub front: f64,
    pub back: f64,
    /// Left/right distribution.
    pub side: Balance,
    /// Front/back distribution.
    pub end: Balance,
}

/// Derives balance metrics from per-sensor weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsEngine {
    unit: DisplayUnit,
    adjust_kg: f64,
}

impl MetricsEngine {
    pub fn new(unit: DisplayUnit) -> Self {
        Self {
            unit,
            adjust_kg: 0.0,
        }
    }

    /// Offset added to the reported total only, e.g. to account for clothing.
    pub fn with_adjustment(mut self, adjust_kg: f64) -> Self {
        self.adjust_kg = adjust_kg;
        self
    }

    pub fn compute(&self, measurement: &Measurement) -> BalanceMetrics {
        self.compute_weights(measurement.mean_kg)
    }

    pub fn compute_weights(&self, kg: Quad<f64>) -> BalanceMetrics {
        let total = kg.total();
        let left = kg.tl + kg.bl;
        let right = kg.tr + kg.br;
        let front = kg.tl + kg.tr;
        let back = kg.bl + kg.br;

        let unit = self.unit;

        BalanceMetrics {
            unit,
            total: unit.convert(total + self.adjust_kg),
            left: unit.convert(left),
            right: unit.convert(right),
            front: unit.convert(front),
            back: unit.convert(back),
            side: balance(left, right, total, Heavier::Left, Heavier::Right, unit),
            end: balance(front, back, total, Heavier::Front, Heavier::Back, unit),
        }
    }
}

fn balance(
    a: f64,
    b: f64,
    total: f64,
    a_name: Heavier,
    b_name: Heavier,
    unit: DisplayUnit,
) -> Balance {
    let delta = (a - b).abs();

    let heavier = if delta < EVEN_EPSILON_KG {
        Heavier::Even
    } else if a > b {
        a_name
    } else {
        b_name
    };

    let percent = (total.abs() > MIN_TOTAL_KG).then(|| 100.0 * a.max(b) / total);

    Balance {
        heavier,
        delta: unit.convert(delta),
        percent,
    }
}
