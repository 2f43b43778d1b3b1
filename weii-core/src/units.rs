use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const KG_TO_LB: f64 = 2.20462;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported display unit '{0}', expected kg or lb")]
pub struct UnsupportedUnit(pub String);

/// Unit weights are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DisplayUnit {
    #[default]
    Kg,
    Lb,
}

impl DisplayUnit {
    pub fn convert(self, weight_kg: f64) -> f64 {
        match self {
            DisplayUnit::Kg => weight_kg,
            DisplayUnit::Lb => weight_kg * KG_TO_LB,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            DisplayUnit::Kg => "kg",
            DisplayUnit::Lb => "lbs",
        }
    }
}

impl FromStr for DisplayUnit {
    type Err = UnsupportedUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kg" => Ok(DisplayUnit::Kg),
            "lb" | "lbs" => Ok(DisplayUnit::Lb),
            _ => Err(UnsupportedUnit(s.to_owned())),
        }
    }
}

impl TryFrom<String> for DisplayUnit {
    type Error = UnsupportedUnit;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DisplayUnit> for String {
    fn from(unit: DisplayUnit) -> Self {
        unit.symbol().to_owned()
    }
}

impl std::fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Convert a kilogram weight into the named display unit.
pub fn to_display(weight_kg: f64, unit: &str) -> Result<f64, UnsupportedUnit> {
    Ok(unit.parse::<DisplayUnit>()?.convert(weight_kg))
}
