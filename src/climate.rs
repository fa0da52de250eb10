//! Климатическая зона по среднегодовой температуре фактических наблюдений.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::dataset::MeanAccumulator;
use crate::forecast::{ForecastPoint, PointKind};

const DEFAULT_TROPICAL: f64 = 20.0;
const DEFAULT_SUBTROPICAL: f64 = 10.0;
const DEFAULT_TEMPERATE: f64 = 0.0;
const UNAVAILABLE: &str = "n/a";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClimateZone {
    Tropical,
    Subtropical,
    Temperate,
    Pole,
}

impl fmt::Display for ClimateZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Tropical => "Tropical",
            Self::Subtropical => "Subtropical",
            Self::Temperate => "Temperate",
            Self::Pole => "Pole",
        };
        f.write_str(label)
    }
}

/// Нижние границы зон (включительно), °C.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClimateThresholds {
    pub tropical: f64,
    pub subtropical: f64,
    pub temperate: f64,
}

impl Default for ClimateThresholds {
    fn default() -> Self {
        Self {
            tropical: DEFAULT_TROPICAL,
            subtropical: DEFAULT_SUBTROPICAL,
            temperate: DEFAULT_TEMPERATE,
        }
    }
}

impl ClimateThresholds {
    pub fn validate(&self) -> Result<(), String> {
        let all = [self.tropical, self.subtropical, self.temperate];
        if all.iter().any(|value| !value.is_finite()) {
            return Err("climate thresholds must be finite".to_string());
        }
        if !(self.tropical > self.subtropical && self.subtropical > self.temperate) {
            return Err("climate thresholds must satisfy tropical > subtropical > temperate".to_string());
        }
        Ok(())
    }

    /// `None` для неопределённого среднего (нет наблюдений).
    pub fn zone(&self, average: f64) -> Option<ClimateZone> {
        if average.is_nan() {
            return None;
        }
        let zone = if average >= self.tropical {
            ClimateZone::Tropical
        } else if average >= self.subtropical {
            ClimateZone::Subtropical
        } else if average >= self.temperate {
            ClimateZone::Temperate
        } else {
            ClimateZone::Pole
        };
        Some(zone)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClimateClassification {
    pub entity: String,
    /// Округлено до сотых; `NaN` (в JSON `null`), если данных нет.
    pub average_annual_temperature: f64,
    pub climate_zone: Option<ClimateZone>,
}

impl ClimateClassification {
    pub const fn is_available(&self) -> bool {
        self.climate_zone.is_some()
    }
}

impl fmt::Display for ClimateClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.climate_zone {
            Some(zone) => write!(
                f,
                "{}: {zone} ({:.2} °C)",
                self.entity, self.average_annual_temperature
            ),
            None => write!(f, "{}: {UNAVAILABLE}", self.entity),
        }
    }
}

/// Среднее годовых средних: каждый год весит одинаково независимо от числа месяцев.
pub fn average_annual_temperature(observations: impl IntoIterator<Item = (i32, f64)>) -> f64 {
    let mut years: BTreeMap<i32, MeanAccumulator> = BTreeMap::new();
    for (year, value) in observations {
        years.entry(year).or_default().add(value);
    }
    let mut overall = MeanAccumulator::default();
    for annual in years.values().filter_map(MeanAccumulator::mean) {
        overall.add(annual);
    }
    overall.mean().unwrap_or(f64::NAN)
}

/// Классифицирует страну только по строкам `Actual`.
pub fn classify_climate_zone(
    points: &[ForecastPoint],
    entity: &str,
    thresholds: &ClimateThresholds,
) -> ClimateClassification {
    let average = average_annual_temperature(
        points
            .iter()
            .filter(|point| point.kind == PointKind::Actual && point.entity == entity)
            .map(|point| (point.year, point.temperature)),
    );
    ClimateClassification {
        entity: entity.to_string(),
        average_annual_temperature: (average * 100.0).round() / 100.0,
        climate_zone: thresholds.zone(average),
    }
}
