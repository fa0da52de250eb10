//! Пошаговый прогноз по месяцам поверх растущего ряда (история + собственные прогнозы).

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::boosting::Regressor;
use crate::constants::DEFAULT_END_YEAR;
use crate::dataset::EntitySeries;
use crate::error::{ForecastError, Result};
use crate::features::{
    FeatureVector, ROLLING_WINDOW, SEASONAL_LAG, mean, month_encoding, sample_std, year_month,
};
use crate::model::{TrainedModel, TrainingConfig, train_from_series};

const DEFAULT_CLIP_SIGMAS: f64 = 2.0;
const LAST_MONTH: u32 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    Actual,
    Predicted,
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actual => f.write_str("Actual"),
            Self::Predicted => f.write_str("Predicted"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub entity: String,
    pub year: i32,
    pub month: u32,
    pub temperature: f64,
    #[serde(rename = "type")]
    pub kind: PointKind,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForecastConfig {
    /// Прогноз строится до декабря этого года включительно.
    pub end_year: i32,
    /// Ширина коридора в стандартных отклонениях истории.
    pub clip_sigmas: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            end_year: DEFAULT_END_YEAR,
            clip_sigmas: DEFAULT_CLIP_SIGMAS,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.clip_sigmas.is_finite() || self.clip_sigmas < 0.0 {
            return Err("forecast.clip_sigmas must be >= 0".to_string());
        }
        Ok(())
    }
}

/// Коридор правдоподобных значений `mean ± k·std`, фиксируется по исходной истории.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ClipBounds {
    pub fn from_history(values: &[f64], sigmas: f64) -> Self {
        let center = mean(values);
        let spread = sample_std(values);
        Self {
            lower: sigmas.mul_add(-spread, center),
            upper: sigmas.mul_add(spread, center),
        }
    }

    /// Неопределённые границы (короткая история) не ограничивают значение.
    pub fn apply(&self, value: f64) -> f64 {
        let mut clipped = value;
        if self.lower.is_finite() && clipped < self.lower {
            clipped = self.lower;
        }
        if self.upper.is_finite() && clipped > self.upper {
            clipped = self.upper;
        }
        clipped
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Результат запроса по одной стране: факт + прогноз в одном упорядоченном списке.
#[derive(Clone, Debug)]
pub struct EntityForecast {
    pub entity: String,
    pub continent: Option<String>,
    pub points: Vec<ForecastPoint>,
    pub bounds: ClipBounds,
    pub rmse: Option<f64>,
    pub train_rows: usize,
    pub test_rows: usize,
}

impl EntityForecast {
    pub fn actual(&self) -> impl Iterator<Item = &ForecastPoint> {
        self.points
            .iter()
            .filter(|point| point.kind == PointKind::Actual)
    }

    pub fn predicted(&self) -> impl Iterator<Item = &ForecastPoint> {
        self.points
            .iter()
            .filter(|point| point.kind == PointKind::Predicted)
    }
}

/// Полный цикл для страны: обучение с нуля, прогноз, склейка с фактом.
pub fn predict_temperature(
    series: &EntitySeries,
    training: &TrainingConfig,
    config: &ForecastConfig,
) -> Result<EntityForecast> {
    let model = train_from_series(series, training)?;
    let history = series.temperatures();
    let bounds = ClipBounds::from_history(&history, config.clip_sigmas);
    let predicted = forecast_months(&model, series, bounds, config.end_year);
    info!(
        entity = %series.entity,
        actual = series.len(),
        predicted = predicted.len(),
        end_year = config.end_year,
        "Forecast ready"
    );

    let mut points = Vec::with_capacity(series.len() + predicted.len());
    points.extend(series.points().iter().map(|point| ForecastPoint {
        entity: series.entity.clone(),
        year: point.year,
        month: point.month,
        temperature: point.temperature,
        kind: PointKind::Actual,
    }));
    points.extend(predicted);

    Ok(EntityForecast {
        entity: series.entity.clone(),
        continent: series.continent.clone(),
        points,
        bounds,
        rmse: model.rmse,
        train_rows: model.train_rows,
        test_rows: model.test_rows,
    })
}

/// Прогнозирует каждый месяц после последнего наблюдения до декабря `end_year`.
///
/// Шаги строго последовательны: лаги и скользящие статистики каждого шага
/// видят прогнозы предыдущих шагов.
pub fn forecast_months<R: Regressor>(
    model: &TrainedModel<R>,
    series: &EntitySeries,
    bounds: ClipBounds,
    end_year: i32,
) -> Vec<ForecastPoint> {
    if series.is_empty() {
        return Vec::new();
    }
    let Some(start) = series
        .last_period()
        .and_then(|(year, month)| NaiveDate::from_ymd_opt(year, month, 1))
    else {
        return Vec::new();
    };
    let Some(end) = NaiveDate::from_ymd_opt(end_year, LAST_MONTH, 1) else {
        return Vec::new();
    };

    let mut buffer = series.temperatures();
    let mut predictions = Vec::new();
    let mut current = start;
    while let Some(next) = current.checked_add_months(Months::new(1)) {
        if next > end {
            break;
        }
        current = next;
        let (year, month) = (current.year(), current.month());
        let features = step_features(&buffer, year, month);
        let raw = model.predict(features);
        let value = bounds.apply(raw);
        debug!(year, month, raw, value, clipped = !bounds.contains(raw), "Forecast step");

        buffer.push(value);
        predictions.push(ForecastPoint {
            entity: series.entity.clone(),
            year,
            month,
            temperature: value,
            kind: PointKind::Predicted,
        });
    }
    predictions
}

/// Признаки следующего месяца по хвосту буфера (год ещё не стандартизован).
fn step_features(buffer: &[f64], year: i32, month: u32) -> FeatureVector {
    let (sin_month, cos_month) = month_encoding(month);
    let lag_1 = buffer.last().copied().unwrap_or(f64::NAN);
    // На короткой истории lag_12 вырождается в lag_1.
    let lag_12 = if buffer.len() >= SEASONAL_LAG {
        buffer[buffer.len() - SEASONAL_LAG]
    } else {
        lag_1
    };
    let tail = &buffer[buffer.len().saturating_sub(ROLLING_WINDOW)..];
    [
        f64::from(year),
        sin_month,
        cos_month,
        lag_1,
        lag_12,
        mean(tail),
        sample_std(tail),
        year_month(year, month),
    ]
}

/// Создаёт каталог для выходного файла, если его ещё нет.
pub fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn write_forecast_csv(points: &[ForecastPoint], output_path: &Path) -> Result<()> {
    create_parent_dir(output_path)?;
    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(["entity", "year", "month", "temperature", "type"])?;
    for point in points {
        writer.write_record([
            point.entity.clone(),
            point.year.to_string(),
            point.month.to_string(),
            format!("{:.6}", point.temperature),
            point.kind.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_forecast_csv(input_path: &Path) -> Result<Vec<ForecastPoint>> {
    let mut reader = csv::Reader::from_path(input_path)?;
    let points = reader
        .deserialize::<ForecastPoint>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if points.is_empty() {
        return Err(ForecastError::InsufficientData {
            entity: input_path.display().to_string(),
            observations: 0,
            needed: 1,
        });
    }
    Ok(points)
}

pub fn write_forecast_json(points: &[ForecastPoint], output_path: &Path) -> Result<()> {
    create_parent_dir(output_path)?;
    let file = fs::File::create(output_path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), points)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TimeSeriesPoint;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn monthly_series(first_year: i32, years: i32, value: impl Fn(u32) -> f64) -> EntitySeries {
        let points = (first_year..first_year + years).flat_map(|year| {
            let value = &value;
            (1..=12).map(move |month| TimeSeriesPoint {
                year,
                month,
                temperature: value(month),
            })
        });
        EntitySeries::from_points("Testland", points.collect::<Vec<_>>())
    }

    fn seasonal(month: u32) -> f64 {
        15.0 - 10.0 * (2.0 * PI * f64::from(month - 1) / 12.0).cos()
    }

    fn run(series: &EntitySeries, end_year: i32) -> EntityForecast {
        let config = ForecastConfig {
            end_year,
            ..ForecastConfig::default()
        };
        predict_temperature(series, &TrainingConfig::default(), &config).unwrap()
    }

    #[test]
    fn constant_history_pins_forecast_to_constant() {
        let series = monthly_series(2000, 20, |_| 25.0);
        let result = run(&series, 2025);

        let predicted: Vec<_> = result.predicted().collect();
        assert_eq!(predicted.len(), 12 * 6);
        assert!(predicted.iter().all(|point| point.temperature == 25.0));
        assert_eq!(result.bounds.lower, 25.0);
        assert_eq!(result.bounds.upper, 25.0);
    }

    #[test]
    fn horizon_starts_after_last_observation() {
        let mut points = monthly_series(2000, 3, seasonal).points().to_vec();
        points.truncate(points.len() - 6);
        let series = EntitySeries::from_points("Partial", points);
        let result = run(&series, 2003);

        let first = result.predicted().next().unwrap();
        assert_eq!((first.year, first.month), (2002, 7));
        let last = result.predicted().last().unwrap();
        assert_eq!((last.year, last.month), (2003, 12));
        assert_eq!(result.predicted().count(), 18);
    }

    #[test]
    fn actual_rows_are_passed_through_untouched() {
        let series = monthly_series(2000, 3, seasonal);
        let result = run(&series, 2003);

        let actual: Vec<f64> = result.actual().map(|point| point.temperature).collect();
        assert_eq!(actual, series.temperatures());
        assert!(result.points[..series.len()]
            .iter()
            .all(|point| point.kind == PointKind::Actual));
    }

    #[test]
    fn predictions_stay_inside_clip_bounds() {
        let series = monthly_series(1990, 10, |month| f64::from(month * month));
        let result = run(&series, 2005);
        let history = series.temperatures();
        let bounds = ClipBounds::from_history(&history, 2.0);

        assert!(result.predicted().all(|point| bounds.contains(point.temperature)));
    }

    #[test]
    fn seasonal_pattern_survives_the_horizon() {
        let series = monthly_series(1990, 30, seasonal);
        let result = run(&series, 2022);

        let january = result
            .predicted()
            .find(|point| point.year == 2021 && point.month == 1)
            .unwrap();
        let july = result
            .predicted()
            .find(|point| point.year == 2021 && point.month == 7)
            .unwrap();
        assert!((january.temperature - 5.0).abs() < (july.temperature - 5.0).abs());
        assert!(january.temperature < july.temperature);
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let series = monthly_series(1995, 12, |month| seasonal(month) + f64::from(month % 3));
        let first = run(&series, 2010);
        let second = run(&series, 2010);
        assert_eq!(first.points, second.points);
    }

    #[test]
    fn history_past_end_year_gives_empty_forecast() {
        let series = monthly_series(2000, 5, seasonal);
        let result = run(&series, 2003);
        assert_eq!(result.predicted().count(), 0);
        assert_eq!(result.actual().count(), 60);
    }

    #[test]
    fn short_buffer_falls_back_to_lag_1() {
        let features = step_features(&[10.0, 11.0, 12.0], 2001, 4);
        assert_relative_eq!(features[3], 12.0);
        assert_relative_eq!(features[4], 12.0);
        assert_relative_eq!(features[5], 11.0);
        assert_relative_eq!(features[6], 1.0);
    }

    #[test]
    fn lag_12_reads_twelve_steps_back() {
        let buffer: Vec<f64> = (0..24).map(f64::from).collect();
        let features = step_features(&buffer, 2002, 1);
        assert_relative_eq!(features[3], 23.0);
        assert_relative_eq!(features[4], 12.0);
        assert_relative_eq!(features[7], 2002.0);
    }

    #[test]
    fn clip_bounds_ignore_undefined_spread() {
        let bounds = ClipBounds::from_history(&[3.0], 2.0);
        assert_relative_eq!(bounds.apply(100.0), 100.0);
        let bounds = ClipBounds::from_history(&[1.0, 3.0], 2.0);
        assert_relative_eq!(bounds.apply(100.0), 2.0 + 2.0 * 2.0f64.sqrt());
    }

    #[test]
    fn csv_round_trip_keeps_kinds() {
        let points = vec![
            ForecastPoint {
                entity: "Chile".to_string(),
                year: 2024,
                month: 6,
                temperature: 8.5,
                kind: PointKind::Actual,
            },
            ForecastPoint {
                entity: "Chile".to_string(),
                year: 2024,
                month: 7,
                temperature: 7.25,
                kind: PointKind::Predicted,
            },
        ];
        let path = std::env::temp_dir().join(format!("tempcast-forecast-{}.csv", std::process::id()));
        write_forecast_csv(&points, &path).unwrap();
        let restored = read_forecast_csv(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(restored, points);
    }

    #[test]
    fn writers_create_missing_directories() {
        let dir = std::env::temp_dir().join(format!("tempcast-nested-{}", std::process::id()));
        let points = vec![ForecastPoint {
            entity: "Chile".to_string(),
            year: 2030,
            month: 12,
            temperature: 9.0,
            kind: PointKind::Predicted,
        }];
        let csv_path = dir.join("a").join("forecast.csv");
        let json_path = dir.join("b").join("forecast.json");
        write_forecast_csv(&points, &csv_path).unwrap();
        write_forecast_json(&points, &json_path).unwrap();
        assert!(csv_path.is_file());
        assert!(json_path.is_file());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn forecast_reports_split_sizes() {
        let series = monthly_series(2000, 10, seasonal);
        let result = run(&series, 2011);
        // 120 месяцев минус 12 на лаги: 108 строк, в тест 22.
        assert_eq!(result.train_rows + result.test_rows, 108);
        assert_eq!(result.test_rows, 22);
        assert_eq!(result.entity, "Testland");
    }
}
