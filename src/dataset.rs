//! Загрузка CSV с температурами и построение упорядоченных рядов по странам.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{
    COLUMN_ANNUAL_TEMPERATURE, COLUMN_CONTINENT, COLUMN_DAY, COLUMN_ENTITY, COLUMN_MONTH,
    COLUMN_MONTHLY_TEMPERATURE, COLUMN_YEAR, DATE_FORMAT, MONTHS_PER_YEAR,
};
use crate::error::{ForecastError, Result};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type AnnualBuckets = BTreeMap<i32, MeanAccumulator>;

#[derive(Clone, Copy, Debug)]
enum DayFormatHint {
    Date,
    Rfc3339,
    DateTime,
}

impl DayFormatHint {
    const ALL: [Self; 3] = [Self::Date, Self::Rfc3339, Self::DateTime];

    fn parse(self, raw: &str) -> Option<NaiveDate> {
        match self {
            Self::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT).ok(),
            Self::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive()),
            Self::DateTime => NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
                .ok()
                .map(|dt| dt.date()),
        }
    }
}

/// Строка датасета (лишние колонки вроде `Code` игнорируются).
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Entity")]
    entity: Option<String>,
    #[serde(rename = "Continent", default)]
    continent: Option<String>,
    year: Option<i32>,
    #[serde(rename = "Day", default)]
    day: Option<String>,
    #[serde(default)]
    month: Option<u32>,
    #[serde(rename = "Average surface temperature month")]
    monthly_temperature: Option<f64>,
    #[serde(rename = "Average surface temperature year", default)]
    annual_temperature: Option<f64>,
}

/// Аккумулятор для усреднения повторяющихся значений внутри одного периода.
#[derive(Default, Clone, Copy, Debug)]
pub(crate) struct MeanAccumulator {
    sum: f64,
    count: u32,
}

impl MeanAccumulator {
    pub(crate) fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

/// Одно месячное наблюдение.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub year: i32,
    pub month: u32,
    pub temperature: f64,
}

/// Ряд одной страны, строго возрастающий по (год, месяц).
#[derive(Clone, Debug)]
pub struct EntitySeries {
    pub entity: String,
    pub continent: Option<String>,
    points: Vec<TimeSeriesPoint>,
}

impl EntitySeries {
    /// Сортирует точки и схлопывает дубли по (год, месяц) в среднее.
    pub fn from_points(
        entity: impl Into<String>,
        points: impl IntoIterator<Item = TimeSeriesPoint>,
    ) -> Self {
        let mut buckets: BTreeMap<(i32, u32), MeanAccumulator> = BTreeMap::new();
        for point in points {
            buckets
                .entry((point.year, point.month))
                .or_default()
                .add(point.temperature);
        }
        let points = buckets
            .iter()
            .filter_map(|(&(year, month), acc)| {
                acc.mean().map(|temperature| TimeSeriesPoint {
                    year,
                    month,
                    temperature,
                })
            })
            .collect();
        Self {
            entity: entity.into(),
            continent: None,
            points,
        }
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    pub fn temperatures(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.temperature).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_period(&self) -> Option<(i32, u32)> {
        self.points.last().map(|point| (point.year, point.month))
    }
}

/// Годовое наблюдение для общей (межстрановой) модели.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnualObservation {
    pub entity: String,
    pub continent: String,
    pub year: i32,
    pub temperature: f64,
}

/// Загруженный датасет, сгруппированный по странам.
#[derive(Debug, Default)]
pub struct Dataset {
    /// Сырые наблюдения в порядке файла; дубли схлопываются в `EntitySeries`.
    monthly: BTreeMap<String, Vec<TimeSeriesPoint>>,
    annual: BTreeMap<String, AnnualBuckets>,
    continents: BTreeMap<String, String>,
    has_continent: bool,
    has_annual: bool,
}

impl Dataset {
    pub fn from_path(csv_path: &Path) -> Result<Self> {
        Self::from_reader(File::open(csv_path)?)
    }

    /// Пробелы вокруг имён колонок обрезаются и при проверке, и при разборе строк.
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let has_column = |name: &str| headers.iter().any(|header| header == name);

        for required in [COLUMN_ENTITY, COLUMN_YEAR, COLUMN_MONTHLY_TEMPERATURE] {
            if !has_column(required) {
                return Err(ForecastError::MissingColumn(required.to_string()));
            }
        }
        if !has_column(COLUMN_DAY) && !has_column(COLUMN_MONTH) {
            return Err(ForecastError::MissingColumn(format!(
                "{COLUMN_DAY}' or '{COLUMN_MONTH}"
            )));
        }

        let mut dataset = Self {
            has_continent: has_column(COLUMN_CONTINENT),
            has_annual: has_column(COLUMN_ANNUAL_TEMPERATURE),
            ..Self::default()
        };
        let mut hint = None;
        let mut skipped = 0usize;
        for row in reader.deserialize::<CsvRow>() {
            if !dataset.ingest(row?, &mut hint)? {
                skipped += 1;
            }
        }
        if skipped > 0 {
            debug!(skipped, "Skipped rows with missing or invalid values");
        }
        Ok(dataset)
    }

    /// Добавляет строку в бакеты; `false`, если строка неполная.
    fn ingest(&mut self, row: CsvRow, hint: &mut Option<DayFormatHint>) -> Result<bool> {
        let Some(entity) = row.entity.map(|name| name.trim().to_string()) else {
            return Ok(false);
        };
        if entity.is_empty() {
            return Ok(false);
        }
        let (Some(year), Some(temperature)) = (row.year, row.monthly_temperature) else {
            return Ok(false);
        };
        let month = match (row.month, row.day.as_deref().map(str::trim)) {
            (Some(month), _) => month,
            (None, Some(day)) if !day.is_empty() => parse_day_with_hint(day, hint)?.month(),
            _ => return Ok(false),
        };
        if !(1..=MONTHS_PER_YEAR).contains(&month) || !temperature.is_finite() {
            warn!(entity = %entity, year, month, "Ignoring out-of-range observation");
            return Ok(false);
        }

        if let Some(continent) = row
            .continent
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
        {
            self.continents.entry(entity.clone()).or_insert(continent);
        }
        if let Some(annual) = row.annual_temperature.filter(|value| value.is_finite()) {
            self.annual
                .entry(entity.clone())
                .or_default()
                .entry(year)
                .or_default()
                .add(annual);
        }
        self.monthly
            .entry(entity)
            .or_default()
            .push(TimeSeriesPoint {
                year,
                month,
                temperature,
            });
        Ok(true)
    }

    /// Отсортированный список стран.
    pub fn entities(&self) -> Vec<&str> {
        self.monthly.keys().map(String::as_str).collect()
    }

    pub fn continent(&self, entity: &str) -> Option<&str> {
        self.continents.get(entity).map(String::as_str)
    }

    pub fn monthly_series(&self, entity: &str) -> Result<EntitySeries> {
        let raw = self
            .monthly
            .get(entity)
            .ok_or_else(|| ForecastError::UnknownEntity(entity.to_string()))?;
        let mut series = EntitySeries::from_points(entity, raw.iter().copied());
        series.continent = self.continents.get(entity).cloned();
        Ok(series)
    }

    /// Годовые средние по всем странам с известным континентом.
    ///
    /// Если в файле есть годовая колонка, берётся она, иначе среднее по месяцам.
    pub fn annual_observations(&self) -> Result<Vec<AnnualObservation>> {
        if !self.has_continent {
            return Err(ForecastError::MissingColumn(COLUMN_CONTINENT.to_string()));
        }

        let mut observations = Vec::new();
        for (entity, monthly) in &self.monthly {
            let Some(continent) = self.continents.get(entity) else {
                debug!(entity = %entity, "No continent for entity, skipping");
                continue;
            };
            let yearly = match self.annual.get(entity) {
                Some(annual) if self.has_annual => annual.clone(),
                _ => {
                    let series =
                        EntitySeries::from_points(entity.as_str(), monthly.iter().copied());
                    let mut yearly = AnnualBuckets::new();
                    for point in series.points() {
                        yearly.entry(point.year).or_default().add(point.temperature);
                    }
                    yearly
                }
            };
            observations.extend(yearly.iter().filter_map(|(&year, acc)| {
                acc.mean().map(|temperature| AnnualObservation {
                    entity: entity.clone(),
                    continent: continent.clone(),
                    year,
                    temperature,
                })
            }));
        }
        Ok(observations)
    }
}

/// Разбирает поле `Day`, запоминая удачный формат для следующих строк.
fn parse_day_with_hint(raw: &str, hint: &mut Option<DayFormatHint>) -> Result<NaiveDate> {
    if let Some(parsed) = hint.and_then(|known| known.parse(raw)) {
        return Ok(parsed);
    }
    for candidate in DayFormatHint::ALL {
        if let Some(parsed) = candidate.parse(raw) {
            *hint = Some(candidate);
            return Ok(parsed);
        }
    }
    Err(ForecastError::InvalidDate {
        raw: raw.to_string(),
        reason: "unrecognized date format".to_string(),
    })
}
