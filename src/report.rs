//! HTML-отчёт по стране: график факта и прогноза, сводка по климату и тренду.

mod chart;
mod page;

use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::climate::{ClimateClassification, ClimateThresholds, classify_climate_zone};
use crate::error::Result;
use crate::forecast::{ForecastPoint, PointKind, create_parent_dir};

const DEFAULT_ACTUAL_START: i32 = 2000;
const DEFAULT_ACTUAL_END: i32 = 2024;
const DEFAULT_FORECAST_START: i32 = 2025;
const DEFAULT_FORECAST_END: i32 = 2030;

/// Диапазоны лет (включительно), которые попадают на график и в сводку.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportRanges {
    pub actual_start: i32,
    pub actual_end: i32,
    pub forecast_start: i32,
    pub forecast_end: i32,
}

impl Default for ReportRanges {
    fn default() -> Self {
        Self {
            actual_start: DEFAULT_ACTUAL_START,
            actual_end: DEFAULT_ACTUAL_END,
            forecast_start: DEFAULT_FORECAST_START,
            forecast_end: DEFAULT_FORECAST_END,
        }
    }
}

impl ReportRanges {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.actual_start > self.actual_end {
            return Err("actual range start must not exceed its end".to_string());
        }
        if self.forecast_start > self.forecast_end {
            return Err("forecast range start must not exceed its end".to_string());
        }
        Ok(())
    }

    fn contains(&self, point: &ForecastPoint) -> bool {
        match point.kind {
            PointKind::Actual => (self.actual_start..=self.actual_end).contains(&point.year),
            PointKind::Predicted => (self.forecast_start..=self.forecast_end).contains(&point.year),
        }
    }
}

/// Сводка для карточек отчёта (температуры в °C).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Overview {
    pub entity: String,
    pub continent: Option<String>,
    pub climate: ClimateClassification,
    pub historical_average: Option<f64>,
    pub predicted_average: Option<f64>,
    /// Прогноз минус история.
    pub trend_delta: Option<f64>,
    /// Изменение относительно модуля исторического среднего, %.
    pub trend_percent: Option<f64>,
    pub rmse: Option<f64>,
}

/// Оставляет точки страны, попадающие в диапазоны отчёта.
pub fn filter_ranges<'a>(
    points: &'a [ForecastPoint],
    entity: &str,
    ranges: &ReportRanges,
) -> Vec<&'a ForecastPoint> {
    points
        .iter()
        .filter(|point| point.entity == entity && ranges.contains(point))
        .collect()
}

pub fn build_overview(
    points: &[ForecastPoint],
    entity: &str,
    continent: Option<&str>,
    ranges: &ReportRanges,
    thresholds: &ClimateThresholds,
    rmse: Option<f64>,
) -> Overview {
    let visible = filter_ranges(points, entity, ranges);
    let historical_average = average_of(&visible, PointKind::Actual);
    let predicted_average = average_of(&visible, PointKind::Predicted);
    let trend_delta = historical_average
        .zip(predicted_average)
        .map(|(historical, predicted)| predicted - historical);
    let trend_percent = historical_average
        .zip(trend_delta)
        .filter(|(historical, _)| *historical != 0.0)
        .map(|(historical, delta)| delta / historical.abs() * 100.0);

    Overview {
        entity: entity.to_string(),
        continent: continent.map(str::to_string),
        climate: classify_climate_zone(points, entity, thresholds),
        historical_average,
        predicted_average,
        trend_delta,
        trend_percent,
        rmse,
    }
}

fn average_of(points: &[&ForecastPoint], kind: PointKind) -> Option<f64> {
    let (sum, count) = points
        .iter()
        .filter(|point| point.kind == kind)
        .fold((0.0, 0usize), |(sum, count), point| {
            (sum + point.temperature, count + 1)
        });
    (count > 0).then(|| sum / count as f64)
}

/// Строит график и сохраняет страницу; пустой график заменяется предупреждением.
pub fn render_report(
    points: &[ForecastPoint],
    overview: &Overview,
    ranges: &ReportRanges,
    output_html: &Path,
    minify: bool,
) -> Result<()> {
    create_parent_dir(output_html)?;

    let visible = filter_ranges(points, &overview.entity, ranges);
    let plot = chart::build_temperature_chart(&overview.entity, &visible);
    let page = page::render_report_page(plot.as_ref(), overview, Utc::now());
    let bytes = if minify {
        minify_page(&page)
    } else {
        page.into_bytes()
    };
    fs::write(output_html, bytes)?;
    Ok(())
}

fn minify_page(page: &str) -> Vec<u8> {
    let cfg = minify_html::Cfg {
        minify_css: true,
        minify_js: true,
        ..minify_html::Cfg::default()
    };
    minify_html::minify(page.as_bytes(), &cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::ClimateZone;
    use approx::assert_relative_eq;

    fn point(year: i32, temperature: f64, kind: PointKind) -> ForecastPoint {
        ForecastPoint {
            entity: "Testland".to_string(),
            year,
            month: 6,
            temperature,
            kind,
        }
    }

    fn sample() -> Vec<ForecastPoint> {
        vec![
            point(1990, 100.0, PointKind::Actual),
            point(2000, 10.0, PointKind::Actual),
            point(2024, 12.0, PointKind::Actual),
            point(2025, 12.0, PointKind::Predicted),
            point(2030, 14.0, PointKind::Predicted),
            point(2031, -50.0, PointKind::Predicted),
        ]
    }

    #[test]
    fn ranges_drop_points_outside_window() {
        let points = sample();
        let visible = filter_ranges(&points, "Testland", &ReportRanges::default());
        let years: Vec<i32> = visible.iter().map(|point| point.year).collect();
        assert_eq!(years, vec![2000, 2024, 2025, 2030]);
    }

    #[test]
    fn overview_reports_trend_in_degrees_and_percent() {
        let overview = build_overview(
            &sample(),
            "Testland",
            Some("Europe"),
            &ReportRanges::default(),
            &ClimateThresholds::default(),
            Some(0.3),
        );
        assert_relative_eq!(overview.historical_average.unwrap(), 11.0);
        assert_relative_eq!(overview.predicted_average.unwrap(), 13.0);
        assert_relative_eq!(overview.trend_delta.unwrap(), 2.0);
        assert_relative_eq!(overview.trend_percent.unwrap(), 2.0 / 11.0 * 100.0);
        assert_eq!(overview.continent.as_deref(), Some("Europe"));
    }

    #[test]
    fn climate_uses_full_actual_history() {
        let overview = build_overview(
            &sample(),
            "Testland",
            None,
            &ReportRanges::default(),
            &ClimateThresholds::default(),
            None,
        );
        // (100 + 10 + 12) / 3 по годам 1990, 2000, 2024.
        assert_eq!(overview.climate.climate_zone, Some(ClimateZone::Tropical));
    }

    #[test]
    fn zero_history_has_no_percent() {
        let points = vec![
            point(2000, 0.0, PointKind::Actual),
            point(2026, 1.0, PointKind::Predicted),
        ];
        let overview = build_overview(
            &points,
            "Testland",
            None,
            &ReportRanges::default(),
            &ClimateThresholds::default(),
            None,
        );
        assert_relative_eq!(overview.trend_delta.unwrap(), 1.0);
        assert!(overview.trend_percent.is_none());
    }

    #[test]
    fn empty_report_still_renders() {
        let overview = build_overview(
            &[],
            "Nowhere",
            None,
            &ReportRanges::default(),
            &ClimateThresholds::default(),
            None,
        );
        let path = std::env::temp_dir().join("tempcast-empty-report.html");
        render_report(&[], &overview, &ReportRanges::default(), &path, false).unwrap();
        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("No data available to display the chart"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let ranges = ReportRanges {
            actual_start: 2024,
            actual_end: 2000,
            ..ReportRanges::default()
        };
        assert!(ranges.validate().is_err());
    }
}
