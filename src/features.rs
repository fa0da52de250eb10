//! Признаки для регрессии: циклический месяц, лаги, скользящие статистики и непрерывный индекс времени.

use std::f64::consts::PI;

use serde::Serialize;

use crate::constants::MONTHS_PER_YEAR;
use crate::dataset::TimeSeriesPoint;

pub const FEATURE_COUNT: usize = 8;
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "year",
    "sin_month",
    "cos_month",
    "lag_1",
    "lag_12",
    "rolling_mean_3",
    "rolling_std_3",
    "year_month",
];
/// Позиция `year` в векторе признаков (стандартизуется отдельно).
pub const YEAR_FEATURE: usize = 0;

pub const SEASONAL_LAG: usize = 12;
pub const ROLLING_WINDOW: usize = 3;
/// Сколько предыдущих наблюдений нужно, чтобы определились все признаки.
pub const MIN_HISTORY: usize = SEASONAL_LAG;

pub type FeatureVector = [f64; FEATURE_COUNT];

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FeatureRow {
    pub year: i32,
    pub month: u32,
    pub sin_month: f64,
    pub cos_month: f64,
    pub lag_1: f64,
    pub lag_12: f64,
    pub rolling_mean_3: f64,
    pub rolling_std_3: f64,
    pub year_month: f64,
    pub temperature: f64,
}

impl FeatureRow {
    /// Вектор признаков с «сырым» годом; стандартизацию применяет модель.
    pub fn features(&self) -> FeatureVector {
        [
            f64::from(self.year),
            self.sin_month,
            self.cos_month,
            self.lag_1,
            self.lag_12,
            self.rolling_mean_3,
            self.rolling_std_3,
            self.year_month,
        ]
    }
}

/// Строит строки признаков по упорядоченному ряду.
///
/// Первые `MIN_HISTORY` точек отбрасываются: для них не определён `lag_12`.
/// Пропуски ничем не заполняются.
pub fn build_features(points: &[TimeSeriesPoint]) -> Vec<FeatureRow> {
    let values: Vec<f64> = points.iter().map(|point| point.temperature).collect();

    points
        .iter()
        .enumerate()
        .skip(MIN_HISTORY)
        .map(|(idx, point)| {
            let (sin_month, cos_month) = month_encoding(point.month);
            let window = &values[idx + 1 - ROLLING_WINDOW..=idx];
            FeatureRow {
                year: point.year,
                month: point.month,
                sin_month,
                cos_month,
                lag_1: values[idx - 1],
                lag_12: values[idx - SEASONAL_LAG],
                rolling_mean_3: mean(window),
                rolling_std_3: sample_std(window),
                year_month: year_month(point.year, point.month),
                temperature: point.temperature,
            }
        })
        .collect()
}

pub fn month_encoding(month: u32) -> (f64, f64) {
    let angle = 2.0 * PI * f64::from(month) / f64::from(MONTHS_PER_YEAR);
    (angle.sin(), angle.cos())
}

pub fn year_month(year: i32, month: u32) -> f64 {
    f64::from(year) + f64::from(month - 1) / f64::from(MONTHS_PER_YEAR)
}

/// Среднее; `NaN` для пустого среза.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Выборочное стандартное отклонение (знаменатель n−1); `NaN`, если точек меньше двух.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let center = mean(values);
    let var = values
        .iter()
        .map(|value| {
            let diff = value - center;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn monthly(years: i32, value: impl Fn(usize) -> f64) -> Vec<TimeSeriesPoint> {
        (0..years * 12)
            .map(|idx| TimeSeriesPoint {
                year: 1990 + idx / 12,
                month: (idx % 12) as u32 + 1,
                temperature: value(idx as usize),
            })
            .collect()
    }

    #[test]
    fn first_year_is_dropped() {
        let points = monthly(2, |idx| idx as f64);
        let rows = build_features(&points);
        assert_eq!(rows.len(), 12);
        assert_eq!((rows[0].year, rows[0].month), (1991, 1));
    }

    #[test]
    fn twelve_points_give_no_rows() {
        let points = monthly(1, |_| 15.0);
        assert!(build_features(&points).is_empty());
    }

    #[test]
    fn lags_point_back_into_the_series() {
        let points = monthly(3, |idx| (idx * idx) as f64);
        let rows = build_features(&points);
        for (offset, row) in rows.iter().enumerate() {
            let idx = offset + MIN_HISTORY;
            assert_eq!(row.lag_12, points[idx - 12].temperature);
            assert_eq!(row.lag_1, points[idx - 1].temperature);
            assert_eq!(row.temperature, points[idx].temperature);
        }
    }

    #[test]
    fn year_month_is_non_decreasing() {
        let points = monthly(4, |idx| (idx % 7) as f64);
        let rows = build_features(&points);
        assert!(rows.windows(2).all(|pair| pair[0].year_month <= pair[1].year_month));
        assert_relative_eq!(rows[0].year_month, 1991.0);
        assert_relative_eq!(rows[11].year_month, 1991.0 + 11.0 / 12.0);
    }

    #[test]
    fn rolling_window_includes_current_point() {
        let points = monthly(2, |idx| idx as f64);
        let row = build_features(&points)[0];
        // Окно: 10, 11, 12.
        assert_relative_eq!(row.rolling_mean_3, 11.0);
        assert_relative_eq!(row.rolling_std_3, 1.0);
    }

    #[test]
    fn month_encoding_wraps_at_year_boundary() {
        let (sin_dec, cos_dec) = month_encoding(12);
        assert_abs_diff_eq!(sin_dec, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cos_dec, 1.0, epsilon = 1e-12);
        let (sin_jun, cos_jun) = month_encoding(6);
        assert_abs_diff_eq!(sin_jun, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cos_jun, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn sample_std_needs_two_points() {
        assert!(sample_std(&[1.0]).is_nan());
        assert!(mean(&[]).is_nan());
        assert_relative_eq!(sample_std(&[2.0, 4.0, 6.0]), 2.0);
    }

    #[test]
    fn feature_vector_keeps_declared_order() {
        let points = monthly(2, |idx| idx as f64);
        let row = build_features(&points)[0];
        let vector = row.features();
        assert_eq!(vector.len(), FEATURE_NAMES.len());
        assert_relative_eq!(vector[YEAR_FEATURE], 1991.0);
        assert_relative_eq!(vector[3], row.lag_1);
        assert_relative_eq!(vector[4], row.lag_12);
    }
}
