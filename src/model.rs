//! Обучение модели на истории одной страны: хронологическое разбиение, стандартизация года, оценка RMSE.

use tracing::{debug, info};

use crate::boosting::{BoostingConfig, GradientBoostedTrees, Regressor};
use crate::dataset::EntitySeries;
use crate::error::{ForecastError, Result};
use crate::features::{FEATURE_NAMES, FeatureVector, MIN_HISTORY, YEAR_FEATURE, build_features};

const DEFAULT_TEST_FRACTION: f64 = 0.2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingConfig {
    pub boosting: BoostingConfig,
    /// Доля самых свежих строк, отложенных для оценки.
    pub test_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            boosting: BoostingConfig::default(),
            test_fraction: DEFAULT_TEST_FRACTION,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.test_fraction.is_finite() || !(0.0..1.0).contains(&self.test_fraction) {
            return Err("forecast.test_fraction must be within 0..1".to_string());
        }
        self.boosting.validate()
    }
}

/// Стандартизация одного признака (среднее и масштаб по обучающей части).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StandardScaler {
    pub mean: f64,
    pub scale: f64,
}

impl StandardScaler {
    /// Масштаб берётся как стандартное отклонение генеральной совокупности; нулевой заменяется единицей.
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                scale: 1.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values
            .iter()
            .map(|value| (value - mean) * (value - mean))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };
        Self { mean, scale }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }
}

/// Обученная модель вместе с параметрами стандартизации года.
#[derive(Clone, Debug)]
pub struct TrainedModel<R = GradientBoostedTrees> {
    pub regressor: R,
    pub year_scaler: StandardScaler,
    /// RMSE на отложенном хвосте (нет, если хвост пуст).
    pub rmse: Option<f64>,
    pub train_rows: usize,
    pub test_rows: usize,
}

impl<R: Regressor> TrainedModel<R> {
    /// Предсказание по вектору с «сырым» годом.
    pub fn predict(&self, features: FeatureVector) -> f64 {
        self.regressor.predict(&self.scale_year(features))
    }

    fn scale_year(&self, mut features: FeatureVector) -> FeatureVector {
        features[YEAR_FEATURE] = self.year_scaler.transform(features[YEAR_FEATURE]);
        features
    }
}

/// Длина обучающей части при хронологическом разбиении.
///
/// Тест: последние `ceil(n * test_fraction)` строк; обучающая часть не бывает пустой.
pub fn chronological_split(n_rows: usize, test_fraction: f64) -> usize {
    if n_rows <= 1 {
        return n_rows;
    }
    let test = (n_rows as f64 * test_fraction).ceil() as usize;
    n_rows - test.min(n_rows - 1)
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return f64::NAN;
    }
    let mse = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum::<f64>()
        / n as f64;
    mse.sqrt()
}

/// Обучает модель на истории страны с нуля (без кеша).
pub fn train_from_series(series: &EntitySeries, config: &TrainingConfig) -> Result<TrainedModel> {
    let rows = build_features(series.points());
    if rows.is_empty() {
        return Err(ForecastError::InsufficientData {
            entity: series.entity.clone(),
            observations: series.len(),
            needed: MIN_HISTORY + 1,
        });
    }

    debug!(entity = %series.entity, rows = rows.len(), features = ?FEATURE_NAMES, "Feature matrix built");

    let split = chronological_split(rows.len(), config.test_fraction);
    let (train, test) = rows.split_at(split);
    let train_years: Vec<f64> = train.iter().map(|row| f64::from(row.year)).collect();
    let year_scaler = StandardScaler::fit(&train_years);

    let scale = |features: FeatureVector| {
        let mut features = features;
        features[YEAR_FEATURE] = year_scaler.transform(features[YEAR_FEATURE]);
        features
    };
    let x_train: Vec<FeatureVector> = train.iter().map(|row| scale(row.features())).collect();
    let y_train: Vec<f64> = train.iter().map(|row| row.temperature).collect();
    let regressor = config
        .boosting
        .fit(&x_train, &y_train)
        .map_err(ForecastError::InvalidConfig)?;

    let holdout_rmse = (!test.is_empty()).then(|| {
        let x_test: Vec<FeatureVector> = test.iter().map(|row| scale(row.features())).collect();
        let y_test: Vec<f64> = test.iter().map(|row| row.temperature).collect();
        rmse(&y_test, &regressor.predict_batch(&x_test))
    });

    match holdout_rmse {
        Some(value) => info!(
            entity = %series.entity,
            train_rows = train.len(),
            test_rows = test.len(),
            rmse = value,
            trees = regressor.n_trees(),
            "RMSE for {}: {value:.2} °C",
            series.entity
        ),
        None => info!(
            entity = %series.entity,
            train_rows = train.len(),
            "Model fitted without a hold-out tail"
        ),
    }

    Ok(TrainedModel {
        regressor,
        year_scaler,
        rmse: holdout_rmse,
        train_rows: train.len(),
        test_rows: test.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TimeSeriesPoint;
    use approx::assert_relative_eq;

    fn series(years: i32, value: impl Fn(i32, u32) -> f64) -> EntitySeries {
        let points = (0..years).flat_map(|offset| {
            let year = 2000 + offset;
            let value = &value;
            (1..=12).map(move |month| TimeSeriesPoint {
                year,
                month,
                temperature: value(year, month),
            })
        });
        EntitySeries::from_points("Testland", points)
    }

    #[test]
    fn split_keeps_latest_fifth_for_testing() {
        assert_eq!(chronological_split(100, 0.2), 80);
        assert_eq!(chronological_split(12, 0.2), 9);
        assert_eq!(chronological_split(1, 0.2), 1);
        assert_eq!(chronological_split(2, 0.2), 1);
    }

    #[test]
    fn scaler_uses_population_std() {
        let scaler = StandardScaler::fit(&[1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(scaler.mean, 2.5);
        assert_relative_eq!(scaler.scale, 1.25f64.sqrt());
        assert_relative_eq!(scaler.transform(2.5), 0.0);
    }

    #[test]
    fn constant_years_do_not_divide_by_zero() {
        let scaler = StandardScaler::fit(&[2001.0, 2001.0]);
        assert_relative_eq!(scaler.scale, 1.0);
        assert_relative_eq!(scaler.transform(2002.0), 1.0);
    }

    #[test]
    fn twelve_observations_are_insufficient() {
        let err = train_from_series(&series(1, |_, _| 15.0), &TrainingConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData {
                observations: 12,
                needed: 13,
                ..
            }
        ));
    }

    #[test]
    fn thirteen_observations_train_without_hold_out() {
        let mut points = series(1, |_, month| f64::from(month)).points().to_vec();
        points.push(TimeSeriesPoint {
            year: 2001,
            month: 1,
            temperature: 1.0,
        });
        let model =
            train_from_series(&EntitySeries::from_points("Short", points), &TrainingConfig::default())
                .unwrap();
        assert_eq!(model.train_rows, 1);
        assert_eq!(model.test_rows, 0);
        assert!(model.rmse.is_none());
    }

    #[test]
    fn scaler_is_fitted_on_training_years_only() {
        let model = train_from_series(&series(11, |_, _| 10.0), &TrainingConfig::default()).unwrap();
        // 120 строк признаков (2001–2010): 96 в обучении, это 2001–2008.
        assert_eq!(model.train_rows, 96);
        assert_eq!(model.test_rows, 24);
        assert_relative_eq!(model.year_scaler.mean, 2004.5);
    }

    #[test]
    fn rmse_on_constant_series_is_zero() {
        let model = train_from_series(&series(5, |_, _| 25.0), &TrainingConfig::default()).unwrap();
        assert_eq!(model.rmse, Some(0.0));
        let prediction = model.predict([2010.0, 0.0, 1.0, 25.0, 25.0, 25.0, 0.0, 2010.0]);
        assert_eq!(prediction, 25.0);
    }

    #[test]
    fn rmse_matches_hand_computation() {
        assert_relative_eq!(rmse(&[1.0, 2.0], &[2.0, 4.0]), (2.5f64).sqrt());
        assert!(rmse(&[], &[]).is_nan());
    }
}
