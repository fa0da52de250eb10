//! TOML-конфигурация модели: частичные переопределения поверх встроенных значений.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::boosting::BoostingConfig;
use crate::climate::ClimateThresholds;
use crate::forecast::ForecastConfig;
use crate::model::TrainingConfig;
use crate::report::ReportRanges;

pub const DEFAULT_MODEL_CONFIG: &str = "config/model.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    boosting: Option<BoostingFile>,
    forecast: Option<ForecastFile>,
    climate: Option<ClimateFile>,
    report: Option<ReportFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BoostingFile {
    n_estimators: Option<usize>,
    #[serde(alias = "eta")]
    learning_rate: Option<f64>,
    max_depth: Option<usize>,
    subsample: Option<f64>,
    colsample_bytree: Option<f64>,
    gamma: Option<f64>,
    #[serde(alias = "reg_lambda")]
    lambda: Option<f64>,
    min_child_weight: Option<f64>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ForecastFile {
    test_fraction: Option<f64>,
    clip_sigmas: Option<f64>,
    end_year: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClimateFile {
    tropical: Option<f64>,
    subtropical: Option<f64>,
    temperate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReportFile {
    actual_start: Option<i32>,
    actual_end: Option<i32>,
    forecast_start: Option<i32>,
    forecast_end: Option<i32>,
}

/// Итоговые параметры после применения файла.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResolvedConfig {
    pub training: TrainingConfig,
    pub forecast: ForecastConfig,
    pub climate: ClimateThresholds,
    pub report: ReportRanges,
}

impl ResolvedConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.training.validate()?;
        self.forecast.validate()?;
        self.climate.validate()?;
        self.report.validate()
    }

    /// Переопределяет последний год прогноза; диапазон отчёта расширяется,
    /// чтобы не обрезать новый горизонт.
    #[must_use]
    pub fn with_end_year(mut self, end_year: i32) -> Self {
        self.forecast.end_year = end_year;
        self.report.forecast_end = self.report.forecast_end.max(end_year);
        self
    }
}

fn resolve_boosting(cfg: &mut BoostingConfig, overrides: BoostingFile) {
    if let Some(value) = overrides.n_estimators {
        cfg.n_estimators = value;
    }
    if let Some(value) = overrides.learning_rate {
        cfg.learning_rate = value;
    }
    if let Some(value) = overrides.max_depth {
        cfg.max_depth = value;
    }
    if let Some(value) = overrides.subsample {
        cfg.subsample = value;
    }
    if let Some(value) = overrides.colsample_bytree {
        cfg.colsample_bytree = value;
    }
    if let Some(value) = overrides.gamma {
        cfg.gamma = value;
    }
    if let Some(value) = overrides.lambda {
        cfg.lambda = value;
    }
    if let Some(value) = overrides.min_child_weight {
        cfg.min_child_weight = value;
    }
    if let Some(value) = overrides.seed {
        cfg.seed = value;
    }
}

fn resolve(file: ModelConfigFile) -> ResolvedConfig {
    let mut cfg = ResolvedConfig::default();
    if let Some(boosting) = file.boosting {
        resolve_boosting(&mut cfg.training.boosting, boosting);
    }
    if let Some(forecast) = file.forecast {
        if let Some(value) = forecast.test_fraction {
            cfg.training.test_fraction = value;
        }
        if let Some(value) = forecast.clip_sigmas {
            cfg.forecast.clip_sigmas = value;
        }
        if let Some(value) = forecast.end_year {
            cfg = cfg.with_end_year(value);
        }
    }
    if let Some(climate) = file.climate {
        cfg.climate.tropical = climate.tropical.unwrap_or(cfg.climate.tropical);
        cfg.climate.subtropical = climate.subtropical.unwrap_or(cfg.climate.subtropical);
        cfg.climate.temperate = climate.temperate.unwrap_or(cfg.climate.temperate);
    }
    if let Some(report) = file.report {
        cfg.report.actual_start = report.actual_start.unwrap_or(cfg.report.actual_start);
        cfg.report.actual_end = report.actual_end.unwrap_or(cfg.report.actual_end);
        cfg.report.forecast_start = report.forecast_start.unwrap_or(cfg.report.forecast_start);
        cfg.report.forecast_end = report.forecast_end.unwrap_or(cfg.report.forecast_end);
    }
    cfg
}

pub fn parse_model_config(raw: &str) -> Result<ResolvedConfig, String> {
    let file: ModelConfigFile = toml::from_str(raw).map_err(|err| err.to_string())?;
    let cfg = resolve(file);
    cfg.validate()?;
    Ok(cfg)
}

/// Отсутствие файла по умолчанию не ошибка: берутся встроенные значения.
pub fn load_model_config(path: &Path) -> Result<ResolvedConfig, String> {
    if !path.exists() {
        if path == Path::new(DEFAULT_MODEL_CONFIG) {
            tracing::info!(
                "Model config {} not found, using built-in defaults",
                path.display()
            );
            return Ok(ResolvedConfig::default());
        }
        return Err(format!("Model config {} does not exist", path.display()));
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read model config {}: {err}", path.display()))?;
    parse_model_config(&raw)
        .map_err(|err| format!("Invalid model config {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(parse_model_config("").unwrap(), ResolvedConfig::default());
    }

    #[test]
    fn sections_override_only_given_fields() {
        let cfg = parse_model_config(
            r"
            [boosting]
            n_estimators = 50
            eta = 0.1

            [forecast]
            end_year = 2035

            [climate]
            tropical = 22.0
            ",
        )
        .unwrap();
        assert_eq!(cfg.training.boosting.n_estimators, 50);
        assert_eq!(cfg.training.boosting.learning_rate, 0.1);
        assert_eq!(cfg.training.boosting.max_depth, 3);
        assert_eq!(cfg.forecast.end_year, 2035);
        assert_eq!(cfg.report.forecast_end, 2035);
        assert_eq!(cfg.climate.tropical, 22.0);
        assert_eq!(cfg.climate.subtropical, 10.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse_model_config("[forecast]\ntest_fraction = 1.5").is_err());
        assert!(parse_model_config("[climate]\ntemperate = 15.0").is_err());
        assert!(parse_model_config("[boosting]\nsubsample = 0.0").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_model_config("[boosting]\nlearning_rat = 0.1").is_err());
    }

    #[test]
    fn end_year_override_widens_report_range() {
        let cfg = ResolvedConfig::default().with_end_year(2040);
        assert_eq!(cfg.forecast.end_year, 2040);
        assert_eq!(cfg.report.forecast_end, 2040);
        assert!(cfg.validate().is_ok());

        let cfg = ResolvedConfig::default().with_end_year(2027);
        assert_eq!(cfg.forecast.end_year, 2027);
        assert_eq!(cfg.report.forecast_end, 2030);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("tempcast-no-such-config.toml");
        assert!(load_model_config(&path).is_err());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let path = std::env::temp_dir().join("tempcast-model-config.toml");
        fs::write(&path, "[forecast]\nclip_sigmas = 3.0\n").unwrap();
        let cfg = load_model_config(&path).unwrap();
        assert_eq!(cfg.forecast.clip_sigmas, 3.0);
        let _ = fs::remove_file(path);
    }
}
