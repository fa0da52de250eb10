//! Общая модель по всем странам: годовые температуры, явные кодировщики страны и континента.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::boosting::{GradientBoostedTrees, Regressor};
use crate::dataset::AnnualObservation;
use crate::error::{ForecastError, Result};
use crate::forecast::create_parent_dir;
use crate::model::{StandardScaler, TrainingConfig, chronological_split, rmse};

const ALL_ENTITIES: &str = "all entities";
const KIND_ENTITY: &str = "entity";
const KIND_CONTINENT: &str = "continent";

/// Отображение категория → индекс, зафиксированное при обучении.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryIndex {
    kind: &'static str,
    values: Vec<String>,
}

impl CategoryIndex {
    /// Строит индекс из уникальных значений в лексикографическом порядке.
    pub fn fit<'a>(kind: &'static str, values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut values: Vec<String> = values.into_iter().map(str::to_string).collect();
        values.sort_unstable();
        values.dedup();
        Self { kind, values }
    }

    pub fn encode(&self, value: &str) -> Result<usize> {
        self.values
            .binary_search_by(|known| known.as_str().cmp(value))
            .map_err(|_| ForecastError::UnseenCategory {
                kind: self.kind,
                value: value.to_string(),
            })
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Модель вместе со всем, что нужно для кодирования новых запросов.
#[derive(Clone, Debug)]
pub struct GlobalModel<R = GradientBoostedTrees> {
    pub regressor: R,
    pub year_scaler: StandardScaler,
    pub entities: CategoryIndex,
    pub continents: CategoryIndex,
    /// Последний год по каждой стране в обучающих данных.
    pub last_years: BTreeMap<String, i32>,
    pub rmse: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnnualForecast {
    pub entity: String,
    pub continent: String,
    pub year: i32,
    pub forecast: f64,
}

impl<R: Regressor> GlobalModel<R> {
    pub fn predict(&self, entity: &str, continent: &str, year: i32) -> Result<f64> {
        let features = self.encode(entity, continent, year)?;
        Ok(self.regressor.predict(&features))
    }

    fn encode(&self, entity: &str, continent: &str, year: i32) -> Result<[f64; 3]> {
        let entity_idx = self.entities.encode(entity)?;
        let continent_idx = self.continents.encode(continent)?;
        Ok([
            entity_idx as f64,
            continent_idx as f64,
            self.year_scaler.transform(f64::from(year)),
        ])
    }

    /// Годовой прогноз для каждой пары со следующего за последним известным года до `end_year`.
    ///
    /// Для страны без истории отсчёт идёт от последнего года во всём датасете.
    pub fn forecast(
        &self,
        requests: &[(String, String)],
        end_year: i32,
    ) -> Result<Vec<AnnualForecast>> {
        let overall_last = self.last_years.values().copied().max().unwrap_or(end_year);
        let mut rows = Vec::new();
        for (entity, continent) in requests {
            let start = self.last_years.get(entity).copied().unwrap_or(overall_last) + 1;
            for year in start..=end_year {
                rows.push(AnnualForecast {
                    entity: entity.clone(),
                    continent: continent.clone(),
                    year,
                    forecast: self.predict(entity, continent, year)?,
                });
            }
        }
        Ok(rows)
    }
}

/// Обучает одну модель на годовых наблюдениях всех стран.
///
/// Разбиение хронологическое по году: в тест уходят самые поздние годы.
pub fn fit_global(observations: &[AnnualObservation], config: &TrainingConfig) -> Result<GlobalModel> {
    if observations.is_empty() {
        return Err(ForecastError::InsufficientData {
            entity: ALL_ENTITIES.to_string(),
            observations: 0,
            needed: 1,
        });
    }

    let entities = CategoryIndex::fit(
        KIND_ENTITY,
        observations.iter().map(|obs| obs.entity.as_str()),
    );
    let continents = CategoryIndex::fit(
        KIND_CONTINENT,
        observations.iter().map(|obs| obs.continent.as_str()),
    );
    let mut last_years: BTreeMap<String, i32> = BTreeMap::new();
    for obs in observations {
        let last = last_years.entry(obs.entity.clone()).or_insert(obs.year);
        *last = (*last).max(obs.year);
    }

    let mut ordered: Vec<&AnnualObservation> = observations.iter().collect();
    ordered.sort_by(|left, right| {
        (left.year, &left.entity).cmp(&(right.year, &right.entity))
    });
    let split = chronological_split(ordered.len(), config.test_fraction);
    let (train, test) = ordered.split_at(split);

    let train_years: Vec<f64> = train.iter().map(|obs| f64::from(obs.year)).collect();
    let year_scaler = StandardScaler::fit(&train_years);

    let encode = |obs: &AnnualObservation| -> Result<[f64; 3]> {
        Ok([
            entities.encode(&obs.entity)? as f64,
            continents.encode(&obs.continent)? as f64,
            year_scaler.transform(f64::from(obs.year)),
        ])
    };
    let x_train = train.iter().map(|obs| encode(obs)).collect::<Result<Vec<_>>>()?;
    let y_train: Vec<f64> = train.iter().map(|obs| obs.temperature).collect();
    let regressor = config
        .boosting
        .fit(&x_train, &y_train)
        .map_err(ForecastError::InvalidConfig)?;

    let holdout_rmse = if test.is_empty() {
        None
    } else {
        let x_test = test.iter().map(|obs| encode(obs)).collect::<Result<Vec<_>>>()?;
        let y_test: Vec<f64> = test.iter().map(|obs| obs.temperature).collect();
        Some(rmse(&y_test, &regressor.predict_batch(&x_test)))
    };
    info!(
        entities = entities.values().len(),
        continents = continents.values().len(),
        train_rows = train.len(),
        test_rows = test.len(),
        rmse = holdout_rmse.unwrap_or(f64::NAN),
        "Global model fitted"
    );

    Ok(GlobalModel {
        regressor,
        year_scaler,
        entities,
        continents,
        last_years,
        rmse: holdout_rmse,
    })
}

pub fn write_annual_forecast_csv(rows: &[AnnualForecast], output_path: &Path) -> Result<()> {
    create_parent_dir(output_path)?;
    let mut writer = csv::Writer::from_path(output_path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
