//! Ошибки конвейера прогнозирования.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForecastError>;

#[derive(Debug, Error)]
pub enum ForecastError {
    /// Истории не хватает даже на одну строку признаков.
    #[error("no data available for {entity}: {observations} observations, need at least {needed}")]
    InsufficientData {
        entity: String,
        observations: usize,
        needed: usize,
    },

    /// Категория не встречалась при обучении общей модели.
    #[error("unseen {kind} '{value}': not present when the model was fitted")]
    UnseenCategory { kind: &'static str, value: String },

    #[error("dataset is missing required column '{0}'")]
    MissingColumn(String),

    #[error("entity '{0}' not found in dataset")]
    UnknownEntity(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to parse date '{raw}': {reason}")]
    InvalidDate { raw: String, reason: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
