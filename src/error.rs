use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Query error in variant '{variant}': {source}")]
    Query {
        variant: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Database state drifted before variant '{variant}': {detail}")]
    StateDrift { variant: String, detail: String },

    #[error("Comparison error: {0}")]
    Comparison(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    /// Wrap a driver error with the name of the variant that was running.
    pub fn query(variant: &str, source: sqlx::Error) -> Self {
        BenchError::Query {
            variant: variant.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
