use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataframe operation failed: {0}")]
    DataFrame(#[from] polars::prelude::PolarsError),

    #[error("object store error: {message}")]
    Store { message: String },

    #[error("API error: {message}")]
    Api { message: String },

    #[error("missing required columns in {context}: {columns:?}")]
    MissingColumns {
        context: String,
        columns: Vec<String>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data error: {message}")]
    Data { message: String },
}

impl PipelineError {
    pub fn store(context: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::Store {
            message: format!("{context}: {err}"),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        PipelineError::Api {
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        PipelineError::Data {
            message: message.into(),
        }
    }

    pub fn missing_columns(context: &str, columns: Vec<String>) -> Self {
        PipelineError::MissingColumns {
            context: context.to_string(),
            columns,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
