use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Golden schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Malformed table: {0}")]
    MalformedTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
