use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Translation unavailable: {0}")]
    TranslationUnavailable(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Composition failed: {0}")]
    CompositionFailed(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
