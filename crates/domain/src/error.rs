/// Shared error type used across all tradegate crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache: {0}")]
    Cache(String),

    #[error("store: {0}")]
    Store(String),

    #[error("queue: {0}")]
    Queue(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("pipeline: {0}")]
    Pipeline(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
