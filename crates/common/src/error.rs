use thiserror::Error;

/// Error taxonomy shared by the queue, the publisher and the worker.
///
/// `Delivery` and `Config` display their message unchanged: the worker records
/// the text of any delivery failure verbatim in `error_message`.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Delivery(String),

    #[error("{0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type HeraldResult<T> = Result<T, HeraldError>;
