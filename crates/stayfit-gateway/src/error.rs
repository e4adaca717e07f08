use thiserror::Error;

/// Failure of a delivery-engine or fan-out operation. Socket handlers log and
/// drop these; the HTTP layer maps them to status codes.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid request: {0}")]
    Invalid(&'static str),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("background task failed")]
    Join,
}
