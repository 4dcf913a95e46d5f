use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// Request-facing error taxonomy. Internal plumbing (DB/RPC transport, I/O)
/// keeps using `eyre::Result`; this type is for errors that cross the API
/// boundary and need a fixed status-code mapping.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported chain: {0}")]
    UnsupportedChain(u64),

    #[error("wallet is not tracked")]
    NotTracked,

    #[error("no healthy provider available for chain {0}")]
    ProviderUnavailable(u64),

    #[error("providers disagree on result")]
    ProviderDisagreement,

    #[error("log range irrecoverable at block {0}")]
    LogRangeIrrecoverable(u64),

    #[error("multicall entry failed: {0}")]
    CallFailed(String),

    #[error("snapshot build exceeded the time budget")]
    BuildTimeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedChain(_) => StatusCode::NOT_FOUND,
            AppError::NotTracked => StatusCode::NOT_FOUND,
            AppError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ProviderDisagreement => StatusCode::SERVICE_UNAVAILABLE,
            AppError::LogRangeIrrecoverable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::CallFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BuildTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        tracing::warn!(error = %self, %status, "request failed");
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, AppError>;
