use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,

    // Capacity errors
    #[error("Daily quota exceeded, resets in {resets_in}")]
    QuotaExceeded { resets_in: String },
    #[error("Sticker pack is full")]
    PackFull,

    // Rendering errors
    #[error("Render error: {0}")]
    Render(String),
    #[error("Encoded sticker does not carry the expected format signature")]
    EncodeSignatureMismatch,
    #[error("Encoded sticker is {size} bytes, limit is {limit}")]
    StickerTooLarge { size: usize, limit: usize },

    // Upstream pack store errors
    #[error("Sticker pack is invalid or inaccessible")]
    PackInvalid,
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Upstream still unavailable after retries: {0}")]
    UpstreamExhausted(String),

    // Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // HTTP client errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Text shown to the user in the dialogue when an operation fails.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::BadRequest(msg) => msg.clone(),
            AppError::QuotaExceeded { resets_in } => format!(
                "You have used today's quota of advanced stickers. It resets in {}.",
                resets_in
            ),
            AppError::PackFull => {
                "This pack is full. Start a new pack to keep adding stickers.".to_string()
            }
            AppError::PackInvalid => {
                "The selected pack is no longer available. Please choose or create a pack."
                    .to_string()
            }
            AppError::Render(_)
            | AppError::EncodeSignatureMismatch
            | AppError::StickerTooLarge { .. } => {
                "Something went wrong while drawing your sticker. Please try again.".to_string()
            }
            _ => "Something went wrong. Please try again later.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 400 Bad Request
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),

            // 401 Unauthorized
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),

            // 409 Conflict
            AppError::PackFull => (StatusCode::CONFLICT, self.to_string()),
            AppError::PackInvalid => (StatusCode::CONFLICT, self.to_string()),

            // 429 Too Many Requests
            AppError::QuotaExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),

            // 502 Bad Gateway
            AppError::Upstream(msg) | AppError::UpstreamExhausted(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Upstream error".to_string())
            }
            AppError::Http(e) => {
                tracing::warn!("HTTP client error: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream error".to_string())
            }

            // 500 Internal Server Error
            AppError::Render(_)
            | AppError::EncodeSignatureMismatch
            | AppError::StickerTooLarge { .. } => {
                tracing::error!("Render error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Render error".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
