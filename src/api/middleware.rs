use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared-secret check. Passes everything through when no key is configured.
pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = &state.config.server.api_key {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        if provided != expected {
            tracing::debug!("Rejected request with wrong API key");
            return Err(AppError::Unauthorized);
        }
    }

    Ok(next.run(request).await)
}
