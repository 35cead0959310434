use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::{handlers, middleware::api_key_middleware};
use crate::AppState;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Dialogue and account routes (protected)
    let user_routes = Router::new()
        .route("/:user_id/events", post(handlers::stickers::post_event))
        .route("/:user_id/photo", post(handlers::stickers::post_photo))
        .route("/:user_id/quota", get(handlers::stickers::get_quota))
        .route("/:user_id/packs", get(handlers::stickers::get_packs))
        .layer(middleware::from_fn_with_state(state.clone(), api_key_middleware));

    // Stateless render preview (protected)
    let preview_routes = Router::new()
        .route("/preview", post(handlers::stickers::post_preview))
        .layer(middleware::from_fn_with_state(state.clone(), api_key_middleware));

    Router::new()
        .nest("/users", user_routes)
        .merge(preview_routes)
        .with_state(state)
}
