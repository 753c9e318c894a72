use crate::AppState;
use crate::handlers;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router<()> {
    Router::new()
        .route("/health", get(handlers::health::handler))
        .route("/transfers", post(handlers::transfers::handler))
        .with_state(state)
}
