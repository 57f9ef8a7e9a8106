use axum::{Json, extract::State, response::IntoResponse};

use crate::state::AppState;

/// `GET /watchers`: cursor, queue depth and counters of each running watcher.
pub(super) async fn list_watchers(state: State<AppState>) -> impl IntoResponse {
    Json(state.registry.statuses().await)
}
