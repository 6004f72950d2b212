use axum::{extract::State, Json};
use herald_polls::{ActivePoll, PollTally};
use std::sync::Arc;

use crate::app::AppState;

/// GET /poll-history: latest tally per poll, newest first.
pub async fn history_handler(State(state): State<Arc<AppState>>) -> Json<Vec<PollTally>> {
    Json(state.aggregator.get_history())
}

/// GET /polls/active
pub async fn active_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ActivePoll>> {
    Json(state.registry.list_active())
}
