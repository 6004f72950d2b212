use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use herald_core::config::HeraldConfig;
use herald_polls::{PollRegistry, VoteAggregator};
use herald_scheduler::{Dispatcher, JobStore, Ticker};
use serde_json::json;
use tracing::warn;

use crate::ws::broadcast::EventBroadcaster;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: HeraldConfig,
    pub ticker: Arc<Ticker>,
    pub registry: Arc<PollRegistry>,
    pub aggregator: Arc<VoteAggregator>,
    pub broadcaster: EventBroadcaster,
}

impl AppState {
    pub fn new(
        config: HeraldConfig,
        ticker: Arc<Ticker>,
        registry: Arc<PollRegistry>,
        aggregator: Arc<VoteAggregator>,
    ) -> Self {
        Self {
            config,
            ticker,
            registry,
            aggregator,
            broadcaster: EventBroadcaster::new(),
        }
    }

    pub fn store(&self) -> &JobStore {
        self.ticker.store()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.ticker.dispatcher()
    }
}

/// Assemble the full Axum router.
///
/// `/health` is open and `/events/*` authenticate by HMAC signature; every
/// other route requires the gateway token when one is configured.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{events, health, polls, schedules, send};

    let control = Router::new()
        .route(
            "/schedules",
            get(schedules::list_handler).post(schedules::create_handler),
        )
        .route(
            "/schedules/{id}",
            get(schedules::get_handler)
                .put(schedules::update_handler)
                .delete(schedules::delete_handler),
        )
        .route("/send", post(send::send_handler))
        .route("/poll-history", get(polls::history_handler))
        .route("/polls/active", get(polls::active_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token,
        ));

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/events/messages-update", post(events::messages_update_handler))
        .route("/events/messages-upsert", post(events::messages_upsert_handler))
        .merge(control)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Reject requests without `Authorization: Bearer <gateway.token>`.
///
/// Browsers cannot set headers on a websocket upgrade, so `?token=` is
/// accepted as well.
async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.gateway.token.as_deref() else {
        return next.run(request).await;
    };
    let presented = extract_bearer(request.headers())
        .map(str::to_string)
        .or_else(|| query_token(request.uri().query()));
    if presented.as_deref() == Some(expected) {
        return next.run(request).await;
    }
    warn!(path = %request.uri().path(), "rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "Unauthorized. Set 'Authorization: Bearer <your-token>' header.",
            "code": "UNAUTHORIZED",
        })),
    )
        .into_response()
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "token")
        .map(|(_, v)| v.to_string())
}
