//! Router assembly.

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use crate::connection;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new().route("/ws", get(connection::handle_ws)).route("/healthz", get(healthz)).layer(cors).with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
