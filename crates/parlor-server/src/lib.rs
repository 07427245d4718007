use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parlor_chat::Hub;
use parlor_db::Database;
use parlor_gateway::{connection, identity};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub hub: Hub,
    pub jwt_secret: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Identity is resolved here, at accept time; the chat session never
    // reaches back into any web-session state.
    let identity = identity::resolve_identity(query.token.as_deref(), &state.jwt_secret);
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.db, state.hub, identity)
    })
}
