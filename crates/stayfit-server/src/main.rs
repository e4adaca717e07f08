mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use stayfit_api::{AppState, AppStateInner};
use stayfit_db::Database;
use stayfit_gateway::connection::{self, Handshake};
use stayfit_gateway::{Gateway, reminders, token};

use crate::config::Config;

#[derive(Deserialize)]
struct SocketQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stayfit=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.jwt_secret == "dev-secret-change-me" {
        warn!("STAYFIT_JWT_SECRET not set, using the development secret");
    }

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let gateway = Gateway::new(db.clone(), &config.jwt_secret, config.handshake_timeout);
    let _reminders = reminders::spawn(db.clone(), gateway.fanout.clone());

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        gateway: gateway.clone(),
        token_ttl: config.token_ttl,
    });

    // Routes
    let ws_route = Router::new()
        .route("/socket", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(stayfit_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("StayFit server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Token from `?token=` wins over the `Authorization` header; with neither,
/// the client has to send an `auth` frame.
async fn ws_upgrade(
    State(gateway): State<Gateway>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(token::bearer)
        .map(str::to_string);

    let handshake = match query.token.filter(|t| !t.is_empty()).or(header_token) {
        Some(token) => Handshake::Token(token),
        None => Handshake::Deferred,
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway, handshake))
}
