pub mod api;

use axum::{http::HeaderValue, routing::get, Router};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::handlers::ws_handler;
use crate::state::AppState;

pub use api::create_api_routes;

/// Full application router: WebSocket rooms, API, Swagger UI and the web client
pub fn create_router(state: Arc<AppState>, config: &Config) -> Router {
    let static_dir = PathBuf::from(&config.static_dir);
    let index = static_dir.join("index.html");

    let app = Router::new()
        .route("/ws/:room_id", get(ws_handler))
        .nest("/api", create_api_routes())
        .with_state(state)
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest_service("/static", ServeDir::new(&static_dir))
        // Any other path is a room name handled by the single-page client
        .fallback_service(ServeFile::new(index))
        .layer(TraceLayer::new_for_http());

    match cors_layer(config) {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .into_iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        Some(CorsLayer::new().allow_origin(origins))
    } else if config.is_development() {
        Some(CorsLayer::permissive())
    } else {
        None
    }
}
