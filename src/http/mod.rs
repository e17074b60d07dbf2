//! HTTP transport. Thin handlers that extract identity and
//! request data, call into the `LifecycleEngine`, and render the result
//! as JSON; all domain decisions live below this layer. Router shape
//! follows `app::build_router` (`todo_backend_postgresql`):
//! one `Router::new()` chain, CORS and tracing layers, `with_state`.

pub mod handlers;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::lifecycle::LifecycleEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::healthcheck))
        .route("/schemas", get(handlers::list_schemas))
        .route("/schemas/:type_name", get(handlers::get_schema))
        .route("/artifacts/:type_name", post(handlers::create_artifact).get(handlers::list_artifacts))
        .route(
            "/artifacts/:type_name/:id",
            get(handlers::get_artifact).patch(handlers::patch_artifact).delete(handlers::delete_artifact),
        )
        .route(
            "/artifacts/:type_name/:id/tags",
            get(handlers::get_tags).put(handlers::replace_tags).delete(handlers::clear_tags),
        )
        .route(
            "/artifacts/:type_name/:id/*blob_path",
            get(handlers::download_blob).put(handlers::upload_blob),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
