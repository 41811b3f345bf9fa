//! tether の HTTP 面
//!
//! axum で組み、共有の [`App`] の上に `/health` `/publish` `/ingest` `/fetch` を出す。

pub mod error;
pub mod routes;

pub use error::{ApiError, ServerError};

use axum::Router;
use axum::routing::{get, post};
use tether_core::app::App;

use crate::routes::{fetch_handler, health_handler, ingest_handler, not_found, publish_handler};

pub struct TetherServer {
    app: App,
}

impl TetherServer {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/publish", post(publish_handler))
            .route("/ingest", post(ingest_handler))
            .route("/fetch", get(fetch_handler))
            .fallback(not_found)
            .with_state(self.app)
    }
}
