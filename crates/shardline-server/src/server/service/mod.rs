//! HTTP surface of the orchestrator.
//!
//! ## Structure
//!
//! - [`handler`] - one axum handler per route.
//! - [`error`] - mapping of core errors onto HTTP responses.
//!
//! ## Routes
//!
//! | Route             | Request                              | Response                            |
//! | ----------------- | ------------------------------------ | ----------------------------------- |
//! | `GET /allocate`   | query `key`                          | `{"chunk":0,"assignedStartTime":0}` |
//! | `GET /shardcoin`  | header `x-shardline-identity`        | `true` / `false`                    |
//! | `GET /status`     | -                                    | swarm summary                       |
//! | `POST /heartbeat` | `{"key":"..."}`                      | `204`                               |
//! | `POST /stats`     | `{"key":"...","shards":[...]}`       | `204`                               |

pub mod error;
pub mod handler;
#[cfg(test)]
mod tests;

use axum::{
    Router,
    routing::{get, post},
};
use shardline::{Orchestrator, TimeSource};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Clock shared by every component of the running service.
pub type Clock = Arc<dyn TimeSource<u64> + Send + Sync>;

/// Header carrying the identity of a worker asking for a coin.
pub const IDENTITY_HEADER: &str = "x-shardline-identity";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator<Clock>>,
}

impl AppState {
    pub const fn new(orchestrator: Arc<Orchestrator<Clock>>) -> Self {
        Self { orchestrator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/allocate", get(handler::allocate))
        .route("/shardcoin", get(handler::shardcoin))
        .route("/status", get(handler::status))
        .route("/heartbeat", post(handler::heartbeat))
        .route("/stats", post(handler::stats))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
