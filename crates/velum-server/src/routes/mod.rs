//! HTTP surface: the RPC edge and the administration REST.

pub mod admin;
pub mod rpc;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::backend::Backend;

/// Assemble the full router over one backend.
pub fn build_router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/anonymous/:organization_id", post(rpc::anonymous_rpc))
        .route("/invited/:organization_id", post(rpc::invited_rpc))
        .route("/authenticated/:organization_id", post(rpc::authenticated_rpc))
        .merge(admin::router())
        .layer(TraceLayer::new_for_http())
        .with_state(backend)
}
