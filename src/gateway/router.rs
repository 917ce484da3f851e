//! HTTP router

use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    response::Response,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use super::handler::AuthGateway;

/// Create the router: every method and path goes through the gateway
pub fn create_router(gateway: Arc<AuthGateway>) -> Router {
    Router::new()
        .fallback(gateway_handler)
        .with_state(gateway)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn gateway_handler(State(gateway): State<Arc<AuthGateway>>, request: Request) -> Response {
    gateway.handle(request).await
}
