use axum::{
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    access_log::access_log,
    handlers::{
        dispatch,
        healthcheck,
        metrics_handler,
    },
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .fallback(dispatch)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(axum::middleware::from_fn(access_log)))
        .with_state(state)
}
