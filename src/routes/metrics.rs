use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::services::dispatcher::QueueDispatcher;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub dispatcher: Arc<QueueDispatcher>,
}

/// GET /metrics — Prometheus text exposition, with the queue depth sampled
/// at scrape time.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.dispatcher.queue_depth().await {
        Ok(depth) => metrics::gauge!("imagegen_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to sample queue depth"),
    }
    state.handle.render()
}
