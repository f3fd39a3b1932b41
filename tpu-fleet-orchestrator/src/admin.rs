use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;

use crate::reconcile_job::SharedStatus;

/// Internal health/debug surface. Read-only.
pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/admin/status", get(get_status))
        .with_state(status)
}

async fn root() -> &'static str {
    "TPU Fleet Orchestrator Online"
}

async fn get_status(State(status): State<SharedStatus>) -> impl IntoResponse {
    let st = status.read().await;
    let state = match (&st.last_report, &st.last_error) {
        (None, None) => "pending",
        (_, Some(_)) if st.last_error_at > st.last_report.as_ref().map(|r| r.finished_at) => {
            "degraded"
        }
        _ => "ok",
    };
    Json(json!({
        "status": state,
        "cycles_completed": st.cycles_completed,
        "cycles_failed": st.cycles_failed,
        "last_error": st.last_error,
        "last_error_at": st.last_error_at,
        "last_cycle": st.last_report,
    }))
}
