//! Route handlers.
//!
//! Every lifecycle route answers with a plain-text `OK` or `ERROR`; failures
//! are logged, never surfaced as HTTP errors.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use isohost_runtime::InstanceInfo;
use tracing::warn;

use super::protocol::{
    AddInstanceQuery, DeleteInstanceQuery, REPLY_ERROR, REPLY_OK, RunInstanceQuery, SumFrame,
};
use super::state::AppState;

/// `POST /add_new_instance?name=&path=`
pub async fn add_new_instance(
    State(state): State<AppState>,
    Query(query): Query<AddInstanceQuery>,
) -> &'static str {
    match state.registry().create(&query.name, &query.path).await {
        Ok(()) => REPLY_OK,
        Err(e) => {
            warn!("add_new_instance {} failed: {}", query.name, e);
            REPLY_ERROR
        }
    }
}

/// `GET /run_instance?name=&a=&b=[&timeout_ms=]`
///
/// Replies with the `ans` field the script wrote, or `ERROR`.
pub async fn run_instance(
    State(state): State<AppState>,
    Query(query): Query<RunInstanceQuery>,
) -> String {
    let registry = Arc::clone(state.registry());
    let timeout = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| registry.config().default_timeout());
    let name = query.name.clone();

    // The frame lives in its own task so it outlives the run even if this
    // request is dropped mid-flight.
    let task = tokio::spawn(async move {
        let mut frame = Box::new(SumFrame::new(query.a, query.b));
        // SAFETY: the boxed frame is neither moved nor read until the run
        // returns, and run_with_buffer does not keep the view afterwards.
        let buffer = unsafe { frame.as_buffer() };
        registry
            .run_with_buffer(&query.name, buffer, timeout)
            .await
            .map(|()| frame.ans)
    });

    match task.await {
        Ok(Ok(ans)) => ans.to_string(),
        Ok(Err(e)) => {
            warn!("run_instance {} failed: {}", name, e);
            REPLY_ERROR.to_string()
        }
        Err(e) => {
            warn!("run_instance {} task failed: {}", name, e);
            REPLY_ERROR.to_string()
        }
    }
}

/// `DELETE /delete_instance?name=`
pub async fn delete_instance(
    State(state): State<AppState>,
    Query(query): Query<DeleteInstanceQuery>,
) -> &'static str {
    match state.registry().delete(&query.name).await {
        Ok(()) => REPLY_OK,
        Err(e) => {
            warn!("delete_instance {} failed: {}", query.name, e);
            REPLY_ERROR
        }
    }
}

/// `GET /instances`
pub async fn list_instances(State(state): State<AppState>) -> Json<Vec<InstanceInfo>> {
    Json(state.registry().list())
}
