use crate::{server::SharedState, task::InvocationTask};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("Request body is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),
    #[error("Request body is not a task: {0}")]
    InvalidTask(serde_json::Error),
    #[error("No handler matched")]
    NoHandlerMatched,
}

impl IntoResponse for InvokeError {
    fn into_response(self) -> Response {
        let status = match self {
            InvokeError::InvalidJson(_) | InvokeError::InvalidTask(_) => StatusCode::BAD_REQUEST,
            InvokeError::NoHandlerMatched => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[instrument(skip(state, body))]
pub async fn invoke(State(state): State<SharedState>, body: Bytes) -> Result<Response, InvokeError> {
    let body: Value = serde_json::from_slice(&body).map_err(InvokeError::InvalidJson)?;
    tracing::debug!("request {}", body);

    let task: InvocationTask = serde_json::from_value(body).map_err(InvokeError::InvalidTask)?;
    let completion = state.router.handle_task(task).await.ok_or_else(|| {
        state.metrics.record_invocation("unmatched");
        InvokeError::NoHandlerMatched
    })?;
    tracing::debug!("completion {:?}", completion);

    state.metrics.record_invocation(if completion.success {
        "success"
    } else {
        "failure"
    });

    Ok(Json(completion).into_response())
}
