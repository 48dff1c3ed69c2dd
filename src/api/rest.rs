use axum::extract::State;
use axum::Json;

use super::{ApiError, AppState};
use crate::models::{ExecutionRequest, ExecutionResponse, SystemInfo};
use crate::spec::SpecMap;

pub async fn get_spec(State(state): State<AppState>) -> Json<SpecMap> {
    Json(state.manager.specs().snapshot().as_ref().clone())
}

pub async fn get_info(State(state): State<AppState>) -> Result<Json<SystemInfo>, ApiError> {
    let sandbox = state.manager.provider().info().await?;
    Ok(Json(SystemInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        sandbox,
    }))
}

pub async fn post_exec(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    let response = state.manager.execute(&state.shutdown, request).await?;

    let output_len = (response.stdout.len() + response.stderr.len()) as u64;
    if state.max_output_len > 0 && output_len > state.max_output_len {
        return Err(ApiError::OutputLenExceeded);
    }

    Ok(Json(response))
}
