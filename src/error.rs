//! Service-level errors and their JSON representation.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("unknown module: {0}")]
  ModuleNotFound(String),
  #[error("unknown task {task_id} in module {module_id}")]
  TaskNotFound { module_id: String, task_id: String },
  #[error("invalid request: {0}")]
  BadRequest(String),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::ModuleNotFound(_) | ApiError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      ApiError::ModuleNotFound(_) => "MODULE_NOT_FOUND",
      ApiError::TaskNotFound { .. } => "TASK_NOT_FOUND",
      ApiError::BadRequest(_) => "BAD_REQUEST",
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  pub code: String,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    warn!(target: "taskforge_backend", %status, error = %self, "Request failed");
    (status, Json(ErrorResponse { error: self.to_string(), code: self.code().into() })).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn statuses_and_codes() {
    let e = ApiError::TaskNotFound { module_id: "m".into(), task_id: "t".into() };
    assert_eq!(e.status(), StatusCode::NOT_FOUND);
    assert_eq!(e.code(), "TASK_NOT_FOUND");
    assert_eq!(e.to_string(), "unknown task t in module m");
    assert_eq!(ApiError::BadRequest("count".into()).status(), StatusCode::BAD_REQUEST);
  }
}
