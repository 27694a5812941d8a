use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::MailError;

/// Tool call failures as rendered to HTTP callers
#[derive(Debug, Clone)]
pub enum ToolError {
    InvalidArgument(String),
    NotFound(String),
    UnknownTool(String),
    OperationFailed(String),
    Connection(String),
    Send(String),
    Protocol(String),
}

impl ToolError {
    fn code(&self) -> &str {
        match self {
            ToolError::InvalidArgument(_) => "InvalidArgument",
            ToolError::NotFound(_) => "NotFound",
            ToolError::UnknownTool(_) => "UnknownTool",
            ToolError::OperationFailed(_) => "OperationFailed",
            ToolError::Connection(_) => "ConnectionError",
            ToolError::Send(_) => "SendError",
            ToolError::Protocol(_) => "ProtocolError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ToolError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ToolError::NotFound(_) | ToolError::UnknownTool(_) => StatusCode::NOT_FOUND,
            ToolError::OperationFailed(_) => StatusCode::CONFLICT,
            ToolError::Connection(_) | ToolError::Send(_) | ToolError::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    fn message(&self) -> String {
        match self {
            ToolError::UnknownTool(name) => format!("Unknown tool: {}", name),
            ToolError::InvalidArgument(m)
            | ToolError::NotFound(m)
            | ToolError::OperationFailed(m)
            | ToolError::Connection(m)
            | ToolError::Send(m)
            | ToolError::Protocol(m) => m.clone(),
        }
    }
}

impl IntoResponse for ToolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("Tool call failed: {} {}", self.code(), self.message());
        }
        let body = json!({
            "isError": true,
            "error": self.code(),
            "message": self.message(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<MailError> for ToolError {
    fn from(err: MailError) -> Self {
        let message = err.to_string();
        match err {
            MailError::InvalidArgument(_) => ToolError::InvalidArgument(message),
            MailError::NotFound(_) => ToolError::NotFound(message),
            MailError::Operation(_) => ToolError::OperationFailed(message),
            MailError::Connection(_) => ToolError::Connection(message),
            MailError::Send(_) => ToolError::Send(message),
            MailError::Protocol(_) => ToolError::Protocol(message),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::InvalidArgument(format!("Invalid arguments: {}", err))
    }
}
