use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Shown to callers whenever the identity or data provider is not configured.
pub const NOT_CONFIGURED_MESSAGE: &str =
    "Supabase not configured. Please set up your Supabase credentials.";

/// Message returned on a 500 from the receiver. Details go to the log only.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to process webhook";

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Webhook test failed: {status} {status_text}")]
    Transport { status: u16, status_text: String },

    #[error("{0}")]
    Connectivity(String),

    #[error("Invalid webhook response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),

    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("store response parse error: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("{0}")]
    NotConfigured(&'static str),

    #[error("identity request failed: {0}")]
    Request(String),

    #[error("{message}")]
    Provider { status: u16, message: String },

    #[error("identity response parse error: {0}")]
    Decode(String),
}

impl IdentityError {
    pub fn status(&self) -> Option<u16> {
        match self {
            IdentityError::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failures raised from inside the receiver's dispatch pipeline.
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Malformed webhook payload: {0}")]
    Parse(String),

    #[error("Unsupported event: {0}")]
    UnknownEvent(String),

    #[error("Handler for {event} failed: {message}")]
    Dispatch { event: String, message: String },
}

impl IntoResponse for ReceiverError {
    fn into_response(self) -> Response {
        match self {
            ReceiverError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(json!({ "error": "Method not allowed" })),
            )
                .into_response(),
            ReceiverError::UnknownEvent(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Unknown event", "message": self.to_string() })),
            )
                .into_response(),
            ReceiverError::Parse(_) | ReceiverError::Dispatch { .. } => {
                tracing::error!(error = %self, "Webhook processing error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "Internal server error",
                        "message": GENERIC_FAILURE_MESSAGE,
                    })),
                )
                    .into_response()
            }
        }
    }
}
