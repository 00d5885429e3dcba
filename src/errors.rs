// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User-facing error handling.
//!
//! Every error that crosses the HTTP boundary is rendered as
//! `{"error": "<message>"}` with an appropriate status code. Internal
//! detail (tool stderr, file paths, I/O errors) is logged via `tracing`
//! and never included in a response body.
//!
//! Background download failures are not represented here: by the time a
//! background task fails, its creating request has already returned 200,
//! so the failure is surfaced only through the job's event stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// The request is missing or has empty required fields (400).
    InvalidRequest { message: String },
    /// The external tool failed or returned unparseable data (500).
    UpstreamFetch { message: String },
    /// A job's file was requested before the job completed (404).
    NotReady { message: String },
    /// Anything else that should not leak detail (500).
    Internal { message: String },
}

/// Wire shape for every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::UpstreamFetch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotReady { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the user-facing message.
    pub fn message(&self) -> &str {
        match self {
            ApiError::InvalidRequest { message } => message,
            ApiError::UpstreamFetch { message } => message,
            ApiError::NotReady { message } => message,
            ApiError::Internal { message } => message,
        }
    }

    /// Create an InvalidRequest error. The message is already user-facing.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(message = %message, "Invalid request");
        Self::InvalidRequest { message }
    }

    /// Create an UpstreamFetch error, logging the internal cause.
    ///
    /// `user_message` is what the client sees; `internal` is logged only.
    pub fn upstream_fetch(user_message: impl Into<String>, internal: &anyhow::Error) -> Self {
        let message = user_message.into();
        tracing::error!(error = %internal, "Upstream tool failure");
        Self::UpstreamFetch { message }
    }

    /// Create a NotReady error for a file requested before completion.
    pub fn not_ready() -> Self {
        Self::NotReady {
            message: "File not ready or not found.".to_string(),
        }
    }

    /// Create an Internal error, logging the real cause.
    pub fn internal(internal: &anyhow::Error) -> Self {
        tracing::error!(error = %internal, "Internal server error");
        Self::Internal {
            message: "An internal error occurred.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.message().to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
