//! Error handling.

use axum::{
    extract::rejection::QueryRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parquet::errors::ParquetError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{event, Level};

/// Low level storage error
///
/// Reading and writing Parquet files can fail either while touching the file system or while
/// encoding/decoding Parquet.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File system error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Parquet encoding or decoding error
    #[error(transparent)]
    Parquet(#[from] ParquetError),
}

/// Disclosure statistics error type
///
/// This type encapsulates the various errors that may occur in the aggregation job and the query
/// service. Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum DisclosureError {
    /// Missing or invalid configuration
    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },

    /// Raw event source could not be read
    #[error("failed to read raw events from {}", path.display())]
    InputRead {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    /// Raw event source was readable but does not contain valid events
    #[error("invalid raw events in {}: {reason}", path.display())]
    InputSchema { path: PathBuf, reason: String },

    /// Artifact could not be written
    #[error("failed to write disclosure artifact to {}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    /// Artifact could not be read
    #[error("failed to load disclosure artifact from {}", path.display())]
    ArtifactLoad {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    /// Artifact was readable but violates its contract
    #[error("disclosure artifact {} is invalid: {reason}", path.display())]
    ArtifactInvalid { path: PathBuf, reason: String },

    /// No loaded record has the requested event type
    #[error("no statistics for event type {event_type}")]
    EventTypeNotFound { event_type: String },

    /// Statistics have not been loaded yet
    #[error("statistics are not loaded yet")]
    ServiceUnavailable,

    /// Error deserialising query parameters
    #[error("query parameters are not valid")]
    QueryRejection(#[from] QueryRejection),

    /// Error validating query parameters
    #[error("query parameters are not valid")]
    QueryValidation(#[from] validator::ValidationErrors),

    /// HTTP server failed while serving
    #[error("server error")]
    Server(#[source] std::io::Error),

    /// Error joining a blocking task
    #[error("aggregation task failed")]
    Task(#[from] tokio::task::JoinError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

impl IntoResponse for DisclosureError {
    /// Convert from a `DisclosureError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 404 not found ErrorResponse
    fn not_found<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Return a 503 service unavailable ErrorResponse
    fn service_unavailable<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error)
    }
}

impl From<DisclosureError> for ErrorResponse {
    /// Convert from a `DisclosureError` into an `ErrorResponse`.
    fn from(error: DisclosureError) -> Self {
        let response = match &error {
            // Bad request
            DisclosureError::QueryRejection(_) | DisclosureError::QueryValidation(_) => {
                Self::bad_request(&error)
            }

            // Not found
            DisclosureError::EventTypeNotFound { event_type: _ } => Self::not_found(&error),

            // Service unavailable
            DisclosureError::ServiceUnavailable => Self::service_unavailable(&error),

            // Internal server error
            DisclosureError::Configuration { reason: _ }
            | DisclosureError::InputRead { path: _, source: _ }
            | DisclosureError::InputSchema { path: _, reason: _ }
            | DisclosureError::OutputWrite { path: _, source: _ }
            | DisclosureError::ArtifactLoad { path: _, source: _ }
            | DisclosureError::ArtifactInvalid { path: _, reason: _ }
            | DisclosureError::Server(_)
            | DisclosureError::Task(_)
            | DisclosureError::TryFromInt(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}
