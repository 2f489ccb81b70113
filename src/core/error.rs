//! Typed error handling for kibble
//!
//! The admin degrades silently wherever a missing affordance is acceptable
//! (bad filter values, unknown linked actions, unbuildable URLs). Everything
//! that does abort a request or the startup sequence is expressed here.
//!
//! # Error Categories
//!
//! - [`RegistryError`]: view registration problems (duplicates, unknown views)
//! - [`ConfigError`]: configuration and schema resolution problems
//! - [`StorageError`]: datastore failures, including missing indexes
//! - [`RequestError`]: per-request failures mapped onto HTTP statuses
//! - [`TemplateError`]: template lookup and rendering failures
//!
//! # Example
//!
//! ```rust,ignore
//! match kibble.registry().get("Author", "list") {
//!     Some(view) => view,
//!     None => return Err(KibbleError::Request(RequestError::NotFound {
//!         path: "/admin/author/".to_string(),
//!     })),
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The main error type for kibble
#[derive(Debug)]
pub enum KibbleError {
    /// View registry errors
    Registry(RegistryError),

    /// Configuration and schema errors
    Config(ConfigError),

    /// Datastore errors
    Storage(StorageError),

    /// Request handling errors
    Request(RequestError),

    /// Template errors
    Template(TemplateError),

    /// Internal errors (should not happen in normal operation)
    Internal(String),
}

impl fmt::Display for KibbleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KibbleError::Registry(e) => write!(f, "{}", e),
            KibbleError::Config(e) => write!(f, "{}", e),
            KibbleError::Storage(e) => write!(f, "{}", e),
            KibbleError::Request(e) => write!(f, "{}", e),
            KibbleError::Template(e) => write!(f, "{}", e),
            KibbleError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for KibbleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KibbleError::Registry(e) => Some(e),
            KibbleError::Config(e) => Some(e),
            KibbleError::Storage(e) => Some(e),
            KibbleError::Request(e) => Some(e),
            KibbleError::Template(e) => Some(e),
            KibbleError::Internal(_) => None,
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl KibbleError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            KibbleError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            KibbleError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            KibbleError::Storage(e) => e.status_code(),
            KibbleError::Request(e) => e.status_code(),
            KibbleError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
            KibbleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            KibbleError::Registry(e) => e.error_code(),
            KibbleError::Config(_) => "CONFIG_ERROR",
            KibbleError::Storage(e) => e.error_code(),
            KibbleError::Request(e) => e.error_code(),
            KibbleError::Template(_) => "TEMPLATE_ERROR",
            KibbleError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }

    /// Whether the datastore rejected the query for lack of an index
    pub fn is_need_index(&self) -> bool {
        matches!(self, KibbleError::Storage(StorageError::NeedIndex { .. }))
    }
}

impl IntoResponse for KibbleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "{}", self);
        }
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors raised while registering or resolving views
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The same (path, action) pair was registered twice
    #[error("a view is already registered for {path}:{action}")]
    DuplicateView { path: String, action: String },

    /// A view definition is internally inconsistent
    #[error("invalid view {path}:{action}: {message}")]
    InvalidView {
        path: String,
        action: String,
        message: String,
    },
}

impl RegistryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::DuplicateView { .. } => "DUPLICATE_VIEW",
            RegistryError::InvalidView { .. } => "INVALID_VIEW",
        }
    }
}

impl From<RegistryError> for KibbleError {
    fn from(err: RegistryError) -> Self {
        KibbleError::Registry(err)
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration and model schema
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A property path does not resolve against the model schema
    #[error("{kind} has no property '{path}'")]
    UnknownProperty { kind: String, path: String },

    /// A property path descends into a property that has no sub-properties
    #[error("property '{path}' of {kind} is not a structured property")]
    NotStructured { kind: String, path: String },

    /// Configuration file could not be parsed
    #[error("failed to parse configuration: {message}")]
    ParseError { message: String },

    /// A URL pattern could not be compiled
    #[error("invalid url pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl From<ConfigError> for KibbleError {
    fn from(err: ConfigError) -> Self {
        KibbleError::Config(err)
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors reported by a [`Datastore`](crate::core::Datastore)
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The query needs an index the datastore does not have
    #[error("query requires an index: {message}")]
    NeedIndex { message: String },

    /// A concurrent write won; the transaction may be retried
    #[error("transaction collision on {key}")]
    Conflict { key: String },

    /// The entity could not be stored
    #[error("invalid entity: {message}")]
    InvalidEntity { message: String },

    /// Any other backend failure
    #[error("datastore failure: {message}")]
    Backend { message: String },
}

impl StorageError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::NeedIndex { .. } => StatusCode::BAD_REQUEST,
            StorageError::Conflict { .. } => StatusCode::CONFLICT,
            StorageError::InvalidEntity { .. } => StatusCode::BAD_REQUEST,
            StorageError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::NeedIndex { .. } => "NEED_INDEX",
            StorageError::Conflict { .. } => "TRANSACTION_CONFLICT",
            StorageError::InvalidEntity { .. } => "INVALID_ENTITY",
            StorageError::Backend { .. } => "STORAGE_ERROR",
        }
    }
}

impl From<StorageError> for KibbleError {
    fn from(err: StorageError) -> Self {
        KibbleError::Storage(err)
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Errors that abort a single request
#[derive(Debug, Error)]
pub enum RequestError {
    /// Nothing is routed at this path, or the addressed entity is gone
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The authenticator denied access
    #[error("permission denied for {action}")]
    Forbidden { action: String },

    /// The HTTP method is not accepted by the view
    #[error("method {method} not allowed")]
    MethodNotAllowed { method: String },

    /// The request is malformed
    #[error("bad request: {message}")]
    BadRequest { message: String },
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::NotFound { .. } => StatusCode::NOT_FOUND,
            RequestError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RequestError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RequestError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RequestError::NotFound { .. } => "NOT_FOUND",
            RequestError::Forbidden { .. } => "FORBIDDEN",
            RequestError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            RequestError::BadRequest { .. } => "BAD_REQUEST",
        }
    }
}

impl From<RequestError> for KibbleError {
    fn from(err: RequestError) -> Self {
        KibbleError::Request(err)
    }
}

// =============================================================================
// Template Errors
// =============================================================================

/// Errors raised by a [`TemplateRenderer`](crate::server::TemplateRenderer)
#[derive(Debug, Error)]
pub enum TemplateError {
    /// None of the templates in the chain exist
    #[error("none of the templates exist: {}", .candidates.join(", "))]
    NotFound { candidates: Vec<String> },

    /// The template exists but failed to render
    #[error("failed to render {name}: {message}")]
    Render { name: String, message: String },
}

impl From<TemplateError> for KibbleError {
    fn from(err: TemplateError) -> Self {
        KibbleError::Template(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_returns_404() {
        let err = KibbleError::Request(RequestError::NotFound {
            path: "/admin/nope/".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_forbidden_returns_403() {
        let err: KibbleError = RequestError::Forbidden {
            action: "delete".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_duplicate_view_message() {
        let err: KibbleError = RegistryError::DuplicateView {
            path: "Author".to_string(),
            action: "list".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "a view is already registered for Author:list"
        );
        assert_eq!(err.error_code(), "DUPLICATE_VIEW");
    }

    #[test]
    fn test_need_index_detection() {
        let err: KibbleError = StorageError::NeedIndex {
            message: "inequality on two properties".to_string(),
        }
        .into();
        assert!(err.is_need_index());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let other: KibbleError = StorageError::Backend {
            message: "down".to_string(),
        }
        .into();
        assert!(!other.is_need_index());
    }

    #[test]
    fn test_template_not_found_lists_candidates() {
        let err = TemplateError::NotFound {
            candidates: vec!["a.html".to_string(), "b.html".to_string()],
        };
        assert_eq!(err.to_string(), "none of the templates exist: a.html, b.html");
    }

    #[test]
    fn test_error_response_shape() {
        let err: KibbleError = ConfigError::UnknownProperty {
            kind: "Author".to_string(),
            path: "nickname".to_string(),
        }
        .into();
        let body = err.to_response();
        assert_eq!(body.code, "CONFIG_ERROR");
        assert_eq!(body.message, "Author has no property 'nickname'");
    }
}
