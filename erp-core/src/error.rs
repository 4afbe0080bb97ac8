//! Unified error handling for the session client
//!
//! Structured error types with context and a status-code classification used
//! to decide how each failure is surfaced (raised, swallowed, or downgraded).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type SessionResult<T> = Result<T, SessionError>;

/// Error context providing additional information for debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Coarse classification of an HTTP status returned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    RateLimited,
    Server,
    Other,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => StatusClass::BadRequest,
            401 => StatusClass::Unauthorized,
            403 => StatusClass::Forbidden,
            404 => StatusClass::NotFound,
            409 => StatusClass::Conflict,
            422 => StatusClass::Validation,
            429 => StatusClass::RateLimited,
            500..=599 => StatusClass::Server,
            _ => StatusClass::Other,
        }
    }

    /// Message shown when the backend does not provide one
    pub fn default_message(&self) -> &'static str {
        match self {
            StatusClass::BadRequest => "The request was invalid",
            StatusClass::Unauthorized => "Authentication required or credentials rejected",
            StatusClass::Forbidden => "You do not have permission to perform this action",
            StatusClass::NotFound => "The requested resource was not found",
            StatusClass::Conflict => "The resource already exists",
            StatusClass::Validation => "The submitted data failed validation",
            StatusClass::RateLimited => "Too many requests, please try again later",
            StatusClass::Server => "The server encountered an error",
            StatusClass::Other => "Unexpected response from server",
        }
    }
}

/// Main error type for the session client
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        context: ErrorContext,
    },

    #[error("Session is not valid: {message}")]
    SessionInvalid {
        message: String,
        context: ErrorContext,
    },

    #[error("No refresh token available")]
    NoRefreshToken { context: ErrorContext },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Build an API error, falling back to the status class message
    pub fn api(status: u16, message: Option<String>, operation: &str) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| StatusClass::from_status(status).default_message().to_string());

        SessionError::Api {
            status,
            message,
            context: ErrorContext::new("api_client").with_operation(operation),
        }
    }

    pub fn session_invalid<S: Into<String>>(message: S, operation: &str) -> Self {
        SessionError::SessionInvalid {
            message: message.into(),
            context: ErrorContext::new("session_manager").with_operation(operation),
        }
    }

    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SessionError::Api { context, .. } => Some(context),
            SessionError::Network { context, .. } => Some(context),
            SessionError::Timeout { context, .. } => Some(context),
            SessionError::SessionInvalid { context, .. } => Some(context),
            SessionError::NoRefreshToken { context } => Some(context),
            SessionError::Config { context, .. } => Some(context),
            SessionError::Storage { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status carried by the error, if the backend answered
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn status_class(&self) -> Option<StatusClass> {
        self.status().map(StatusClass::from_status)
    }

    /// The backend rejected what the user submitted (bad input or credentials)
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self.status_class(),
            Some(
                StatusClass::BadRequest
                    | StatusClass::Unauthorized
                    | StatusClass::Forbidden
                    | StatusClass::Conflict
                    | StatusClass::Validation
            )
        )
    }

    /// The current token set can no longer be used
    pub fn is_session_invalid(&self) -> bool {
        match self {
            SessionError::SessionInvalid { .. } | SessionError::NoRefreshToken { .. } => true,
            SessionError::Api { status, .. } => *status == 401,
            _ => false,
        }
    }

    /// Check if error is transient
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::Network { .. } | SessionError::Timeout { .. } => true,
            SessionError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        match self {
            SessionError::Network { .. } | SessionError::Timeout { .. } => {
                warn!(error_id = ?error_id, error = %self, "Network or timeout error (may be recoverable)");
            }
            SessionError::Api { status, .. } if *status < 500 => {
                warn!(error_id = ?error_id, status = status, error = %self, "Request rejected by backend");
            }
            _ => {
                error!(error_id = ?error_id, error = %self, "Error occurred");
            }
        }
    }
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::SessionError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::SessionError::Config {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::SessionError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::SessionError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}
