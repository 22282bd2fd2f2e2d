use thiserror::Error;

/// Main error type for the event gate
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Permission denied: {0}")]
    Permission(#[from] PermissionError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::Auth(_) => "auth",
            GateError::UnknownEvent(_) => "unknown_event",
            GateError::Permission(_) => "permission",
            GateError::Adapter(_) => "adapter",
            GateError::Validation(_) => "validation",
            GateError::Registration(_) => "registration",
            GateError::Configuration(_) => "configuration",
            GateError::Internal(_) => "internal",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GateError::Validation(message.into())
    }
}

/// Credential errors raised before any handler is reached
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("access token is missing")]
    MissingToken,

    #[error("access token is invalid: {0}")]
    InvalidToken(String),

    #[error("access token has expired")]
    Expired,

    #[error("caller identity does not match token: {0}")]
    IdentityMismatch(String),
}

/// Whitelist and privilege failures
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("module '{module}' may not access table '{table}'")]
    TableDenied { module: String, table: String },

    #[error("module '{module}' may not access column '{column}' of table '{table}'")]
    ColumnDenied {
        module: String,
        table: String,
        column: String,
    },

    #[error("event '{event}' is restricted to core modules, '{module}' is not one")]
    CoreOnly { module: String, event: String },
}

/// Native engine failures. Every variant names the table or command that failed.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connection failed for '{target}': {message}")]
    ConnectionFailed { target: String, message: String },

    #[error("not connected, cannot run '{target}'")]
    NotConnected { target: String },

    #[error("query on '{target}' failed: {message}")]
    QueryFailed { target: String, message: String },

    #[error("constraint violated on '{target}': {message}")]
    ConstraintViolation { target: String, message: String },

    #[error("'{target}' does not map to a known native structure")]
    UnknownStructure { target: String },

    #[error("operation on '{target}' timed out after {seconds}s")]
    Timeout { target: String, seconds: u64 },
}

impl AdapterError {
    /// Table, collection or command name the failure is attached to
    pub fn target(&self) -> &str {
        match self {
            AdapterError::ConnectionFailed { target, .. }
            | AdapterError::NotConnected { target }
            | AdapterError::QueryFailed { target, .. }
            | AdapterError::ConstraintViolation { target, .. }
            | AdapterError::UnknownStructure { target }
            | AdapterError::Timeout { target, .. } => target,
        }
    }

    pub fn query_failed(target: impl Into<String>, message: impl ToString) -> Self {
        AdapterError::QueryFailed {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn unknown_structure(target: impl Into<String>) -> Self {
        AdapterError::UnknownStructure {
            target: target.into(),
        }
    }
}

/// Result type alias for gate operations
pub type GateResult<T> = Result<T, GateError>;
