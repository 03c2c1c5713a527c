// ── Core error types ──
//
// Reconciliation-level errors. These are NOT API-specific -- flows and the
// state store never branch on HTTP status codes or envelope shapes.
// The `From<lbsync_api::Error>` impl sorts device failures into the
// retry/revert taxonomy the engine acts on.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Retryable ────────────────────────────────────────────────────
    #[error("Device connection failed: {reason}")]
    TransientConnection { reason: String },

    /// A referenced entity is not visible in the state store yet.
    #[error("{entity} {id} not yet committed to the state store")]
    NotYetCommitted { entity: String, id: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device rejected {operation}: code {code}")]
    DeviceBusiness { operation: String, code: i64 },

    #[error("Device request failed: {message}")]
    Device { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Dependency exists: {message}")]
    DependencyExists { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    /// Another flow is already running for this entity.
    #[error("{entity} {id} already has a flow in progress")]
    Busy { entity: String, id: String },

    // ── Engine errors ────────────────────────────────────────────────
    #[error("Flow store is missing required input `{key}`")]
    MissingInput { key: String },

    #[error("State store error: {message}")]
    StateStore { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Failures a retry policy may spend its budget on.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientConnection { .. } | Self::NotYetCommitted { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<lbsync_api::Error> for CoreError {
    fn from(err: lbsync_api::Error) -> Self {
        use lbsync_api::Error as Api;

        if err.is_transient() {
            return CoreError::TransientConnection {
                reason: err.to_string(),
            };
        }

        match err {
            Api::Authentication { message } | Api::AccountLocked { message } => {
                CoreError::AuthenticationFailed { message }
            }
            Api::SessionExpired => CoreError::AuthenticationFailed {
                message: "session expired -- re-authentication required".into(),
            },
            Api::Device { code, method, path } => CoreError::DeviceBusiness {
                operation: format!("{method} {path}"),
                code,
            },
            Api::DependencyExists { message } => CoreError::DependencyExists { message },
            Api::NotFound { resource, key } => CoreError::NotFound {
                entity_type: resource,
                identifier: key,
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            Api::UnsupportedOperation(op) => CoreError::Unsupported {
                operation: op.to_string(),
            },
            other @ (Api::Transport(_)
            | Api::Unreachable { .. }
            | Api::HttpStatus { .. }
            | Api::Envelope { .. }
            | Api::Deserialization { .. }) => CoreError::Device {
                message: other.to_string(),
            },
        }
    }
}
