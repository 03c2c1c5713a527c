use thiserror::Error;

/// Top-level error type for the `lbsync-api` crate.
///
/// Covers every failure mode of the appliance REST surface:
/// authentication, transport, envelope classification and data decoding.
/// `lbsync-core` maps these into the reconciliation error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected, or the appliance reported the session as unusable.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Too many bad login attempts, or the admin login limit was reached.
    #[error("Account locked: {message}")]
    AccountLocked { message: String },

    /// Token expired or was revoked ("Session Timeout" / "Token is expired").
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The connection could not be established or broke mid-request.
    #[error("Device unreachable: {message}")]
    Unreachable { message: String },

    // ── Envelope ────────────────────────────────────────────────────
    /// Non-success HTTP status with no more specific classification.
    #[error("HTTP {status} from {method} {path}")]
    HttpStatus {
        status: u16,
        method: String,
        path: String,
    },

    /// The response envelope was malformed (bad status, method mismatch, empty payload).
    #[error("Malformed response envelope: {message}")]
    Envelope { message: String },

    /// The appliance returned a business error code outside the tolerated set.
    #[error("Device error {code} on {method} {path}")]
    Device {
        code: i64,
        method: String,
        path: String,
    },

    /// The appliance refused the operation because dependents still exist (HTTP 424).
    #[error("Dependency exists: {message}")]
    DependencyExists { message: String },

    /// The requested object does not exist on the appliance.
    #[error("Not found: {resource} {key}")]
    NotFound { resource: String, key: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Platform ────────────────────────────────────────────────────
    /// Operation not supported on this appliance or firmware.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::SessionExpired)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Unreachable { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::HttpStatus { status: 404, .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// Extract the device business error code, if available.
    pub fn device_code(&self) -> Option<i64> {
        match self {
            Self::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}
