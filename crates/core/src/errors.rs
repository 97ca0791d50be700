use thiserror::Error;

/// Unified error type for the entire portify-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Upstream classification ─────────────────────────────────────
    #[error("No credential configured for {provider}")]
    MissingCredential { provider: String },

    #[error("Authentication expired for {provider} — re-login required")]
    AuthExpired { provider: String },

    #[error("Quota exceeded ({provider}): {message}")]
    QuotaExceeded { provider: String, message: String },

    #[error("Transient failure ({provider}): {message}")]
    Transient { provider: String, message: String },

    #[error("Malformed response ({provider}): {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("Request rejected by {provider} (HTTP {status}): {message}")]
    Rejected {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Normalization failed ({provider}): {message}")]
    Normalization { provider: String, message: String },

    #[error("{provider} does not support {operation}")]
    Unsupported { provider: String, operation: String },

    #[error("No provider available for: {0}")]
    NoProvider(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // ── Credential vault ────────────────────────────────────────────
    #[error("Invalid vault format: {0}")]
    InvalidFileFormat(String),

    #[error("Unsupported vault version: {0}")]
    UnsupportedVersion(u16),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed — wrong password or corrupted vault")]
    Decryption,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("File I/O error: {0}")]
    FileIO(String),
}

/// How the fallback chain reacts to a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Stop the chain and hand the error to the caller (user action needed).
    Propagate,
    /// Retry the same provider once, then move on.
    RetryOnce,
    /// Skip straight to the next provider.
    NextProvider,
}

impl CoreError {
    pub fn recovery(&self) -> Recovery {
        match self {
            CoreError::MissingCredential { .. } | CoreError::AuthExpired { .. } => {
                Recovery::Propagate
            }
            CoreError::Transient { .. } => Recovery::RetryOnce,
            _ => Recovery::NextProvider,
        }
    }

    /// True for errors that require the user to re-authenticate.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            CoreError::MissingCredential { .. } | CoreError::AuthExpired { .. }
        )
    }

    /// Name of the upstream provider this error originated from, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            CoreError::MissingCredential { provider }
            | CoreError::AuthExpired { provider }
            | CoreError::QuotaExceeded { provider, .. }
            | CoreError::Transient { provider, .. }
            | CoreError::MalformedResponse { provider, .. }
            | CoreError::Rejected { provider, .. }
            | CoreError::Normalization { provider, .. }
            | CoreError::Unsupported { provider, .. } => Some(provider),
            _ => None,
        }
    }

    pub(crate) fn normalization(provider: &str, message: impl Into<String>) -> Self {
        CoreError::Normalization {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn malformed(provider: &str, message: impl Into<String>) -> Self {
        CoreError::MalformedResponse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(provider: &str, operation: &str) -> Self {
        CoreError::Unsupported {
            provider: provider.to_string(),
            operation: operation.to_string(),
        }
    }
}

/// Strip query parameters from an error message so API keys embedded in
/// request URLs never reach logs.
pub fn sanitize_message(msg: &str) -> String {
    match msg.find('?') {
        Some(idx) => format!("{}?<query redacted>", &msg[..idx]),
        None => msg.to_string(),
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<aes_gcm::Error> for CoreError {
    fn from(_: aes_gcm::Error) -> Self {
        CoreError::Decryption
    }
}
