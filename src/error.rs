//! Error types for the Azure Resource Manager compute modules.
//!
//! Module functions never let these escape to the caller: every public
//! function catches at the narrowest point and degrades to an
//! `{"error": ...}` mapping or a boolean. The variants below exist for the
//! client and utility layers underneath.

use thiserror::Error;

/// Result type alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;

/// Errors raised by the ARM client and the shared utility layer.
#[derive(Error, Debug)]
pub enum CloudError {
    /// The requested resource does not exist (HTTP 404 or an ARM
    /// `ResourceNotFound`/`NotFound` error code).
    #[error("{0}")]
    ResourceNotFound(String),

    /// Any other non-success response from Azure Resource Manager.
    #[error("Azure error response ({status}): {message}")]
    HttpResponse {
        /// HTTP status code of the response
        status: u16,
        /// Message from the ARM error body, or the raw body when unparsable
        message: String,
    },

    /// A request object model could not be built from the given parameters,
    /// or a response body could not be decoded.
    #[error("{0}")]
    Serialization(String),

    /// Token acquisition failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport-level failure talking to Azure.
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Client factory or credential misconfiguration.
    #[error("{0}")]
    InvalidConfig(String),

    /// A function was invoked with the wrong arguments.
    #[error("Invalid invocation: {0}")]
    Invocation(String),
}

impl CloudError {
    /// Whether this error maps to a missing resource rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::ResourceNotFound(_))
    }
}
