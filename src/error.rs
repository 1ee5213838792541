//! Error types for the LUN reconciler
//!
//! Provides structured error types for parameter validation, the legacy ZAPI
//! gateway, the REST application gateway and the local plumbing around them.

use thiserror::Error;

/// ZAPI errno reported by `lun-resize` when the requested size rounds to the
/// size the LUN already has.
pub const ZAPI_ERRNO_LUN_SIZE_UNCHANGED: &str = "9042";

/// Unified error type for the reconciler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("{0}")]
    Validation(String),

    #[error("{parameter} is a required parameter for {action}.")]
    MissingParameter { parameter: String, action: String },

    #[error("Error renaming lun: {name} does not exist")]
    RenameSourceMissing { name: String },

    #[error("Error renaming lun: {name} does not match lun_path {path}")]
    RenamePathMismatch { name: String, path: String },

    #[error("option {attribute} cannot be modified to {value}")]
    UnsupportedAttribute { attribute: String, value: String },

    #[error("Unsupported size unit: {0}")]
    UnsupportedUnit(String),

    #[error("Size overflow: {size} {unit} does not fit in 64-bit bytes")]
    SizeOverflow { size: u64, unit: String },

    // =========================================================================
    // Legacy Gateway (ZAPI) Errors
    // =========================================================================
    #[error("ZAPI {command} failed: errno {code}: {message}")]
    Zapi {
        command: String,
        code: String,
        message: String,
    },

    #[error("ZAPI response parse error: {0}")]
    ZapiParse(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    // =========================================================================
    // REST Gateway Errors
    // =========================================================================
    #[error("REST {method} {endpoint} failed with status {status}: {message}")]
    Rest {
        method: String,
        endpoint: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("REST response parse error: {0}")]
    RestResponseParse(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Remote Operation Context
    // =========================================================================
    /// A failed mutating call, with the operation and target it was applied to.
    #[error("Error {operation} {target}: {source}")]
    RemoteOperation {
        operation: String,
        target: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an error, used by the host-facing result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any mutating remote call
    Validation,
    /// Reported by, or on the way to, a remote gateway
    RemoteProtocol,
    /// Local failure (configuration, IO, parsing of local input)
    Internal,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_)
            | Error::MissingParameter { .. }
            | Error::RenameSourceMissing { .. }
            | Error::RenamePathMismatch { .. }
            | Error::UnsupportedAttribute { .. }
            | Error::UnsupportedUnit(_)
            | Error::SizeOverflow { .. } => ErrorClass::Validation,

            Error::Zapi { .. }
            | Error::ZapiParse(_)
            | Error::Xml(_)
            | Error::Rest { .. }
            | Error::RestResponseParse(_)
            | Error::Http(_)
            | Error::RemoteOperation { .. } => ErrorClass::RemoteProtocol,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_)
            | Error::Io(_) => ErrorClass::Internal,
        }
    }

    /// Check if this error was raised by validation
    pub fn is_validation(&self) -> bool {
        self.class() == ErrorClass::Validation
    }

    /// Check if this error came from a remote gateway
    pub fn is_remote(&self) -> bool {
        self.class() == ErrorClass::RemoteProtocol
    }

    /// Backend-supplied error code, if any
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Error::Zapi { code, .. } => Some(code),
            Error::Rest { code, .. } => code.as_deref(),
            Error::RemoteOperation { source, .. } => source.remote_code(),
            _ => None,
        }
    }

    /// Check if this is the `lun-resize` "size unchanged" answer
    pub fn is_size_unchanged(&self) -> bool {
        self.remote_code() == Some(ZAPI_ERRNO_LUN_SIZE_UNCHANGED)
    }

    /// Attach the failing operation and target to a remote error
    pub fn during(self, operation: impl Into<String>, target: impl Into<String>) -> Self {
        Error::RemoteOperation {
            operation: operation.into(),
            target: target.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for the reconciler
pub type Result<T> = std::result::Result<T, Error>;
