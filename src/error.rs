use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured fault raised by the control plane.
///
/// `code` is the machine-readable reason (for example `VDI_NOT_IN_MAP`),
/// `params` are the positional arguments the platform attaches to it and
/// `detail` is the human-readable message. None of them are interpreted
/// or rewritten by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub detail: String,
}

impl Failure {
    pub const HOST_HAS_NO_MANAGEMENT_IP: &'static str = "HOST_HAS_NO_MANAGEMENT_IP";
    pub const HANDLE_INVALID: &'static str = "HANDLE_INVALID";

    pub fn new(code: impl Into<String>, params: Vec<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            params,
            detail: detail.into(),
        }
    }

    /// Platform-style description: the code followed by its parameters.
    pub fn error_description(&self) -> Vec<String> {
        std::iter::once(self.code.clone())
            .chain(self.params.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.error_description().join(" "))
        } else {
            write!(f, "{}", self.detail)
        }
    }
}

impl std::error::Error for Failure {}

/// Errors from the crate's ambient surfaces: configuration, inventories
/// and object lookups performed on behalf of a caller.
#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Inventory error: {0}")]
    InventoryError(String),

    #[error("Pool '{0}' not found")]
    PoolNotFound(String),

    #[error("{kind} '{reference}' not found")]
    ObjectNotFound {
        kind: &'static str,
        reference: String,
    },

    #[error("Check task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    SerdeError(String),
}

impl From<toml::de::Error> for PreflightError {
    fn from(err: toml::de::Error) -> Self {
        PreflightError::SerdeError(err.to_string())
    }
}

impl From<serde_json::Error> for PreflightError {
    fn from(err: serde_json::Error) -> Self {
        PreflightError::SerdeError(err.to_string())
    }
}
