//! Error types for the OCI cloud provider

use std::fmt;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Service error codes OCI returns when a capacity pool is exhausted.
const INSUFFICIENT_CAPACITY_CODES: &[&str] = &["LimitExceeded", "QuotaExceeded"];
const OUT_OF_HOST_CAPACITY: &str = "out of host capacity";

/// Errors that can occur during provider operations
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// No launchable capacity: instance type, zone or subnet
    InsufficientCapacity(String),
    /// Resource vanished between resolution and use
    NotFound(String),
    /// OCI API error, propagated unmodified
    Api {
        status: u16,
        code: String,
        message: String,
    },
    /// Configuration error
    Configuration(String),
    /// HTTP transport error
    Http(String),
    /// Serialization error
    Serialization(String),
    /// Kubernetes API error
    KubeApi(String),
}

impl ProviderError {
    /// Build an API error from a response status and an OCI error body.
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// True when the error means the requested capacity pool is exhausted.
    pub fn is_insufficient_capacity(&self) -> bool {
        match self {
            ProviderError::InsufficientCapacity(_) => true,
            ProviderError::Api { code, message, .. } => {
                INSUFFICIENT_CAPACITY_CODES.contains(&code.as_str())
                    || message.to_lowercase().contains(OUT_OF_HOST_CAPACITY)
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::NotFound(_) => true,
            ProviderError::Api { status, code, .. } => *status == 404 || code == "NotAuthorizedOrNotFound",
            _ => false,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::InsufficientCapacity(msg) => write!(f, "Insufficient capacity: {}", msg),
            ProviderError::NotFound(msg) => write!(f, "Resource not found: {}", msg),
            ProviderError::Api {
                status,
                code,
                message,
            } => write!(f, "OCI API error {} ({}): {}", status, code, message),
            ProviderError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ProviderError::Http(msg) => write!(f, "HTTP error: {}", msg),
            ProviderError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ProviderError::KubeApi(msg) => write!(f, "Kubernetes API error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<kube::Error> for ProviderError {
    fn from(err: kube::Error) -> Self {
        ProviderError::KubeApi(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::InsufficientCapacity("no offerings".to_string());
        assert!(err.to_string().contains("Insufficient capacity"));

        let err = ProviderError::api(500, "InternalError", "Out of host capacity.");
        assert_eq!(
            err.to_string(),
            "OCI API error 500 (InternalError): Out of host capacity."
        );
    }

    #[test]
    fn test_insufficient_capacity_classification() {
        assert!(ProviderError::api(500, "InternalError", "Out of host capacity.").is_insufficient_capacity());
        assert!(ProviderError::api(400, "LimitExceeded", "limit").is_insufficient_capacity());
        assert!(ProviderError::InsufficientCapacity("x".into()).is_insufficient_capacity());

        assert!(!ProviderError::api(429, "TooManyRequests", "slow down").is_insufficient_capacity());
        assert!(!ProviderError::api(500, "InternalError", "boom").is_insufficient_capacity());
        assert!(!ProviderError::Http("reset".into()).is_insufficient_capacity());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ProviderError::NotFound("instance".into()).is_not_found());
        assert!(ProviderError::api(404, "NotAuthorizedOrNotFound", "gone").is_not_found());
        assert!(!ProviderError::api(409, "Conflict", "busy").is_not_found());
    }
}
