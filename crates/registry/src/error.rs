//! Error types for registry calls

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors returned by [`Registry`](crate::Registry) implementations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// HTTP client could not be built
    #[error("failed to initialize registry client: {0}")]
    Init(String),

    /// Request did not complete (connection refused, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry answered with an unexpected status
    #[error("unexpected status {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// Response body did not match the expected shape
    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    /// A `next` link repeated an earlier page or the page limit was hit
    #[error("pagination did not terminate at {url}")]
    Pagination { url: String },

    /// No agent credentials yet
    #[error("agent credentials are not set")]
    MissingCredentials,
}

impl RegistryError {
    pub(crate) fn status(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    /// Status code, if the registry answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The entity does not exist on the registry
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// The registry refused the payload; retrying the same request is pointless
    pub fn is_rejected(&self) -> bool {
        self.status_code() == Some(400)
    }

    /// Worth retrying on a later tick
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let not_found = RegistryError::status(404, "/v1/service/1/", "");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_transient());

        let rejected = RegistryError::status(400, "/v1/metric/", "{\"label\": [\"invalid\"]}");
        assert!(rejected.is_rejected());
        assert!(!rejected.is_transient());

        assert!(RegistryError::status(503, "/v1/metric/", "").is_transient());
        assert!(RegistryError::status(429, "/v1/metric/", "").is_transient());
        assert!(!RegistryError::MissingCredentials.is_transient());
    }

    #[test]
    fn test_display() {
        let err = RegistryError::status(500, "https://api/v1/agent/", "oops");
        assert_eq!(
            err.to_string(),
            "unexpected status 500 from https://api/v1/agent/: oops"
        );
    }
}
