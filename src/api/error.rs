//! Errors returned by lock API clients.

/// Lock API error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Token rejected (HTTP 401/403)
    Authentication(String),
    /// Transport failure, timeout or upstream outage
    Connectivity(String),
    /// The account has no (matching) smart locks
    NoLocksFound,
    /// Response body did not have the expected shape
    MalformedResponse(String),
    /// Any other non-success response
    Api { status: u16, message: String },
}

impl ApiError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => ApiError::Authentication(format!(
                "invalid API token, check your Nuki Web API token ({message})"
            )),
            403 => ApiError::Authentication(format!(
                "API access forbidden, check token permissions ({message})"
            )),
            500..=599 => ApiError::Connectivity(format!("upstream error {status}: {message}")),
            _ => ApiError::Api { status, message },
        }
    }

    /// Whether a later tick may succeed without reconfiguration.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Connectivity(_) | ApiError::MalformedResponse(_)
        )
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Authentication(msg) => write!(f, "Authentication error: {msg}"),
            ApiError::Connectivity(msg) => write!(f, "Connectivity error: {msg}"),
            ApiError::NoLocksFound => write!(f, "No smart locks found on this account"),
            ApiError::MalformedResponse(msg) => write!(f, "Malformed API response: {msg}"),
            ApiError::Api { status, message } => write!(f, "API error ({status}): {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ApiError::from_status(401, "nope"),
            ApiError::Authentication(_)
        ));
        assert!(matches!(
            ApiError::from_status(403, "nope"),
            ApiError::Authentication(_)
        ));
        assert!(ApiError::from_status(503, "down").is_transient());
        assert_eq!(
            ApiError::from_status(404, "missing"),
            ApiError::Api {
                status: 404,
                message: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_error_display() {
        let display = format!("{}", ApiError::Connectivity("timeout".to_string()));
        assert!(display.contains("timeout"));
        assert!(!ApiError::NoLocksFound.is_transient());
    }
}
