//! Error types for Modelmux

use thiserror::Error;

/// Result type alias using Modelmux's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Modelmux error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Execution errors (E100-E199)
    #[error("Provider execution failed for '{model}': {message}")]
    ProviderExecution { model: String, message: String },

    #[error("All {attempted} candidate models failed for task type '{task_type}'")]
    AllCandidatesFailed {
        task_type: String,
        attempted: usize,
        failures: Vec<String>,
    },

    #[error("No adapter registered for provider '{0}'. Set its API key or enable it in the registry.")]
    ProviderNotConfigured(String),

    #[error("Provider '{provider}' does not support {operation}")]
    UnsupportedOperation { provider: String, operation: String },

    #[error("Provider request timed out after {0} ms")]
    Timeout(u64),

    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Provider API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderExecution { .. } => "E100",
            Self::AllCandidatesFailed { .. } => "E101",
            Self::ProviderNotConfigured(_) => "E102",
            Self::UnsupportedOperation { .. } => "E103",
            Self::Timeout(_) => "E104",
            Self::NetworkError(_) => "E105",
            Self::ApiError { .. } => "E106",
            Self::InvalidResponse(_) => "E107",
            Self::DatabaseError(_) => "E400",
            Self::Serialization(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ProviderNotConfigured(provider) => Some(format!(
                "export {}_API_KEY=... or `modelmux registry disable {}`",
                provider.to_uppercase(),
                provider
            )),
            Self::AllCandidatesFailed { .. } => Some("modelmux registry show".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::ConfigError(_) => Some("modelmux config list".to_string()),
            _ => None,
        }
    }

    /// Whether this error is one of the two failures a routed call may surface
    pub fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            Self::ProviderExecution { .. } | Self::AllCandidatesFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::ProviderExecution {
            model: "openai:gpt-4".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.code(), "E100");
        assert!(err.is_routing_failure());

        let err = Error::AllCandidatesFailed {
            task_type: "embedding".to_string(),
            attempted: 3,
            failures: vec![],
        };
        assert_eq!(err.code(), "E101");
        assert!(err.to_string().contains("All 3 candidate models failed"));

        assert!(!Error::Timeout(10).is_routing_failure());
    }

    #[test]
    fn test_suggestion_for_missing_provider() {
        let err = Error::ProviderNotConfigured("anthropic".to_string());
        let suggestion = err.suggestion().unwrap();
        assert!(suggestion.contains("ANTHROPIC_API_KEY"));
    }
}
