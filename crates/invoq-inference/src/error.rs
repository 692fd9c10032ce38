//! Provider error classification shared by the HTTP backends.

use invoq_core::Error;

/// Provider error categories derived from an HTTP error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorCode {
    /// Invalid or missing credentials.
    AuthenticationError,
    /// Rate limit or quota exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large for the model context.
    ContextLengthExceeded,
    /// Server-side failure.
    ServerError,
    Unknown,
}

impl ProviderErrorCode {
    /// Determine error code from HTTP status and the provider's error type
    /// (`invalid_api_key`, `RESOURCE_EXHAUSTED`, ...).
    pub fn from_response(status: u16, error_type: &str) -> Self {
        let error_type = error_type.to_lowercase();
        match (status, error_type.as_str()) {
            (401, _) | (403, _) | (_, "unauthenticated") | (_, "permission_denied") => {
                Self::AuthenticationError
            }
            (429, _) | (_, "resource_exhausted") => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, t) if t.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Convert a provider error to an invoq [`Error`].
///
/// Credential and model problems are configuration errors; everything else is
/// a transient inference failure.
pub fn to_invoq_error(provider: &str, code: ProviderErrorCode, message: &str) -> Error {
    match code {
        ProviderErrorCode::AuthenticationError => {
            Error::Config(format!("{} authentication failed: {}", provider, message))
        }
        ProviderErrorCode::ModelNotFound => {
            Error::Config(format!("{} model not found: {}", provider, message))
        }
        ProviderErrorCode::RateLimitExceeded => {
            Error::Inference(format!("{} rate limit exceeded: {}", provider, message))
        }
        ProviderErrorCode::ContextLengthExceeded => {
            Error::Inference(format!("{} context too long: {}", provider, message))
        }
        ProviderErrorCode::ServerError => {
            Error::Inference(format!("{} server error: {}", provider, message))
        }
        ProviderErrorCode::Unknown => Error::Inference(format!("{}: {}", provider, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_status() {
        assert_eq!(
            ProviderErrorCode::from_response(401, "invalid_api_key"),
            ProviderErrorCode::AuthenticationError
        );
        assert_eq!(
            ProviderErrorCode::from_response(429, "rate_limit_exceeded"),
            ProviderErrorCode::RateLimitExceeded
        );
        assert_eq!(
            ProviderErrorCode::from_response(404, "model_not_found"),
            ProviderErrorCode::ModelNotFound
        );
        assert_eq!(
            ProviderErrorCode::from_response(502, "bad_gateway"),
            ProviderErrorCode::ServerError
        );
        assert_eq!(
            ProviderErrorCode::from_response(418, "im_a_teapot"),
            ProviderErrorCode::Unknown
        );
    }

    #[test]
    fn test_error_code_from_gemini_status() {
        assert_eq!(
            ProviderErrorCode::from_response(400, "RESOURCE_EXHAUSTED"),
            ProviderErrorCode::RateLimitExceeded
        );
        assert_eq!(
            ProviderErrorCode::from_response(400, "PERMISSION_DENIED"),
            ProviderErrorCode::AuthenticationError
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ProviderErrorCode::RateLimitExceeded.is_retryable());
        assert!(ProviderErrorCode::ServerError.is_retryable());
        assert!(!ProviderErrorCode::AuthenticationError.is_retryable());
        assert!(!ProviderErrorCode::ModelNotFound.is_retryable());
    }

    #[test]
    fn test_to_invoq_error() {
        let err = to_invoq_error("Gemini", ProviderErrorCode::AuthenticationError, "bad key");
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Gemini authentication failed"));

        let err = to_invoq_error("OpenAI", ProviderErrorCode::ServerError, "boom");
        assert!(matches!(err, Error::Inference(_)));
        assert!(err.is_retryable());
    }
}
