#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {status} - {body}")]
    HttpError { status: u16, body: String },

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Rate limited. Retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("No API key configured for provider '{0}'")]
    MissingApiKey(String),

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),
}

impl ProviderError {
    pub fn from_http(status: u16, body: String, retry_after: Option<&str>) -> Self {
        if status == 429 {
            let retry_after_ms = retry_after
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(10_000);
            ProviderError::RateLimited { retry_after_ms }
        } else {
            ProviderError::HttpError { status, body }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_maps_retry_after() {
        match ProviderError::from_http(429, String::new(), Some("3")) {
            ProviderError::RateLimited { retry_after_ms } => assert_eq!(retry_after_ms, 3000),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn non_429_is_http_error() {
        match ProviderError::from_http(500, "boom".into(), None) {
            ProviderError::HttpError { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
