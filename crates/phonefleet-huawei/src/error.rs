//! Huawei Cloud Phone provider error types

use phonefleet_provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HuaweiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CPH API error (HTTP {status}) [{code}]: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Invalid OBS path: {0}. Expected obs://bucket/path/to/object")]
    InvalidObsPath(String),

    #[error("Only tar archives can be pushed to a cloud phone: {0}")]
    UnsupportedArchive(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HuaweiError>;

/// CPH error codes that may succeed on a later attempt
pub fn is_transient_code(code: &str) -> bool {
    matches!(
        code,
        // API Gateway flow control
        "APIGW.0308" | "APIGW.0501" | "APIGW.0502" | "APIGW.0503"
            // CPH system busy / internal error
            | "CPS.0001" | "CPS.0011"
    ) || code.contains("Throttl")
}

impl From<HuaweiError> for ProviderError {
    fn from(err: HuaweiError) -> Self {
        match err {
            HuaweiError::Http(e) if e.is_timeout() => ProviderError::Timeout(e.to_string()),
            HuaweiError::Http(e) if e.is_decode() => {
                ProviderError::terminal("DecodeError", e.to_string())
            }
            HuaweiError::Http(e) => ProviderError::transient("NetworkError", e.to_string()),
            HuaweiError::Api {
                status,
                code,
                message,
                request_id,
            } => {
                if status == 429 || status >= 500 || is_transient_code(&code) {
                    ProviderError::Transient {
                        code,
                        message,
                        request_id,
                    }
                } else {
                    ProviderError::Terminal {
                        code,
                        message,
                        request_id,
                    }
                }
            }
            HuaweiError::InvalidConfig(msg) => ProviderError::InvalidConfig(msg),
            HuaweiError::JsonError(e) => ProviderError::terminal("InvalidResponse", e.to_string()),
            other => ProviderError::terminal("InvalidRequest", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonefleet_provider::ErrorKind;

    fn api(status: u16, code: &str) -> HuaweiError {
        HuaweiError::Api {
            status,
            code: code.to_string(),
            message: "m".to_string(),
            request_id: Some("r-1".to_string()),
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert_eq!(ProviderError::from(api(503, "CPS.9999")).kind(), ErrorKind::Transient);
        assert_eq!(ProviderError::from(api(429, "APIGW.0308")).kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_client_errors_are_terminal() {
        let err = ProviderError::from(api(404, "CPS.0004"));
        assert_eq!(err.kind(), ErrorKind::Terminal);
        assert_eq!(err.request_id(), Some("r-1"));
    }

    #[test]
    fn test_local_errors_are_terminal() {
        let err = ProviderError::from(HuaweiError::InvalidObsPath("bucket".into()));
        assert_eq!(err.kind(), ErrorKind::Terminal);
    }
}
