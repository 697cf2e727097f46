//! Aliyun ECP provider error types

use phonefleet_provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AliyunError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ECP API error (HTTP {status}) [{code}]: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Instance group not found for instance: {0}")]
    InstanceGroupNotFound(String),

    #[error("Command {invoke_id} did not finish within {timeout_secs}s")]
    CommandTimeout { invoke_id: String, timeout_secs: u32 },

    #[error("Command failed on {instance_id}: {output}")]
    CommandFailed { instance_id: String, output: String },

    #[error("Invalid OSS path: {0}. Expected oss://bucket/path")]
    InvalidOssPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AliyunError>;

/// ECP error codes that may succeed on a later attempt
pub fn is_transient_code(code: &str) -> bool {
    code.starts_with("Throttling")
        || matches!(
            code,
            "ServiceUnavailable" | "InternalError" | "OperationConflict" | "IncorrectInstanceStatus.Busy"
        )
}

impl From<AliyunError> for ProviderError {
    fn from(err: AliyunError) -> Self {
        match err {
            AliyunError::Http(e) if e.is_timeout() => ProviderError::Timeout(e.to_string()),
            AliyunError::Http(e) if e.is_decode() => {
                ProviderError::terminal("DecodeError", e.to_string())
            }
            AliyunError::Http(e) => ProviderError::transient("NetworkError", e.to_string()),
            AliyunError::Api {
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
            AliyunError::CommandTimeout { .. } => ProviderError::Timeout(err.to_string()),
            AliyunError::InvalidConfig(msg) => ProviderError::InvalidConfig(msg),
            AliyunError::JsonError(e) => ProviderError::terminal("InvalidResponse", e.to_string()),
            other => ProviderError::terminal("InvalidRequest", other.to_string()),
        }
    }
}
