//! Device provider error types

use crate::types::ProviderType;
use thiserror::Error;

/// Device provider errors
///
/// Resilience primitives only ever produce [`ProviderError::Transient`],
/// [`ProviderError::Timeout`] and [`ProviderError::RateLimitTimeout`].
/// Adapters are responsible for classifying raw vendor answers into
/// transient vs terminal before returning them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider not registered: {0}")]
    NotRegistered(ProviderType),

    #[error("Operation '{operation}' is not supported by provider {provider}")]
    NotSupported {
        provider: ProviderType,
        operation: &'static str,
    },

    #[error("Transient vendor error [{code}]: {message}")]
    Transient {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Vendor error [{code}]: {message}")]
    Terminal {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error(
        "Rate limit wait for '{key}' exceeds timeout: requires {required_ms}ms, timeout is {timeout_ms}ms"
    )]
    RateLimitTimeout {
        key: String,
        required_ms: u64,
        timeout_ms: u64,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Classification of a [`ProviderError`], used by retry allow-lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotRegistered,
    NotSupported,
    Transient,
    Terminal,
    RateLimited,
    Timeout,
    InvalidConfig,
    Backend,
}

impl ProviderError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn terminal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Terminal {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn not_supported(provider: ProviderType, operation: &'static str) -> Self {
        Self::NotSupported {
            provider,
            operation,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotRegistered(_) => ErrorKind::NotRegistered,
            ProviderError::NotSupported { .. } => ErrorKind::NotSupported,
            ProviderError::Transient { .. } => ErrorKind::Transient,
            ProviderError::Terminal { .. } => ErrorKind::Terminal,
            ProviderError::RateLimitTimeout { .. } => ErrorKind::RateLimited,
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ProviderError::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Vendor request id, when the vendor returned one
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ProviderError::Transient { request_id, .. }
            | ProviderError::Terminal { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ProviderError::transient("Throttling", "slow down").kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ProviderError::terminal("InstanceNotFound", "gone").kind(),
            ErrorKind::Terminal
        );
        assert_eq!(
            ProviderError::not_supported(ProviderType::HuaweiCph, "snapshot").kind(),
            ErrorKind::NotSupported
        );
        assert_eq!(
            ProviderError::NotRegistered(ProviderType::Physical).kind(),
            ErrorKind::NotRegistered
        );
    }

    #[test]
    fn test_display_contains_context() {
        let err = ProviderError::RateLimitTimeout {
            key: "aliyun-api".to_string(),
            required_ms: 1000,
            timeout_ms: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("aliyun-api"));
        assert!(msg.contains("1000ms"));
    }
}
