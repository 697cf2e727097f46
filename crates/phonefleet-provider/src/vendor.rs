//! Uniform envelope for vendor API answers

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};

/// Answer of a vendor API call
///
/// Transport failures never reach this type: clients return them as `Err`.
/// A `VendorResult` always means the vendor answered, successfully or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub request_id: Option<String>,
}

impl<T> VendorResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            error_message: None,
            request_id: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Convert into a provider result
    ///
    /// `is_transient` decides, from the vendor error code, whether the
    /// failure may succeed on a later attempt.
    pub fn into_result(self, is_transient: impl Fn(&str) -> bool) -> Result<Option<T>> {
        if self.success {
            return Ok(self.data);
        }

        let code = self.error_code.unwrap_or_else(|| "Unknown".to_string());
        let message = self
            .error_message
            .unwrap_or_else(|| "vendor returned no error message".to_string());
        if is_transient(&code) {
            Err(ProviderError::Transient {
                code,
                message,
                request_id: self.request_id,
            })
        } else {
            Err(ProviderError::Terminal {
                code,
                message,
                request_id: self.request_id,
            })
        }
    }

    /// Like [`VendorResult::into_result`], treating a missing payload as an error
    pub fn into_data(self, is_transient: impl Fn(&str) -> bool) -> Result<T> {
        let request_id = self.request_id.clone();
        self.into_result(is_transient)?
            .ok_or_else(|| ProviderError::Terminal {
                code: "EmptyResponse".to_string(),
                message: "vendor reported success without data".to_string(),
                request_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttling(code: &str) -> bool {
        code == "Throttling"
    }

    #[test]
    fn test_success_yields_data() {
        let result = VendorResult::ok(7).into_data(throttling);
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_failure_is_classified() {
        let transient = VendorResult::<()>::failed("Throttling", "slow down")
            .with_request_id(Some("req-1".into()))
            .into_result(throttling)
            .unwrap_err();
        assert_eq!(
            transient,
            ProviderError::Transient {
                code: "Throttling".into(),
                message: "slow down".into(),
                request_id: Some("req-1".into()),
            }
        );

        let terminal = VendorResult::<()>::failed("InstanceNotFound", "gone")
            .into_result(throttling)
            .unwrap_err();
        assert!(matches!(terminal, ProviderError::Terminal { .. }));
    }

    #[test]
    fn test_success_without_data() {
        let empty = VendorResult::<u32> {
            success: true,
            data: None,
            error_code: None,
            error_message: None,
            request_id: Some("req-2".into()),
        };
        let err = empty.into_data(throttling).unwrap_err();
        assert_eq!(err.request_id(), Some("req-2"));
    }
}
