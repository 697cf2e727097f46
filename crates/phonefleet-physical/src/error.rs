use phonefleet_provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhysicalError {
    #[error("デバイス '{0}' はプールに登録されていません")]
    DeviceNotRegistered(String),

    #[error("デバイス '{0}' は既に割り当て済みです")]
    DeviceInUse(String),

    #[error("空いている実機がありません ({total} 台すべて使用中)")]
    PoolExhausted { total: usize },

    #[error("デバイス '{0}' は割り当てられていません")]
    NotAllocated(String),

    #[error("シリアル '{0}' が重複しています")]
    DuplicateSerial(String),
}

pub type Result<T> = std::result::Result<T, PhysicalError>;

impl From<PhysicalError> for ProviderError {
    fn from(err: PhysicalError) -> Self {
        match err {
            PhysicalError::DuplicateSerial(_) => ProviderError::InvalidConfig(err.to_string()),
            // 他のデバイスが解放されれば成功しうる
            PhysicalError::PoolExhausted { .. } => {
                ProviderError::transient("PoolExhausted", err.to_string())
            }
            PhysicalError::DeviceNotRegistered(_) => {
                ProviderError::terminal("DeviceNotRegistered", err.to_string())
            }
            PhysicalError::DeviceInUse(_) => {
                ProviderError::terminal("DeviceInUse", err.to_string())
            }
            PhysicalError::NotAllocated(_) => {
                ProviderError::terminal("NotAllocated", err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonefleet_provider::ErrorKind;

    #[test]
    fn test_error_kinds() {
        let exhausted: ProviderError = PhysicalError::PoolExhausted { total: 2 }.into();
        assert_eq!(exhausted.kind(), ErrorKind::Transient);

        let in_use: ProviderError = PhysicalError::DeviceInUse("R58M".into()).into();
        assert_eq!(in_use.kind(), ErrorKind::Terminal);

        let dup: ProviderError = PhysicalError::DuplicateSerial("R58M".into()).into();
        assert_eq!(dup.kind(), ErrorKind::InvalidConfig);
    }
}
