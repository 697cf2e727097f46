use phonefleet_provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedroidError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • docker-host の設定を確認してください"
    )]
    DockerConnectionFailed(String),

    #[error("コンテナ '{container}' が見つかりません")]
    ContainerNotFound { container: String },

    #[error(
        "イメージ '{image}' が見つかりません\n\nヒント:\n  • docker pull {image} でイメージをダウンロードしてください"
    )]
    ImageNotFound { image: String },

    #[error("ポート範囲 {start}-{end} に空きがありません")]
    PortRangeExhausted { start: u16, end: u16 },

    #[error("コンテナ '{container}' に ADB ポートのバインドがありません")]
    MissingAdbPort { container: String },

    #[error("ADB が {timeout_secs} 秒以内に応答しませんでした: {serial}")]
    AdbNotReady { serial: String, timeout_secs: u64 },

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error("設定エラー: {0}")]
    ConfigError(String),
}

impl From<bollard::errors::Error> for RedroidError {
    fn from(err: bollard::errors::Error) -> Self {
        let err_str = err.to_string();
        if err_str.contains("Connection refused") || err_str.contains("No such file or directory")
        {
            RedroidError::DockerConnectionFailed(err_str)
        } else {
            RedroidError::DockerApiError(err_str)
        }
    }
}

pub type Result<T> = std::result::Result<T, RedroidError>;

/// Map a Docker API failure for `container` onto a redroid error
pub(crate) fn docker_error(container: &str, err: bollard::errors::Error) -> RedroidError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RedroidError::ContainerNotFound {
            container: container.to_string(),
        },
        other => other.into(),
    }
}

impl From<RedroidError> for ProviderError {
    fn from(err: RedroidError) -> Self {
        match err {
            RedroidError::DockerConnectionFailed(msg) => {
                ProviderError::transient("DockerUnavailable", msg)
            }
            RedroidError::ContainerNotFound { .. } => {
                ProviderError::terminal("ContainerNotFound", err.to_string())
            }
            RedroidError::ImageNotFound { .. } => {
                ProviderError::terminal("ImageNotFound", err.to_string())
            }
            RedroidError::PortRangeExhausted { .. } => {
                ProviderError::terminal("PortRangeExhausted", err.to_string())
            }
            RedroidError::MissingAdbPort { .. } => {
                ProviderError::terminal("MissingAdbPort", err.to_string())
            }
            RedroidError::AdbNotReady { .. } => ProviderError::Timeout(err.to_string()),
            RedroidError::DockerApiError(msg) => ProviderError::Backend(msg),
            RedroidError::ConfigError(msg) => ProviderError::InvalidConfig(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonefleet_provider::ErrorKind;

    #[test]
    fn test_not_found_maps_to_container() {
        let err = docker_error(
            "phonefleet-redroid-1",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "No such container".into(),
            },
        );
        assert!(matches!(err, RedroidError::ContainerNotFound { .. }));
        assert_eq!(ProviderError::from(err).kind(), ErrorKind::Terminal);
    }

    #[test]
    fn test_conflict_is_backend_error() {
        let err = docker_error(
            "phonefleet-redroid-1",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message: "Conflict".into(),
            },
        );
        assert_eq!(ProviderError::from(err).kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_port_exhaustion_message() {
        let err = RedroidError::PortRangeExhausted {
            start: 5555,
            end: 5556,
        };
        assert!(err.to_string().contains("5555-5556"));
    }
}
