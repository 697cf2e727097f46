use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: phonefleet.local.kdl, .phonefleet.local.kdl, phonefleet.kdl, .phonefleet.kdl\n\
        - ./.phonefleet/ ディレクトリ\n\
        - ~/.config/phonefleet/phonefleet.kdl\n\
        または PHONEFLEET_CONFIG 環境変数で直接指定できます"
    )]
    ConfigFileNotFound,

    #[error("PHONEFLEET_CONFIG が指すファイルが存在しません: {0}")]
    ConfigPathMissing(String),

    #[error("KDL パースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("設定エラー: {0}")]
    Invalid(String),

    #[error("不明なプロバイダ: {0}")]
    UnknownProvider(String),

    #[error("環境変数 {var} が設定されていません")]
    MissingEnv { var: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
