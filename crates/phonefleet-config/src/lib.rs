pub mod error;
pub mod model;
pub mod parser;

pub use error::*;
pub use model::*;
pub use parser::{parse_config, resolve_secret};

use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "PHONEFLEET_CONFIG";

const CANDIDATES: [&str; 4] = [
    "phonefleet.local.kdl",
    ".phonefleet.local.kdl",
    "phonefleet.kdl",
    ".phonefleet.kdl",
];

/// プロジェクトの phonefleet.kdl ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 PHONEFLEET_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: phonefleet.local.kdl, .phonefleet.local.kdl, phonefleet.kdl, .phonefleet.kdl
/// 3. ./.phonefleet/ ディレクトリ内: 同様の順序
/// 4. ~/.config/phonefleet/phonefleet.kdl (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定（存在しなければエラー）
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(&config_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::ConfigPathMissing(config_path));
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    if let Some(path) = find_in(&current_dir) {
        return Ok(path);
    }

    // 3. ./.phonefleet/ ディレクトリで検索
    let project_dir = current_dir.join(".phonefleet");
    if project_dir.is_dir()
        && let Some(path) = find_in(&project_dir)
    {
        return Ok(path);
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("phonefleet").join("phonefleet.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Read and parse a configuration file
pub fn load_config(path: &Path) -> Result<FleetConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::debug!(
        path = %path.display(),
        providers = config.providers.len(),
        "Loaded configuration"
    );
    Ok(config)
}

/// Discover and load the configuration
pub fn load() -> Result<(PathBuf, FleetConfig)> {
    let path = find_config_file()?;
    let config = load_config(&path)?;
    Ok((path, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("phonefleet.kdl"), "// test").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("phonefleet.kdl"));
    }

    #[test]
    #[serial]
    fn test_local_file_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("phonefleet.kdl"), "// shared").unwrap();
        fs::write(temp_dir.path().join(".phonefleet.local.kdl"), "// local").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        // 隠しファイルでも .local が優先される
        assert!(result.unwrap().ends_with(".phonefleet.local.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let project_dir = temp_dir.path().join(".phonefleet");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("phonefleet.kdl"), "// in project dir").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".phonefleet/phonefleet.kdl"));
    }

    #[test]
    #[serial]
    fn test_env_var_takes_precedence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.kdl");
        fs::write(&config_path, "store \"./x.json\"").unwrap();

        unsafe {
            std::env::set_var(CONFIG_ENV, config_path.to_str().unwrap());
        }
        let found = find_config_file();
        let loaded = load();
        unsafe {
            std::env::remove_var(CONFIG_ENV);
        }

        assert_eq!(found.unwrap(), config_path);
        let (path, config) = loaded.unwrap();
        assert_eq!(path, config_path);
        assert_eq!(config.store, PathBuf::from("./x.json"));
    }

    #[test]
    #[serial]
    fn test_env_var_pointing_nowhere() {
        unsafe {
            std::env::set_var(CONFIG_ENV, "/nonexistent/phonefleet.kdl");
        }
        let result = find_config_file();
        unsafe {
            std::env::remove_var(CONFIG_ENV);
        }
        assert!(matches!(result, Err(ConfigError::ConfigPathMissing(_))));
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.kdl");
        fs::write(&path, "sync {").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::KdlParse(_))));
    }
}
