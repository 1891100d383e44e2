//! incusflow の接続設定
//!
//! YAML の設定ファイルを探索し、既定値の上に再帰マージして [`Settings`] を返す。

pub mod error;
pub mod merge;
pub mod settings;

pub use error::*;
pub use merge::deep_merge;
pub use settings::{Connection, DEFAULT_SOCKET, Settings, Timeouts, Verify};

use std::path::{Path, PathBuf};

/// 設定ファイルを直接指定する環境変数
pub const CONFIG_ENV: &str = "INCUSFLOW_CONFIG";

/// incusflow のグローバル設定ディレクトリ (~/.config/incusflow)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("incusflow"))
}

/// 設定ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 INCUSFLOW_CONFIG (直接パス指定、存在しなければエラー)
/// 2. カレントディレクトリ: incusflow.local.yaml, incusflow.yaml
/// 3. ./.incusflow/config.yaml
/// 4. ~/.config/incusflow/config.yaml (グローバル設定)
///
/// どれも無い場合は `Ok(None)`（既定値で動作する）。
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::NotFound(path));
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in ["incusflow.local.yaml", "incusflow.yaml"] {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // 3. ./.incusflow/ ディレクトリで検索
    let local = current_dir.join(".incusflow").join("config.yaml");
    if local.exists() {
        return Ok(Some(local));
    }

    // 4. グローバル設定ファイル
    if let Some(dir) = config_dir() {
        let global = dir.join("config.yaml");
        if global.exists() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

/// 設定ファイルを探索してロードする（見つからなければ既定値）
pub fn load() -> Result<Settings> {
    match find_config_file()? {
        Some(path) => load_from(&path),
        None => {
            tracing::debug!("設定ファイルが無いため既定値を使用します");
            Ok(Settings::default())
        }
    }
}

/// 指定パスの設定ファイルをロードする
pub fn load_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    tracing::debug!("設定ファイルを読み込み: {}", path.display());

    let content = std::fs::read_to_string(path)?;
    let overlay: serde_json::Value =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    build(overlay)
}

/// YAML 文字列から設定を組み立てる
pub fn from_yaml_str(content: &str) -> Result<Settings> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    let overlay: serde_json::Value = serde_yaml::from_str(content)?;
    build(overlay)
}

fn build(overlay: serde_json::Value) -> Result<Settings> {
    let mut merged = serde_json::to_value(Settings::default())?;
    if !overlay.is_null() {
        deep_merge(&mut merged, overlay);
    }

    let mut settings: Settings = serde_json::from_value(merged)?;
    settings.expand_paths();
    settings.validate()?;
    Ok(settings)
}
