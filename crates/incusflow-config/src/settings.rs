//! 接続設定の型定義

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Incus のローカルソケットの既定パス
pub const DEFAULT_SOCKET: &str = "/var/lib/incus/unix.socket";

/// incusflow 全体の設定
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub connection: Connection,
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// コントロールプレーンへの接続方法
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Connection {
    /// ローカルの Unix ドメインソケット
    Unix { socket: PathBuf },
    /// リモートの HTTPS エンドポイント
    Https {
        url: String,
        /// クライアント証明書 (PEM)
        #[serde(default)]
        cert: Option<PathBuf>,
        /// クライアント秘密鍵 (PEM)
        #[serde(default)]
        key: Option<PathBuf>,
        #[serde(default)]
        verify: Verify,
    },
}

impl Default for Connection {
    fn default() -> Self {
        Connection::Unix {
            socket: PathBuf::from(DEFAULT_SOCKET),
        }
    }
}

/// サーバー証明書の検証モード
///
/// YAML では `verify: false` または `verify: /path/to/ca.pem` と書く。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Verify {
    Enabled(bool),
    CaBundle(PathBuf),
}

impl Default for Verify {
    fn default() -> Self {
        Verify::Enabled(true)
    }
}

/// タイムアウト設定（秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    /// 1リクエストあたりのタイムアウト
    #[serde(rename = "request", default = "default_request_secs")]
    pub request_secs: u64,
    /// 非同期オペレーション待機の上限
    #[serde(rename = "operation", default = "default_operation_secs")]
    pub operation_secs: u64,
    /// オペレーションのポーリング間隔
    #[serde(rename = "poll_interval", default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_request_secs() -> u64 {
    30
}

fn default_operation_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    1
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_secs: default_request_secs(),
            operation_secs: default_operation_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Timeouts {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_secs(self.operation_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Settings {
    /// 設定値の整合性を検証
    pub fn validate(&self) -> Result<()> {
        match &self.connection {
            Connection::Unix { socket } => {
                if socket.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "connection.socket が空です".to_string(),
                    ));
                }
            }
            Connection::Https { url, cert, key, .. } => {
                if !url.starts_with("https://") {
                    return Err(ConfigError::Invalid(format!(
                        "connection.url は https:// で始まる必要があります: {}",
                        url
                    )));
                }
                if cert.is_some() != key.is_some() {
                    return Err(ConfigError::Invalid(
                        "connection.cert と connection.key は両方指定してください".to_string(),
                    ));
                }
            }
        }

        if self.timeouts.request_secs == 0
            || self.timeouts.operation_secs == 0
            || self.timeouts.poll_interval_secs == 0
        {
            return Err(ConfigError::Invalid(
                "timeouts には 1 以上の秒数を指定してください".to_string(),
            ));
        }

        Ok(())
    }

    /// パス中の `~/` をホームディレクトリに展開
    pub(crate) fn expand_paths(&mut self) {
        match &mut self.connection {
            Connection::Unix { socket } => *socket = expand_home(socket),
            Connection::Https {
                cert, key, verify, ..
            } => {
                if let Some(cert) = cert {
                    *cert = expand_home(cert);
                }
                if let Some(key) = key {
                    *key = expand_home(key);
                }
                if let Verify::CaBundle(ca) = verify {
                    *ca = expand_home(ca);
                }
            }
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_local_socket() {
        let settings = Settings::default();
        assert_eq!(
            settings.connection,
            Connection::Unix {
                socket: PathBuf::from(DEFAULT_SOCKET)
            }
        );
        assert_eq!(settings.timeouts.request(), Duration::from_secs(30));
        assert_eq!(settings.timeouts.operation(), Duration::from_secs(300));
        assert_eq!(settings.timeouts.poll_interval(), Duration::from_secs(1));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_verify_accepts_bool_or_path() {
        let v: Verify = serde_yaml::from_str("false").unwrap();
        assert_eq!(v, Verify::Enabled(false));

        let v: Verify = serde_yaml::from_str("/etc/ssl/incus-ca.pem").unwrap();
        assert_eq!(v, Verify::CaBundle(PathBuf::from("/etc/ssl/incus-ca.pem")));
    }

    #[test]
    fn test_https_requires_https_scheme() {
        let settings = Settings {
            connection: Connection::Https {
                url: "http://incus.local:8443".to_string(),
                cert: None,
                key: None,
                verify: Verify::default(),
            },
            timeouts: Timeouts::default(),
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cert_without_key_is_rejected() {
        let settings = Settings {
            connection: Connection::Https {
                url: "https://incus.local:8443".to_string(),
                cert: Some(PathBuf::from("/tmp/client.crt")),
                key: None,
                verify: Verify::default(),
            },
            timeouts: Timeouts::default(),
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut settings = Settings::default();
        settings.timeouts.poll_interval_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_home(Path::new("~/.config/incus/client.crt")),
            home.join(".config/incus/client.crt")
        );
        assert_eq!(
            expand_home(Path::new("/etc/incus/client.crt")),
            PathBuf::from("/etc/incus/client.crt")
        );
    }
}
