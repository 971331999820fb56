pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.yaml";
const PROJECT_DIR: &str = ".fleetform";

/// 設定ファイルパスを直接指定する環境変数
pub const CONFIG_ENV: &str = "FLEETFORM_CONFIG";

/// 並列度を上書きする環境変数
pub const PARALLELISM_ENV: &str = "FLEETFORM_PARALLELISM";

/// デプロイエンジンの設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// 同時に実行するリソース操作の上限
    pub parallelism: usize,

    /// スタックの状態を保存するディレクトリ
    pub state_dir: PathBuf,

    /// この秒数を超えたロックは放棄されたものとみなす
    pub lock_stale_after_secs: u64,

    /// Create/Update/Delete のデフォルトタイムアウト
    pub default_timeouts: DefaultTimeouts,

    /// 実行前に中断された操作 (pending) を Read で照合する
    pub refresh_pending: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 10,
            state_dir: PathBuf::from(PROJECT_DIR),
            lock_stale_after_secs: 3600,
            default_timeouts: DefaultTimeouts::default(),
            refresh_pending: true,
        }
    }
}

/// タイムアウト (秒)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultTimeouts {
    pub create: u64,
    pub update: u64,
    pub delete: u64,
}

impl Default for DefaultTimeouts {
    fn default() -> Self {
        Self {
            create: 600,
            update: 600,
            delete: 600,
        }
    }
}

impl DefaultTimeouts {
    pub fn create(&self) -> Duration {
        Duration::from_secs(self.create)
    }

    pub fn update(&self) -> Duration {
        Duration::from_secs(self.update)
    }

    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete)
    }
}

impl EngineConfig {
    /// YAML 文字列から設定を読み込む
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 設定ファイルを読み込む
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded config from {}", path.display());
        Self::from_yaml_str(&content)
    }

    /// 値の妥当性を検証
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid {
                field: "parallelism".to_string(),
                reason: "1 以上を指定してください".to_string(),
            });
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "state_dir".to_string(),
                reason: "空にはできません".to_string(),
            });
        }
        Ok(())
    }

    /// 環境変数による上書きを適用
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(PARALLELISM_ENV) {
            self.parallelism = value.trim().parse().map_err(|_| ConfigError::Invalid {
                field: PARALLELISM_ENV.to_string(),
                reason: format!("数値ではありません: {}", value),
            })?;
        }
        self.validate()
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 FLEETFORM_CONFIG (直接パス指定)
/// 2. ./.fleetform/config.yaml
/// 3. ~/.config/fleetform/config.yaml (グローバル設定)
///
/// どれも無ければ `None` (デフォルト設定を使う)
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    // 2. プロジェクトディレクトリ
    let project_config = std::env::current_dir()?.join(PROJECT_DIR).join(CONFIG_FILE);
    if project_config.exists() {
        return Ok(Some(project_config));
    }

    // 3. グローバル設定
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("fleetform").join(CONFIG_FILE);
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// 設定を読み込み、環境変数による上書きを適用する
pub fn load_config() -> Result<EngineConfig> {
    let mut config = match find_config_file()? {
        Some(path) => EngineConfig::load_from(&path)?,
        None => {
            tracing::debug!("No config file found, using defaults");
            EngineConfig::default()
        }
    };
    config.apply_env_overrides()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.parallelism, 10);
        assert_eq!(config.state_dir, PathBuf::from(".fleetform"));
        assert_eq!(config.lock_stale_after(), Duration::from_secs(3600));
        assert_eq!(config.default_timeouts.create(), Duration::from_secs(600));
        assert!(config.refresh_pending);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml_str(
            "parallelism: 4\ndefault_timeouts:\n  delete: 30\n",
        )
        .unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.default_timeouts.delete, 30);
        assert_eq!(config.default_timeouts.create, 600);
        assert!(config.refresh_pending);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(
            EngineConfig::from_yaml_str("  \n").unwrap(),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_invalid_values() {
        let result = EngineConfig::from_yaml_str("parallelism: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let result = EngineConfig::from_yaml_str("parallelism: many\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));

        let result = EngineConfig::from_yaml_str("paralelism: 3\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    #[serial]
    fn test_env_override() {
        temp_env::with_var(PARALLELISM_ENV, Some("3"), || {
            let mut config = EngineConfig::default();
            config.apply_env_overrides().unwrap();
            assert_eq!(config.parallelism, 3);
        });

        temp_env::with_var(PARALLELISM_ENV, Some("zero"), || {
            let mut config = EngineConfig::default();
            let result = config.apply_env_overrides();
            assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        });

        temp_env::with_var(PARALLELISM_ENV, Some("0"), || {
            let mut config = EngineConfig::default();
            assert!(config.apply_env_overrides().is_err());
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "parallelism: 2\n").unwrap();

        temp_env::with_vars(
            [
                (CONFIG_ENV, Some(config_path.to_str().unwrap())),
                (PARALLELISM_ENV, None),
            ],
            || {
                assert_eq!(find_config_file().unwrap(), Some(config_path.clone()));
                assert_eq!(load_config().unwrap().parallelism, 2);
            },
        );
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var_missing() {
        temp_env::with_var(CONFIG_ENV, Some("/nonexistent/fleetform.yaml"), || {
            let result = find_config_file();
            assert!(matches!(result, Err(ConfigError::ConfigFileNotFound(_))));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        // .fleetform/ ディレクトリを作成
        let project_dir = temp_dir.path().join(".fleetform");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("config.yaml"), "parallelism: 7\n").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        temp_env::with_vars_unset([CONFIG_ENV, PARALLELISM_ENV], || {
            let found = find_config_file().unwrap().unwrap();
            assert!(found.ends_with(".fleetform/config.yaml"));
            assert_eq!(load_config().unwrap().parallelism, 7);
        });

        std::env::set_current_dir(original_dir).unwrap();
    }
}
