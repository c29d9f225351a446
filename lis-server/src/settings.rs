//! 配置管理
//!
//! 内置默认值 → 可选配置文件 → `LIS__*` 环境变量，后者覆盖前者。
//! 例如 `LIS__SERVER__PORT=9000`、`LIS__DATABASE__URL=postgres://...`。

use config::{Config, Environment, File};
use lis_core::{LisError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// LIS服务完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LisConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

/// 数据库配置，未设置 `url` 时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// 通知配置，未设置 `webhook_url` 时只写日志
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    /// 签名密钥
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
    /// 危急值额外接收人
    pub critical_recipients: Vec<String>,
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter 语法，例如 `info,lis_workflow=debug`
    pub level: String,
}

impl LisConfig {
    /// 加载配置；指定的配置文件必须存在，未指定时尝试读取当前目录的 `lis.toml`
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name("lis").required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("LIS")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("notifications.critical_recipients"),
            )
            .build()
            .map_err(|e| LisError::Config(e.to_string()))?;

        let config: LisConfig = settings
            .try_deserialize()
            .map_err(|e| LisError::Config(format!("配置解析失败: {}", e)))?;

        info!("Configuration loaded from {}", path.unwrap_or("defaults"));
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        ConfigValidator::new().validate(self)
    }
}

/// 配置验证器
pub struct ConfigValidator {
    rules: Vec<ValidationRule>,
}

struct ValidationRule {
    field_path: &'static str,
    check: fn(&LisConfig) -> std::result::Result<(), String>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        let rules = vec![
            ValidationRule {
                field_path: "server.port",
                check: |config| {
                    if config.server.port == 0 {
                        Err("端口不能为0".to_string())
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "database.max_connections",
                check: |config| {
                    if config.database.max_connections == 0 {
                        Err("最大连接数不能为0".to_string())
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "database.url",
                check: |config| match config.database.url.as_deref() {
                    Some(url)
                        if !url.starts_with("postgres://") && !url.starts_with("postgresql://") =>
                    {
                        Err(format!("不支持的数据库地址: {}", url))
                    }
                    _ => Ok(()),
                },
            },
            ValidationRule {
                field_path: "notifications.webhook_url",
                check: |config| match config.notifications.webhook_url.as_deref() {
                    Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                        Err(format!("Webhook地址必须是HTTP(S): {}", url))
                    }
                    _ => Ok(()),
                },
            },
        ];

        Self { rules }
    }

    pub fn validate(&self, config: &LisConfig) -> Result<()> {
        for rule in &self.rules {
            if let Err(message) = (rule.check)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, message);
                return Err(LisError::Config(format!("{}: {}", rule.field_path, message)));
            }
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            timeout_secs: 10,
            critical_recipients: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LisConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.database.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let mut config = LisConfig::default();
        config.server.port = 0;
        assert!(matches!(config.validate(), Err(LisError::Config(_))));

        let mut config = LisConfig::default();
        config.database.url = Some("mysql://localhost/lis".to_string());
        assert!(config.validate().is_err());

        let mut config = LisConfig::default();
        config.notifications.webhook_url = Some("ftp://hooks".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Config::builder()
            .add_source(File::from_str(
                "[server]\nport = 9001\n\n[notifications]\ncritical_recipients = [\"lab-manager\"]\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: LisConfig = settings.try_deserialize().unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.notifications.critical_recipients, vec!["lab-manager"]);
        assert_eq!(config.logging.level, "info");
    }
}
