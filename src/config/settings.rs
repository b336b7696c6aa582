// 应用程序设置和配置
// 定义配置结构体和加载逻辑

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::EngineError;

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub plugins: PluginsConfig,
    pub logging: LoggingConfig,
    pub environment: EnvironmentConfig,
}

/// 插件发现配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// 额外的插件目录
    pub plugin_dirs: Vec<String>,
    /// 额外的组件目录
    pub component_dirs: Vec<String>,
    /// 是否加载编译进程序的内置模块
    pub load_builtin: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_enabled: bool,
    pub file_path: Option<String>,
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub debug: bool,
    pub version: String,
}

impl AppConfig {
    /// 从环境变量和配置文件加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::builder();

        // 1. 加载默认配置
        config = config.add_source(Config::try_from(&AppConfig::default())?);

        // 2. 尝试加载配置文件
        if Path::new("flexget.toml").exists() {
            config = config.add_source(File::with_name("flexget"));
        }

        // 3. 加载环境变量（优先级最高），例如 FLEXGET__LOGGING__LEVEL
        config = config.add_source(
            Environment::with_prefix("FLEXGET")
                .prefix_separator("__")
                .separator("__"),
        );

        let config = config.build()?;
        let mut app_config: AppConfig = config.try_deserialize()?;

        app_config.environment.version = env!("CARGO_PKG_VERSION").to_string();

        Ok(app_config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), EngineError> {
        use crate::config::ConfigValidator;

        match ConfigValidator::validate_all(self) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let error_messages: Vec<String> =
                    errors.iter().map(|e| e.to_string()).collect();
                Err(EngineError::configuration(format!(
                    "配置验证失败: {}",
                    error_messages.join("; ")
                )))
            }
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.name == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment.name == "production"
    }

    pub fn is_test(&self) -> bool {
        self.environment.name == "test"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            plugins: PluginsConfig {
                plugin_dirs: vec!["~/.flexget/plugins".to_string()],
                component_dirs: Vec::new(),
                load_builtin: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "compact".to_string(),
                file_enabled: false,
                file_path: None,
            },
            environment: EnvironmentConfig {
                name: "development".to_string(),
                debug: true,
                version: "0.1.0".to_string(),
            },
        }
    }
}
