// 配置验证器

use crate::config::{AppConfig, EnvironmentConfig, LoggingConfig, PluginsConfig};
use crate::errors::EngineError;
use std::path::Path;

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证完整配置，收集所有分节的错误
    pub fn validate_all(config: &AppConfig) -> Result<(), Vec<EngineError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_plugins(&config.plugins) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_logging(&config.logging) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_environment(&config.environment) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// 验证插件目录配置
    pub fn validate_plugins(config: &PluginsConfig) -> Result<(), EngineError> {
        for dir in config.plugin_dirs.iter().chain(config.component_dirs.iter()) {
            if dir.trim().is_empty() {
                return Err(EngineError::configuration("插件目录不能为空字符串"));
            }
            if Path::new(dir).is_file() {
                return Err(EngineError::configuration(format!(
                    "插件目录指向了一个文件: {}",
                    dir
                )));
            }
        }

        Ok(())
    }

    /// 验证日志配置
    pub fn validate_logging(config: &LoggingConfig) -> Result<(), EngineError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.level.as_str()) {
            return Err(EngineError::configuration(format!(
                "无效的日志级别: {}，有效值: {:?}",
                config.level, valid_levels
            )));
        }

        let valid_formats = ["json", "pretty", "compact", "full"];
        if !valid_formats.contains(&config.format.as_str()) {
            return Err(EngineError::configuration(format!(
                "无效的日志格式: {}，有效值: {:?}",
                config.format, valid_formats
            )));
        }

        if config.file_enabled && config.file_path.is_none() {
            return Err(EngineError::configuration(
                "启用文件日志时必须指定日志文件路径",
            ));
        }

        Ok(())
    }

    /// 验证环境配置
    pub fn validate_environment(config: &EnvironmentConfig) -> Result<(), EngineError> {
        let valid_environments = ["development", "production", "test"];
        if !valid_environments.contains(&config.name.as_str()) {
            return Err(EngineError::configuration(format!(
                "无效的环境名称: {}，有效值: {:?}",
                config.name, valid_environments
            )));
        }

        if config.version.is_empty() {
            return Err(EngineError::configuration("版本信息不能为空"));
        }

        Ok(())
    }
}
