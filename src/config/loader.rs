// 配置加载器
// 处理配置文件加载和环境变量解析

use crate::config::AppConfig;
use crate::errors::EngineError;
use dotenvy::dotenv;
use std::sync::OnceLock;
use tracing::{info, warn};

/// 全局配置实例
static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 初始化配置
    pub fn init() -> Result<&'static AppConfig, EngineError> {
        if let Err(e) = dotenv() {
            warn!("无法加载 .env 文件: {}", e);
        }

        let config = AppConfig::load()?;
        config.validate()?;

        CONFIG
            .set(config)
            .map_err(|_| EngineError::internal("配置已经初始化"))?;

        let config = Self::get()?;

        info!("配置加载成功");
        info!("环境: {}", config.environment.name);
        info!("版本: {}", config.environment.version);

        Ok(config)
    }

    /// 获取配置
    pub fn get() -> Result<&'static AppConfig, EngineError> {
        CONFIG
            .get()
            .ok_or_else(|| EngineError::internal("配置未初始化，请先调用 ConfigLoader::init()"))
    }

    /// 打印配置摘要
    pub fn print_summary(config: &AppConfig) {
        println!("=== FlexGet 配置摘要 ===");
        println!("环境: {}", config.environment.name);
        println!("版本: {}", config.environment.version);
        println!("调试模式: {}", config.environment.debug);
        println!("插件目录: {:?}", config.plugins.plugin_dirs);
        println!("组件目录: {:?}", config.plugins.component_dirs);
        println!("加载内置模块: {}", config.plugins.load_builtin);
        println!("日志级别: {}", config.logging.level);
        println!("========================");
    }
}
