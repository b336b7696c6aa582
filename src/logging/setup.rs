// 日志系统设置

use crate::config::LoggingConfig;
use anyhow::Result;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

/// 日志系统初始化器
pub struct LoggingSetup;

impl LoggingSetup {
    /// 初始化日志系统
    ///
    /// 启用文件日志时返回后台写线程的 guard，调用方必须持有到进程退出。
    pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let (file_layer, guard) = match (config.file_enabled, config.file_path.as_deref()) {
            (true, Some(path)) => {
                let (directory, file_name) = Self::split_log_path(path);
                let appender = tracing_appender::rolling::daily(directory, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true);
                (Some(layer), Some(guard))
            }
            _ => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(Self::format_layer(&config.format))
            .with(file_layer)
            .try_init()?;

        tracing::info!("日志系统初始化完成");
        tracing::info!("日志级别: {}", config.level);
        tracing::info!("日志格式: {}", config.format);

        if config.file_enabled {
            tracing::info!("文件日志已启用: {:?}", config.file_path);
        }

        Ok(guard)
    }

    /// 按配置的格式创建标准输出层
    fn format_layer<S>(format: &str) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        match format {
            "json" => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "pretty" => fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "compact" => fmt::layer().compact().with_target(true).boxed(),
            _ => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        }
    }

    /// 拆分日志文件路径为目录和文件名
    pub fn split_log_path(path: &str) -> (&Path, &std::ffi::OsStr) {
        let path = Path::new(path);
        let directory = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("flexget.log"));
        (directory, file_name)
    }

    /// 解析日志级别
    pub fn parse_level(level: &str) -> Level {
        match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// 创建开发环境日志配置
    pub fn development_config() -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }

    /// 创建生产环境日志配置
    pub fn production_config() -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
            file_enabled: true,
            file_path: Some("./logs/flexget.log".to_string()),
        }
    }

    /// 创建测试环境日志配置
    pub fn test_config() -> LoggingConfig {
        LoggingConfig {
            level: "warn".to_string(),
            format: "compact".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }
}
