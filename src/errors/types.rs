// 统一错误类型定义

use flexget_common::{DependencyError, PluginError};
use thiserror::Error;

/// 引擎统一错误类型
#[derive(Debug, Error)]
pub enum EngineError {
    /// 配置错误
    #[error("配置错误: {message}")]
    Configuration { message: String },

    /// 注册错误（阶段注册参数非法、阶段重名）
    #[error("注册错误: {message}")]
    Registration { message: String },

    /// 插件 API 版本过低
    #[error("插件 `{plugin}` 使用的 API 版本 {api_ver} 已不再支持（要求 >= 2）")]
    ApiVersion { plugin: String, api_ver: u32 },

    /// 依赖缺失
    #[error("依赖缺失: {0}")]
    Dependency(#[from] DependencyError),

    /// 未知阶段
    #[error("未知阶段: {phase}")]
    UnknownPhase { phase: String },

    /// 插件在系统初始化之前被引用
    #[error("插件 `{plugin}` 尚未初始化（请求方: {requested_by}）")]
    NotInitialized { plugin: String, requested_by: String },

    /// 模块加载失败
    #[error("模块加载失败: {module} - {message}")]
    Import { module: String, message: String },

    /// 插件执行错误
    #[error("插件 `{plugin}` 执行失败: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },

    /// 任务被中止
    #[error("任务 `{task}` 已中止: {reason}")]
    TaskAborted { task: String, reason: String },

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误
    #[error("内部错误: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Registration { .. } => "REGISTRATION_ERROR",
            Self::ApiVersion { .. } => "API_VERSION_ERROR",
            Self::Dependency(_) => "DEPENDENCY_ERROR",
            Self::UnknownPhase { .. } => "UNKNOWN_PHASE",
            Self::NotInitialized { .. } => "NOT_INITIALIZED",
            Self::Import { .. } => "IMPORT_ERROR",
            Self::Plugin { .. } => "PLUGIN_ERROR",
            Self::TaskAborted { .. } => "TASK_ABORTED",
            Self::Io(_) => "IO_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// 加载阶段是否可以跳过该模块继续加载
    pub fn is_recoverable_load_error(&self) -> bool {
        matches!(self, Self::Dependency(_) | Self::Import { .. })
    }

    /// 是否应该记录错误日志
    pub fn should_log(&self) -> bool {
        match self {
            Self::Dependency(dep) => !dep.silent,
            _ => true,
        }
    }

    /// 创建配置错误
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// 创建注册错误
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration {
            message: message.into(),
        }
    }

    /// 创建依赖缺失错误
    pub fn dependency(issued_by: impl Into<String>, missing: impl Into<String>) -> Self {
        Self::Dependency(DependencyError::new(issued_by, missing))
    }

    /// 创建未知阶段错误
    pub fn unknown_phase(phase: impl Into<String>) -> Self {
        Self::UnknownPhase {
            phase: phase.into(),
        }
    }

    /// 创建模块加载错误
    pub fn import(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Import {
            module: module.into(),
            message: message.into(),
        }
    }

    /// 创建插件执行错误
    pub fn plugin(plugin: impl Into<String>, source: PluginError) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            source,
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(format!("配置加载错误: {}", err))
    }
}

/// 从 serde_json::Error 转换
impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON 解析错误: {}", err))
    }
}

/// 从查询字符串解析错误转换
impl From<serde_urlencoded::de::Error> for EngineError {
    fn from(err: serde_urlencoded::de::Error) -> Self {
        Self::configuration(format!("查询参数解析错误: {}", err))
    }
}

/// 引擎结果类型
pub type EngineResult<T> = Result<T, EngineError>;
