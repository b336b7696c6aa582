// 插件错误类型定义
// 插件处理器返回这些错误，由任务层决定中止还是继续

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 依赖缺失错误
///
/// 插件依赖的另一个插件或库不可用时产生。`silent` 控制日志级别：
/// 为 true 时只记录 debug，否则记录 warning。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyError {
    /// 发起依赖请求的插件
    pub issued_by: String,
    /// 缺失的插件或库
    pub missing: String,
    /// 自定义消息
    pub message: Option<String>,
    /// 是否静默
    pub silent: bool,
}

impl DependencyError {
    pub fn new(issued_by: impl Into<String>, missing: impl Into<String>) -> Self {
        Self {
            issued_by: issued_by.into(),
            missing: missing.into(),
            message: None,
            silent: false,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}", message),
            None => write!(
                f,
                "插件 `{}` 依赖 `{}`，但后者不可用",
                self.issued_by, self.missing
            ),
        }
    }
}

impl std::error::Error for DependencyError {}

/// 插件处理器错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    /// 插件执行失败，只影响该插件的本次贡献
    #[error("{message}")]
    Failed { message: String },

    /// 可恢复的警告
    #[error("{message}")]
    Warning { message: String },

    /// 依赖缺失
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    /// 请求中止整个任务
    #[error("任务中止: {reason}")]
    Abort { reason: String, silent: bool },
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort {
            reason: reason.into(),
            silent: false,
        }
    }

    /// 是否应中止任务
    pub fn aborts_task(&self) -> bool {
        !matches!(self, Self::Warning { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_display() {
        let err = DependencyError::new("series", "sqlite");
        assert!(err.to_string().contains("series"));
        assert!(err.to_string().contains("sqlite"));

        let err = err.with_message("需要 sqlite 支持");
        assert_eq!(err.to_string(), "需要 sqlite 支持");
    }

    #[test]
    fn test_warning_does_not_abort() {
        assert!(!PluginError::warning("稍后重试").aborts_task());
        assert!(PluginError::failed("失败").aborts_task());
        assert!(PluginError::abort("停止").aborts_task());
        assert!(PluginError::from(DependencyError::new("a", "b")).aborts_task());
    }
}
