// FlexGet 插件引擎
// 插件注册、阶段调度以及配置、日志、错误等基础设施

pub mod config;
pub mod errors;
pub mod logging;
pub mod plugins;

pub use errors::{EngineError, EngineResult};
pub use flexget_common::{DependencyError, Entry, PluginError};
