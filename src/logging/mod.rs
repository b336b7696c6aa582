// 日志系统模块
// 配置结构化日志记录和追踪

pub mod setup;


pub use setup::*;
