// 错误处理模块
// 定义引擎统一的错误类型

pub mod types;


pub use types::*;
