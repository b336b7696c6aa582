// FlexGet Common Package
// 插件作者使用的通用类型和错误定义

pub mod types;
pub mod errors;

pub use types::*;
pub use errors::*;
