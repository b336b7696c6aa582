// 插件系统模块
// 插件注册、阶段表、模块加载与任务阶段调度

pub mod dispatch;
pub mod events;
pub mod lifecycle;
pub mod phases;
pub mod plugin_interface;
pub mod plugin_loader;
pub mod plugin_manager;
pub mod plugin_registry;
pub mod schema;

#[cfg(test)]
mod tests;

pub use dispatch::*;
pub use events::*;
pub use phases::*;
pub use plugin_interface::*;
pub use plugin_loader::*;
pub use plugin_manager::*;
pub use plugin_registry::*;
pub use schema::*;
