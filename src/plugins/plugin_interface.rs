// 插件接口规范
// 定义插件实现类型需要满足的约定，以及 list / notifiers / search 接口

use std::fmt;
use std::sync::Arc;

use flexget_common::{interfaces, Entry, PluginError, PRIORITY_DEFAULT};
use serde_json::Value;

use crate::plugins::dispatch::Task;
use crate::plugins::events::HandlerFn;
use crate::plugins::phases::method_name;

/// 插件实现类型
///
/// 实例在系统初始化时构造一次。插件通过 [`Plugin::handlers`] 发布
/// `on_task_<phase>` 处理器，只有阶段表中存在的阶段才会被绑定。
pub trait Plugin: Send + Sync + 'static {
    /// 插件配置的 JSON Schema
    fn schema(&self) -> Option<Value> {
        None
    }

    /// 旧式的 schema 工厂方法，仅在 [`Plugin::schema`] 为空时使用
    fn validator(&self) -> Option<Value> {
        None
    }

    /// 发布阶段处理器
    fn handlers(self: Arc<Self>, table: &mut HandlerTable) {
        let _ = table;
    }

    fn as_list(&self) -> Option<&dyn ListPlugin> {
        None
    }

    fn as_notifier(&self) -> Option<&dyn Notifier> {
        None
    }

    fn as_search(&self) -> Option<&dyn SearchPlugin> {
        None
    }
}

/// 插件声明的阶段处理器
#[derive(Clone)]
pub struct HandlerSpec {
    /// 约定的方法名，如 `on_task_filter`
    pub method: String,
    pub priority: i32,
    pub func: HandlerFn,
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("method", &self.method)
            .field("priority", &self.priority)
            .finish()
    }
}

/// 插件发布处理器用的表
#[derive(Debug, Default)]
pub struct HandlerTable {
    entries: Vec<HandlerSpec>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以默认优先级声明阶段处理器
    pub fn on<F>(&mut self, phase: &str, func: F) -> &mut Self
    where
        F: Fn(&mut Task, &Value) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        self.on_with_priority(phase, PRIORITY_DEFAULT, func)
    }

    /// 以指定优先级声明阶段处理器，数值越大越先执行
    pub fn on_with_priority<F>(&mut self, phase: &str, priority: i32, func: F) -> &mut Self
    where
        F: Fn(&mut Task, &Value) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        self.entries.push(HandlerSpec {
            method: method_name(phase),
            priority,
            func: Arc::new(func),
        });
        self
    }

    /// 按方法名查找，同名时后声明的覆盖先声明的
    pub fn find(&self, method: &str) -> Option<&HandlerSpec> {
        self.entries.iter().rev().find(|spec| spec.method == method)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `list` 接口返回的集合
pub trait PluginList: Send {
    fn contains(&self, entry: &Entry) -> bool;

    fn add(&mut self, entry: Entry) -> Result<(), PluginError>;

    fn discard(&mut self, entry: &Entry) -> Result<(), PluginError>;

    /// 列表不可修改
    fn immutable(&self) -> bool {
        false
    }

    /// 修改会作用到远程服务，测试模式下不得修改
    fn online(&self) -> bool {
        false
    }

    /// 检查本次任务是否允许修改列表
    ///
    /// 不可修改的列表返回错误；测试模式下的在线列表返回 `Ok(false)`，调用方应跳过修改。
    fn guard_mutation(&self, task: &Task) -> Result<bool, PluginError> {
        if self.immutable() {
            return Err(PluginError::failed("列表不可修改"));
        }
        if self.online() && task.options.test {
            return Ok(false);
        }
        Ok(true)
    }
}

/// `list` 接口
pub trait ListPlugin: Send + Sync {
    fn get_list(&self, config: &Value) -> Result<Box<dyn PluginList>, PluginError>;
}

/// `notifiers` 接口
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, config: &Value) -> Result<(), PluginError>;
}

/// `search` 接口
pub trait SearchPlugin: Send + Sync {
    fn search(
        &self,
        task: &Task,
        entry: &Entry,
        config: &Value,
    ) -> Result<Vec<Entry>, PluginError>;
}

/// 插件实例是否实现了声明的接口；无法检查的接口返回 `None`
pub fn implements_interface(plugin: &dyn Plugin, interface: &str) -> Option<bool> {
    match interface {
        interfaces::LIST => Some(plugin.as_list().is_some()),
        interfaces::NOTIFIERS => Some(plugin.as_notifier().is_some()),
        interfaces::SEARCH => Some(plugin.as_search().is_some()),
        _ => None,
    }
}
