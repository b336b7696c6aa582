// 事件机制
// 处理器以事件名注册，触发时按优先级从高到低依次调用

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use flexget_common::PluginError;
use serde_json::Value;

use crate::plugins::dispatch::Task;

/// 阶段处理函数
pub type HandlerFn = Arc<dyn Fn(&mut Task, &Value) -> Result<(), PluginError> + Send + Sync>;

/// 插件阶段事件名
pub fn phase_event_name(plugin: &str, phase: &str) -> String {
    format!("plugin.{}.{}", plugin, phase)
}

/// 已注册的事件处理器
#[derive(Clone)]
pub struct EventHandler {
    pub name: String,
    pub priority: i32,
    seq: u64,
    func: HandlerFn,
}

impl EventHandler {
    pub fn call(&self, task: &mut Task, config: &Value) -> Result<(), PluginError> {
        (self.func)(task, config)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish()
    }
}

/// 事件总线
#[derive(Debug, Default)]
pub struct EventBus {
    handlers: HashMap<String, Vec<EventHandler>>,
    next_seq: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器
    pub fn add_handler(&mut self, name: impl Into<String>, priority: i32, func: HandlerFn) {
        let name = name.into();
        let handler = EventHandler {
            name: name.clone(),
            priority,
            seq: self.next_seq,
            func,
        };
        self.next_seq += 1;
        self.handlers.entry(name).or_default().push(handler);
    }

    /// 移除某事件的全部处理器，返回移除数量
    pub fn remove_handlers(&mut self, name: &str) -> usize {
        self.handlers.remove(name).map(|h| h.len()).unwrap_or(0)
    }

    /// 某事件的处理器，按优先级降序，同优先级按注册顺序
    pub fn handlers(&self, name: &str) -> Vec<&EventHandler> {
        let mut handlers: Vec<&EventHandler> = self
            .handlers
            .get(name)
            .map(|h| h.iter().collect())
            .unwrap_or_default();
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        handlers
    }

    pub fn has_handlers(&self, name: &str) -> bool {
        self.handlers.get(name).is_some_and(|h| !h.is_empty())
    }

    /// 触发事件，遇到第一个错误即停止
    pub fn fire(&self, name: &str, task: &mut Task, config: &Value) -> Result<(), PluginError> {
        for handler in self.handlers(name) {
            handler.call(task, config)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
