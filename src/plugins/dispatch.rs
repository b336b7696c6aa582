// 任务阶段调度
// 按阶段表顺序执行任务，每个阶段内按处理器优先级从高到低调用启用的插件

use std::fmt;

use flexget_common::{Entry, PluginError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::errors::{EngineError, EngineResult};
use crate::plugins::phases::ABORT_EVENT;
use crate::plugins::plugin_registry::{PluginFilter, PluginInfo, PluginRegistry};

/// 任务运行选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// 测试模式，不产生外部副作用
    pub test: bool,
}

/// 任务
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub name: String,
    /// 任务配置，键为插件名
    pub config: Map<String, Value>,
    pub entries: Vec<Entry>,
    pub options: TaskOptions,
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 设置插件配置
    pub fn with_config(mut self, plugin: impl Into<String>, config: Value) -> Self {
        self.config.insert(plugin.into(), config);
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// 在处理器内部中止任务，调度器在该处理器返回后立即停止
    pub fn abort(&mut self, reason: impl Into<String>) {
        if !self.aborted {
            self.aborted = true;
            self.abort_reason = Some(reason.into());
        }
    }

    /// 插件在本任务中的配置；未启用时返回 `None`
    ///
    /// 配置在插件名下即启用，`_` 开头的键视为禁用；内置插件始终启用。
    pub fn plugin_config(&self, info: &PluginInfo) -> Option<Value> {
        match self.config.get(&info.name) {
            Some(config) => Some(config.clone()),
            None if info.builtin => Some(Value::Null),
            None => None,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Task(name={},aborted={})>", self.name, self.aborted)
    }
}

/// 阶段调度器
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher<'a> {
    registry: &'a PluginRegistry,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    /// 本任务中某阶段要调用的插件，按优先级排序
    pub fn plugins_for(&self, task: &Task, phase: &str) -> EngineResult<Vec<&'a PluginInfo>> {
        let plugins = self
            .registry
            .get_plugins(&PluginFilter::new().phase(phase))?
            .into_iter()
            .filter(|info| task.plugin_config(info).is_some())
            .collect();
        Ok(plugins)
    }

    /// 执行单个阶段
    ///
    /// 警告只记录日志；其余处理器错误立即返回，由调用方决定是否中止任务。
    /// 处理器调用 [`Task::abort`] 后本阶段剩余的插件不再执行。
    pub fn run_phase(&self, task: &mut Task, phase: &str) -> EngineResult<()> {
        for info in self.plugins_for(task, phase)? {
            let Some(config) = task.plugin_config(info) else {
                continue;
            };
            let handler = &info.phase_handlers[phase];
            let _entered = info.span().enter();
            debug!(task = %task.name, phase, priority = handler.priority, "调用插件处理器");

            match self.registry.events().fire(&handler.event, task, &config) {
                Ok(()) => {}
                Err(err) if !err.aborts_task() => {
                    warn!(task = %task.name, phase, "{}", err);
                }
                Err(err) => return Err(EngineError::plugin(info.name.clone(), err)),
            }

            if task.aborted {
                debug!(task = %task.name, phase, "处理器中止了任务，跳过本阶段剩余插件");
                return Err(EngineError::TaskAborted {
                    task: task.name.clone(),
                    reason: task.abort_reason.clone().unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    /// 按阶段顺序执行任务
    pub fn execute(&self, task: &mut Task) -> EngineResult<()> {
        info!(task = %task.name, "开始执行任务");
        let phases = self.registry.phases().names().to_vec();

        for phase in &phases {
            if let Err(err) = self.run_phase(task, phase) {
                let silent = match &err {
                    EngineError::Plugin {
                        source: PluginError::Abort { silent, .. },
                        ..
                    } => *silent,
                    EngineError::Plugin {
                        source: PluginError::Dependency(dep),
                        ..
                    } => dep.silent,
                    other => !other.should_log(),
                };
                if silent {
                    debug!(task = %task.name, phase, "任务中止: {}", err);
                } else {
                    error!(task = %task.name, phase, "任务中止: {}", err);
                }
                task.abort(err.to_string());
            }

            if task.aborted {
                return Err(self.abort(task));
            }
        }

        info!(task = %task.name, "任务执行完成");
        Ok(())
    }

    /// 调用所有启用插件的中止处理器，错误只记录不传播
    fn abort(&self, task: &mut Task) -> EngineError {
        let reason = task
            .abort_reason
            .clone()
            .unwrap_or_else(|| "未知原因".to_string());

        match self.plugins_for(task, ABORT_EVENT) {
            Ok(plugins) => {
                for info in plugins {
                    let Some(config) = task.plugin_config(info) else {
                        continue;
                    };
                    let handler = &info.phase_handlers[ABORT_EVENT];
                    let _entered = info.span().enter();
                    if let Err(err) = self.registry.events().fire(&handler.event, task, &config) {
                        warn!(task = %task.name, "中止处理器执行失败: {}", err);
                    }
                }
            }
            Err(err) => warn!(task = %task.name, "无法获取中止处理器: {}", err),
        }

        EngineError::TaskAborted {
            task: task.name.clone(),
            reason,
        }
    }
}
