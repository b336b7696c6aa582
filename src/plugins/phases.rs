// 任务阶段表
// 维护有序的阶段列表，支持插件在运行时相对已有阶段插入新阶段

use serde::Serialize;
use tracing::{debug, error};

use crate::errors::{EngineError, EngineResult};

/// 内置阶段，按执行顺序排列
pub const BUILTIN_PHASES: [&str; 10] = [
    "prepare", "start", "input", "metainfo", "filter", "download", "modify", "output", "learn",
    "exit",
];

/// 任务中止时调用的事件名，不属于正常阶段顺序
pub const ABORT_EVENT: &str = "abort";

/// 阶段处理方法名前缀
const METHOD_PREFIX: &str = "on_task_";

/// 根据阶段名推导处理方法名
pub fn method_name(phase: &str) -> String {
    format!("{}{}", METHOD_PREFIX, phase)
}

/// 阶段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub name: String,
    pub method_name: String,
    pub position: usize,
}

/// 插入位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    Before(String),
    After(String),
}

impl Anchor {
    fn phase(&self) -> &str {
        match self {
            Self::Before(phase) | Self::After(phase) => phase,
        }
    }
}

/// 等待锚点阶段出现的注册请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingPhase {
    pub name: String,
    pub anchor: Anchor,
}

/// 阶段表
#[derive(Debug, Clone)]
pub struct PhaseTable {
    phases: Vec<String>,
    pending: Vec<PendingPhase>,
}

impl Default for PhaseTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTable {
    /// 创建包含内置阶段的阶段表
    pub fn new() -> Self {
        Self {
            phases: BUILTIN_PHASES.iter().map(|p| p.to_string()).collect(),
            pending: Vec::new(),
        }
    }

    /// 注册新阶段
    ///
    /// `before` 与 `after` 必须且只能给出一个。锚点阶段尚不存在时请求进入等待队列，
    /// 之后每次注册都会重新扫描队列。
    pub fn register_phase(
        &mut self,
        name: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> EngineResult<()> {
        let anchor = match (before, after) {
            (Some(_), Some(_)) => {
                return Err(EngineError::registration(format!(
                    "阶段 `{}` 只能指定 before 或 after 之一",
                    name
                )));
            }
            (None, None) => {
                return Err(EngineError::registration(format!(
                    "阶段 `{}` 必须指定 before 或 after",
                    name
                )));
            }
            (Some(before), None) => Anchor::Before(before.to_string()),
            (None, Some(after)) => Anchor::After(after.to_string()),
        };

        if self.contains(name) || self.pending.iter().any(|p| p.name == name) {
            return Err(EngineError::registration(format!("阶段 `{}` 已存在", name)));
        }

        if !self.try_insert(name, &anchor) {
            debug!("阶段 `{}` 的锚点 `{}` 尚未注册，加入等待队列", name, anchor.phase());
            self.pending.push(PendingPhase {
                name: name.to_string(),
                anchor,
            });
        }

        self.resolve_pending();
        Ok(())
    }

    /// 反复扫描等待队列，直到没有请求可以继续解析
    fn resolve_pending(&mut self) {
        loop {
            let before = self.pending.len();
            let pending = std::mem::take(&mut self.pending);
            for request in pending {
                if !self.try_insert(&request.name, &request.anchor) {
                    self.pending.push(request);
                }
            }
            if self.pending.len() == before {
                break;
            }
        }
    }

    fn try_insert(&mut self, name: &str, anchor: &Anchor) -> bool {
        let Some(index) = self.position(anchor.phase()) else {
            return false;
        };
        let index = match anchor {
            Anchor::Before(_) => index,
            Anchor::After(_) => index + 1,
        };
        self.phases.insert(index, name.to_string());
        debug!("注册阶段 `{}`，位置 {}", name, index);
        true
    }

    /// 记录所有未能解析的阶段请求，返回其数量
    pub fn report_unresolved(&self) -> usize {
        for request in &self.pending {
            let (before, after) = match &request.anchor {
                Anchor::Before(phase) => (Some(phase.as_str()), None),
                Anchor::After(phase) => (None, Some(phase.as_str())),
            };
            error!(
                phase = %request.name,
                before = ?before,
                after = ?after,
                "请求的新阶段无法在指定位置创建，依赖它的插件将无法正常工作"
            );
        }
        self.pending.len()
    }

    /// 未解析的阶段请求
    pub fn unresolved(&self) -> &[PendingPhase] {
        &self.pending
    }

    /// 按执行顺序的阶段名
    pub fn names(&self) -> &[String] {
        &self.phases
    }

    /// 按执行顺序的阶段
    pub fn phases(&self) -> Vec<Phase> {
        self.phases
            .iter()
            .enumerate()
            .map(|(position, name)| Phase {
                name: name.clone(),
                method_name: method_name(name),
                position,
            })
            .collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.phases.iter().position(|p| p == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// 阶段或中止事件是否可以绑定处理器
    pub fn is_bindable(&self, name: &str) -> bool {
        name == ABORT_EVENT || self.contains(name)
    }

    /// 所有可绑定处理器的事件名：阶段顺序加上中止事件
    pub fn bindable(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(ABORT_EVENT))
    }
}
