// 通用类型定义

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 最先执行的优先级
pub const PRIORITY_FIRST: i32 = 255;
/// 默认优先级
pub const PRIORITY_DEFAULT: i32 = 128;
/// 最后执行的优先级
pub const PRIORITY_LAST: i32 = -255;

/// 插件可声明的常用接口标签
pub mod interfaces {
    pub const TASK: &str = "task";
    pub const LIST: &str = "list";
    pub const NOTIFIERS: &str = "notifiers";
    pub const SEARCH: &str = "search";
}

/// 任务中流转的条目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub url: String,
    /// 插件附加的字段
    #[serde(default, flatten)]
    pub fields: Map<String, Value>,
}

impl Entry {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}
