// 配置 Schema 注册表
// 每个插件的配置 schema 发布在 /schema/plugin/<name>

use std::collections::HashMap;

use serde_json::{json, Value};

/// 单个插件 schema 的 URI 前缀
pub const PLUGIN_SCHEMA_PREFIX: &str = "/schema/plugin/";
/// 插件聚合 schema 的 URI
pub const PLUGINS_SCHEMA_URI: &str = "/schema/plugins";

/// 插件 schema 的 URI
pub fn plugin_schema_uri(name: &str) -> String {
    format!("{}{}", PLUGIN_SCHEMA_PREFIX, name)
}

/// 构建聚合 schema：每个插件名引用其 schema，拒绝未知键，`_` 开头的键视为被禁用的插件
pub fn build_plugins_schema<'a>(names: impl IntoIterator<Item = &'a str>) -> Value {
    let properties: serde_json::Map<String, Value> = names
        .into_iter()
        .map(|name| (name.to_string(), json!({ "$ref": plugin_schema_uri(name) })))
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
        "error_additionalProperties": "{{message}} Only known plugin names are valid keys.",
        "patternProperties": {
            "^_": { "title": "Disabled Plugin" }
        }
    })
}

/// 静态 schema 存储
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Value>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_schema(&mut self, uri: impl Into<String>, schema: Value) {
        self.schemas.insert(uri.into(), schema);
    }

    pub fn get(&self, uri: &str) -> Option<&Value> {
        self.schemas.get(uri)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn clear(&mut self) {
        self.schemas.clear();
    }
}
