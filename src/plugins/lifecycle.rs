// 插件生命周期
// 插件在所有模块加载完成后初始化一次：构造实例、解析 schema、绑定阶段处理器

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info_span, warn};

use crate::errors::{EngineError, EngineResult};
use crate::plugins::events::{phase_event_name, EventBus};
use crate::plugins::phases::{method_name, PhaseTable};
use crate::plugins::plugin_interface::{implements_interface, HandlerTable};
use crate::plugins::plugin_registry::{PhaseHandler, PluginInfo, PluginRegistry};
use crate::plugins::schema::{plugin_schema_uri, SchemaRegistry};

impl PluginInfo {
    /// 初始化插件
    ///
    /// 实例只构造一次；重复调用只会补绑此后新出现阶段的处理器，已绑定的阶段不会重新计算。
    pub(crate) fn initialize(
        &mut self,
        phases: &PhaseTable,
        schemas: &mut SchemaRegistry,
        events: &mut EventBus,
    ) {
        if self.instance.is_none() {
            let instance = (self.factory)();
            self.span = info_span!("plugin", plugin = %self.name);

            let mut schema = instance
                .schema()
                .or_else(|| instance.validator())
                .unwrap_or_else(|| json!({}));
            if let Value::Object(ref mut map) = schema {
                map.insert("id".to_string(), Value::String(plugin_schema_uri(&self.name)));
            }
            schemas.register_schema(plugin_schema_uri(&self.name), schema.clone());
            self.schema = schema;

            for interface in &self.interfaces {
                if implements_interface(instance.as_ref(), interface) == Some(false) {
                    warn!(
                        plugin = %self.name,
                        interface = %interface,
                        "插件声明了接口 `{}` 但未实现",
                        interface
                    );
                }
            }

            let mut table = HandlerTable::new();
            Arc::clone(&instance).handlers(&mut table);
            self.declared = table;
            self.instance = Some(instance);
        }

        let bound = self.bind_handlers(phases, events);
        if bound > 0 {
            debug!(plugin = %self.name, bound, "绑定阶段处理器");
        }
    }

    /// 按阶段表绑定处理器，返回本次新绑定的数量
    fn bind_handlers(&mut self, phases: &PhaseTable, events: &mut EventBus) -> usize {
        let mut bound = 0;
        for phase in phases.bindable() {
            if self.phase_handlers.contains_key(phase) {
                continue;
            }
            let Some(spec) = self.declared.find(&method_name(phase)) else {
                continue;
            };
            let event = phase_event_name(&self.name, phase);
            events.add_handler(event.clone(), spec.priority, Arc::clone(&spec.func));
            self.phase_handlers.insert(
                phase.to_string(),
                PhaseHandler {
                    event,
                    priority: spec.priority,
                },
            );
            bound += 1;
        }
        bound
    }
}

impl PluginRegistry {
    /// 初始化单个插件
    pub fn initialize_plugin(&mut self, name: &str) -> EngineResult<()> {
        let Self {
            plugins,
            phases,
            events,
            schemas,
            ..
        } = self;
        let info = plugins
            .get_mut(name)
            .ok_or_else(|| EngineError::dependency("initialize", name))?;
        info.initialize(phases, schemas, events);
        Ok(())
    }

    /// 按注册顺序初始化全部插件
    pub fn initialize_all(&mut self) {
        let Self {
            plugins,
            phases,
            events,
            schemas,
            ..
        } = self;
        let mut pending: Vec<&mut PluginInfo> = plugins.values_mut().collect();
        pending.sort_by_key(|info| info.seq);
        for info in pending {
            info.initialize(phases, schemas, events);
        }
    }
}
