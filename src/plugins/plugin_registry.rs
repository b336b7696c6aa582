// 插件注册表
// 按插件名保存插件描述，提供注册、按阶段/接口/分类的查询以及 schema 聚合

use std::any::type_name;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use flexget_common::{interfaces, DependencyError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, Span};

use crate::errors::{EngineError, EngineResult};
use crate::plugins::events::EventBus;
use crate::plugins::phases::PhaseTable;
use crate::plugins::plugin_interface::{HandlerTable, Plugin};
use crate::plugins::schema::{build_plugins_schema, SchemaRegistry, PLUGINS_SCHEMA_URI};

/// 内置插件模块的包前缀
pub const PLUGINS_PACKAGE: &str = "flexget.plugins";
/// 内置组件模块的包前缀
pub const COMPONENTS_PACKAGE: &str = "flexget.components";

/// 支持的最低 API 版本
pub const MIN_API_VERSION: u32 = 2;

/// 插件实例工厂
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// 延迟注册回调，在所有模块加载完成后执行一次
pub type DeferredRegistration = Box<dyn FnOnce(&mut PluginRegistry) -> EngineResult<()> + Send>;

static CAPITALS: Lazy<Regex> = Lazy::new(|| Regex::new("[A-Z]+").expect("静态正则表达式"));

/// 由类型名推导插件名：`MyPlugin` -> `my_plugin`
pub fn derive_plugin_name(type_path: &str) -> String {
    let without_generics = type_path.split('<').next().unwrap_or(type_path);
    let short = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics);
    CAPITALS
        .replace_all(short, |caps: &regex::Captures<'_>| {
            format!("_{}", caps[0].to_lowercase())
        })
        .trim_start_matches('_')
        .to_string()
}

/// 由注册模块名推导分类：取所在包名
pub fn derive_category(module: &str) -> Option<String> {
    let conventional = [PLUGINS_PACKAGE, COMPONENTS_PACKAGE]
        .iter()
        .any(|package| module.starts_with(&format!("{}.", package)));
    if !conventional {
        return None;
    }
    let segments: Vec<&str> = module.split('.').collect();
    segments
        .len()
        .checked_sub(2)
        .map(|index| segments[index].to_string())
}

/// 已绑定的阶段处理器
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseHandler {
    /// 事件名 `plugin.<name>.<phase>`
    pub event: String,
    pub priority: i32,
}

/// 插件描述
pub struct PluginInfo {
    pub name: String,
    /// 插件实现类型的完整路径
    pub type_name: &'static str,
    pub interfaces: BTreeSet<String>,
    pub api_ver: u32,
    pub builtin: bool,
    pub debug: bool,
    pub category: Option<String>,
    /// 注册时所在的模块
    pub module: Option<String>,
    pub schema: Value,
    pub phase_handlers: BTreeMap<String, PhaseHandler>,
    pub(crate) factory: PluginFactory,
    pub(crate) instance: Option<Arc<dyn Plugin>>,
    pub(crate) declared: HandlerTable,
    pub(crate) span: Span,
    pub(crate) seq: u64,
}

impl PluginInfo {
    /// 插件实例，初始化之前为 `None`
    pub fn instance(&self) -> Option<Arc<dyn Plugin>> {
        self.instance.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.instance.is_some()
    }

    /// 插件专属的日志 span
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn handler(&self, phase: &str) -> Option<&PhaseHandler> {
        self.phase_handlers.get(phase)
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.interfaces.contains(interface)
    }

    /// 注册顺序
    pub fn registration_order(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInfo")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("interfaces", &self.interfaces)
            .field("api_ver", &self.api_ver)
            .field("builtin", &self.builtin)
            .field("debug", &self.debug)
            .field("category", &self.category)
            .field("phase_handlers", &self.phase_handlers)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl PartialEq for PluginInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PluginInfo {}

impl PartialOrd for PluginInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PluginInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// 插件注册参数
pub struct PluginBuilder {
    type_name: &'static str,
    factory: PluginFactory,
    name: Option<String>,
    interfaces: Option<BTreeSet<String>>,
    builtin: bool,
    debug: bool,
    api_ver: u32,
    category: Option<String>,
}

impl PluginBuilder {
    /// 以 `Default` 构造插件实例
    pub fn new<T: Plugin + Default>() -> Self {
        Self::with_factory(T::default)
    }

    /// 以自定义工厂构造插件实例
    ///
    /// `api_ver` 默认为 1，该版本已不再支持，插件必须显式声明 `api_ver(2)`。
    pub fn with_factory<T, F>(factory: F) -> Self
    where
        T: Plugin,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            type_name: type_name::<T>(),
            factory: Arc::new(move || Arc::new(factory()) as Arc<dyn Plugin>),
            name: None,
            interfaces: None,
            builtin: false,
            debug: false,
            api_ver: 1,
            category: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = Some(interfaces.into_iter().map(Into::into).collect());
        self
    }

    pub fn builtin(mut self, builtin: bool) -> Self {
        self.builtin = builtin;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn api_ver(mut self, api_ver: u32) -> Self {
        self.api_ver = api_ver;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// 插件查询条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PluginFilter {
    pub phase: Option<String>,
    pub interface: Option<String>,
    pub category: Option<String>,
    pub name: Option<String>,
    pub min_api: Option<u32>,
}

impl PluginFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从查询字符串解析，例如 `interface=list&min_api=2`
    pub fn from_query(query: &str) -> EngineResult<Self> {
        Ok(serde_urlencoded::from_str(query)?)
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn min_api(mut self, min_api: u32) -> Self {
        self.min_api = Some(min_api);
        self
    }

    fn matches(&self, info: &PluginInfo) -> bool {
        if let Some(ref phase) = self.phase {
            if !info.phase_handlers.contains_key(phase) {
                return false;
            }
        }
        if let Some(ref interface) = self.interface {
            if !info.interfaces.contains(interface) {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            if info.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if info.name != *name {
                return false;
            }
        }
        if let Some(min_api) = self.min_api {
            if info.api_ver < min_api {
                return false;
            }
        }
        true
    }
}

/// 插件注册表
pub struct PluginRegistry {
    pub(crate) plugins: HashMap<String, PluginInfo>,
    pub(crate) phases: PhaseTable,
    pub(crate) events: EventBus,
    pub(crate) schemas: SchemaRegistry,
    deferred: Vec<DeferredRegistration>,
    duplicates: usize,
    next_seq: u64,
    current_module: Option<String>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .field("phases", &self.phases.names())
            .field("deferred", &self.deferred.len())
            .field("duplicates", &self.duplicates)
            .finish()
    }
}

impl PluginRegistry {
    /// 创建空注册表，阶段表只含内置阶段
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            phases: PhaseTable::new(),
            events: EventBus::new(),
            schemas: SchemaRegistry::new(),
            deferred: Vec::new(),
            duplicates: 0,
            next_seq: 0,
            current_module: None,
        }
    }

    /// 注册插件
    ///
    /// API 版本低于 2 立即失败。插件名重复时记录严重错误并计数，保留首次注册。
    pub fn register(&mut self, builder: PluginBuilder) -> EngineResult<()> {
        let name = builder
            .name
            .unwrap_or_else(|| derive_plugin_name(builder.type_name));

        if builder.api_ver < MIN_API_VERSION {
            return Err(EngineError::ApiVersion {
                plugin: name,
                api_ver: builder.api_ver,
            });
        }

        if self.plugins.contains_key(&name) {
            self.duplicates += 1;
            error!(
                critical = true,
                plugin = %name,
                type_name = builder.type_name,
                "插件名 `{}` 重复注册，保留首次注册",
                name
            );
            return Ok(());
        }

        let category = builder.category.or_else(|| {
            self.current_module
                .as_deref()
                .and_then(derive_category)
        });
        let interfaces = builder
            .interfaces
            .unwrap_or_else(|| BTreeSet::from([interfaces::TASK.to_string()]));

        debug!(
            plugin = %name,
            interfaces = ?interfaces,
            category = ?category,
            "注册插件"
        );

        let info = PluginInfo {
            name: name.clone(),
            type_name: builder.type_name,
            interfaces,
            api_ver: builder.api_ver,
            builtin: builder.builtin,
            debug: builder.debug,
            category,
            module: self.current_module.clone(),
            schema: json!({}),
            phase_handlers: BTreeMap::new(),
            factory: builder.factory,
            instance: None,
            declared: HandlerTable::new(),
            span: Span::none(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.plugins.insert(name, info);

        Ok(())
    }

    /// 注册新任务阶段
    pub fn register_phase(
        &mut self,
        name: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> EngineResult<()> {
        self.phases.register_phase(name, before, after)
    }

    /// 推迟到所有模块加载完成后再注册
    pub fn defer<F>(&mut self, registration: F)
    where
        F: FnOnce(&mut PluginRegistry) -> EngineResult<()> + Send + 'static,
    {
        self.deferred.push(Box::new(registration));
    }

    /// 取出全部延迟注册，之后再次触发不会重复注册
    pub(crate) fn take_deferred(&mut self) -> Vec<DeferredRegistration> {
        std::mem::take(&mut self.deferred)
    }

    pub(crate) fn set_current_module(&mut self, module: Option<String>) {
        self.current_module = module;
    }

    /// 重复注册次数
    pub fn duplicate_count(&self) -> usize {
        self.duplicates
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// 按名称排序的插件名
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn phases(&self) -> &PhaseTable {
        &self.phases
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// 查询插件
    ///
    /// 指定阶段时按该阶段处理器优先级降序返回，同优先级按注册顺序；否则按名称排序。
    pub fn get_plugins(&self, filter: &PluginFilter) -> EngineResult<Vec<&PluginInfo>> {
        if let Some(ref phase) = filter.phase {
            if !self.phases.is_bindable(phase) {
                return Err(EngineError::unknown_phase(phase.clone()));
            }
        }

        let mut result: Vec<&PluginInfo> = self
            .plugins
            .values()
            .filter(|info| filter.matches(info))
            .collect();

        match filter.phase {
            Some(ref phase) => result.sort_by(|a, b| {
                let pa = a.phase_handlers[phase].priority;
                let pb = b.phase_handlers[phase].priority;
                pb.cmp(&pa).then(a.seq.cmp(&b.seq))
            }),
            None => result.sort(),
        }

        Ok(result)
    }

    /// 按名称获取插件描述
    pub fn get_plugin_by_name(&self, name: &str, issued_by: &str) -> EngineResult<&PluginInfo> {
        self.plugins
            .get(name)
            .ok_or_else(|| EngineError::Dependency(DependencyError::new(issued_by, name)))
    }

    /// 获取插件实例
    ///
    /// 插件不存在时返回依赖错误；插件尚未初始化说明在系统初始化之前就引用了插件。
    pub fn get(&self, name: &str, requested_by: &str) -> EngineResult<Arc<dyn Plugin>> {
        let info = self.get_plugin_by_name(name, requested_by)?;
        info.instance().ok_or_else(|| EngineError::NotInitialized {
            plugin: name.to_string(),
            requested_by: requested_by.to_string(),
        })
    }

    /// 可变地获取插件描述
    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut PluginInfo> {
        self.plugins.get_mut(name)
    }

    /// 聚合 schema：列出所有符合条件的插件
    pub fn plugin_schemas(&self, filter: &PluginFilter) -> EngineResult<Value> {
        let plugins = self.get_plugins(filter)?;
        Ok(build_plugins_schema(plugins.iter().map(|p| p.name.as_str())))
    }

    /// 按 URI 解析 schema，`/schema/plugins` 支持查询参数过滤
    pub fn resolve_schema(&self, uri: &str) -> EngineResult<Value> {
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        if path == PLUGINS_SCHEMA_URI {
            let filter = PluginFilter::from_query(query)?;
            return self.plugin_schemas(&filter);
        }
        self.schemas
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::configuration(format!("未注册的 schema: {}", uri)))
    }
}
