// 插件管理器
// 负责一次性加载全部插件模块，并持有注册表与已打开的动态库

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::PluginsConfig;
use crate::errors::EngineResult;
use crate::plugins::dispatch::Dispatcher;
use crate::plugins::phases::PendingPhase;
use crate::plugins::plugin_loader::{
    apply_error_policy, builtin_modules, discover_modules, resolve_dirs, DiscoveredModule,
    FailedModule, LoadedLibrary, ModuleKind, PluginModule,
};
use crate::plugins::plugin_registry::PluginRegistry;

/// 延迟注册在错误日志中使用的模块名
const DEFERRED_MODULE: &str = "plugin.register";

/// 加载选项
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// 是否加载编译进程序的内置模块
    pub include_builtin: bool,
    /// 是否读取 `FLEXGET_PLUGIN_PATH` / `FLEXGET_COMPONENT_PATH`
    pub use_env: bool,
    /// 额外插件目录
    pub extra_plugin_dirs: Vec<PathBuf>,
    /// 额外组件目录
    pub extra_component_dirs: Vec<PathBuf>,
    /// 配置中的插件目录，支持 `~`
    pub plugin_dirs: Vec<String>,
    /// 配置中的组件目录，支持 `~`
    pub component_dirs: Vec<String>,
    /// 宿主程序提供的入口点
    pub entry_points: Vec<PluginModule>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            include_builtin: true,
            use_env: true,
            extra_plugin_dirs: Vec::new(),
            extra_component_dirs: Vec::new(),
            plugin_dirs: Vec::new(),
            component_dirs: Vec::new(),
            entry_points: Vec::new(),
        }
    }
}

impl LoadOptions {
    /// 由配置文件生成
    pub fn from_config(config: &PluginsConfig) -> Self {
        Self {
            include_builtin: config.load_builtin,
            plugin_dirs: config.plugin_dirs.clone(),
            component_dirs: config.component_dirs.clone(),
            ..Self::default()
        }
    }

    /// 不读取内置模块与环境变量，只加载显式给出的来源
    pub fn isolated() -> Self {
        Self {
            include_builtin: false,
            use_env: false,
            ..Self::default()
        }
    }

    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_plugin_dirs.push(dir.into());
        self
    }

    pub fn with_component_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_component_dirs.push(dir.into());
        self
    }

    pub fn with_entry_point(mut self, module: PluginModule) -> Self {
        self.entry_points.push(module);
        self
    }

    fn dirs(&self, kind: ModuleKind) -> (&[PathBuf], &[String]) {
        match kind {
            ModuleKind::Plugin => (&self.extra_plugin_dirs, &self.plugin_dirs),
            ModuleKind::Component => (&self.extra_component_dirs, &self.component_dirs),
        }
    }
}

/// 加载报告
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub loaded_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub plugin_count: usize,
    pub failed_modules: Vec<FailedModule>,
    pub unresolved_phases: Vec<PendingPhase>,
    pub duplicates: usize,
}

/// 插件管理器
///
/// 字段按声明顺序析构：注册表中的插件实例先于动态库释放。
#[derive(Debug, Default)]
pub struct PluginManager {
    registry: PluginRegistry,
    report: Option<LoadReport>,
    libraries: Vec<LoadedLibrary>,
}

static GLOBAL: Lazy<Mutex<PluginManager>> = Lazy::new(|| Mutex::new(PluginManager::new()));

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级的插件管理器
    pub fn global() -> &'static Mutex<PluginManager> {
        &GLOBAL
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn is_loaded(&self) -> bool {
        self.report.is_some()
    }

    pub fn report(&self) -> Option<&LoadReport> {
        self.report.as_ref()
    }

    pub fn libraries(&self) -> &[LoadedLibrary] {
        &self.libraries
    }

    pub fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(&self.registry)
    }

    /// 加载全部插件，只执行一次；再次调用返回首次的报告
    ///
    /// 加载失败时注册表与已打开的库全部丢弃，可以修正后重新加载。
    pub fn load_plugins(&mut self, options: LoadOptions) -> EngineResult<LoadReport> {
        if let Some(ref report) = self.report {
            debug!("插件已加载，跳过");
            return Ok(report.clone());
        }

        match self.load_all(&options) {
            Ok(report) => {
                self.report = Some(report.clone());
                Ok(report)
            }
            Err(err) => {
                error!("插件加载失败，丢弃已注册的插件: {}", err);
                self.reset();
                Err(err)
            }
        }
    }

    fn load_all(&mut self, options: &LoadOptions) -> EngineResult<LoadReport> {
        let start = Instant::now();
        info!("开始加载插件");
        let mut failed = Vec::new();

        if options.include_builtin {
            for module in builtin_modules() {
                self.load_module(module, &mut failed)?;
            }
        }

        let home = std::env::var_os("HOME").map(PathBuf::from);
        for kind in [ModuleKind::Plugin, ModuleKind::Component] {
            let env_value = if options.use_env {
                std::env::var_os(kind.env_var())
            } else {
                None
            };
            let (extra, configured) = options.dirs(kind);
            for dir in resolve_dirs(env_value.as_deref(), extra, configured, home.as_deref()) {
                let modules = match discover_modules(&dir, kind) {
                    Ok(modules) => modules,
                    Err(err) => {
                        warn!("扫描插件目录失败: {} - {}", dir.display(), err);
                        continue;
                    }
                };
                for module in modules {
                    let result = self.load_library(&module);
                    failed.extend(apply_error_policy(&module.name, result)?);
                }
            }
        }

        for module in &options.entry_points {
            self.load_module(module, &mut failed)?;
        }

        let pending = self.registry.phases().unresolved().len();
        if pending > 0 {
            debug!("模块加载后仍有 {} 个阶段等待锚点", pending);
        }

        for registration in self.registry.take_deferred() {
            let result = registration(&mut self.registry);
            failed.extend(apply_error_policy(DEFERRED_MODULE, result)?);
        }

        self.registry.initialize_all();
        self.registry.phases().report_unresolved();

        let elapsed = start.elapsed();
        let report = LoadReport {
            loaded_at: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
            plugin_count: self.registry.len(),
            failed_modules: failed,
            unresolved_phases: self.registry.phases().unresolved().to_vec(),
            duplicates: self.registry.duplicate_count(),
        };
        info!(
            "插件加载完成: {} 个插件，耗时 {:.2}s",
            report.plugin_count,
            elapsed.as_secs_f64()
        );
        Ok(report)
    }

    fn load_module(
        &mut self,
        module: &PluginModule,
        failed: &mut Vec<FailedModule>,
    ) -> EngineResult<()> {
        debug!("加载模块: {}", module.name);
        let result = module.load(&mut self.registry);
        failed.extend(apply_error_policy(module.name, result)?);
        Ok(())
    }

    /// 打开动态库并注册；注册失败时库仍被保留
    fn load_library(&mut self, module: &DiscoveredModule) -> EngineResult<()> {
        let library = LoadedLibrary::open(module)?;
        let result = library.load(&mut self.registry);
        self.libraries.push(library);
        result
    }

    /// 清空全部状态，仅用于测试
    pub fn reset(&mut self) {
        self.registry = PluginRegistry::new();
        self.report = None;
        self.libraries.clear();
    }
}
