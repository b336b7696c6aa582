// 插件模块加载
// 模块来源：编译期提交的内置模块、插件目录中的动态库、宿主程序提供的入口点

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use libloading::Library;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::errors::{EngineError, EngineResult};
use crate::plugins::plugin_registry::{PluginRegistry, COMPONENTS_PACKAGE, PLUGINS_PACKAGE};

/// 动态库插件的 ABI 版本
pub const PLUGIN_ABI_VERSION: u32 = 1;

const ABI_VERSION_SYMBOL: &[u8] = b"FLEXGET_PLUGIN_ABI_VERSION\0";
const REGISTER_SYMBOL: &[u8] = b"flexget_register_plugins\0";

const LIBRARY_EXTENSIONS: [&str; 3] = ["so", "dylib", "dll"];

/// 模块注册函数
pub type RegisterFn = fn(&mut PluginRegistry) -> EngineResult<()>;

/// 插件模块：一个名称加一个注册函数
#[derive(Clone, Copy)]
pub struct PluginModule {
    pub name: &'static str,
    pub register: RegisterFn,
}

impl PluginModule {
    pub const fn new(name: &'static str, register: RegisterFn) -> Self {
        Self { name, register }
    }

    /// 执行注册，期间注册表记录当前模块名用于推导插件分类
    pub fn load(&self, registry: &mut PluginRegistry) -> EngineResult<()> {
        run_register(self.name, self.register, registry)
    }
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule").field("name", &self.name).finish()
    }
}

inventory::collect!(PluginModule);

/// 编译进程序的内置模块，按模块名排序
pub fn builtin_modules() -> Vec<&'static PluginModule> {
    let mut modules: Vec<&'static PluginModule> = inventory::iter::<PluginModule>
        .into_iter()
        .collect();
    modules.sort_by_key(|module| module.name);
    modules
}

/// 提交内置插件模块
///
/// ```ignore
/// register_plugin_module!("flexget.plugins.filter.seen", register);
/// ```
#[macro_export]
macro_rules! register_plugin_module {
    ($name:expr, $register:path) => {
        ::inventory::submit! {
            $crate::plugins::PluginModule::new($name, $register)
        }
    };
}

/// 在动态库 crate 中导出插件注册入口
#[macro_export]
macro_rules! declare_plugin_library {
    ($register:path) => {
        #[unsafe(no_mangle)]
        pub static FLEXGET_PLUGIN_ABI_VERSION: u32 = $crate::plugins::PLUGIN_ABI_VERSION;

        #[unsafe(no_mangle)]
        pub fn flexget_register_plugins(
            registry: &mut $crate::plugins::PluginRegistry,
        ) -> $crate::errors::EngineResult<()> {
            $register(registry)
        }
    };
}

fn run_register(
    module: &str,
    register: RegisterFn,
    registry: &mut PluginRegistry,
) -> EngineResult<()> {
    registry.set_current_module(Some(module.to_string()));
    let result = register(registry);
    registry.set_current_module(None);
    result
}

/// 模块种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Plugin,
    Component,
}

impl ModuleKind {
    /// 模块名前缀
    pub fn package(&self) -> &'static str {
        match self {
            Self::Plugin => PLUGINS_PACKAGE,
            Self::Component => COMPONENTS_PACKAGE,
        }
    }

    /// 追加搜索目录的环境变量
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Plugin => "FLEXGET_PLUGIN_PATH",
            Self::Component => "FLEXGET_COMPONENT_PATH",
        }
    }
}

/// 展开开头的 `~`
pub fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}

/// 计算实际搜索的目录：环境变量中的目录、额外目录、配置目录，依次排列
///
/// 不存在的目录被跳过。
pub fn resolve_dirs(
    env_value: Option<&OsStr>,
    extra: &[PathBuf],
    configured: &[String],
    home: Option<&Path>,
) -> Vec<PathBuf> {
    let from_env = env_value
        .map(|value| std::env::split_paths(value).collect::<Vec<_>>())
        .unwrap_or_default();
    let from_config = configured.iter().map(|dir| expand_home(dir, home));

    let mut dirs: Vec<PathBuf> = Vec::new();
    for dir in from_env.into_iter().chain(extra.iter().cloned()).chain(from_config) {
        if dir.as_os_str().is_empty() || dirs.contains(&dir) {
            continue;
        }
        if !dir.is_dir() {
            debug!("插件目录不存在，跳过: {}", dir.display());
            continue;
        }
        dirs.push(dir);
    }
    dirs
}

/// 目录中发现的动态库模块
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredModule {
    pub name: String,
    pub path: PathBuf,
}

/// 递归扫描目录中的动态库
///
/// 文件名以 `_` 或 `.` 开头的跳过；模块名由包前缀加相对路径组成，`lib` 前缀去掉。
pub fn discover_modules(root: &Path, kind: ModuleKind) -> EngineResult<Vec<DiscoveredModule>> {
    debug!("扫描插件目录: {}", root.display());
    let mut modules = Vec::new();
    walk(root, root, kind, &mut modules)?;
    modules.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(modules)
}

fn walk(
    root: &Path,
    dir: &Path,
    kind: ModuleKind,
    modules: &mut Vec<DiscoveredModule>,
) -> EngineResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let file_name = path.file_name().and_then(OsStr::to_str).unwrap_or("");
        if file_name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, kind, modules)?;
        } else if let Some(name) = module_name(root, &path, kind) {
            modules.push(DiscoveredModule { name, path });
        }
    }
    Ok(())
}

/// 由库文件路径得到模块名，非插件库返回 `None`
pub fn module_name(root: &Path, path: &Path, kind: ModuleKind) -> Option<String> {
    let extension = path.extension().and_then(OsStr::to_str)?;
    if !LIBRARY_EXTENSIONS.contains(&extension) {
        return None;
    }
    let stem = path.file_stem().and_then(OsStr::to_str)?;
    let stem = stem.strip_prefix("lib").unwrap_or(stem);
    if stem.is_empty() || stem.starts_with('_') || stem.starts_with('.') {
        return None;
    }

    let relative = path.parent()?.strip_prefix(root).ok()?;
    let mut segments = vec![kind.package().to_string()];
    for component in relative.components() {
        segments.push(component.as_os_str().to_str()?.to_string());
    }
    segments.push(stem.to_string());
    Some(segments.join("."))
}

/// 已打开的动态库，必须比其中注册的插件活得更久
pub struct LoadedLibrary {
    pub module: String,
    pub path: PathBuf,
    pub checksum: String,
    register: RegisterFn,
    _library: Library,
}

impl fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("module", &self.module)
            .field("path", &self.path)
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl LoadedLibrary {
    /// 打开动态库并检查导出符号
    pub fn open(module: &DiscoveredModule) -> EngineResult<Self> {
        let import_error = |message: String| EngineError::import(&module.name, message);

        let bytes = fs::read(&module.path).map_err(|e| import_error(e.to_string()))?;
        let checksum = format!("{:x}", Sha256::digest(&bytes));
        debug!(module = %module.name, checksum = %checksum, "打开插件库: {}", module.path.display());

        // SAFETY: 插件库由 `declare_plugin_library!` 生成，初始化代码不做额外假设
        let library = unsafe { Library::new(&module.path) }
            .map_err(|e| import_error(format!("无法打开动态库: {}", e)))?;

        // SAFETY: 符号类型与 `declare_plugin_library!` 导出的定义一致
        let version = unsafe {
            let symbol = library
                .get::<*const u32>(ABI_VERSION_SYMBOL)
                .map_err(|e| import_error(format!("缺少 ABI 版本符号: {}", e)))?;
            **symbol
        };
        if version != PLUGIN_ABI_VERSION {
            return Err(import_error(format!(
                "ABI 版本不匹配: 期望 {}，实际 {}",
                PLUGIN_ABI_VERSION, version
            )));
        }

        // SAFETY: 同上
        let register = unsafe {
            *library
                .get::<RegisterFn>(REGISTER_SYMBOL)
                .map_err(|e| import_error(format!("缺少注册函数: {}", e)))?
        };

        Ok(Self {
            module: module.name.clone(),
            path: module.path.clone(),
            checksum,
            register,
            _library: library,
        })
    }

    pub fn load(&self, registry: &mut PluginRegistry) -> EngineResult<()> {
        run_register(&self.module, self.register, registry)
    }
}

/// 加载失败的模块
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedModule {
    pub module: String,
    pub error_code: String,
    pub message: String,
}

/// 模块加载错误策略
///
/// 依赖缺失记录警告（静默依赖只记录调试日志），模块无法导入记录严重错误，两者都继续加载；
/// 其他错误原样返回，终止整个加载过程。
pub fn apply_error_policy(
    module: &str,
    result: EngineResult<()>,
) -> EngineResult<Option<FailedModule>> {
    let err = match result {
        Ok(()) => return Ok(None),
        Err(err) => err,
    };

    if !err.is_recoverable_load_error() {
        error!(module, "加载插件模块时发生错误: {}", err);
        return Err(err);
    }

    match err {
        EngineError::Dependency(ref dep) if dep.silent => {
            debug!(module, "插件依赖缺失: {}", dep);
        }
        EngineError::Dependency(ref dep) => {
            warn!(module, "插件依赖缺失: {}", dep);
        }
        _ => {
            error!(critical = true, module, "插件模块导入失败: {}", err);
        }
    }

    Ok(Some(FailedModule {
        module: module.to_string(),
        error_code: err.error_code().to_string(),
        message: err.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::plugin_interface::Plugin;
    use crate::plugins::plugin_registry::PluginBuilder;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Builtin;

    impl Plugin for Builtin {}

    fn register_builtin(registry: &mut PluginRegistry) -> EngineResult<()> {
        registry.register(
            PluginBuilder::new::<Builtin>()
                .name("loader_test_builtin")
                .builtin(true)
                .api_ver(2),
        )
    }

    crate::register_plugin_module!("flexget.plugins.test.loader_builtin", register_builtin);

    #[test]
    fn test_builtin_module_submitted() {
        let modules = builtin_modules();
        let module = modules
            .iter()
            .find(|m| m.name == "flexget.plugins.test.loader_builtin")
            .expect("内置模块应被收集");

        let mut registry = PluginRegistry::new();
        module.load(&mut registry).unwrap();
        let info = registry.get_plugin_by_name("loader_test_builtin", "test").unwrap();
        assert_eq!(info.category.as_deref(), Some("test"));
    }

    #[test]
    fn test_builtin_modules_sorted() {
        let modules = builtin_modules();
        let names: Vec<&str> = modules.iter().map(|m| m.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_expand_home() {
        let home = Path::new("/home/user");
        assert_eq!(
            expand_home("~/.flexget/plugins", Some(home)),
            PathBuf::from("/home/user/.flexget/plugins")
        );
        assert_eq!(expand_home("~", Some(home)), PathBuf::from("/home/user"));
        assert_eq!(expand_home("~/x", None), PathBuf::from("~/x"));
        assert_eq!(expand_home("/opt/plugins", Some(home)), PathBuf::from("/opt/plugins"));
    }

    #[test]
    fn test_resolve_dirs_order_and_missing() {
        let env_dir = TempDir::new().unwrap();
        let extra_dir = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        let env_value = std::env::join_paths([env_dir.path(), Path::new("/nonexistent/flexget")])
            .unwrap();

        let dirs = resolve_dirs(
            Some(env_value.as_os_str()),
            &[extra_dir.path().to_path_buf()],
            &[config_dir.path().to_string_lossy().to_string()],
            None,
        );

        assert_eq!(
            dirs,
            vec![
                env_dir.path().to_path_buf(),
                extra_dir.path().to_path_buf(),
                config_dir.path().to_path_buf(),
            ]
        );
    }

    #[test]
    fn test_discover_modules() {
        let root = TempDir::new().unwrap();
        let sub = root.path().join("input");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("librss.so"), b"").unwrap();
        fs::write(root.path().join("seen.dll"), b"").unwrap();
        fs::write(root.path().join("_private.so"), b"").unwrap();
        fs::write(root.path().join("lib_hidden.so"), b"").unwrap();
        fs::write(root.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(root.path().join(".cache")).unwrap();
        fs::write(root.path().join(".cache").join("libcached.so"), b"").unwrap();

        let modules = discover_modules(root.path(), ModuleKind::Plugin).unwrap();
        let names: Vec<&str> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["flexget.plugins.input.rss", "flexget.plugins.seen"]);

        let components = discover_modules(root.path(), ModuleKind::Component).unwrap();
        assert_eq!(components[0].name, "flexget.components.input.rss");
    }

    #[test]
    fn test_open_invalid_library_is_import_error() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("libbogus.so");
        fs::write(&path, b"not a shared object").unwrap();

        let module = DiscoveredModule {
            name: "flexget.plugins.bogus".to_string(),
            path,
        };
        let err = LoadedLibrary::open(&module).unwrap_err();
        assert!(matches!(err, EngineError::Import { .. }));
    }

    #[test]
    fn test_error_policy() {
        assert_eq!(apply_error_policy("m", Ok(())).unwrap(), None);

        let dependency = apply_error_policy("m", Err(EngineError::dependency("a", "b")))
            .unwrap()
            .unwrap();
        assert_eq!(dependency.module, "m");

        let import = apply_error_policy("m", Err(EngineError::import("m", "broken"))).unwrap();
        assert!(import.is_some());

        let fatal = apply_error_policy("m", Err(EngineError::registration("bad phase")));
        assert!(matches!(fatal, Err(EngineError::Registration { .. })));
    }
}
