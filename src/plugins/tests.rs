// 插件系统集成测试

use std::fs;
use std::sync::Arc;

use flexget_common::{Entry, PluginError, PRIORITY_FIRST, PRIORITY_LAST};
use serde_json::{json, Value};
use tempfile::TempDir;

use super::*;
use crate::errors::{EngineError, EngineResult};

/// 在 filter / foo 阶段把自己的标签写入任务条目
struct Tagger {
    label: &'static str,
    priority: Option<i32>,
}

impl Tagger {
    fn record(
        label: &'static str,
        phase: &'static str,
    ) -> impl Fn(&mut Task, &Value) -> Result<(), PluginError> {
        move |task, _config| {
            task.entries.push(Entry::new(format!("{}.{}", label, phase), ""));
            Ok(())
        }
    }
}

impl Plugin for Tagger {
    fn schema(&self) -> Option<Value> {
        Some(json!({"type": "boolean"}))
    }

    fn handlers(self: Arc<Self>, table: &mut HandlerTable) {
        match self.priority {
            Some(priority) => {
                table.on_with_priority("filter", priority, Tagger::record(self.label, "filter"))
            }
            None => table.on("filter", Tagger::record(self.label, "filter")),
        };
        table
            .on("input", Tagger::record(self.label, "input"))
            .on("foo", Tagger::record(self.label, "foo"))
            .on("metainfo", Tagger::record(self.label, "metainfo"));
    }
}

fn tagger(label: &'static str, priority: Option<i32>) -> PluginBuilder {
    PluginBuilder::with_factory(move || Tagger { label, priority })
        .name(label)
        .api_ver(2)
}

fn titles(task: &Task) -> Vec<&str> {
    task.entries.iter().map(|e| e.title.as_str()).collect()
}

fn enabled_task(names: &[&str]) -> Task {
    names
        .iter()
        .fold(Task::new("test"), |task, name| task.with_config(*name, json!(true)))
}

#[derive(Default)]
struct Lister;

struct EmptyList;

impl PluginList for EmptyList {
    fn contains(&self, _entry: &Entry) -> bool {
        false
    }

    fn add(&mut self, _entry: Entry) -> Result<(), PluginError> {
        Ok(())
    }

    fn discard(&mut self, _entry: &Entry) -> Result<(), PluginError> {
        Ok(())
    }
}

impl ListPlugin for Lister {
    fn get_list(&self, _config: &Value) -> Result<Box<dyn PluginList>, PluginError> {
        Ok(Box::new(EmptyList))
    }
}

impl Plugin for Lister {
    fn as_list(&self) -> Option<&dyn ListPlugin> {
        Some(self)
    }
}

#[derive(Default)]
struct Plain;

impl Plugin for Plain {}

#[test]
fn test_end_to_end_priority_order() {
    let mut registry = PluginRegistry::new();
    registry.register(tagger("b", None)).unwrap();
    registry.register(tagger("c", Some(50))).unwrap();
    registry.register(tagger("a", Some(200))).unwrap();
    registry.initialize_all();

    let mut task = enabled_task(&["a", "b", "c"]);
    Dispatcher::new(&registry).run_phase(&mut task, "filter").unwrap();

    assert_eq!(titles(&task), vec!["a.filter", "b.filter", "c.filter"]);
}

#[test]
fn test_priority_tie_keeps_registration_order() {
    let mut registry = PluginRegistry::new();
    registry.register(tagger("x", None)).unwrap();
    registry.register(tagger("first", Some(PRIORITY_FIRST))).unwrap();
    registry.register(tagger("y", None)).unwrap();
    registry.register(tagger("last", Some(PRIORITY_LAST))).unwrap();
    registry.initialize_all();

    let names: Vec<&str> = registry
        .get_plugins(&PluginFilter::new().phase("filter"))
        .unwrap()
        .into_iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["first", "x", "y", "last"]);
}

#[test]
fn test_filters() {
    let mut registry = PluginRegistry::new();
    registry.set_current_module(Some("flexget.plugins.filter.tags".to_string()));
    registry.register(tagger("tags", None)).unwrap();
    registry.set_current_module(Some("flexget.components.managed_lists.lists.memory".to_string()));
    registry
        .register(
            PluginBuilder::new::<Lister>()
                .name("memory_list")
                .interfaces(["list", "task"])
                .api_ver(3),
        )
        .unwrap();
    registry.set_current_module(None);
    registry
        .register(PluginBuilder::new::<Plain>().api_ver(2))
        .unwrap();
    registry.initialize_all();

    let names = |filter: PluginFilter| -> Vec<String> {
        registry
            .get_plugins(&filter)
            .unwrap()
            .into_iter()
            .map(|p| p.name.clone())
            .collect()
    };

    assert_eq!(names(PluginFilter::new().interface("list")), vec!["memory_list"]);
    assert_eq!(
        names(PluginFilter::new().interface("task")),
        vec!["memory_list", "plain", "tags"]
    );
    assert_eq!(names(PluginFilter::new().category("filter")), vec!["tags"]);
    assert_eq!(names(PluginFilter::new().category("lists")), vec!["memory_list"]);
    assert_eq!(names(PluginFilter::new().min_api(3)), vec!["memory_list"]);
    assert_eq!(names(PluginFilter::new().name("plain")), vec!["plain"]);
    assert_eq!(names(PluginFilter::new().phase("filter")), vec!["tags"]);
    assert!(names(PluginFilter::new().interface("search")).is_empty());
}

#[test]
fn test_schema_aggregation() {
    let mut registry = PluginRegistry::new();
    registry.register(tagger("tags", None)).unwrap();
    registry
        .register(
            PluginBuilder::new::<Lister>()
                .name("memory_list")
                .interfaces(["list"])
                .api_ver(2),
        )
        .unwrap();
    registry.initialize_all();

    let all = registry.resolve_schema("/schema/plugins").unwrap();
    assert_eq!(all["properties"]["tags"]["$ref"], "/schema/plugin/tags");
    assert_eq!(all["properties"]["memory_list"]["$ref"], "/schema/plugin/memory_list");
    assert_eq!(all["additionalProperties"], false);

    let lists = registry.resolve_schema("/schema/plugins?interface=list").unwrap();
    let properties = lists["properties"].as_object().unwrap();
    assert_eq!(properties.len(), 1);
    assert!(properties.contains_key("memory_list"));

    let tags = registry.resolve_schema("/schema/plugin/tags").unwrap();
    assert_eq!(tags["id"], "/schema/plugin/tags");

    assert!(registry.resolve_schema("/schema/plugin/unknown").is_err());
}

fn register_foo_phase(registry: &mut PluginRegistry) -> EngineResult<()> {
    registry.register_phase("foo", None, Some("input"))?;
    registry.register(tagger("foo_user", None))
}

#[test]
fn test_phase_after_input_via_entry_point() {
    let mut manager = PluginManager::new();
    let options = LoadOptions::isolated()
        .with_entry_point(PluginModule::new("flexget.plugins.test.foo", register_foo_phase));
    let report = manager.load_plugins(options).unwrap();
    assert!(report.unresolved_phases.is_empty());

    let registry = manager.registry();
    let input = registry.phases().position("input").unwrap();
    assert_eq!(registry.phases().position("foo"), Some(input + 1));
    assert!(registry
        .get_plugin_by_name("foo_user", "test")
        .unwrap()
        .handler("foo")
        .is_some());

    let mut task = enabled_task(&["foo_user"]);
    manager.dispatcher().execute(&mut task).unwrap();
    assert_eq!(
        titles(&task),
        vec!["foo_user.input", "foo_user.foo", "foo_user.metainfo", "foo_user.filter"]
    );
}

fn register_b_after_a(registry: &mut PluginRegistry) -> EngineResult<()> {
    registry.register_phase("b", None, Some("a"))
}

fn register_a_after_output(registry: &mut PluginRegistry) -> EngineResult<()> {
    registry.register_phase("a", None, Some("output"))
}

fn register_orphan_phase(registry: &mut PluginRegistry) -> EngineResult<()> {
    registry.register_phase("orphan", Some("nonexistent"), None)
}

#[test]
fn test_pending_phases_across_modules() {
    let mut manager = PluginManager::new();
    let options = LoadOptions::isolated()
        .with_entry_point(PluginModule::new("m1", register_b_after_a))
        .with_entry_point(PluginModule::new("m2", register_a_after_output))
        .with_entry_point(PluginModule::new("m3", register_orphan_phase));
    let report = manager.load_plugins(options).unwrap();

    let phases = manager.registry().phases();
    let output = phases.position("output").unwrap();
    assert_eq!(phases.position("a"), Some(output + 1));
    assert_eq!(phases.position("b"), Some(output + 2));
    assert!(!phases.contains("orphan"));

    assert_eq!(report.unresolved_phases.len(), 1);
    assert_eq!(report.unresolved_phases[0].name, "orphan");
}

fn register_needy(registry: &mut PluginRegistry) -> EngineResult<()> {
    registry.get_plugin_by_name("some_other_plugin", "needy")?;
    registry.register(tagger("needy", None))
}

fn register_broken_import(_registry: &mut PluginRegistry) -> EngineResult<()> {
    Err(EngineError::import("flexget.plugins.broken", "optional library missing"))
}

fn register_plain(registry: &mut PluginRegistry) -> EngineResult<()> {
    registry.register(PluginBuilder::new::<Plain>().api_ver(2))
}

fn register_outdated(registry: &mut PluginRegistry) -> EngineResult<()> {
    registry.register(PluginBuilder::new::<Plain>().name("outdated"))
}

#[test]
fn test_module_error_policy() {
    let mut manager = PluginManager::new();
    let options = LoadOptions::isolated()
        .with_entry_point(PluginModule::new("flexget.plugins.needy", register_needy))
        .with_entry_point(PluginModule::new("flexget.plugins.broken", register_broken_import))
        .with_entry_point(PluginModule::new("flexget.plugins.plain", register_plain));
    let report = manager.load_plugins(options).unwrap();

    assert_eq!(report.plugin_count, 1);
    assert!(manager.registry().contains("plain"));
    let failed: Vec<&str> = report.failed_modules.iter().map(|f| f.module.as_str()).collect();
    assert_eq!(failed, vec!["flexget.plugins.needy", "flexget.plugins.broken"]);
}

#[test]
fn test_api_version_aborts_load() {
    let mut manager = PluginManager::new();
    let options = LoadOptions::isolated()
        .with_entry_point(PluginModule::new("flexget.plugins.outdated", register_outdated));
    let result = manager.load_plugins(options);

    assert!(matches!(result, Err(EngineError::ApiVersion { .. })));
    assert!(!manager.is_loaded());
}

fn register_with_deferred(registry: &mut PluginRegistry) -> EngineResult<()> {
    registry.defer(|registry| registry.register(tagger("deferred", None)));
    Ok(())
}

#[test]
fn test_deferred_registration_and_load_once() {
    let mut manager = PluginManager::new();
    let options = LoadOptions::isolated()
        .with_entry_point(PluginModule::new("flexget.plugins.deferred", register_with_deferred));
    let first = manager.load_plugins(options.clone()).unwrap();
    assert!(manager.registry().contains("deferred"));
    assert!(manager.registry().get("deferred", "test").is_ok());

    let second = manager.load_plugins(options).unwrap();
    assert_eq!(first.loaded_at, second.loaded_at);
    assert_eq!(manager.registry().duplicate_count(), 0);
    assert_eq!(manager.registry().len(), 1);
}

#[test]
fn test_directory_walk_with_bogus_library() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("libbogus.so"), b"garbage").unwrap();
    fs::write(root.path().join("_skipped.so"), b"garbage").unwrap();
    fs::write(root.path().join("readme.txt"), b"text").unwrap();

    let mut manager = PluginManager::new();
    let options = LoadOptions::isolated()
        .with_plugin_dir(root.path())
        .with_entry_point(PluginModule::new("flexget.plugins.plain", register_plain));
    let report = manager.load_plugins(options).unwrap();

    assert_eq!(report.failed_modules.len(), 1);
    assert_eq!(report.failed_modules[0].module, "flexget.plugins.bogus");
    assert_eq!(report.failed_modules[0].error_code, "IMPORT_ERROR");
    assert!(manager.registry().contains("plain"));
    assert!(manager.libraries().is_empty());
}

#[test]
fn test_missing_plugin_lookup() {
    let manager = PluginManager::new();
    let err = manager.registry().get_plugin_by_name("nonexistent", "cli").unwrap_err();
    match err {
        EngineError::Dependency(dep) => {
            assert_eq!(dep.missing, "nonexistent");
            assert_eq!(dep.issued_by, "cli");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_uniqueness_across_modules() {
    let mut manager = PluginManager::new();
    let options = LoadOptions::isolated()
        .with_entry_point(PluginModule::new("m1", register_plain))
        .with_entry_point(PluginModule::new("m2", register_plain));
    let report = manager.load_plugins(options).unwrap();

    assert_eq!(report.plugin_count, 1);
    assert_eq!(report.duplicates, 1);
}
