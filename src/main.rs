use anyhow::{anyhow, Result};

use flexget_core::config::ConfigLoader;
use flexget_core::logging::LoggingSetup;
use flexget_core::plugins::{LoadOptions, PluginFilter, PluginManager};

fn main() -> Result<()> {
    // 初始化配置
    let config = ConfigLoader::init()?;

    // 初始化结构化日志系统，guard 需持有到进程结束
    let _guard = LoggingSetup::init(&config.logging)?;

    tracing::info!("启动 FlexGet v{}", config.environment.version);
    if config.environment.debug {
        ConfigLoader::print_summary(config);
    }

    let mut manager = PluginManager::global()
        .lock()
        .map_err(|_| anyhow!("插件管理器锁已损坏"))?;
    let report = manager.load_plugins(LoadOptions::from_config(&config.plugins))?;

    for failed in &report.failed_modules {
        tracing::warn!("模块 {} 加载失败: {}", failed.module, failed.message);
    }

    let registry = manager.registry();
    println!("{:<28} {:<14} {:<8} 阶段", "插件", "分类", "内置");
    for info in registry.get_plugins(&PluginFilter::new())? {
        if info.debug {
            continue;
        }
        let phases: Vec<&str> = info.phase_handlers.keys().map(String::as_str).collect();
        println!(
            "{:<28} {:<14} {:<8} {}",
            info.name,
            info.category.as_deref().unwrap_or("-"),
            if info.builtin { "是" } else { "" },
            phases.join(", ")
        );
    }

    println!();
    println!("阶段顺序: {}", registry.phases().names().join(" -> "));
    println!(
        "共 {} 个插件，耗时 {}ms",
        report.plugin_count, report.elapsed_ms
    );

    Ok(())
}
