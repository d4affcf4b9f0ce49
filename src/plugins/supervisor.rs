//! 插件生命周期监督器
//!
//! 对每个受监督插件执行严格顺序的状态机，失败按插件隔离：
//! `Created → Initialized → ConfigLoaded → Configured → PatchesSubmitted
//! → {Applied | PartiallyApplied | Failed}`。
//!
//! 顺序保证：插件在 `initialize` 建立身份相关字段之前读不到存档，
//! 在 `configure` 有机会审视自身行为之前不会有任何补丁被安装。

use crate::modules::{CodeModule, ModuleLoader};
use crate::patching::PatchApplicator;
use crate::plugins::{Plugin, PluginContext};
use crate::report::ApplyReport;
use crate::savedata::{Savedata, SavedataStore};
use crate::{PluginId, SavedataId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 插件生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// 已创建
    Created,
    /// initialize 完成
    Initialized,
    /// 存档已装配
    ConfigLoaded,
    /// configure 完成
    Configured,
    /// 补丁已提交
    PatchesSubmitted,
    /// 所有补丁安装成功
    Applied,
    /// 部分补丁被拒绝或失败
    PartiallyApplied,
    /// 致命失败，或没有任何补丁安装成功
    Failed,
}

impl LifecycleState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Applied | LifecycleState::PartiallyApplied | LifecycleState::Failed
        )
    }
}

/// 受监督插件 - 插件实例加监督元数据
pub struct SupervisedPlugin {
    /// 插件实例 - 存活到进程结束，不会中途销毁
    plugin: Box<dyn Plugin>,
    /// 插件ID（类型完整名称）
    pub plugin_id: PluginId,
    /// 存档身份，同时是所有结果映射的键
    pub savedata_id: SavedataId,
    /// 来源模块名称
    pub module: String,
    /// 当前生命周期状态
    state: LifecycleState,
}

impl SupervisedPlugin {
    /// 包装一个新发现的插件实例
    pub fn new(
        plugin: Box<dyn Plugin>,
        plugin_id: PluginId,
        savedata_id: SavedataId,
        module: impl Into<String>,
    ) -> Self {
        Self {
            plugin,
            plugin_id,
            savedata_id,
            module: module.into(),
            state: LifecycleState::Created,
        }
    }

    /// 当前状态
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// 插件实例
    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(
            "Plugin '{}' lifecycle: {:?} -> {:?}",
            self.savedata_id, self.state, next
        );
        self.state = next;
    }
}

/// 插件监督器
pub struct PluginSupervisor {
    /// 存档仓库
    store: Arc<SavedataStore>,
}

impl PluginSupervisor {
    /// 创建新的监督器
    pub fn new(store: Arc<SavedataStore>) -> Self {
        Self { store }
    }

    /// 驱动一个插件走完整个生命周期
    ///
    /// 在调用方任务上同步顺序执行，状态之间没有并行。任何失败都
    /// 只影响这一个插件，诊断写入报告后由调用方继续下一个插件。
    pub async fn run(
        &self,
        supervised: &mut SupervisedPlugin,
        context: &PluginContext,
        applicator: &PatchApplicator,
        loader: &ModuleLoader,
        host_module: &Arc<dyn CodeModule>,
        report: &mut ApplyReport,
    ) {
        let identity = supervised.savedata_id.clone();

        // Created -> Initialized：失败对该插件致命，跳过后续所有步骤
        if let Err(e) = supervised.plugin.initialize(context).await {
            warn!("Plugin '{}' failed to initialize: {}", identity, e);
            report.record_lifecycle_error(&identity, format!("initialize: {}", e));
            supervised.transition(LifecycleState::Failed);
            report.record_state(&identity, LifecycleState::Failed);
            return;
        }
        supervised.transition(LifecycleState::Initialized);

        // Initialized -> ConfigLoaded：仅声明了持久化数据的插件才触达仓库；
        // 加载失败降级为非致命诊断加默认空文档
        let document = if supervised.plugin.has_savedata() {
            match self.store.load(&identity).await {
                Ok(document) => document,
                Err(e) => {
                    warn!("Savedata load for '{}' failed: {}", identity, e);
                    report.record_savedata_error(&identity, e.to_string());
                    Savedata::empty()
                }
            }
        } else {
            Savedata::empty()
        };
        supervised.plugin.set_savedata(document);
        supervised.transition(LifecycleState::ConfigLoaded);

        // ConfigLoaded -> Configured：失败策略与 initialize 一致
        if let Err(e) = supervised.plugin.configure(context).await {
            warn!("Plugin '{}' failed to configure: {}", identity, e);
            report.record_lifecycle_error(&identity, format!("configure: {}", e));
            supervised.transition(LifecycleState::Failed);
            report.record_state(&identity, LifecycleState::Failed);
            return;
        }
        supervised.transition(LifecycleState::Configured);

        // Configured -> PatchesSubmitted -> 终态
        let ops = supervised.plugin.patch_ops();
        supervised.transition(LifecycleState::PatchesSubmitted);
        let outcomes = applicator.apply(loader, host_module, &ops);

        let installed = outcomes.iter().filter(|o| o.is_installed()).count();
        for outcome in &outcomes {
            report.record_patch_outcome(&identity, outcome);
        }

        // 没有任何操作时视为全部成功
        let terminal = if installed == outcomes.len() {
            LifecycleState::Applied
        } else if installed > 0 {
            LifecycleState::PartiallyApplied
        } else {
            LifecycleState::Failed
        };
        supervised.transition(terminal);
        report.record_state(&identity, terminal);

        info!(
            "Plugin '{}' finished with {:?} ({}/{} patches installed)",
            identity,
            terminal,
            installed,
            outcomes.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{StaticModule, StaticModuleHost};
    use crate::patching::{InterceptionEngine, PatchOp};
    use crate::savedata::{SavedataNode, DEFAULT_SAVEDATA_FILE};
    use crate::{MethodRef, MethodToken, ModLoomError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct TestPlugin {
        savedata: Savedata,
        has_savedata: bool,
        ops: Vec<PatchOp>,
        fail_initialize: bool,
        fail_configure: bool,
        initialized: Arc<AtomicBool>,
        configured: Arc<AtomicBool>,
        seen_savedata: Arc<Mutex<Option<Savedata>>>,
    }

    impl TestPlugin {
        fn new() -> Self {
            Self {
                savedata: Savedata::empty(),
                has_savedata: false,
                ops: Vec::new(),
                fail_initialize: false,
                fail_configure: false,
                initialized: Arc::new(AtomicBool::new(false)),
                configured: Arc::new(AtomicBool::new(false)),
                seen_savedata: Arc::new(Mutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn has_savedata(&self) -> bool {
            self.has_savedata
        }

        fn savedata(&self) -> &Savedata {
            &self.savedata
        }

        fn set_savedata(&mut self, document: Savedata) {
            *self.seen_savedata.lock().unwrap() = Some(document.clone());
            self.savedata = document;
        }

        fn patch_ops(&self) -> Vec<PatchOp> {
            self.ops.clone()
        }

        async fn initialize(&mut self, _context: &PluginContext) -> Result<()> {
            if self.fail_initialize {
                return Err(ModLoomError::lifecycle("initialize refused"));
            }
            self.initialized.store(true, Ordering::Relaxed);
            Ok(())
        }

        async fn configure(&mut self, _context: &PluginContext) -> Result<()> {
            if self.fail_configure {
                return Err(ModLoomError::lifecycle("configure refused"));
            }
            self.configured.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    struct PermissiveEngine;

    impl InterceptionEngine for PermissiveEngine {
        fn install_prefix(&self, _target: &MethodToken, _stub: &MethodToken) -> Result<()> {
            Ok(())
        }

        fn install_postfix(&self, _target: &MethodToken, _stub: &MethodToken) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        supervisor: PluginSupervisor,
        store: Arc<SavedataStore>,
        loader: ModuleLoader,
        host_module: Arc<dyn CodeModule>,
        applicator: PatchApplicator,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SavedataStore::new(dir.path(), DEFAULT_SAVEDATA_FILE));
        let host_module: Arc<dyn CodeModule> = Arc::new(
            StaticModule::new("host")
                .with_method("Game.World", "Terrain", "Generate")
                .with_method("Mods.Stubs", "Hooks", "Before"),
        );
        let mut loader = ModuleLoader::new(Arc::new(StaticModuleHost::new()));
        loader.register(host_module.clone());
        Fixture {
            supervisor: PluginSupervisor::new(store.clone()),
            store,
            loader,
            host_module,
            applicator: PatchApplicator::new(Arc::new(PermissiveEngine)),
            _dir: dir,
        }
    }

    fn supervised(plugin: TestPlugin, identity: &str) -> SupervisedPlugin {
        SupervisedPlugin::new(
            Box::new(plugin),
            "Mods.Test".to_string(),
            identity.to_string(),
            "mod-a",
        )
    }

    fn context(fixture: &Fixture, identity: &str) -> PluginContext {
        PluginContext::new(
            "Mods.Test".to_string(),
            identity.to_string(),
            fixture.store.clone(),
        )
    }

    #[tokio::test]
    async fn test_initialize_failure_short_circuits() {
        let f = fixture();
        let mut plugin = TestPlugin::new();
        plugin.fail_initialize = true;
        plugin.has_savedata = true;
        let configured = plugin.configured.clone();
        let seen = plugin.seen_savedata.clone();

        let mut supervised = supervised(plugin, "mods/broken");
        let context = context(&f, "mods/broken");
        let mut report = ApplyReport::new();
        f.supervisor
            .run(
                &mut supervised,
                &context,
                &f.applicator,
                &f.loader,
                &f.host_module,
                &mut report,
            )
            .await;

        // configure 未被调用，存档未被装配，没有补丁被尝试
        assert_eq!(supervised.state(), LifecycleState::Failed);
        assert!(!configured.load(Ordering::Relaxed));
        assert!(seen.lock().unwrap().is_none());
        assert!(report.lifecycle_errors["mods/broken"].starts_with("initialize:"));
        assert!(report.savedata_errors.is_empty());
    }

    #[tokio::test]
    async fn test_missing_savedata_degrades_to_default_document() {
        let f = fixture();
        let mut plugin = TestPlugin::new();
        plugin.has_savedata = true;
        let configured = plugin.configured.clone();
        let seen = plugin.seen_savedata.clone();

        let mut supervised = supervised(plugin, "mods/fresh");
        let context = context(&f, "mods/fresh");
        let mut report = ApplyReport::new();
        f.supervisor
            .run(
                &mut supervised,
                &context,
                &f.applicator,
                &f.loader,
                &f.host_module,
                &mut report,
            )
            .await;

        // 存档缺失：一条非致命诊断，插件仍以空文档走到终态
        assert_eq!(supervised.state(), LifecycleState::Applied);
        assert!(configured.load(Ordering::Relaxed));
        assert_eq!(seen.lock().unwrap().clone().unwrap(), Savedata::empty());
        assert_eq!(report.savedata_errors.len(), 1);
        assert!(report.lifecycle_errors.is_empty());
    }

    #[tokio::test]
    async fn test_persisted_savedata_reaches_plugin() {
        let f = fixture();
        let document =
            Savedata::empty().with_child(SavedataNode::with_text("LastZone", "caverns"));
        f.store
            .save(&"mods/saved".to_string(), &document)
            .await
            .unwrap();

        let mut plugin = TestPlugin::new();
        plugin.has_savedata = true;
        let seen = plugin.seen_savedata.clone();

        let mut supervised = supervised(plugin, "mods/saved");
        let context = context(&f, "mods/saved");
        let mut report = ApplyReport::new();
        f.supervisor
            .run(
                &mut supervised,
                &context,
                &f.applicator,
                &f.loader,
                &f.host_module,
                &mut report,
            )
            .await;

        assert_eq!(seen.lock().unwrap().clone().unwrap(), document);
        assert!(report.savedata_errors.is_empty());
    }

    #[tokio::test]
    async fn test_plugin_without_savedata_never_touches_store() {
        let f = fixture();
        let plugin = TestPlugin::new();
        let seen = plugin.seen_savedata.clone();

        let mut supervised = supervised(plugin, "mods/stateless");
        let context = context(&f, "mods/stateless");
        let mut report = ApplyReport::new();
        f.supervisor
            .run(
                &mut supervised,
                &context,
                &f.applicator,
                &f.loader,
                &f.host_module,
                &mut report,
            )
            .await;

        // 不声明持久化数据：装配默认文档且不产生诊断
        assert_eq!(seen.lock().unwrap().clone().unwrap(), Savedata::empty());
        assert!(report.savedata_errors.is_empty());
        assert!(!f.store.path_for("mods/stateless").exists());
    }

    #[tokio::test]
    async fn test_configure_failure_blocks_patch_submission() {
        let f = fixture();
        let mut plugin = TestPlugin::new();
        plugin.fail_configure = true;
        plugin.ops = vec![PatchOp::prefix(
            MethodRef::host("Game.World", "Terrain", "Generate"),
            MethodRef::host("Mods.Stubs", "Hooks", "Before"),
        )];

        let mut supervised = supervised(plugin, "mods/halfway");
        let context = context(&f, "mods/halfway");
        let mut report = ApplyReport::new();
        f.supervisor
            .run(
                &mut supervised,
                &context,
                &f.applicator,
                &f.loader,
                &f.host_module,
                &mut report,
            )
            .await;

        assert_eq!(supervised.state(), LifecycleState::Failed);
        assert!(report.lifecycle_errors["mods/halfway"].starts_with("configure:"));
        assert!(report.unresolved_references.is_empty());
        assert!(report.install_failures.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_patch_outcomes_yield_partially_applied() {
        let f = fixture();
        let mut plugin = TestPlugin::new();
        plugin.ops = vec![
            PatchOp::prefix(
                MethodRef::host("Game.World", "Terrain", "Generate"),
                MethodRef::host("Mods.Stubs", "Hooks", "Before"),
            ),
            PatchOp::prefix(
                MethodRef::host("Game.World", "Terrain", "Missing"),
                MethodRef::host("Mods.Stubs", "Hooks", "Before"),
            ),
        ];

        let mut supervised = supervised(plugin, "mods/mixed");
        let context = context(&f, "mods/mixed");
        let mut report = ApplyReport::new();
        f.supervisor
            .run(
                &mut supervised,
                &context,
                &f.applicator,
                &f.loader,
                &f.host_module,
                &mut report,
            )
            .await;

        assert_eq!(supervised.state(), LifecycleState::PartiallyApplied);
        assert_eq!(report.states["mods/mixed"], LifecycleState::PartiallyApplied);
        assert_eq!(report.unresolved_references["mods/mixed"].len(), 1);
    }

    #[test]
    fn test_terminal_states() {
        assert!(LifecycleState::Applied.is_terminal());
        assert!(LifecycleState::PartiallyApplied.is_terminal());
        assert!(LifecycleState::Failed.is_terminal());
        assert!(!LifecycleState::Created.is_terminal());
        assert!(!LifecycleState::PatchesSubmitted.is_terminal());
    }
}
