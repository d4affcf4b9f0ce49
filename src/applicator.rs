//! 补丁应用编排
//!
//! 单一入口 `Applicator::apply`：依赖模块装载 → 引擎创建 →
//! 用户代码模块装载 → 插件发现 → 逐插件生命周期驱动与补丁应用
//! → 聚合报告。整个流程在调用方任务上按严格顺序执行，唯一的
//! 异步工作是插件自行触发的后台存档保存。操作一旦开始便不可
//! 取消，任何步骤都不设超时。

use crate::modules::{CodeModule, ModuleHost, ModuleLoader};
use crate::patching::{EngineFactory, PatchApplicator};
use crate::plugins::{
    discover_plugins, LifecycleState, PluginContext, PluginSupervisor, SupervisedPlugin,
};
use crate::report::ApplyReport;
use crate::savedata::{SavedataStore, DEFAULT_SAVEDATA_FILE};
use crate::{ModLoomError, ModuleBlob, Result, SavedataId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// 应用器配置 - 调用方提供的不可变输入包，单次调用内只读
pub struct ApplicatorConfig {
    /// 依赖模块镜像，按装载顺序排列
    pub dependency_modules: Vec<ModuleBlob>,
    /// 宿主模块句柄 - 宿主代码对框架不透明，由调用方交出句柄
    pub host_module: Arc<dyn CodeModule>,
    /// 用户代码模块镜像，按装载顺序排列
    pub usercode_modules: Vec<ModuleBlob>,
    /// 插件类型完整名称到相对源路径的映射，用于派生存档身份
    pub identity_paths: HashMap<String, String>,
    /// 存档根目录
    pub savedata_root: PathBuf,
    /// 存档文件基础名
    pub savedata_file: String,
    /// 下发给每个插件上下文的配置数据
    pub plugin_config: HashMap<String, serde_json::Value>,
}

impl ApplicatorConfig {
    /// 创建最小配置
    pub fn new(host_module: Arc<dyn CodeModule>, savedata_root: impl Into<PathBuf>) -> Self {
        Self {
            dependency_modules: Vec::new(),
            host_module,
            usercode_modules: Vec::new(),
            identity_paths: HashMap::new(),
            savedata_root: savedata_root.into(),
            savedata_file: DEFAULT_SAVEDATA_FILE.to_string(),
            plugin_config: HashMap::new(),
        }
    }

    /// 设置依赖模块
    pub fn with_dependency_modules(mut self, blobs: Vec<ModuleBlob>) -> Self {
        self.dependency_modules = blobs;
        self
    }

    /// 设置用户代码模块
    pub fn with_usercode_modules(mut self, blobs: Vec<ModuleBlob>) -> Self {
        self.usercode_modules = blobs;
        self
    }

    /// 登记一条身份映射
    pub fn with_identity_path(
        mut self,
        type_name: impl Into<String>,
        relative_path: impl Into<String>,
    ) -> Self {
        self.identity_paths
            .insert(type_name.into(), relative_path.into());
        self
    }

    /// 设置存档文件基础名
    pub fn with_savedata_file(mut self, file_name: impl Into<String>) -> Self {
        self.savedata_file = file_name.into();
        self
    }

    /// 设置插件配置数据
    pub fn with_plugin_config(mut self, config: HashMap<String, serde_json::Value>) -> Self {
        self.plugin_config = config;
        self
    }
}

/// 补丁应用编排器
pub struct Applicator {
    /// 输入配置
    config: ApplicatorConfig,
    /// 模块装载原语
    module_host: Arc<dyn ModuleHost>,
    /// 拦截引擎工厂
    engine_factory: Arc<dyn EngineFactory>,
}

impl Applicator {
    /// 创建新的应用编排器
    pub fn new(
        config: ApplicatorConfig,
        module_host: Arc<dyn ModuleHost>,
        engine_factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            config,
            module_host,
            engine_factory,
        }
    }

    /// 执行一次完整的补丁应用操作
    ///
    /// 操作级致命错误（依赖模块装载失败、引擎创建失败）直接返回
    /// `Err` 并携带起因，不产生部分报告；其余一切失败都按插件或
    /// 按模块隔离，累积进最终报告。
    pub async fn apply(&self) -> Result<ApplyReport> {
        let mut report = ApplyReport::new();

        // 模块装载：宿主模块先注册，保证解析回退总能找到它
        let mut loader = ModuleLoader::new(self.module_host.clone());
        loader.register(self.config.host_module.clone());
        loader.load_dependencies(&self.config.dependency_modules)?;

        // 引擎创建失败不可恢复
        let engine = self
            .engine_factory
            .create()
            .map_err(|e| ModLoomError::EngineInit {
                message: e.to_string(),
            })?;

        // 用户代码模块失败按模块隔离
        let (modules, failures) = loader.load_usercode(&self.config.usercode_modules);
        for (module, message) in failures {
            report.record_module_load_error(&module, message);
        }

        let discovered = discover_plugins(&modules);

        let store = Arc::new(SavedataStore::new(
            self.config.savedata_root.clone(),
            self.config.savedata_file.clone(),
        ));
        let applicator = PatchApplicator::new(engine);
        let supervisor = PluginSupervisor::new(store.clone());

        // 逐插件按发现顺序驱动，彼此完全隔离
        for plugin in discovered {
            let identity = self.derive_identity(&plugin.type_name);
            match plugin.outcome {
                Ok(instance) => {
                    let context = PluginContext::new(
                        plugin.type_name.clone(),
                        identity.clone(),
                        store.clone(),
                    )
                    .with_config(self.config.plugin_config.clone());
                    let mut supervised = SupervisedPlugin::new(
                        instance,
                        plugin.type_name,
                        identity,
                        plugin.module,
                    );
                    supervisor
                        .run(
                            &mut supervised,
                            &context,
                            &applicator,
                            &loader,
                            &self.config.host_module,
                            &mut report,
                        )
                        .await;
                }
                Err(e) => {
                    // 实例化失败与 initialize 失败同类归档
                    warn!(
                        "Plugin type '{}' from module '{}' failed to instantiate: {}",
                        plugin.type_name, plugin.module, e
                    );
                    report.record_lifecycle_error(&identity, format!("instantiate: {}", e));
                    report.record_state(&identity, LifecycleState::Failed);
                }
            }
        }

        report.finish();
        info!(
            "Patch application finished: {} plugins supervised, clean = {}",
            report.plugin_count(),
            report.is_clean()
        );
        Ok(report)
    }

    /// 派生存档身份
    ///
    /// 优先使用调用方提供的相对源路径映射，保证类型改名或重排后
    /// 只要源路径不变存档就不丢；未映射的类型退回类型完整名称。
    fn derive_identity(&self, type_name: &str) -> SavedataId {
        self.config
            .identity_paths
            .get(type_name)
            .cloned()
            .unwrap_or_else(|| type_name.to_string())
    }
}
