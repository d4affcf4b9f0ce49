//! 模块加载系统
//!
//! 把外部编译的代码模块装入运行中的进程并建立解析回退机制。
//! 二进制装载本身是外部协作者能力：`ModuleHost` 把模块镜像变成
//! `CodeModule` 句柄，框架只负责装载顺序、失败策略和按名称的
//! 模块解析回退（运行时按身份找不到模块时，在已加载模块中做
//! 精确名称匹配并代为使用）。
//!
//! 插件发现走显式的清单/工厂接口：每个用户代码模块通过
//! `plugin_factories` 枚举自己携带的插件类型，而不是对已加载
//! 代码做反射内省。

use crate::plugins::Plugin;
use crate::{MethodRef, MethodToken, ModLoomError, ModuleBlob, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 已加载的代码模块句柄
pub trait CodeModule: Send + Sync {
    /// 模块名称
    fn name(&self) -> &str;

    /// 在本模块内解析方法引用，解析不到返回 `None`
    fn resolve_method(&self, reference: &MethodRef) -> Option<MethodToken>;

    /// 本模块携带的插件工厂清单，依赖模块为空
    fn plugin_factories(&self) -> Vec<Arc<dyn PluginFactory>> {
        Vec::new()
    }
}

/// 插件工厂 - 模块清单中一个插件类型的显式构造入口
pub trait PluginFactory: Send + Sync {
    /// 插件类型完整名称
    fn type_name(&self) -> &str;

    /// 默认构造一个插件实例
    fn create(&self) -> Result<Box<dyn Plugin>>;
}

/// 模块宿主 - 模块镜像到已加载模块的装载原语
pub trait ModuleHost: Send + Sync {
    /// 装载模块镜像
    fn load(&self, blob: &ModuleBlob) -> Result<Arc<dyn CodeModule>>;
}

/// 模块加载器
///
/// 维护按加载顺序排列的模块注册表。注册表同时充当模块解析回退：
/// `resolve` 按精确名称在已加载模块中查找。
pub struct ModuleLoader {
    /// 模块宿主
    host: Arc<dyn ModuleHost>,
    /// 已加载模块，按名称索引
    loaded: HashMap<String, Arc<dyn CodeModule>>,
    /// 加载顺序
    order: Vec<String>,
}

impl ModuleLoader {
    /// 创建新的模块加载器
    pub fn new(host: Arc<dyn ModuleHost>) -> Self {
        Self {
            host,
            loaded: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// 注册一个已加载模块，使其对解析回退可见
    ///
    /// 宿主模块在任何装载发生之前注册，保证回退总能找到它。
    pub fn register(&mut self, module: Arc<dyn CodeModule>) {
        let name = module.name().to_string();
        if self.loaded.insert(name.clone(), module).is_none() {
            self.order.push(name);
        }
    }

    /// 模块解析回退：按精确名称查找已加载模块
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CodeModule>> {
        self.loaded.get(name).cloned()
    }

    /// 已加载模块数量
    pub fn loaded_count(&self) -> usize {
        self.order.len()
    }

    /// 按加载顺序列出模块名称
    pub fn module_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// 按顺序装载依赖模块
    ///
    /// 任何一个依赖装载失败都中止整个操作：后续代码可能依赖它，
    /// 这是不可恢复的。
    pub fn load_dependencies(&mut self, blobs: &[ModuleBlob]) -> Result<()> {
        for blob in blobs {
            let module =
                self.host
                    .load(blob)
                    .map_err(|e| ModLoomError::DependencyLoad {
                        module: blob.name.clone(),
                        message: e.to_string(),
                    })?;
            debug!("Dependency module '{}' loaded", module.name());
            self.register(module);
        }
        Ok(())
    }

    /// 按顺序装载用户代码模块
    ///
    /// 失败按模块隔离：坏模块记录一条诊断后跳过，其余模块继续，
    /// 与框架其余部分的按插件隔离策略保持一致。
    pub fn load_usercode(
        &mut self,
        blobs: &[ModuleBlob],
    ) -> (Vec<Arc<dyn CodeModule>>, Vec<(String, String)>) {
        let mut modules = Vec::new();
        let mut failures = Vec::new();

        for blob in blobs {
            match self.host.load(blob) {
                Ok(module) => {
                    debug!("Usercode module '{}' loaded", module.name());
                    self.register(module.clone());
                    modules.push(module);
                }
                Err(e) => {
                    warn!("Usercode module '{}' failed to load: {}", blob.name, e);
                    failures.push((blob.name.clone(), e.to_string()));
                }
            }
        }

        info!(
            "Loaded {} usercode modules, {} failed",
            modules.len(),
            failures.len()
        );
        (modules, failures)
    }

    /// 解析方法引用
    ///
    /// 未指名模块的引用在宿主模块中解析；指名模块的引用先通过
    /// 解析回退定位声明模块。任一环节失败即为未解析引用。
    pub fn resolve_method(
        &self,
        host_module: &Arc<dyn CodeModule>,
        reference: &MethodRef,
    ) -> Option<MethodToken> {
        match &reference.module {
            Some(name) => self.resolve(name)?.resolve_method(reference),
            None => host_module.resolve_method(reference),
        }
    }
}

/// 静态代码模块 - 显式登记方法表和插件清单的进程内模块
///
/// 嵌入方用它描述宿主模块和测试模块；真正的二进制装载实现
/// 同样只需要满足 `CodeModule` 契约。
pub struct StaticModule {
    name: String,
    methods: Vec<(String, String, String)>,
    factories: Vec<Arc<dyn PluginFactory>>,
}

impl StaticModule {
    /// 创建新的静态模块
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            factories: Vec::new(),
        }
    }

    /// 登记一个可解析方法
    pub fn with_method(
        mut self,
        namespace: impl Into<String>,
        type_name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        self.methods
            .push((namespace.into(), type_name.into(), method.into()));
        self
    }

    /// 登记一个插件工厂
    pub fn with_factory(mut self, factory: Arc<dyn PluginFactory>) -> Self {
        self.factories.push(factory);
        self
    }
}

impl CodeModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_method(&self, reference: &MethodRef) -> Option<MethodToken> {
        self.methods
            .iter()
            .find(|(namespace, type_name, method)| {
                *namespace == reference.namespace
                    && *type_name == reference.type_name
                    && *method == reference.method
            })
            .map(|(namespace, type_name, method)| MethodToken {
                module: self.name.clone(),
                namespace: namespace.clone(),
                type_name: type_name.clone(),
                method: method.clone(),
            })
    }

    fn plugin_factories(&self) -> Vec<Arc<dyn PluginFactory>> {
        self.factories.clone()
    }
}

/// 静态模块宿主 - 按名称预登记模块镜像对应的 `CodeModule`
#[derive(Default)]
pub struct StaticModuleHost {
    modules: HashMap<String, Arc<dyn CodeModule>>,
}

impl StaticModuleHost {
    /// 创建空的静态模块宿主
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个模块实现
    pub fn with_module(mut self, module: Arc<dyn CodeModule>) -> Self {
        self.modules.insert(module.name().to_string(), module);
        self
    }
}

impl ModuleHost for StaticModuleHost {
    fn load(&self, blob: &ModuleBlob) -> Result<Arc<dyn CodeModule>> {
        self.modules
            .get(&blob.name)
            .cloned()
            .ok_or_else(|| ModLoomError::ModuleLoad {
                message: format!("no registered image for module '{}'", blob.name),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with(names: &[&str]) -> Arc<StaticModuleHost> {
        let mut host = StaticModuleHost::new();
        for name in names {
            host = host.with_module(Arc::new(
                StaticModule::new(*name).with_method("Game.World", "Terrain", "Generate"),
            ));
        }
        Arc::new(host)
    }

    #[test]
    fn test_dependency_load_failure_is_fatal() {
        let mut loader = ModuleLoader::new(host_with(&["dep-a"]));
        let blobs = vec![
            ModuleBlob::new("dep-a", vec![1]),
            ModuleBlob::new("dep-missing", vec![2]),
        ];

        let result = loader.load_dependencies(&blobs);
        assert!(matches!(
            result,
            Err(ModLoomError::DependencyLoad { ref module, .. }) if module == "dep-missing"
        ));
    }

    #[test]
    fn test_usercode_load_failure_is_isolated() {
        let mut loader = ModuleLoader::new(host_with(&["mod-a", "mod-c"]));
        let blobs = vec![
            ModuleBlob::new("mod-a", vec![1]),
            ModuleBlob::new("mod-b", vec![2]),
            ModuleBlob::new("mod-c", vec![3]),
        ];

        let (modules, failures) = loader.load_usercode(&blobs);

        // 坏模块被跳过，其余模块按顺序继续
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].name(), "mod-a");
        assert_eq!(modules[1].name(), "mod-c");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "mod-b");
    }

    #[test]
    fn test_resolution_fallback_by_exact_name() {
        let mut loader = ModuleLoader::new(host_with(&["physics"]));
        loader
            .load_dependencies(&[ModuleBlob::new("physics", vec![1])])
            .unwrap();

        assert!(loader.resolve("physics").is_some());
        assert!(loader.resolve("physic").is_none());
        assert!(loader.resolve("PHYSICS").is_none());
    }

    #[test]
    fn test_method_resolution_against_host_and_modules() {
        let host_module: Arc<dyn CodeModule> = Arc::new(
            StaticModule::new("host").with_method("Game.Core", "Session", "Begin"),
        );
        let mut loader = ModuleLoader::new(host_with(&["physics"]));
        loader.register(host_module.clone());
        loader
            .load_dependencies(&[ModuleBlob::new("physics", vec![1])])
            .unwrap();

        // 未指名模块的引用在宿主模块中解析
        let token = loader
            .resolve_method(&host_module, &MethodRef::host("Game.Core", "Session", "Begin"))
            .unwrap();
        assert_eq!(token.module, "host");

        // 指名模块的引用走解析回退
        let token = loader
            .resolve_method(
                &host_module,
                &MethodRef::in_module("physics", "Game.World", "Terrain", "Generate"),
            )
            .unwrap();
        assert_eq!(token.module, "physics");

        // 模块或方法缺失都是未解析
        assert!(loader
            .resolve_method(&host_module, &MethodRef::host("Game.Core", "Session", "End"))
            .is_none());
        assert!(loader
            .resolve_method(
                &host_module,
                &MethodRef::in_module("audio", "Game.Audio", "Mixer", "Mute"),
            )
            .is_none());
    }

    #[test]
    fn test_register_is_idempotent_per_name() {
        let mut loader = ModuleLoader::new(Arc::new(StaticModuleHost::new()));
        let module: Arc<dyn CodeModule> = Arc::new(StaticModule::new("host"));
        loader.register(module.clone());
        loader.register(module);
        assert_eq!(loader.module_names(), vec!["host"]);
        assert_eq!(loader.loaded_count(), 1);
    }
}
