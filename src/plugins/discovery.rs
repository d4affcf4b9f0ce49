//! 插件发现
//!
//! 对每个成功加载的用户代码模块，按加载顺序枚举其插件工厂清单
//! 并逐一默认构造。构造失败不在这里截获语义：它作为该插件的
//! 实例化结果向上传递，由调用方按 initialize 失败同等归类。

use crate::modules::CodeModule;
use crate::plugins::Plugin;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// 一次发现的插件类型及其实例化结果
pub struct DiscoveredPlugin {
    /// 插件类型完整名称
    pub type_name: String,
    /// 来源模块名称
    pub module: String,
    /// 实例化结果
    pub outcome: Result<Box<dyn Plugin>>,
}

/// 扫描已加载的用户代码模块，实例化每个清单登记的插件类型
pub fn discover_plugins(modules: &[Arc<dyn CodeModule>]) -> Vec<DiscoveredPlugin> {
    let mut discovered = Vec::new();

    for module in modules {
        for factory in module.plugin_factories() {
            debug!(
                "Discovered plugin type '{}' in module '{}'",
                factory.type_name(),
                module.name()
            );
            discovered.push(DiscoveredPlugin {
                type_name: factory.type_name().to_string(),
                module: module.name().to_string(),
                outcome: factory.create(),
            });
        }
    }

    info!(
        "Discovered {} plugin types across {} usercode modules",
        discovered.len(),
        modules.len()
    );
    discovered
}
