//! 插件能力契约与运行时上下文
//!
//! 生命周期钩子以显式 `Result` 报告失败：initialize/configure 返回
//! `Err` 对该插件致命，但绝不升级为操作级失败。

use crate::savedata::{Savedata, SavedataStore};
use crate::{ModLoomError, PatchOp, PluginId, Result, SavedataId};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// 核心插件特征 - 所有插件必须实现
///
/// 监督器按固定顺序驱动：`initialize` → 存档装配 → `configure` →
/// 补丁提交。实例一经创建便存活到进程结束，不会被中途销毁。
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 插件是否声明持久化数据
    fn has_savedata(&self) -> bool {
        false
    }

    /// 当前存档文档
    fn savedata(&self) -> &Savedata;

    /// 装配存档文档 - 由监督器在 `configure` 之前调用
    fn set_savedata(&mut self, document: Savedata);

    /// 本插件请求的补丁操作，按提交顺序处理
    fn patch_ops(&self) -> Vec<PatchOp>;

    /// 初始化插件
    async fn initialize(&mut self, context: &PluginContext) -> Result<()>;

    /// 配置插件 - 此时存档文档已装配完毕
    async fn configure(&mut self, context: &PluginContext) -> Result<()>;
}

/// 插件上下文 - 提供插件运行时环境
///
/// 每次应用操作为每个插件构造一份，取代跨调用的全局注册表。
pub struct PluginContext {
    /// 插件ID（类型完整名称）
    pub plugin_id: PluginId,
    /// 存档身份
    pub savedata_id: SavedataId,
    /// 宿主下发的配置数据
    pub config: HashMap<String, serde_json::Value>,
    /// 存档仓库句柄，支撑插件自行触发的后台保存
    store: Arc<SavedataStore>,
}

impl PluginContext {
    /// 创建新的插件上下文
    pub fn new(
        plugin_id: PluginId,
        savedata_id: SavedataId,
        store: Arc<SavedataStore>,
    ) -> Self {
        Self {
            plugin_id,
            savedata_id,
            config: HashMap::new(),
            store,
        }
    }

    /// 设置配置
    pub fn with_config(mut self, config: HashMap<String, serde_json::Value>) -> Self {
        self.config = config;
        self
    }

    /// 获取配置值
    pub fn get_config<T>(&self, key: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = self
            .config
            .get(key)
            .ok_or_else(|| ModLoomError::ConfigNotFound {
                key: key.to_string(),
            })?;

        serde_json::from_value(value.clone()).map_err(|e| ModLoomError::ConfigValidation {
            message: format!("Failed to deserialize config key '{}': {}", key, e),
        })
    }

    /// 立即持久化给定的存档文档
    ///
    /// 相对调用方即发即忘：保存作为独立后台任务调度，失败被
    /// 仓库记日志后丢弃，绝不回传到这里。
    pub fn request_save(&self, document: &Savedata) {
        self.store
            .save_in_background(&self.savedata_id, document.clone());
    }
}
