//! 结果聚合
//!
//! 在整个多模块操作期间增量累积诊断，最终一次性返回给调用方。
//! 操作级致命错误不产生报告：它们是 `apply` 的 `Err` 分支，
//! 携带具体错误码和起因。

use crate::plugins::LifecycleState;
use crate::{PatchOutcome, SavedataId, TimestampNs};
use serde::Serialize;
use std::collections::HashMap;

/// 应用报告 - 一次补丁应用操作的聚合结果
///
/// 所有按插件的条目以存档身份为键。不变量：一个插件至多出现在
/// 一条 `lifecycle_errors` 里，且一旦出现便不会再进入后续阶段的
/// 任何映射；非致命诊断彼此独立、可以并存。
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// 加载失败的用户代码模块及原因，按模块名称为键
    pub module_load_errors: HashMap<String, String>,
    /// initialize/configure/实例化失败 - 对该插件致命
    pub lifecycle_errors: HashMap<SavedataId, String>,
    /// 存档加载失败 - 非致命，插件以默认空文档继续
    pub savedata_errors: HashMap<SavedataId, String>,
    /// 无法解析的目标/桩方法引用
    pub unresolved_references: HashMap<SavedataId, Vec<String>>,
    /// 受保护命名空间违规，含命中的前缀
    pub namespace_violations: HashMap<SavedataId, Vec<String>>,
    /// 引擎安装失败
    pub install_failures: HashMap<SavedataId, Vec<String>>,
    /// 每个插件的终态
    pub states: HashMap<SavedataId, LifecycleState>,
    /// 操作开始时间
    pub started_at: TimestampNs,
    /// 操作结束时间
    pub finished_at: TimestampNs,
}

impl ApplyReport {
    /// 创建空报告并记下开始时间
    pub fn new() -> Self {
        Self {
            module_load_errors: HashMap::new(),
            lifecycle_errors: HashMap::new(),
            savedata_errors: HashMap::new(),
            unresolved_references: HashMap::new(),
            namespace_violations: HashMap::new(),
            install_failures: HashMap::new(),
            states: HashMap::new(),
            started_at: now_ns(),
            finished_at: 0,
        }
    }

    /// 记下结束时间
    pub fn finish(&mut self) {
        self.finished_at = now_ns();
    }

    /// 记录用户代码模块加载失败
    pub fn record_module_load_error(&mut self, module: &str, message: String) {
        self.module_load_errors.insert(module.to_string(), message);
    }

    /// 记录插件级致命错误
    pub fn record_lifecycle_error(&mut self, identity: &SavedataId, message: String) {
        self.lifecycle_errors.insert(identity.clone(), message);
    }

    /// 记录存档加载失败
    pub fn record_savedata_error(&mut self, identity: &SavedataId, message: String) {
        self.savedata_errors.insert(identity.clone(), message);
    }

    /// 记录插件终态
    pub fn record_state(&mut self, identity: &SavedataId, state: LifecycleState) {
        self.states.insert(identity.clone(), state);
    }

    /// 把一个补丁操作结果归入对应的诊断映射
    pub fn record_patch_outcome(&mut self, identity: &SavedataId, outcome: &PatchOutcome) {
        match outcome {
            PatchOutcome::Installed { .. } => {}
            PatchOutcome::UnresolvedReference { reference } => {
                self.unresolved_references
                    .entry(identity.clone())
                    .or_default()
                    .push(reference.clone());
            }
            PatchOutcome::ProtectedNamespace {
                target,
                matched_prefix,
            } => {
                self.namespace_violations
                    .entry(identity.clone())
                    .or_default()
                    .push(format!(
                        "{} (protected prefix '{}')",
                        target, matched_prefix
                    ));
            }
            PatchOutcome::InstallFailed { target, message } => {
                self.install_failures
                    .entry(identity.clone())
                    .or_default()
                    .push(format!("{}: {}", target, message));
            }
        }
    }

    /// 已被监督过的插件数量
    pub fn plugin_count(&self) -> usize {
        self.states.len()
    }

    /// 是否全程无任何诊断
    pub fn is_clean(&self) -> bool {
        self.module_load_errors.is_empty()
            && self.lifecycle_errors.is_empty()
            && self.savedata_errors.is_empty()
            && self.unresolved_references.is_empty()
            && self.namespace_violations.is_empty()
            && self.install_failures.is_empty()
    }
}

impl Default for ApplyReport {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ns() -> TimestampNs {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
