//! 补丁校验与应用
//!
//! 对插件提交的每个补丁操作按提交顺序执行三步协议：解析目标与
//! 桩方法引用、受保护命名空间检查、委托拦截引擎安装。框架本身
//! 不做任何指令修补：引擎是通过窄接口调用的外部能力。

use crate::modules::{CodeModule, ModuleLoader};
use crate::{MethodRef, MethodToken, PatchLocation, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// 受保护命名空间前缀 - 进程级、构建期固定、只读
///
/// 任何插件都不得拦截声明类型落在这些前缀之下的方法。
/// 按列表顺序检查，首个命中即短路。
pub const PROTECTED_NAMESPACES: &[&str] = &["System", "ModLoom"];

/// 拦截引擎 - 外部二进制修补能力的窄接口
pub trait InterceptionEngine: Send + Sync {
    /// 在目标方法之前安装桩方法
    fn install_prefix(&self, target: &MethodToken, stub: &MethodToken) -> Result<()>;

    /// 在目标方法之后安装桩方法
    fn install_postfix(&self, target: &MethodToken, stub: &MethodToken) -> Result<()>;
}

/// 拦截引擎工厂 - 每次应用操作创建一个引擎实例
///
/// 创建失败是操作级致命错误。
pub trait EngineFactory: Send + Sync {
    /// 创建引擎实例
    fn create(&self) -> Result<Arc<dyn InterceptionEngine>>;
}

/// 补丁操作 - 插件在 initialize/configure 期间登记的拦截请求
///
/// 一经应用器读取即不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOp {
    /// 目标方法引用
    pub target: MethodRef,
    /// 桩方法引用
    pub stub: MethodRef,
    /// 补丁位置
    pub location: PatchLocation,
}

impl PatchOp {
    /// 创建前置补丁操作
    pub fn prefix(target: MethodRef, stub: MethodRef) -> Self {
        Self {
            target,
            stub,
            location: PatchLocation::Prefix,
        }
    }

    /// 创建后置补丁操作
    pub fn postfix(target: MethodRef, stub: MethodRef) -> Self {
        Self {
            target,
            stub,
            location: PatchLocation::Postfix,
        }
    }
}

/// 单个补丁操作的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PatchOutcome {
    /// 安装成功
    Installed {
        target: String,
        location: PatchLocation,
    },
    /// 目标或桩方法引用无法解析
    UnresolvedReference { reference: String },
    /// 目标落在受保护命名空间内
    ProtectedNamespace {
        target: String,
        matched_prefix: String,
    },
    /// 引擎安装失败
    InstallFailed { target: String, message: String },
}

impl PatchOutcome {
    /// 是否安装成功
    pub fn is_installed(&self) -> bool {
        matches!(self, PatchOutcome::Installed { .. })
    }
}

/// 补丁应用器
pub struct PatchApplicator {
    /// 拦截引擎实例 - 整个应用操作共享同一个
    engine: Arc<dyn InterceptionEngine>,
    /// 受保护命名空间规则
    protected: &'static [&'static str],
}

impl PatchApplicator {
    /// 创建新的补丁应用器
    pub fn new(engine: Arc<dyn InterceptionEngine>) -> Self {
        Self {
            engine,
            protected: PROTECTED_NAMESPACES,
        }
    }

    /// 按提交顺序处理一个插件的补丁操作，不重排也不去重
    ///
    /// 每个操作独立成败：一个坏拦截绝不阻塞后面的操作。
    pub fn apply(
        &self,
        loader: &ModuleLoader,
        host_module: &Arc<dyn CodeModule>,
        ops: &[PatchOp],
    ) -> Vec<PatchOutcome> {
        let mut outcomes = Vec::with_capacity(ops.len());

        for op in ops {
            let target = match loader.resolve_method(host_module, &op.target) {
                Some(token) => token,
                None => {
                    warn!("Unresolved patch target: {}", op.target.full_name());
                    outcomes.push(PatchOutcome::UnresolvedReference {
                        reference: op.target.full_name(),
                    });
                    continue;
                }
            };
            let stub = match loader.resolve_method(host_module, &op.stub) {
                Some(token) => token,
                None => {
                    warn!("Unresolved patch stub: {}", op.stub.full_name());
                    outcomes.push(PatchOutcome::UnresolvedReference {
                        reference: op.stub.full_name(),
                    });
                    continue;
                }
            };

            if let Some(prefix) = self.matched_protected_prefix(&target.namespace) {
                warn!(
                    "Rejected patch on protected namespace: {} (rule '{}')",
                    target.full_name(),
                    prefix
                );
                outcomes.push(PatchOutcome::ProtectedNamespace {
                    target: target.full_name(),
                    matched_prefix: prefix.to_string(),
                });
                continue;
            }

            let installed = match op.location {
                PatchLocation::Prefix => self.engine.install_prefix(&target, &stub),
                PatchLocation::Postfix => self.engine.install_postfix(&target, &stub),
            };
            match installed {
                Ok(()) => {
                    debug!(
                        "Installed {:?} interception at {}",
                        op.location,
                        target.full_name()
                    );
                    outcomes.push(PatchOutcome::Installed {
                        target: target.full_name(),
                        location: op.location,
                    });
                }
                Err(e) => {
                    warn!(
                        "Engine failed to install patch at {}: {}",
                        target.full_name(),
                        e
                    );
                    outcomes.push(PatchOutcome::InstallFailed {
                        target: target.full_name(),
                        message: e.to_string(),
                    });
                }
            }
        }

        outcomes
    }

    /// 首个命中的受保护前缀，按规则顺序检查
    fn matched_protected_prefix(&self, namespace: &str) -> Option<&'static str> {
        self.protected
            .iter()
            .find(|prefix| namespace.starts_with(*prefix))
            .copied()
    }
}
