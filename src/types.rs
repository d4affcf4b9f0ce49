//! ModLoom 核心类型系统
//!
//! 定义模块、方法引用和补丁位置等贯穿整个框架的基础类型

use serde::{Deserialize, Serialize};

/// 插件ID - 插件类型的完整名称
pub type PluginId = String;

/// 存档身份 - 从插件相对源路径派生的稳定键
pub type SavedataId = String;

/// 纳秒时间戳
pub type TimestampNs = i64;

/// 模块镜像 - 原始模块字节及其身份名称
#[derive(Debug, Clone)]
pub struct ModuleBlob {
    /// 模块名称
    pub name: String,
    /// 模块镜像字节
    pub bytes: Vec<u8>,
}

impl ModuleBlob {
    /// 创建新的模块镜像
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// 方法引用 - 插件提交的未解析引用
///
/// `module` 为 `None` 时在宿主模块中解析；否则通过模块解析回退机制
/// （按名称精确匹配已加载模块）定位声明模块。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// 声明模块名称，缺省为宿主模块
    pub module: Option<String>,
    /// 声明类型所在命名空间
    pub namespace: String,
    /// 声明类型名称
    pub type_name: String,
    /// 方法名称
    pub method: String,
}

impl MethodRef {
    /// 创建指向宿主模块的方法引用
    pub fn host(
        namespace: impl Into<String>,
        type_name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            module: None,
            namespace: namespace.into(),
            type_name: type_name.into(),
            method: method.into(),
        }
    }

    /// 创建指向指定模块的方法引用
    pub fn in_module(
        module: impl Into<String>,
        namespace: impl Into<String>,
        type_name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            module: Some(module.into()),
            namespace: namespace.into(),
            type_name: type_name.into(),
            method: method.into(),
        }
    }

    /// 完整方法名，用于诊断信息
    pub fn full_name(&self) -> String {
        match &self.module {
            Some(module) => format!(
                "[{}]{}.{}::{}",
                module, self.namespace, self.type_name, self.method
            ),
            None => format!("{}.{}::{}", self.namespace, self.type_name, self.method),
        }
    }
}

/// 已解析的方法令牌 - 交给拦截引擎的具体方法句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodToken {
    /// 声明模块名称
    pub module: String,
    /// 声明类型所在命名空间
    pub namespace: String,
    /// 声明类型名称
    pub type_name: String,
    /// 方法名称
    pub method: String,
}

impl MethodToken {
    /// 完整方法名，用于诊断信息
    pub fn full_name(&self) -> String {
        format!(
            "[{}]{}.{}::{}",
            self.module, self.namespace, self.type_name, self.method
        )
    }
}

/// 补丁位置 - 在目标方法原始执行之前或之后运行桩方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatchLocation {
    /// 目标方法执行之前
    Prefix,
    /// 目标方法执行之后
    Postfix,
}
