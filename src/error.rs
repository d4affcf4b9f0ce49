//! ModLoom 错误处理系统
//!
//! 统一的错误类型和错误处理机制。错误分为四个层级：
//! 操作级致命错误（依赖模块加载失败、拦截引擎创建失败）、
//! 插件级致命错误（initialize/configure 失败）、
//! 插件级非致命诊断（存档加载失败、引用无法解析、补丁安装失败）、
//! 以及静默吞掉的后台存档写入失败。

use thiserror::Error;

/// 框架统一错误类型
#[derive(Error, Debug)]
pub enum ModLoomError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 依赖模块加载失败 - 操作级致命错误
    #[error("Dependency module '{module}' failed to load: {message}")]
    DependencyLoad { module: String, message: String },

    /// 用户代码模块加载失败 - 按模块隔离，不中止整个操作
    #[error("Usercode module '{module}' failed to load: {message}")]
    UsercodeLoad { module: String, message: String },

    /// 拦截引擎实例创建失败 - 操作级致命错误
    #[error("Interception engine could not be created: {message}")]
    EngineInit { message: String },

    /// 模块宿主侧的通用加载失败
    #[error("Module load error: {message}")]
    ModuleLoad { message: String },

    /// 插件实例化失败 - 与 initialize 失败同等对待
    #[error("Plugin instantiation failed for '{type_name}': {message}")]
    PluginInstantiation { type_name: String, message: String },

    /// 插件生命周期钩子失败
    #[error("Plugin lifecycle error: {message}")]
    Lifecycle { message: String },

    /// 存档文档加载失败 - 插件级非致命
    #[error("Savedata load failed for '{identity}': {message}")]
    SavedataLoad { identity: String, message: String },

    /// 存档文档格式错误
    #[error("Savedata format error: {message}")]
    SavedataFormat { message: String },

    /// 上下文配置键不存在
    #[error("Configuration key '{key}' not found")]
    ConfigNotFound { key: String },

    /// 上下文配置值校验失败
    #[error("Configuration error: {message}")]
    ConfigValidation { message: String },

    /// 补丁安装失败 - 插件级非致命
    #[error("Patch installation failed: {message}")]
    PatchInstall { message: String },

    /// 内部错误
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModLoomError {
    /// 创建生命周期相关错误
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    /// 创建补丁安装相关错误
    pub fn patch_install(message: impl Into<String>) -> Self {
        Self::PatchInstall {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ModLoomError>;
