//! ModLoom - 插件监督与运行时补丁编排框架
//!
//! 把外部编译的代码模块装入运行中的宿主进程，发现其中的插件，
//! 驱动每个插件走完固定生命周期，跨重启持久化按插件的存档配置，
//! 并在安全规则约束下把插件请求的方法拦截委托给拦截引擎。
//!
//! # 架构分层
//!
//! - **模块装载层**: 装载原语与按名称的模块解析回退
//! - **插件监督层**: 清单发现、生命周期状态机、按插件失败隔离
//! - **补丁应用层**: 引用解析、受保护命名空间校验、引擎委托
//! - **存档层**: 身份到文件的确定性映射，后台即发即忘保存
//!
//! # 特性
//!
//! - **按插件隔离**: 一个插件的失败绝不波及其他插件
//! - **严格顺序**: 装载、发现与补丁安装顺序完全确定
//! - **窄协作接口**: 二进制修补与模块装载都是可替换的外部能力
//! - **显式结果**: 生命周期钩子与安装尝试以 `Result` 报告失败

pub mod applicator;
pub mod error;
pub mod modules;
pub mod patching;
pub mod plugins;
pub mod report;
pub mod savedata;
pub mod types;

// 重新导出核心类型
pub use applicator::*;
pub use error::*;
pub use modules::*;
pub use patching::*;
pub use plugins::*;
pub use report::*;
pub use savedata::*;
pub use types::*;

/// 框架信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FRAMEWORK_NAME: &str = "ModLoom";

/// 快速启动函数
pub async fn initialize() -> Result<()> {
    // 初始化日志系统
    let _ = tracing_subscriber::fmt::try_init();

    tracing::info!("Initializing {} v{}", FRAMEWORK_NAME, VERSION);
    tracing::info!("Per-plugin isolation, deterministic patch ordering");

    Ok(())
}
