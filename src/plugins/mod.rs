//! 插件监督层
//!
//! 定义插件能力契约、运行时上下文、清单发现和按插件隔离的
//! 生命周期监督器

pub mod core;
pub mod discovery;
pub mod supervisor;

// 重新导出核心组件
pub use self::core::*;
pub use self::discovery::*;
pub use self::supervisor::*;
