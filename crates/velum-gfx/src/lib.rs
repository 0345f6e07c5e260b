//! Velum GFX 层
//!
//! 位于应用和原生图形后端之间：录制命令时自动插入最少的资源状态转换，提交后按 fence 的进度
//! 回收 transient heap 和延迟释放的原生对象。核心逻辑只依赖 [`backend::GfxBackend`]，
//! 每个原生 API 提供一个实现。

/// 在当前作用域打一个 tracy span，没有开启 `profiling` feature 时为空操作
#[doc(hidden)]
#[macro_export]
macro_rules! gfx_span {
    ($name:literal) => {
        #[cfg(feature = "profiling")]
        let _span = tracy_client::span!($name);
    };
}

pub mod backend;
pub mod basic;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod gc;
pub mod pool;
pub mod registry;
pub mod resources;
pub mod sync;
