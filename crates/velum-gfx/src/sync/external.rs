//! 与其他 API（例如 CUDA）之间的 fence 桥接
//!
//! 同一个 fence 导出为共享句柄后，由外部 API 导入为它自己的 semaphore。
//! 之后双方都可以 signal / wait 同一条时间线，不需要经过 host。

use crate::error::GfxResult;

/// fence 导出后的原生共享句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxExternalHandle {
    /// POSIX 文件描述符（Vulkan `OPAQUE_FD`），导入方负责关闭
    Fd(i32),
    /// Win32 `HANDLE`
    Win32(isize),
    /// 不对应任何系统句柄，只在同一个进程内有意义（CPU 后端）
    Opaque(u64),
}

/// 外部的执行流，例如导入了共享 fence 的 CUDA stream
///
/// 两个方法都只是把操作排进流里，不阻塞 host
pub trait GfxExternalStream {
    /// 流上之前的工作完成后，把共享 fence signal 到 `value`
    fn signal(&self, value: u64) -> GfxResult<()>;

    /// 流上之后的工作等待共享 fence 到达 `value`
    fn wait(&self, value: u64) -> GfxResult<()>;

    fn name(&self) -> &str {
        "external-stream"
    }
}
