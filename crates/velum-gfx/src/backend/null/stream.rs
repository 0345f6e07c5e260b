use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::null::{NullBackend, NullFenceState};
use crate::error::{GfxError, GfxResult};
use crate::sync::external::{GfxExternalHandle, GfxExternalStream};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullStreamOp {
    Signal(u64),
    Wait(u64),
}

/// 模拟导入了共享 fence 的外部执行流（例如 CUDA stream）
///
/// 流上没有真正的工作，`signal` 立即生效
pub struct NullExternalStream {
    backend: NullBackend,
    fence: Arc<NullFenceState>,
    name: String,
    ops: Mutex<Vec<NullStreamOp>>,
}

impl NullExternalStream {
    /// 通过导出的句柄导入 fence
    pub fn import(backend: &NullBackend, handle: GfxExternalHandle, name: &str) -> GfxResult<Self> {
        let GfxExternalHandle::Opaque(id) = handle else {
            return Err(GfxError::InvalidArgument(format!("null backend cannot import {handle:?}")));
        };
        let fence = backend
            .find_fence(id)
            .ok_or_else(|| GfxError::InvalidArgument(format!("no live fence with id {id}")))?;
        Ok(Self {
            backend: backend.clone(),
            fence,
            name: name.to_string(),
            ops: Mutex::new(Vec::new()),
        })
    }

    /// 流上录制过的操作
    pub fn ops(&self) -> Vec<NullStreamOp> {
        self.ops.lock().clone()
    }

    #[inline]
    pub fn fence_value(&self) -> u64 {
        self.fence.completed()
    }
}

impl GfxExternalStream for NullExternalStream {
    fn signal(&self, value: u64) -> GfxResult<()> {
        if self.backend.is_device_lost() {
            return Err(GfxError::DeviceLost);
        }
        self.ops.lock().push(NullStreamOp::Signal(value));
        self.fence.signal(value);
        if self.backend.is_auto_complete() {
            self.backend.complete_all();
        }
        Ok(())
    }

    fn wait(&self, value: u64) -> GfxResult<()> {
        self.ops.lock().push(NullStreamOp::Wait(value));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
