//! 提交计数器
//!
//! 每个 device 持有一个单调递增的 fence。`signaled_value` 是 host 侧已经交给队列
//! signal 的最大值，`current_value` 从后端读取设备实际完成到的值。
//! "值 V 已完成" 等价于 `current_value() >= V`。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::GfxBackend;
use crate::error::{GfxError, GfxResult};

/// # Destroy
/// 需要手动调用 [`GfxFence::destroy`]
pub struct GfxFence<B: GfxBackend> {
    native: B::Fence,
    signaled_value: AtomicU64,
    shared: bool,
    name: String,
    destroyed: bool,
}

// new & init
impl<B: GfxBackend> GfxFence<B> {
    /// # param
    /// * shared - 是否可以导出给其他 API
    pub fn new(backend: &B, initial_value: u64, shared: bool, name: &str) -> GfxResult<Self> {
        let native = backend.create_fence(initial_value, shared, name)?;
        log::info!("create fence <{}>, initial value {}, shared: {}", name, initial_value, shared);
        Ok(Self {
            native,
            signaled_value: AtomicU64::new(initial_value),
            shared,
            name: name.to_string(),
            destroyed: false,
        })
    }

    pub fn destroy(&mut self, backend: &B) {
        if self.destroyed {
            return;
        }
        backend.destroy_fence(&self.native);
        self.destroyed = true;
    }
}

// getters
impl<B: GfxBackend> GfxFence<B> {
    #[inline]
    pub fn native(&self) -> &B::Fence {
        &self.native
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// 最近一次交给队列 signal 的值
    #[inline]
    pub fn signaled_value(&self) -> u64 {
        self.signaled_value.load(Ordering::Acquire)
    }

    /// 下一次 signal 时使用的值
    #[inline]
    pub fn next_value(&self) -> u64 {
        self.signaled_value() + 1
    }
}

// tools
impl<B: GfxBackend> GfxFence<B> {
    /// 推进 signal 计数
    ///
    /// `None` 表示在上一个值的基础上加 1；显式的值必须大于上一个值
    ///
    /// # return
    /// 本次 signal 使用的值
    pub fn update_signaled_value(&self, value: Option<u64>) -> GfxResult<u64> {
        match value {
            None => Ok(self.signaled_value.fetch_add(1, Ordering::AcqRel) + 1),
            Some(requested) => {
                self.signaled_value
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| (requested > current).then_some(requested))
                    .map_err(|current| GfxError::NonMonotonicFenceValue { requested, current })?;
                Ok(requested)
            }
        }
    }

    /// 设备实际完成到的值，不阻塞
    pub fn current_value(&self, backend: &B) -> GfxResult<u64> {
        backend.fence_completed_value(&self.native).inspect_err(|e| {
            if e.is_device_lost() {
                log::error!("fence <{}>: device lost while polling", self.name);
            }
        })
    }

    #[inline]
    pub fn is_completed(&self, backend: &B, value: u64) -> GfxResult<bool> {
        Ok(self.current_value(backend)? >= value)
    }

    /// 阻塞直到 fence 到达 `value`，没有超时
    ///
    /// `None` 表示等待最近一次 signal 的值
    pub fn wait(&self, backend: &B, value: Option<u64>) -> GfxResult<()> {
        crate::gfx_span!("GfxFence::wait");
        let value = value.unwrap_or_else(|| self.signaled_value());
        if self.current_value(backend)? >= value {
            return Ok(());
        }
        backend.wait_fence(&self.native, value).inspect_err(|e| {
            if e.is_device_lost() {
                log::error!("fence <{}>: device lost while waiting for {}", self.name, value);
            }
        })
    }
}

impl<B: GfxBackend> Drop for GfxFence<B> {
    fn drop(&mut self) {
        if !self.destroyed && !std::thread::panicking() {
            log::error!("fence <{}> dropped without destroy()", self.name);
            debug_assert!(self.destroyed, "fence <{}> must be destroyed manually", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    #[test]
    fn test_auto_increment() {
        let backend = NullBackend::new();
        let mut fence = GfxFence::new(&backend, 0, false, "test").unwrap();
        assert_eq!(fence.update_signaled_value(None).unwrap(), 1);
        assert_eq!(fence.update_signaled_value(None).unwrap(), 2);
        assert_eq!(fence.signaled_value(), 2);
        assert_eq!(fence.next_value(), 3);
        fence.destroy(&backend);
    }

    #[test]
    fn test_explicit_value_must_increase() {
        let backend = NullBackend::new();
        let mut fence = GfxFence::new(&backend, 0, false, "test").unwrap();
        assert_eq!(fence.update_signaled_value(Some(10)).unwrap(), 10);
        assert!(matches!(
            fence.update_signaled_value(Some(10)),
            Err(GfxError::NonMonotonicFenceValue { requested: 10, current: 10 })
        ));
        assert_eq!(fence.update_signaled_value(None).unwrap(), 11);
        fence.destroy(&backend);
    }

    #[test]
    fn test_wait_returns_once_completed() {
        let backend = NullBackend::new();
        let mut fence = GfxFence::new(&backend, 0, false, "test").unwrap();
        let value = fence.update_signaled_value(None).unwrap();
        backend.queue_signal(fence.native(), value).unwrap();
        assert!(!fence.is_completed(&backend, value).unwrap());

        backend.complete_all();
        fence.wait(&backend, None).unwrap();
        assert_eq!(fence.current_value(&backend).unwrap(), value);
        fence.destroy(&backend);
    }
}
