use crate::backend::GfxBackend;
use crate::resources::state::GfxResourceState;
use crate::resources::state_tracker::GfxResourceStateTracker;

/// 外部资源层创建的 buffer，附带它的状态 tracker
///
/// 这里不负责创建和销毁原生 buffer：不再使用时通过
/// [`crate::device::GfxDevice::retire_buffer`] 交给延迟释放队列，或者 [`Self::into_native`] 取回。
pub struct GfxBuffer<B: GfxBackend> {
    native: B::Buffer,
    size: u64,
    tracker: GfxResourceStateTracker,
    name: String,
}

// new & init
impl<B: GfxBackend> GfxBuffer<B> {
    pub fn from_native(native: B::Buffer, size: u64, initial_state: GfxResourceState, name: impl Into<String>) -> Self {
        Self {
            native,
            size,
            tracker: GfxResourceStateTracker::new(initial_state, 1, 1),
            name: name.into(),
        }
    }

    #[inline]
    pub fn into_native(self) -> B::Buffer {
        self.native
    }
}

// getters
impl<B: GfxBackend> GfxBuffer<B> {
    #[inline]
    pub fn native(&self) -> &B::Buffer {
        &self.native
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state_tracker(&self) -> &GfxResourceStateTracker {
        &self.tracker
    }

    #[inline]
    pub fn state_tracker_mut(&mut self) -> &mut GfxResourceStateTracker {
        &mut self.tracker
    }

    /// buffer 只有聚合状态
    #[inline]
    pub fn state(&self) -> GfxResourceState {
        self.tracker.global_state().unwrap_or_default()
    }
}
