use crate::backend::GfxBackend;
use crate::device::GfxDevice;

/// 一次录制占用的原生对象：命令列表和它专用的 transient heap
pub(crate) struct GfxRecording<B: GfxBackend> {
    pub(crate) list: B::CommandList,
    pub(crate) heap: B::TransientHeap,
}

/// 已经关闭录制的命令，只能提交给创建它的 device
///
/// # Destroy
/// 未提交就被 drop 时，原生命令列表直接释放，transient heap 回到池中
pub struct GfxCommandBuffer<'d, B: GfxBackend> {
    device: &'d GfxDevice<B>,
    recording: Option<GfxRecording<B>>,
    barrier_count: u32,
    name: String,
}

// new & init
impl<'d, B: GfxBackend> GfxCommandBuffer<'d, B> {
    pub(crate) fn new(device: &'d GfxDevice<B>, recording: GfxRecording<B>, barrier_count: u32, name: String) -> Self {
        Self {
            device,
            recording: Some(recording),
            barrier_count,
            name,
        }
    }
}

// getters
impl<'d, B: GfxBackend> GfxCommandBuffer<'d, B> {
    /// 录制期间插入的 barrier 数量
    #[inline]
    pub fn barrier_count(&self) -> u32 {
        self.barrier_count
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn native_list(&self) -> Option<&B::CommandList> {
        self.recording.as_ref().map(|r| &r.list)
    }

    #[inline]
    pub(crate) fn device(&self) -> &'d GfxDevice<B> {
        self.device
    }

    #[inline]
    pub(crate) fn take_recording(&mut self) -> Option<GfxRecording<B>> {
        self.recording.take()
    }
}

impl<B: GfxBackend> Drop for GfxCommandBuffer<'_, B> {
    fn drop(&mut self) {
        if let Some(recording) = self.recording.take() {
            log::debug!("command buffer <{}> dropped without submit", self.name);
            self.device.discard_recording(recording);
        }
    }
}
