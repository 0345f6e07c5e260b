//! CPU 参考后端
//!
//! 不访问任何 GPU：命令被记录到内存中，队列是一个软件时间线。
//! 测试通过 [`NullBackend::complete_up_to`] / [`NullBackend::complete_all`] 推进时间线，
//! 或者打开 `auto_complete` 让每次提交立即完成。也可以注入设备丢失。

mod command_list;
mod fence;
mod stream;
mod transient_heap;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

pub use command_list::{NullBarrier, NullCommand, NullCommandList};
pub use fence::NullFenceState;
pub use stream::{NullExternalStream, NullStreamOp};
pub use transient_heap::NullTransientHeap;

use crate::backend::{GfxBackend, GfxReleasable, GfxTransientHeapDesc};
use crate::error::{GfxError, GfxResult};
use crate::sync::external::GfxExternalHandle;

macro_rules! null_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Debug, PartialEq, Eq, Hash)]
            pub struct $name {
                id: u64,
            }

            impl $name {
                #[inline]
                pub fn id(&self) -> u64 {
                    self.id
                }
            }
        )*
    };
}

null_handle! {
    NullTexture;
    NullAccelerationStructure;
    /// 加速结构的构建输入
    NullAccelerationStructureInputs;
    NullPipeline;
    NullShaderObject;
    NullShaderTable;
    NullQueryPool;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NullBuffer {
    id: u64,
    size: u64,
}

impl NullBuffer {
    #[inline]
    pub(crate) fn new(id: u64, size: u64) -> Self {
        Self { id, size }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// fence 的句柄
#[derive(Clone)]
pub struct NullFence {
    state: Arc<NullFenceState>,
}

impl NullFence {
    #[inline]
    pub fn state(&self) -> &Arc<NullFenceState> {
        &self.state
    }
}

/// 被释放的原生对象
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NullReleased {
    Buffer(u64),
    Texture(u64),
    AccelerationStructure(u64),
    CommandList(u64),
}

/// 一次提交
#[derive(Clone, Debug)]
pub struct NullSubmission {
    pub list_id: u64,
    pub name: String,
    pub commands: Vec<NullCommand>,
    pub signal_value: u64,
}

impl NullSubmission {
    pub fn barrier_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_barrier()).count()
    }
}

/// 软件队列上的操作
enum NullQueueOp {
    Signal { fence: Arc<NullFenceState>, value: u64 },
    Wait { fence: Arc<NullFenceState>, value: u64 },
}

#[derive(Default)]
struct NullShared {
    next_id: AtomicU64,
    auto_complete: AtomicBool,
    device_lost: AtomicBool,
    fail_next_submit: AtomicBool,

    queue: Mutex<VecDeque<NullQueueOp>>,
    queue_idle: Condvar,

    fences: Mutex<HashMap<u64, Weak<NullFenceState>>>,
    released: Mutex<Vec<NullReleased>>,
    submissions: Mutex<Vec<NullSubmission>>,

    heaps_created: AtomicUsize,
    heaps_destroyed: AtomicUsize,
    fences_destroyed: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct NullBackend {
    shared: Arc<NullShared>,
}

// new & init
impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次提交、signal、wait 之后立即推进时间线
    pub fn new_auto_complete() -> Self {
        let backend = Self::new();
        backend.set_auto_complete(true);
        backend
    }
}

// 模拟外部资源层
impl NullBackend {
    pub fn create_buffer(&self, size: u64) -> NullBuffer {
        NullBuffer::new(self.next_id(), size)
    }

    pub fn create_texture(&self) -> NullTexture {
        NullTexture { id: self.next_id() }
    }

    pub fn create_acceleration_structure(&self) -> NullAccelerationStructure {
        NullAccelerationStructure { id: self.next_id() }
    }

    pub fn create_acceleration_structure_inputs(&self) -> NullAccelerationStructureInputs {
        NullAccelerationStructureInputs { id: self.next_id() }
    }

    pub fn create_pipeline(&self) -> NullPipeline {
        NullPipeline { id: self.next_id() }
    }

    pub fn create_shader_object(&self) -> NullShaderObject {
        NullShaderObject { id: self.next_id() }
    }

    pub fn create_shader_table(&self) -> NullShaderTable {
        NullShaderTable { id: self.next_id() }
    }

    pub fn create_query_pool(&self) -> NullQueryPool {
        NullQueryPool { id: self.next_id() }
    }
}

// 时间线控制
impl NullBackend {
    pub fn set_auto_complete(&self, auto_complete: bool) {
        self.shared.auto_complete.store(auto_complete, Ordering::Release);
        if auto_complete {
            self.complete_all();
        }
    }

    /// 执行队头的一个操作
    ///
    /// # return
    /// 队列为空、队头的 wait 还不能满足或设备丢失时返回 false
    pub fn complete_next(&self) -> bool {
        self.pump(Some(1), None) == 1
    }

    /// 执行队列中的操作，直到下一个 signal 的值超过 `value`
    pub fn complete_up_to(&self, value: u64) -> usize {
        self.pump(None, Some(value))
    }

    /// 执行队列中所有可以执行的操作
    pub fn complete_all(&self) -> usize {
        self.pump(None, None)
    }

    /// 之后所有 fence 查询、等待和提交都返回 `DeviceLost`
    pub fn set_device_lost(&self) {
        self.shared.device_lost.store(true, Ordering::Release);
        for fence in self.shared.fences.lock().values().filter_map(Weak::upgrade) {
            fence.wake_all();
        }
        let _queue = self.shared.queue.lock();
        self.shared.queue_idle.notify_all();
    }

    /// 下一次提交返回后端错误
    pub fn fail_next_submit(&self) {
        self.shared.fail_next_submit.store(true, Ordering::Release);
    }
}

// getters
impl NullBackend {
    #[inline]
    pub fn is_device_lost(&self) -> bool {
        self.shared.device_lost.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_auto_complete(&self) -> bool {
        self.shared.auto_complete.load(Ordering::Acquire)
    }

    pub fn pending_queue_ops(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn released(&self) -> Vec<NullReleased> {
        self.shared.released.lock().clone()
    }

    pub fn submissions(&self) -> Vec<NullSubmission> {
        self.shared.submissions.lock().clone()
    }

    #[inline]
    pub fn heaps_created(&self) -> usize {
        self.shared.heaps_created.load(Ordering::Acquire)
    }

    #[inline]
    pub fn heaps_destroyed(&self) -> usize {
        self.shared.heaps_destroyed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn fences_destroyed(&self) -> usize {
        self.shared.fences_destroyed.load(Ordering::Acquire)
    }
}

// tools
impl NullBackend {
    #[inline]
    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn check_device(&self) -> GfxResult<()> {
        if self.is_device_lost() { Err(GfxError::DeviceLost) } else { Ok(()) }
    }

    fn enqueue(&self, op: NullQueueOp) {
        self.shared.queue.lock().push_back(op);
        if self.is_auto_complete() {
            self.complete_all();
        }
    }

    /// # param
    /// * max_ops - 最多执行的操作数量
    /// * max_signal - signal 的值超过它时停止
    fn pump(&self, max_ops: Option<usize>, max_signal: Option<u64>) -> usize {
        if self.is_device_lost() {
            return 0;
        }
        let mut queue = self.shared.queue.lock();
        let mut executed = 0;
        while let Some(op) = queue.front() {
            if max_ops.is_some_and(|max| executed >= max) {
                break;
            }
            match op {
                NullQueueOp::Signal { fence, value } => {
                    if max_signal.is_some_and(|max| *value > max) {
                        break;
                    }
                    fence.signal(*value);
                }
                NullQueueOp::Wait { fence, value } => {
                    if fence.completed() < *value {
                        break;
                    }
                }
            }
            queue.pop_front();
            executed += 1;
        }
        self.shared.queue_idle.notify_all();
        executed
    }

    pub(crate) fn find_fence(&self, id: u64) -> Option<Arc<NullFenceState>> {
        self.shared.fences.lock().get(&id).and_then(Weak::upgrade)
    }
}

impl GfxBackend for NullBackend {
    type Buffer = NullBuffer;
    type Texture = NullTexture;
    type AccelerationStructure = NullAccelerationStructure;
    type AccelerationStructureInputs = NullAccelerationStructureInputs;
    type Pipeline = NullPipeline;
    type ShaderObject = NullShaderObject;
    type ShaderTable = NullShaderTable;
    type QueryPool = NullQueryPool;
    type Fence = NullFence;
    type CommandList = NullCommandList;
    type TransientHeap = NullTransientHeap;

    fn backend_name(&self) -> &'static str {
        "null"
    }

    fn create_command_list(&self, debug_name: &str) -> GfxResult<NullCommandList> {
        self.check_device()?;
        Ok(NullCommandList::new(self.next_id(), debug_name))
    }

    fn submit(&self, list: &NullCommandList, fence: &NullFence, signal_value: u64) -> GfxResult<()> {
        self.check_device()?;
        if self.shared.fail_next_submit.swap(false, Ordering::AcqRel) {
            return Err(GfxError::Backend { call: "submit", code: -1 });
        }
        if !list.is_finished() {
            return Err(GfxError::InvalidArgument(format!("command list <{}> is still recording", list.name())));
        }

        self.shared.submissions.lock().push(NullSubmission {
            list_id: list.id(),
            name: list.name().to_string(),
            commands: list.commands().to_vec(),
            signal_value,
        });
        self.enqueue(NullQueueOp::Signal {
            fence: fence.state.clone(),
            value: signal_value,
        });
        Ok(())
    }

    fn queue_wait_idle(&self) -> GfxResult<()> {
        if self.is_auto_complete() {
            self.complete_all();
        }
        let mut queue = self.shared.queue.lock();
        while !queue.is_empty() {
            self.check_device()?;
            self.shared.queue_idle.wait(&mut queue);
        }
        self.check_device()
    }

    fn create_fence(&self, initial_value: u64, shared: bool, debug_name: &str) -> GfxResult<NullFence> {
        self.check_device()?;
        let state = Arc::new(NullFenceState::new(self.next_id(), initial_value, shared, debug_name));
        self.shared.fences.lock().insert(state.id(), Arc::downgrade(&state));
        Ok(NullFence { state })
    }

    fn fence_completed_value(&self, fence: &NullFence) -> GfxResult<u64> {
        self.check_device()?;
        Ok(fence.state.completed())
    }

    fn wait_fence(&self, fence: &NullFence, value: u64) -> GfxResult<()> {
        if self.is_auto_complete() {
            self.complete_all();
        }
        if fence.state.wait(value, || self.is_device_lost()) { self.check_device() } else { Err(GfxError::DeviceLost) }
    }

    fn queue_signal(&self, fence: &NullFence, value: u64) -> GfxResult<()> {
        self.check_device()?;
        self.enqueue(NullQueueOp::Signal {
            fence: fence.state.clone(),
            value,
        });
        Ok(())
    }

    fn queue_wait(&self, fence: &NullFence, value: u64) -> GfxResult<()> {
        self.check_device()?;
        self.enqueue(NullQueueOp::Wait {
            fence: fence.state.clone(),
            value,
        });
        Ok(())
    }

    fn export_fence(&self, fence: &NullFence) -> GfxResult<GfxExternalHandle> {
        if !fence.state.is_shared() {
            return Err(GfxError::UnsupportedOperation("fence was not created as shareable"));
        }
        Ok(GfxExternalHandle::Opaque(fence.state.id()))
    }

    fn destroy_fence(&self, fence: &NullFence) {
        self.shared.fences.lock().remove(&fence.state.id());
        self.shared.fences_destroyed.fetch_add(1, Ordering::AcqRel);
    }

    fn create_transient_heap(&self, desc: &GfxTransientHeapDesc) -> GfxResult<NullTransientHeap> {
        self.check_device()?;
        if desc.size == 0 {
            return Err(GfxError::InvalidArgument("transient heap size must not be zero".to_string()));
        }
        self.shared.heaps_created.fetch_add(1, Ordering::AcqRel);
        let buffer = self.create_buffer(desc.size);
        Ok(NullTransientHeap::new(self.next_id(), desc.size, desc.descriptor_count, buffer))
    }

    fn destroy_transient_heap(&self, _heap: NullTransientHeap) {
        self.shared.heaps_destroyed.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, object: GfxReleasable<Self>) {
        let released = match object {
            GfxReleasable::Buffer(buffer) => NullReleased::Buffer(buffer.id()),
            GfxReleasable::Texture(texture) => NullReleased::Texture(texture.id()),
            GfxReleasable::AccelerationStructure(structure) => NullReleased::AccelerationStructure(structure.id()),
            GfxReleasable::CommandList(list) => NullReleased::CommandList(list.id()),
        };
        self.shared.released.lock().push(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_wait_stops_the_queue() {
        let backend = NullBackend::new();
        let external = backend.create_fence(0, true, "external").unwrap();
        let queue_fence = backend.create_fence(0, false, "queue").unwrap();

        backend.queue_wait(&external, 1).unwrap();
        backend.queue_signal(&queue_fence, 1).unwrap();
        assert_eq!(backend.complete_all(), 0);
        assert_eq!(backend.fence_completed_value(&queue_fence).unwrap(), 0);

        external.state().signal(1);
        assert_eq!(backend.complete_all(), 2);
        assert_eq!(backend.fence_completed_value(&queue_fence).unwrap(), 1);
    }

    #[test]
    fn test_complete_up_to() {
        let backend = NullBackend::new();
        let fence = backend.create_fence(0, false, "queue").unwrap();
        for value in 1..=3 {
            backend.queue_signal(&fence, value).unwrap();
        }
        assert_eq!(backend.complete_up_to(2), 2);
        assert_eq!(backend.fence_completed_value(&fence).unwrap(), 2);
        assert_eq!(backend.pending_queue_ops(), 1);
        assert!(backend.complete_next());
        assert!(!backend.complete_next());
    }

    #[test]
    fn test_device_lost_is_sticky() {
        let backend = NullBackend::new();
        let fence = backend.create_fence(0, false, "queue").unwrap();
        backend.set_device_lost();
        assert!(matches!(backend.fence_completed_value(&fence), Err(GfxError::DeviceLost)));
        assert!(matches!(backend.wait_fence(&fence, 1), Err(GfxError::DeviceLost)));
        assert!(backend.create_command_list("after-lost").is_err());
    }
}
