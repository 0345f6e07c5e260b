//! device 层的接口
//!
//! `GfxDevice` 持有后端、提交用的 fence 和回收器。所有提交都经过 `queue_lock` 串行化，
//! fence 值、延迟释放队列和 transient heap 池都按提交顺序推进。
//!
//! 与外部 API 的同步走单独的桥接 fence。提交用的 fence 只由本 device 的队列 signal，
//! 外部流无法让回收器看到尚未执行的提交已经完成。

use parking_lot::Mutex;

use crate::backend::{GfxBackend, GfxReleasable};
use crate::commands::command_buffer::{GfxCommandBuffer, GfxRecording};
use crate::commands::encoder::GfxCommandEncoder;
use crate::config::GfxDeviceConfig;
use crate::error::{GfxError, GfxResult};
use crate::gc::{GfxCollectStats, GfxGarbageCollector};
use crate::registry::{GfxDeviceId, GfxDeviceLifecycle};
use crate::resources::buffer::GfxBuffer;
use crate::resources::texture::GfxTexture;
use crate::sync::external::{GfxExternalHandle, GfxExternalStream};
use crate::sync::fence::GfxFence;

/// # Destroy
/// 需要手动调用 [`GfxDevice::destroy`]
pub struct GfxDevice<B: GfxBackend> {
    backend: B,
    config: GfxDeviceConfig,
    fence: GfxFence<B>,
    /// 导出给外部 API 的 fence，只在 `shared_fence` 开启时创建
    bridge_fence: Option<GfxFence<B>>,
    gc: GfxGarbageCollector<B>,
    /// 串行化队列上的 submit / signal / wait
    queue_lock: Mutex<()>,
    /// 注册表中的位置，只用于查找
    registry_id: Mutex<Option<GfxDeviceId>>,
    destroyed: bool,
}

// new & init
impl<B: GfxBackend> GfxDevice<B> {
    pub fn new(backend: B, config: GfxDeviceConfig) -> GfxResult<Self> {
        let fence_name = format!("{}-submit-fence", config.name);
        let mut fence = GfxFence::new(&backend, 0, false, &fence_name)?;
        let mut bridge_fence = if config.shared_fence {
            match GfxFence::new(&backend, 0, true, &format!("{}-bridge-fence", config.name)) {
                Ok(bridge_fence) => Some(bridge_fence),
                Err(e) => {
                    fence.destroy(&backend);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let gc = GfxGarbageCollector::new();
        if let Err(e) = gc.preallocate_heaps(&backend, &config.transient_heap_desc(), config.initial_transient_heaps) {
            gc.flush_all(&backend);
            fence.destroy(&backend);
            if let Some(bridge_fence) = bridge_fence.as_mut() {
                bridge_fence.destroy(&backend);
            }
            return Err(e);
        }

        log::info!(
            "create device <{}> on {} backend, {} transient heaps preallocated",
            config.name,
            backend.backend_name(),
            config.initial_transient_heaps
        );
        Ok(Self {
            backend,
            config,
            fence,
            bridge_fence,
            gc,
            queue_lock: Mutex::new(()),
            registry_id: Mutex::new(None),
            destroyed: false,
        })
    }

    /// 等待设备 idle，释放所有延迟对象和 transient heap，销毁 fence
    pub fn destroy(mut self) -> GfxResult<()> {
        let idle = self.wait_idle();
        let (heaps, objects) = self.gc.flush_all(&self.backend);
        self.fence.destroy(&self.backend);
        if let Some(bridge_fence) = self.bridge_fence.as_mut() {
            bridge_fence.destroy(&self.backend);
        }
        self.destroyed = true;
        log::info!("destroy device <{}>: {} heaps destroyed, {} objects released", self.config.name, heaps, objects);
        idle
    }
}

// getters
impl<B: GfxBackend> GfxDevice<B> {
    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn config(&self) -> &GfxDeviceConfig {
        &self.config
    }

    #[inline]
    pub fn fence(&self) -> &GfxFence<B> {
        &self.fence
    }

    #[inline]
    pub fn gc(&self) -> &GfxGarbageCollector<B> {
        &self.gc
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn registry_id(&self) -> Option<GfxDeviceId> {
        *self.registry_id.lock()
    }

    /// 最近一次提交的 fence 值
    #[inline]
    pub fn last_submitted_value(&self) -> u64 {
        self.fence.signaled_value()
    }
}

// 录制与提交
impl<B: GfxBackend> GfxDevice<B> {
    pub fn create_command_encoder(&self, name: &str) -> GfxResult<GfxCommandEncoder<'_, B>> {
        GfxCommandEncoder::new(self, name)
    }

    /// 提交 command buffer，立即返回该次提交的 fence 值
    ///
    /// 命令列表进入延迟释放队列，transient heap 带着同一个 fence 值回到池中
    pub fn submit_command_buffer(&self, mut command_buffer: GfxCommandBuffer<'_, B>) -> GfxResult<u64> {
        crate::gfx_span!("GfxDevice::submit_command_buffer");
        if !std::ptr::eq(command_buffer.device(), self) {
            return Err(GfxError::InvalidArgument(format!(
                "command buffer <{}> was recorded on another device",
                command_buffer.name()
            )));
        }
        let Some(recording) = command_buffer.take_recording() else {
            return Err(GfxError::InvalidArgument(format!(
                "command buffer <{}> has already been submitted",
                command_buffer.name()
            )));
        };

        let _queue = self.queue_lock.lock();
        let value = self.fence.next_value();
        if let Err(e) = self.backend.submit(&recording.list, self.fence.native(), value) {
            log::error!("submit <{}> failed: {}", command_buffer.name(), e);
            self.discard_recording(recording);
            return Err(e);
        }

        let GfxRecording { list, heap } = recording;
        {
            let mut deferred = self.gc.deferred_queue();
            self.fence.update_signaled_value(Some(value))?;
            deferred.push(GfxReleasable::CommandList(list), value)?;
        }
        self.gc.retire_heap(heap, value)?;

        log::debug!(
            "submit <{}> with fence value {}, {} barriers",
            command_buffer.name(),
            value,
            command_buffer.barrier_count()
        );
        Ok(value)
    }

    /// 阻塞等待某次提交完成，`None` 表示最近一次提交
    pub fn wait_for_submit(&self, value: Option<u64>) -> GfxResult<()> {
        self.fence.wait(&self.backend, value)
    }

    pub fn is_submit_completed(&self, value: u64) -> GfxResult<bool> {
        self.fence.is_completed(&self.backend, value)
    }

    pub fn wait_idle(&self) -> GfxResult<()> {
        crate::gfx_span!("GfxDevice::wait_idle");
        self.fence.wait(&self.backend, None)?;
        let _queue = self.queue_lock.lock();
        self.backend.queue_wait_idle()
    }
}

// 回收
impl<B: GfxBackend> GfxDevice<B> {
    /// 非阻塞回收已经完成的 transient heap 和延迟释放对象
    pub fn run_garbage_collection(&self) -> GfxResult<GfxCollectStats> {
        self.gc.collect(&self.backend, &self.fence)
    }

    pub fn wait_and_collect(&self) -> GfxResult<GfxCollectStats> {
        self.gc.wait_and_collect(&self.backend, &self.fence)
    }

    /// 在最近一次提交完成之后释放 `object`
    ///
    /// 调用方保证之后不会再有提交引用该对象，也没有正在录制的 encoder 引用它
    pub fn defer_release(&self, object: GfxReleasable<B>) -> GfxResult<()> {
        let mut deferred = self.gc.deferred_queue();
        let value = self.fence.signaled_value();
        deferred.push(object, value)
    }

    pub fn retire_buffer(&self, buffer: GfxBuffer<B>) -> GfxResult<()> {
        self.defer_release(GfxReleasable::Buffer(buffer.into_native()))
    }

    pub fn retire_texture(&self, texture: GfxTexture<B>) -> GfxResult<()> {
        self.defer_release(GfxReleasable::Texture(texture.into_native()))
    }

    /// 从未提交过的录制：命令列表立即释放，heap 回到空闲队列
    pub(crate) fn discard_recording(&self, recording: GfxRecording<B>) {
        let GfxRecording { list, heap } = recording;
        self.backend.release(GfxReleasable::CommandList(list));
        self.gc.recycle_heap(&self.backend, heap);
    }
}

// 跨 API 同步
impl<B: GfxBackend> GfxDevice<B> {
    /// 导出桥接 fence，供外部 API 导入
    pub fn shared_fence_handle(&self) -> GfxResult<GfxExternalHandle> {
        let bridge_fence = self.bridge_fence()?;
        self.backend.export_fence(bridge_fence.native())
    }

    /// 让外部流等待本 device 队列上已经提交的工作
    ///
    /// # return
    /// 本次 signal 桥接 fence 使用的值
    pub fn sync_to_cuda(&self, stream: &dyn GfxExternalStream) -> GfxResult<u64> {
        let bridge_fence = self.bridge_fence()?;
        let _queue = self.queue_lock.lock();
        let value = bridge_fence.next_value();
        self.backend.queue_signal(bridge_fence.native(), value)?;
        bridge_fence.update_signaled_value(Some(value))?;
        stream.wait(value)?;
        log::debug!("device <{}> -> {} at bridge value {}", self.config.name, stream.name(), value);
        Ok(value)
    }

    /// 让本 device 队列上之后的工作等待外部流上已经排队的工作
    ///
    /// 外部流只 signal 桥接 fence，提交用的 fence 仍然只由队列推进。
    ///
    /// # return
    /// 外部流 signal 桥接 fence 使用的值
    pub fn sync_to_device(&self, stream: &dyn GfxExternalStream) -> GfxResult<u64> {
        let bridge_fence = self.bridge_fence()?;
        let _queue = self.queue_lock.lock();
        let value = bridge_fence.next_value();
        stream.signal(value)?;
        bridge_fence.update_signaled_value(Some(value))?;
        self.backend.queue_wait(bridge_fence.native(), value)?;
        log::debug!("{} -> device <{}> at bridge value {}", stream.name(), self.config.name, value);
        Ok(value)
    }
}

// tools
impl<B: GfxBackend> GfxDevice<B> {
    fn bridge_fence(&self) -> GfxResult<&GfxFence<B>> {
        self.bridge_fence.as_ref().ok_or_else(|| {
            GfxError::InvalidArgument(format!("device <{}> was created without a shared fence", self.config.name))
        })
    }
}

impl<B: GfxBackend> GfxDeviceLifecycle for GfxDevice<B> {
    fn device_name(&self) -> &str {
        &self.config.name
    }

    fn shutdown(&self) -> GfxResult<()> {
        self.wait_idle()?;
        self.run_garbage_collection().map(|_| ())
    }

    fn on_registered(&self, id: GfxDeviceId) {
        *self.registry_id.lock() = Some(id);
    }
}

impl<B: GfxBackend> Drop for GfxDevice<B> {
    fn drop(&mut self) {
        if !self.destroyed && !std::thread::panicking() {
            log::error!("device <{}> dropped without destroy()", self.config.name);
            debug_assert!(self.destroyed, "device <{}> must be destroyed manually", self.config.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::backend::null::{NullBackend, NullExternalStream, NullReleased, NullStreamOp};
    use crate::registry::GfxDeviceRegistry;
    use crate::resources::state::GfxResourceState;

    fn test_config(shared_fence: bool) -> GfxDeviceConfig {
        GfxDeviceConfig {
            name: "device-test".to_string(),
            transient_heap_size: 1024,
            transient_descriptor_count: 8,
            shared_fence,
            debug_labels: false,
            ..Default::default()
        }
    }

    fn submit_empty(device: &GfxDevice<NullBackend>, name: &str) -> GfxResult<u64> {
        let command_buffer = device.create_command_encoder(name)?.finish()?;
        device.submit_command_buffer(command_buffer)
    }

    #[test]
    fn test_submit_values_increase() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();

        assert_eq!(submit_empty(&device, "a").unwrap(), 1);
        assert_eq!(submit_empty(&device, "b").unwrap(), 2);
        assert_eq!(device.last_submitted_value(), 2);
        assert!(!device.is_submit_completed(1).unwrap());
        assert_eq!(backend.submissions().iter().map(|s| s.signal_value).collect::<Vec<_>>(), vec![1, 2]);

        backend.complete_up_to(1);
        assert!(device.is_submit_completed(1).unwrap());
        assert!(!device.is_submit_completed(2).unwrap());
        backend.complete_all();
        device.destroy().unwrap();
    }

    #[test]
    fn test_heap_is_reused_after_completion() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();

        submit_empty(&device, "first").unwrap();
        assert_eq!(device.gc().in_flight_heap_count(), 1);
        assert_eq!(*device.run_garbage_collection().unwrap().heaps_reclaimed(), 0);

        backend.complete_all();
        let stats = device.run_garbage_collection().unwrap();
        assert_eq!(*stats.heaps_reclaimed(), 1);
        assert_eq!(device.gc().free_heap_count(), 1);

        submit_empty(&device, "second").unwrap();
        assert_eq!(backend.heaps_created(), 1);
        assert_eq!(device.gc().allocated_heap_count(), 1);

        backend.complete_all();
        device.destroy().unwrap();
        assert_eq!(backend.heaps_destroyed(), 1);
    }

    #[test]
    fn test_preallocated_heaps() {
        let backend = NullBackend::new();
        let config = GfxDeviceConfig {
            initial_transient_heaps: 3,
            ..test_config(false)
        };
        let device = GfxDevice::new(backend.clone(), config).unwrap();
        assert_eq!(device.gc().free_heap_count(), 3);

        submit_empty(&device, "uses-preallocated").unwrap();
        assert_eq!(backend.heaps_created(), 3);
        backend.complete_all();
        device.destroy().unwrap();
        assert_eq!(backend.heaps_destroyed(), 3);
    }

    #[test]
    fn test_retired_buffer_waits_for_fence() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();
        let buffer: GfxBuffer<NullBackend> = GfxBuffer::from_native(backend.create_buffer(64), 64, GfxResourceState::Undefined, "retired");
        let id = buffer.native().id();

        submit_empty(&device, "in-flight").unwrap();
        device.retire_buffer(buffer).unwrap();
        assert_eq!(device.gc().pending_release_count(), 2);

        let stats = device.run_garbage_collection().unwrap();
        assert!(stats.is_empty());
        assert!(backend.released().is_empty());

        backend.complete_all();
        let stats = device.run_garbage_collection().unwrap();
        assert_eq!(*stats.objects_released(), 2);
        let released = backend.released();
        assert!(matches!(released[0], NullReleased::CommandList(_)));
        assert_eq!(released[1], NullReleased::Buffer(id));
        device.destroy().unwrap();
    }

    #[test]
    fn test_release_without_submissions_is_immediate() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();

        device.defer_release(GfxReleasable::Texture(backend.create_texture())).unwrap();
        assert_eq!(*device.run_garbage_collection().unwrap().objects_released(), 1);
        assert!(matches!(backend.released().as_slice(), [NullReleased::Texture(_)]));
        device.destroy().unwrap();
    }

    #[test]
    fn test_failed_submit_keeps_fence_value() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();

        backend.fail_next_submit();
        assert!(matches!(submit_empty(&device, "fails"), Err(GfxError::Backend { call: "submit", .. })));
        assert_eq!(device.last_submitted_value(), 0);
        assert_eq!(device.gc().free_heap_count(), 1);
        assert_eq!(device.gc().pending_release_count(), 0);
        assert!(matches!(backend.released().as_slice(), [NullReleased::CommandList(_)]));

        assert_eq!(submit_empty(&device, "succeeds").unwrap(), 1);
        backend.complete_all();
        device.destroy().unwrap();
    }

    #[test]
    fn test_command_buffer_from_other_device_is_rejected() {
        let backend = NullBackend::new();
        let a = GfxDevice::new(backend.clone(), test_config(false)).unwrap();
        let b = GfxDevice::new(backend.clone(), test_config(false)).unwrap();

        let command_buffer = a.create_command_encoder("foreign").unwrap().finish().unwrap();
        assert!(matches!(b.submit_command_buffer(command_buffer), Err(GfxError::InvalidArgument(_))));
        assert_eq!(a.gc().free_heap_count(), 1);
        assert_eq!(b.last_submitted_value(), 0);

        a.destroy().unwrap();
        b.destroy().unwrap();
    }

    #[test]
    fn test_device_lost_is_reported_by_collect() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();
        submit_empty(&device, "lost").unwrap();

        backend.set_device_lost();
        let err = device.run_garbage_collection().unwrap_err();
        assert!(err.is_device_lost());
        assert_eq!(device.gc().pending_release_count(), 1);
        assert!(matches!(device.wait_for_submit(None), Err(GfxError::DeviceLost)));
        assert!(matches!(device.destroy(), Err(GfxError::DeviceLost)));
    }

    #[test]
    fn test_wait_blocks_until_completed() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();
        let value = submit_empty(&device, "wait").unwrap();

        std::thread::scope(|s| {
            let completer = backend.clone();
            s.spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                completer.complete_all();
            });
            device.wait_for_submit(Some(value)).unwrap();
        });
        assert!(device.is_submit_completed(value).unwrap());
        let stats = device.wait_and_collect().unwrap();
        assert_eq!(*stats.completed_value(), value);
        device.destroy().unwrap();
    }

    #[test]
    fn test_concurrent_submits_get_unique_values() {
        let backend = NullBackend::new_auto_complete();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();

        let values = std::thread::scope(|s| {
            let handles = (0..4)
                .map(|t| {
                    let device = &device;
                    s.spawn(move || {
                        (0..8).map(|i| submit_empty(device, &format!("t{t}-{i}")).unwrap()).collect::<Vec<_>>()
                    })
                })
                .collect::<Vec<_>>();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect::<BTreeSet<_>>()
        });
        assert_eq!(values, (1..=32).collect::<BTreeSet<_>>());

        device.wait_and_collect().unwrap();
        assert_eq!(device.gc().pending_release_count(), 0);
        assert_eq!(device.gc().in_flight_heap_count(), 0);
        device.destroy().unwrap();
    }

    #[test]
    fn test_cuda_bridge() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(true)).unwrap();
        let stream = NullExternalStream::import(&backend, device.shared_fence_handle().unwrap(), "cuda").unwrap();

        assert_eq!(device.sync_to_cuda(&stream).unwrap(), 1);
        assert_eq!(stream.ops(), vec![NullStreamOp::Wait(1)]);
        assert_eq!(device.sync_to_device(&stream).unwrap(), 2);
        assert_eq!(stream.ops(), vec![NullStreamOp::Wait(1), NullStreamOp::Signal(2)]);
        assert_eq!(stream.fence_value(), 2);

        // 桥接不占用提交时间线
        assert_eq!(submit_empty(&device, "after-bridge").unwrap(), 1);
        assert_eq!(device.last_submitted_value(), 1);
        backend.complete_all();
        assert_eq!(backend.pending_queue_ops(), 0);
        device.destroy().unwrap();
        assert_eq!(backend.fences_destroyed(), 2);
    }

    #[test]
    fn test_sync_to_device_keeps_pending_submit_alive() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(true)).unwrap();
        let stream = NullExternalStream::import(&backend, device.shared_fence_handle().unwrap(), "cuda").unwrap();

        assert_eq!(submit_empty(&device, "pending").unwrap(), 1);
        assert_eq!(device.sync_to_device(&stream).unwrap(), 1);
        assert_eq!(stream.fence_value(), 1);

        // 外部流已经 signal，但提交还没执行
        assert!(!device.is_submit_completed(1).unwrap());
        let stats = device.run_garbage_collection().unwrap();
        assert_eq!(*stats.completed_value(), 0);
        assert_eq!(*stats.heaps_reclaimed(), 0);
        assert_eq!(*stats.objects_released(), 0);
        assert!(backend.released().is_empty());
        assert_eq!(device.gc().in_flight_heap_count(), 1);

        backend.complete_all();
        let stats = device.run_garbage_collection().unwrap();
        assert_eq!(*stats.completed_value(), 1);
        assert_eq!(*stats.heaps_reclaimed(), 1);
        assert_eq!(*stats.objects_released(), 1);
        device.destroy().unwrap();
    }

    #[test]
    fn test_sync_to_cuda_waits_for_pending_submit() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(true)).unwrap();
        let stream = NullExternalStream::import(&backend, device.shared_fence_handle().unwrap(), "cuda").unwrap();

        submit_empty(&device, "pending").unwrap();
        assert_eq!(device.sync_to_cuda(&stream).unwrap(), 1);
        // 桥接 fence 的 signal 排在提交之后
        assert_eq!(stream.fence_value(), 0);
        assert_eq!(backend.pending_queue_ops(), 2);

        backend.complete_all();
        assert_eq!(stream.fence_value(), 1);
        assert!(device.is_submit_completed(1).unwrap());
        device.destroy().unwrap();
    }

    #[test]
    fn test_cuda_bridge_needs_shared_fence() {
        let backend = NullBackend::new();
        let device = GfxDevice::new(backend.clone(), test_config(false)).unwrap();

        assert!(matches!(device.shared_fence_handle(), Err(GfxError::InvalidArgument(_))));
        assert_eq!(device.last_submitted_value(), 0);
        device.destroy().unwrap();
    }

    #[test]
    fn test_registry_shutdown() {
        let backend = NullBackend::new_auto_complete();
        let device = Arc::new(GfxDevice::new(backend.clone(), test_config(false)).unwrap());
        let registry = GfxDeviceRegistry::new();
        let id = registry.register(&device);
        assert_eq!(device.registry_id(), Some(id));

        submit_empty(&device, "before-shutdown").unwrap();
        assert_eq!(registry.shutdown_all().unwrap(), 1);
        assert_eq!(device.gc().pending_release_count(), 0);
        assert!(!registry.contains(id));

        let Ok(device) = Arc::try_unwrap(device) else {
            panic!("device is still shared");
        };
        device.destroy().unwrap();
        assert_eq!(backend.fences_destroyed(), 1);
    }
}
