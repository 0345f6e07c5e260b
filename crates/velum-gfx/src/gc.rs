//! 基于 fence 的资源回收
//!
//! `collect()` 只读取一次 fence 的完成值，用同一个值回收 transient heap 和延迟释放队列，
//! 两边看到的是一致的截止点。`collect()` 不阻塞，需要等待 idle 时使用 `wait_and_collect()`。

use derive_getters::Getters;
use parking_lot::{Mutex, MutexGuard};

use crate::backend::{GfxBackend, GfxReleasable, GfxTransientHeap, GfxTransientHeapDesc};
use crate::error::GfxResult;
use crate::pool::deferred_release::GfxDeferredReleaseQueue;
use crate::pool::transient_heap::GfxTransientHeapPool;
use crate::sync::fence::GfxFence;

/// 一次回收的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Getters)]
pub struct GfxCollectStats {
    /// 本次回收使用的 fence 完成值
    completed_value: u64,
    heaps_reclaimed: usize,
    objects_released: usize,
}

impl GfxCollectStats {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heaps_reclaimed == 0 && self.objects_released == 0
    }
}

pub struct GfxGarbageCollector<B: GfxBackend> {
    heaps: Mutex<GfxTransientHeapPool<B::TransientHeap>>,
    deferred: Mutex<GfxDeferredReleaseQueue<GfxReleasable<B>>>,
}

impl<B: GfxBackend> Default for GfxGarbageCollector<B> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<B: GfxBackend> GfxGarbageCollector<B> {
    pub fn new() -> Self {
        Self {
            heaps: Mutex::new(GfxTransientHeapPool::new()),
            deferred: Mutex::new(GfxDeferredReleaseQueue::new()),
        }
    }
}

// getters
impl<B: GfxBackend> GfxGarbageCollector<B> {
    #[inline]
    pub fn pending_release_count(&self) -> usize {
        self.deferred.lock().len()
    }

    #[inline]
    pub fn in_flight_heap_count(&self) -> usize {
        self.heaps.lock().in_flight_count()
    }

    #[inline]
    pub fn free_heap_count(&self) -> usize {
        self.heaps.lock().free_count()
    }

    #[inline]
    pub fn allocated_heap_count(&self) -> usize {
        self.heaps.lock().allocated_count()
    }

    /// 延迟释放队列的锁
    ///
    /// 提交时在持有该锁的情况下推进 fence 并入队，保证入队的值单调
    #[inline]
    pub(crate) fn deferred_queue(&self) -> MutexGuard<'_, GfxDeferredReleaseQueue<GfxReleasable<B>>> {
        self.deferred.lock()
    }
}

// transient heap
impl<B: GfxBackend> GfxGarbageCollector<B> {
    /// 取出一个独占的 heap：优先复用空闲的，否则新建
    pub fn acquire_heap(&self, backend: &B, desc: &GfxTransientHeapDesc) -> GfxResult<B::TransientHeap> {
        self.heaps.lock().acquire_owned(|| backend.create_transient_heap(desc))
    }

    /// 单 encoder 部署下使用池的当前 heap
    pub fn with_current_heap<R>(
        &self,
        backend: &B,
        desc: &GfxTransientHeapDesc,
        f: impl FnOnce(&mut B::TransientHeap) -> R,
    ) -> GfxResult<R> {
        let mut heaps = self.heaps.lock();
        let heap = heaps.acquire(|| backend.create_transient_heap(desc))?;
        Ok(f(heap))
    }

    /// 当前 heap 随 `fence_value` 的提交一起进入 in-flight
    pub fn retire_current_heap(&self, fence_value: u64) -> GfxResult<()> {
        self.heaps.lock().retire_current(fence_value)
    }

    pub fn retire_heap(&self, heap: B::TransientHeap, fence_value: u64) -> GfxResult<()> {
        self.heaps.lock().retire(heap, fence_value)
    }

    /// 从未提交过的 heap 直接回到空闲队列，reset 失败时销毁
    pub fn recycle_heap(&self, backend: &B, mut heap: B::TransientHeap) {
        match heap.reset() {
            Ok(()) => self.heaps.lock().recycle(heap),
            Err(e) => {
                log::error!("failed to reset an unused transient heap, destroying it: {}", e);
                backend.destroy_transient_heap(heap);
            }
        }
    }

    /// 预先分配 heap 放入空闲队列
    pub fn preallocate_heaps(&self, backend: &B, desc: &GfxTransientHeapDesc, count: u32) -> GfxResult<()> {
        self.heaps.lock().preallocate(count as usize, || backend.create_transient_heap(desc))
    }
}

// 回收
impl<B: GfxBackend> GfxGarbageCollector<B> {
    pub fn defer_release(&self, object: GfxReleasable<B>, fence_value: u64) -> GfxResult<()> {
        self.deferred.lock().push(object, fence_value)
    }

    /// 非阻塞回收
    ///
    /// fence 报告设备丢失时返回错误，不做任何回收
    pub fn collect(&self, backend: &B, fence: &GfxFence<B>) -> GfxResult<GfxCollectStats> {
        crate::gfx_span!("GfxGarbageCollector::collect");
        let completed_value = fence.current_value(backend)?;

        let heaps_reclaimed = self.heaps.lock().reclaim(completed_value, |heap| heap.reset())?;
        let objects_released = self.deferred.lock().drain(completed_value, |object| backend.release(object));

        let stats = GfxCollectStats {
            completed_value,
            heaps_reclaimed,
            objects_released,
        };
        if !stats.is_empty() {
            log::debug!(
                "gc at fence value {}: {} heaps reclaimed, {} objects released",
                completed_value,
                heaps_reclaimed,
                objects_released
            );
        }
        Ok(stats)
    }

    /// 等待最近一次 signal 的值完成，然后回收
    pub fn wait_and_collect(&self, backend: &B, fence: &GfxFence<B>) -> GfxResult<GfxCollectStats> {
        fence.wait(backend, None)?;
        self.collect(backend, fence)
    }

    /// 无条件释放所有对象并销毁所有 heap，只在设备 idle 之后调用
    ///
    /// # return
    /// (销毁的 heap 数量, 释放的对象数量)
    pub fn flush_all(&self, backend: &B) -> (usize, usize) {
        let released = self.deferred.lock().drain_all(|object| backend.release(object));
        let heaps = self.heaps.lock().drain_all();
        let heap_count = heaps.len();
        heaps.into_iter().for_each(|heap| backend.destroy_transient_heap(heap));
        (heap_count, released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, NullReleased};

    fn desc() -> GfxTransientHeapDesc {
        GfxTransientHeapDesc {
            size: 256,
            descriptor_count: 8,
        }
    }

    #[test]
    fn test_collect_uses_one_snapshot() {
        let backend = NullBackend::new();
        let mut fence = GfxFence::new(&backend, 0, false, "gc").unwrap();
        let gc = GfxGarbageCollector::<NullBackend>::new();

        let heap = gc.acquire_heap(&backend, &desc()).unwrap();
        gc.retire_heap(heap, 1).unwrap();
        gc.defer_release(GfxReleasable::Buffer(backend.create_buffer(64)), 1).unwrap();
        gc.defer_release(GfxReleasable::Buffer(backend.create_buffer(64)), 2).unwrap();
        for value in [1, 2] {
            let value = fence.update_signaled_value(Some(value)).unwrap();
            backend.queue_signal(fence.native(), value).unwrap();
        }

        backend.complete_up_to(1);
        let stats = gc.collect(&backend, &fence).unwrap();
        assert_eq!(*stats.completed_value(), 1);
        assert_eq!(*stats.heaps_reclaimed(), 1);
        assert_eq!(*stats.objects_released(), 1);
        assert_eq!(gc.pending_release_count(), 1);

        backend.complete_all();
        let stats = gc.wait_and_collect(&backend, &fence).unwrap();
        assert_eq!(*stats.completed_value(), 2);
        assert_eq!(*stats.objects_released(), 1);
        assert_eq!(gc.pending_release_count(), 0);
        fence.destroy(&backend);
    }

    #[test]
    fn test_current_heap_is_shared_until_retired() {
        let backend = NullBackend::new();
        let mut fence = GfxFence::new(&backend, 0, false, "gc-current").unwrap();
        let gc = GfxGarbageCollector::<NullBackend>::new();

        let first = gc.with_current_heap(&backend, &desc(), |heap| heap.write(&[1; 32], 16)).unwrap().unwrap();
        let second = gc.with_current_heap(&backend, &desc(), |heap| heap.write(&[2; 32], 16)).unwrap().unwrap();
        assert_eq!((first, second), (0, 32));
        assert_eq!(backend.heaps_created(), 1);

        let value = fence.update_signaled_value(Some(1)).unwrap();
        backend.queue_signal(fence.native(), value).unwrap();
        gc.retire_current_heap(value).unwrap();
        assert_eq!(gc.in_flight_heap_count(), 1);
        // 没有当前 heap 时 retire 什么也不做
        gc.retire_current_heap(value).unwrap();
        assert_eq!(gc.in_flight_heap_count(), 1);

        backend.complete_all();
        assert_eq!(*gc.collect(&backend, &fence).unwrap().heaps_reclaimed(), 1);
        let used = gc.with_current_heap(&backend, &desc(), |heap| heap.used()).unwrap();
        assert_eq!(used, 0);
        assert_eq!(backend.heaps_created(), 1);

        assert_eq!(gc.flush_all(&backend), (1, 0));
        fence.destroy(&backend);
    }

    #[test]
    fn test_flush_all_destroys_everything() {
        let backend = NullBackend::new();
        let gc = GfxGarbageCollector::<NullBackend>::new();
        gc.preallocate_heaps(&backend, &desc(), 2).unwrap();
        gc.defer_release(GfxReleasable::Buffer(backend.create_buffer(16)), 9).unwrap();

        assert_eq!(gc.flush_all(&backend), (2, 1));
        assert_eq!(backend.heaps_destroyed(), 2);
        assert!(matches!(backend.released().as_slice(), [NullReleased::Buffer(_)]));
    }
}
