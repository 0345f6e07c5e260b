//! transient heap 池
//!
//! heap 只回收不释放：被某次提交使用后带着该提交的 fence 值进入 in-flight 队列，
//! 设备完成到该值之后 reset 并回到空闲队列。

use std::collections::VecDeque;

use crate::error::{GfxError, GfxResult};

pub struct GfxTransientHeapPool<H> {
    /// 单 encoder 部署下正在录制使用的 heap
    current: Option<H>,
    free: VecDeque<H>,
    /// (heap, fence value)，fence value 单调不减
    in_flight: VecDeque<(H, u64)>,
    allocated: usize,
    last_retired_value: u64,
}

impl<H> Default for GfxTransientHeapPool<H> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<H> GfxTransientHeapPool<H> {
    pub fn new() -> Self {
        Self {
            current: None,
            free: VecDeque::new(),
            in_flight: VecDeque::new(),
            allocated: 0,
            last_retired_value: 0,
        }
    }
}

// getters
impl<H> GfxTransientHeapPool<H> {
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// 池创建过的 heap 总数
    #[inline]
    pub fn allocated_count(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    #[inline]
    pub fn last_retired_value(&self) -> u64 {
        self.last_retired_value
    }
}

// acquire & retire
impl<H> GfxTransientHeapPool<H> {
    /// 当前 heap；没有时从空闲队列取，空闲队列为空时调用 `create` 分配新的
    pub fn acquire(&mut self, create: impl FnOnce() -> GfxResult<H>) -> GfxResult<&mut H> {
        if self.current.is_none() {
            let heap = self.pop_free_or_create(create)?;
            self.current = Some(heap);
        }
        self.current.as_mut().ok_or(GfxError::UnsupportedOperation("transient heap pool has no current heap"))
    }

    /// 把当前 heap 带着 `fence_value` 放入 in-flight 队列
    pub fn retire_current(&mut self, fence_value: u64) -> GfxResult<()> {
        match self.current.take() {
            Some(heap) => self.retire(heap, fence_value),
            None => Ok(()),
        }
    }

    #[inline]
    pub fn take_current(&mut self) -> Option<H> {
        self.current.take()
    }

    /// 取出一个独占的 heap，不影响当前 heap
    pub fn acquire_owned(&mut self, create: impl FnOnce() -> GfxResult<H>) -> GfxResult<H> {
        self.pop_free_or_create(create)
    }

    /// heap 已经交给 GPU，设备完成到 `fence_value` 之前不能再使用
    pub fn retire(&mut self, heap: H, fence_value: u64) -> GfxResult<()> {
        if fence_value < self.last_retired_value {
            return Err(GfxError::NonMonotonicRetire {
                value: fence_value,
                last: self.last_retired_value,
            });
        }
        self.last_retired_value = fence_value;
        self.in_flight.push_back((heap, fence_value));
        Ok(())
    }

    /// 分配 `count` 个新的 heap 放入空闲队列
    pub fn preallocate(&mut self, count: usize, mut create: impl FnMut() -> GfxResult<H>) -> GfxResult<()> {
        for _ in 0..count {
            let heap = create()?;
            self.allocated += 1;
            self.free.push_back(heap);
        }
        if count > 0 {
            log::info!("transient heap pool preallocated {} heaps", count);
        }
        Ok(())
    }

    /// 直接放回空闲队列，只用于从未提交过的 heap
    pub fn recycle(&mut self, heap: H) {
        self.free.push_back(heap);
    }

    /// 把 `fence_value <= completed_value` 的 heap reset 后放回空闲队列
    ///
    /// reset 失败时该 heap 留在 in-flight 队头，错误返回给调用方
    ///
    /// # return
    /// 回收的数量
    pub fn reclaim(&mut self, completed_value: u64, mut reset: impl FnMut(&mut H) -> GfxResult<()>) -> GfxResult<usize> {
        let mut reclaimed = 0;
        while let Some((mut heap, value)) = self.in_flight.pop_front() {
            if value > completed_value {
                self.in_flight.push_front((heap, value));
                break;
            }
            if let Err(e) = reset(&mut heap) {
                self.in_flight.push_front((heap, value));
                return Err(e);
            }
            self.free.push_back(heap);
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    /// 取出池中所有 heap（当前、空闲、in-flight），只在设备 idle 之后调用
    pub fn drain_all(&mut self) -> Vec<H> {
        let heaps = self
            .current
            .take()
            .into_iter()
            .chain(self.free.drain(..))
            .chain(self.in_flight.drain(..).map(|(heap, _)| heap))
            .collect::<Vec<_>>();
        self.allocated = 0;
        heaps
    }
}

// tools
impl<H> GfxTransientHeapPool<H> {
    fn pop_free_or_create(&mut self, create: impl FnOnce() -> GfxResult<H>) -> GfxResult<H> {
        if let Some(heap) = self.free.pop_front() {
            return Ok(heap);
        }
        let heap = create()?;
        self.allocated += 1;
        log::info!("transient heap pool grows to {} heaps", self.allocated);
        Ok(heap)
    }
}
