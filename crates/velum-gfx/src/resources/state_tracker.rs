//! 单个资源的状态跟踪
//!
//! 每个资源持有一个 tracker，要么记录整个资源的聚合状态，要么记录每个
//! subresource 的状态，两者不会同时存在。
//!
//! tracker 不加锁：同一时间只有一个正在录制的 encoder 会访问某个资源。

use crate::error::{GfxError, GfxResult};
use crate::resources::state::GfxResourceState;
use crate::resources::subresource::GfxSubresourceRange;

/// 一次需要录制 barrier 的状态转换
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxStateTransition {
    pub before: GfxResourceState,
    pub after: GfxResourceState,
}

/// 状态跟踪的粒度
#[derive(Clone, Debug, PartialEq, Eq)]
enum GfxStateTracking {
    Global(GfxResourceState),
    PerSubresource(Vec<GfxResourceState>),
}

#[derive(Clone, Debug)]
pub struct GfxResourceStateTracker {
    tracking: GfxStateTracking,
    mip_level_count: u32,
    array_layer_count: u32,
}

// new & init
impl GfxResourceStateTracker {
    /// buffer 使用 1 × 1
    pub fn new(initial_state: GfxResourceState, mip_level_count: u32, array_layer_count: u32) -> Self {
        Self {
            tracking: GfxStateTracking::Global(initial_state),
            mip_level_count: mip_level_count.max(1),
            array_layer_count: array_layer_count.max(1),
        }
    }
}

// getters
impl GfxResourceStateTracker {
    #[inline]
    pub fn subresource_count(&self) -> u32 {
        self.mip_level_count * self.array_layer_count
    }

    #[inline]
    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    #[inline]
    pub fn array_layer_count(&self) -> u32 {
        self.array_layer_count
    }

    /// 覆盖整个资源的 range
    #[inline]
    pub fn whole_range(&self) -> GfxSubresourceRange {
        GfxSubresourceRange::whole(self.mip_level_count, self.array_layer_count)
    }

    #[inline]
    pub fn is_per_subresource(&self) -> bool {
        matches!(self.tracking, GfxStateTracking::PerSubresource(_))
    }

    /// 整个资源的状态
    ///
    /// 在 per-subresource 模式下，只有所有 subresource 状态一致时才返回 `Some`
    pub fn global_state(&self) -> Option<GfxResourceState> {
        match &self.tracking {
            GfxStateTracking::Global(state) => Some(*state),
            GfxStateTracking::PerSubresource(states) => {
                let first = states[0];
                states.iter().all(|s| *s == first).then_some(first)
            }
        }
    }

    pub fn subresource_state(&self, index: u32) -> GfxResult<GfxResourceState> {
        self.check_index(index)?;
        Ok(match &self.tracking {
            GfxStateTracking::Global(state) => *state,
            GfxStateTracking::PerSubresource(states) => states[index as usize],
        })
    }

    /// range 内所有 subresource 的共同状态，不一致时报错
    pub fn range_state(&self, range: &GfxSubresourceRange) -> GfxResult<GfxResourceState> {
        self.check_range(range)?;
        match &self.tracking {
            GfxStateTracking::Global(state) => Ok(*state),
            GfxStateTracking::PerSubresource(states) => {
                let mut indices = range.indices(self.mip_level_count);
                // check_range 保证 range 非空
                let first = indices.next().map(|i| states[i as usize]).unwrap_or_default();
                if indices.all(|i| states[i as usize] == first) {
                    Ok(first)
                } else {
                    Err(GfxError::MixedSubresourceStates { range: *range })
                }
            }
        }
    }
}

// setters
impl GfxResourceStateTracker {
    /// 设置整个资源的状态
    ///
    /// per-subresource 模式下会把所有 subresource 设置为同一个状态，但不会切回聚合模式，
    /// 需要切回时使用 [`Self::reset_to_global`]
    pub fn set_global_state(&mut self, state: GfxResourceState) {
        match &mut self.tracking {
            GfxStateTracking::Global(current) => *current = state,
            GfxStateTracking::PerSubresource(states) => states.fill(state),
        }
    }

    /// 设置单个 subresource 的状态，第一次调用时切换到 per-subresource 模式
    pub fn set_subresource_state(&mut self, index: u32, state: GfxResourceState) -> GfxResult<()> {
        self.check_index(index)?;
        self.states_mut()[index as usize] = state;
        Ok(())
    }

    pub fn set_range_state(&mut self, range: &GfxSubresourceRange, state: GfxResourceState) -> GfxResult<()> {
        self.check_range(range)?;
        if range.covers(self.mip_level_count, self.array_layer_count) {
            self.set_global_state(state);
            return Ok(());
        }
        let mip_level_count = self.mip_level_count;
        let states = self.states_mut();
        for index in range.indices(mip_level_count) {
            states[index as usize] = state;
        }
        Ok(())
    }

    /// 丢弃 per-subresource 记录，回到聚合模式
    pub fn reset_to_global(&mut self, state: GfxResourceState) {
        self.tracking = GfxStateTracking::Global(state);
    }
}

// barrier 判定
impl GfxResourceStateTracker {
    /// 请求整个资源进入 `new_state`
    ///
    /// 状态相同时返回 `None`（不需要 barrier），否则更新 tracker 并返回需要录制的转换。
    /// per-subresource 模式下等价于对整个 range 的请求。
    pub fn request_state(&mut self, new_state: GfxResourceState) -> GfxResult<Option<GfxStateTransition>> {
        let current = match &self.tracking {
            GfxStateTracking::Global(state) => *state,
            GfxStateTracking::PerSubresource(_) => self.global_state().ok_or(GfxError::MixedSubresourceStates {
                range: self.whole_range(),
            })?,
        };
        if current == new_state {
            return Ok(None);
        }
        self.set_global_state(new_state);
        Ok(Some(GfxStateTransition {
            before: current,
            after: new_state,
        }))
    }

    /// 请求 range 内的所有 subresource 进入 `new_state`
    ///
    /// range 内状态不一致时报错，调用方需要先统一状态
    pub fn request_range_state(
        &mut self,
        range: &GfxSubresourceRange,
        new_state: GfxResourceState,
    ) -> GfxResult<Option<GfxStateTransition>> {
        let current = self.range_state(range)?;
        if current == new_state {
            return Ok(None);
        }
        self.set_range_state(range, new_state)?;
        Ok(Some(GfxStateTransition {
            before: current,
            after: new_state,
        }))
    }
}

// tools
impl GfxResourceStateTracker {
    fn states_mut(&mut self) -> &mut Vec<GfxResourceState> {
        if let GfxStateTracking::Global(state) = self.tracking {
            self.tracking = GfxStateTracking::PerSubresource(vec![state; self.subresource_count() as usize]);
        }
        match &mut self.tracking {
            GfxStateTracking::PerSubresource(states) => states,
            GfxStateTracking::Global(_) => unreachable!(),
        }
    }

    #[inline]
    fn check_index(&self, index: u32) -> GfxResult<()> {
        if index >= self.subresource_count() {
            return Err(GfxError::SubresourceOutOfRange {
                index,
                count: self.subresource_count(),
            });
        }
        Ok(())
    }

    fn check_range(&self, range: &GfxSubresourceRange) -> GfxResult<()> {
        if range.is_empty() || !range.fits(self.mip_level_count, self.array_layer_count) {
            return Err(GfxError::InvalidArgument(format!(
                "subresource range {range:?} does not fit a texture of {} mips x {} layers",
                self.mip_level_count, self.array_layer_count
            )));
        }
        Ok(())
    }
}
