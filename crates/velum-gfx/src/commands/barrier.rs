use crate::backend::GfxBackend;
use crate::resources::state_tracker::GfxStateTransition;
use crate::resources::subresource::GfxSubresourceRange;

/// 交给后端录制的 barrier 描述
///
/// 状态转换由 [`crate::resources::state_tracker::GfxResourceStateTracker`] 计算，后端只负责
/// 把它翻译成原生的 stage / access / layout。
pub enum GfxBarrier<'a, B: GfxBackend> {
    Buffer {
        buffer: &'a B::Buffer,
        transition: GfxStateTransition,
    },
    Texture {
        texture: &'a B::Texture,
        range: GfxSubresourceRange,
        transition: GfxStateTransition,
    },
    /// UAV 的写后读依赖，状态不变
    BufferUav { buffer: &'a B::Buffer },
    /// UAV 的写后读依赖，状态不变
    TextureUav { texture: &'a B::Texture },
    /// 加速结构构建完成后，后续读取需要等待
    AccelerationStructureBuild { structure: &'a B::AccelerationStructure },
}

impl<B: GfxBackend> GfxBarrier<'_, B> {
    /// 该 barrier 的状态转换，UAV / 构建 barrier 没有状态转换
    #[inline]
    pub fn transition(&self) -> Option<GfxStateTransition> {
        match self {
            Self::Buffer { transition, .. } | Self::Texture { transition, .. } => Some(*transition),
            _ => None,
        }
    }
}
