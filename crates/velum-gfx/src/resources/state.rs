//! 资源状态定义
//!
//! 与后端无关的资源访问状态。各后端负责把它翻译成原生的
//! stage / access / layout（见 `backend::vulkan::state`）。

use serde::{Deserialize, Serialize};

/// 资源当前被校验过的 GPU 访问方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GfxResourceState {
    /// 未定义状态（初始状态或不关心内容）
    #[default]
    Undefined,
    /// 通用状态（可用于任何操作，但性能可能不是最优）
    General,
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
    IndirectArgument,
    CopySource,
    CopyDestination,
    /// 着色器只读
    ShaderResource,
    /// 着色器读写（storage buffer / storage image）
    UnorderedAccess,
    RenderTarget,
    DepthRead,
    DepthWrite,
    ResolveSource,
    ResolveDestination,
    /// 呈现（swapchain image）
    Present,
    AccelerationStructure,
    AccelerationStructureBuildInput,
}

impl GfxResourceState {
    /// 检查是否为写操作
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::General
                | Self::CopyDestination
                | Self::UnorderedAccess
                | Self::RenderTarget
                | Self::DepthWrite
                | Self::ResolveDestination
                | Self::AccelerationStructure
        )
    }

    /// 检查是否为只读操作
    #[inline]
    pub fn is_read_only(self) -> bool {
        !self.is_write() && self != Self::Undefined
    }

    /// 该状态是否只对 texture 有意义
    #[inline]
    pub fn is_texture_only(self) -> bool {
        matches!(
            self,
            Self::RenderTarget
                | Self::DepthRead
                | Self::DepthWrite
                | Self::ResolveSource
                | Self::ResolveDestination
                | Self::Present
        )
    }

    /// 该状态是否只对 buffer 有意义
    #[inline]
    pub fn is_buffer_only(self) -> bool {
        matches!(
            self,
            Self::VertexBuffer
                | Self::IndexBuffer
                | Self::ConstantBuffer
                | Self::IndirectArgument
                | Self::AccelerationStructure
                | Self::AccelerationStructureBuildInput
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_classification() {
        assert!(GfxResourceState::CopyDestination.is_write());
        assert!(GfxResourceState::UnorderedAccess.is_write());
        assert!(GfxResourceState::ShaderResource.is_read_only());
        assert!(!GfxResourceState::Undefined.is_read_only());
        assert!(!GfxResourceState::Undefined.is_write());
    }

    #[test]
    fn test_default_is_undefined() {
        assert_eq!(GfxResourceState::default(), GfxResourceState::Undefined);
    }
}
