//! [`GfxResourceState`] 到 Vulkan 同步参数的映射
//!
//! 封装 Vulkan 的 pipeline stage、access mask 和 image layout。buffer 忽略 layout。

use ash::vk;

use crate::resources::state::GfxResourceState;

/// 某个状态对应的 stage / access / layout
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VkAccessState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for VkAccessState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl VkAccessState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    pub const GENERAL: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw()),
        vk::ImageLayout::GENERAL,
    );

    pub const VERTEX_BUFFER: Self = Self::new(
        vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
        vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        vk::ImageLayout::UNDEFINED,
    );

    pub const INDEX_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ, vk::ImageLayout::UNDEFINED);

    pub const CONSTANT_BUFFER: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::UNIFORM_READ,
        vk::ImageLayout::UNDEFINED,
    );

    pub const INDIRECT_ARGUMENT: Self = Self::new(
        vk::PipelineStageFlags2::DRAW_INDIRECT,
        vk::AccessFlags2::INDIRECT_COMMAND_READ,
        vk::ImageLayout::UNDEFINED,
    );

    pub const COPY_SOURCE: Self = Self::new(
        vk::PipelineStageFlags2::ALL_TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    pub const COPY_DESTINATION: Self = Self::new(
        vk::PipelineStageFlags2::ALL_TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    /// 任意 shader stage 的采样 / 只读访问
    pub const SHADER_RESOURCE: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const UNORDERED_ACCESS: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    pub const RENDER_TARGET: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const DEPTH_READ: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    );

    pub const DEPTH_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    /// `vkCmdResolveImage` 的源
    pub const RESOLVE_SOURCE: Self = Self::COPY_SOURCE;

    /// 既可以是 `vkCmdResolveImage` 的目标，也可以是 dynamic rendering 的 resolve attachment
    pub const RESOLVE_DESTINATION: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::ALL_TRANSFER.as_raw() | vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::TRANSFER_WRITE.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    pub const ACCELERATION_STRUCTURE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR.as_raw()
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR.as_raw()
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
        ),
        vk::ImageLayout::UNDEFINED,
    );

    pub const ACCELERATION_STRUCTURE_BUILD_INPUT: Self = Self::new(
        vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::UNDEFINED,
    );
}

impl From<GfxResourceState> for VkAccessState {
    fn from(state: GfxResourceState) -> Self {
        match state {
            GfxResourceState::Undefined => Self::UNDEFINED,
            GfxResourceState::General => Self::GENERAL,
            GfxResourceState::VertexBuffer => Self::VERTEX_BUFFER,
            GfxResourceState::IndexBuffer => Self::INDEX_BUFFER,
            GfxResourceState::ConstantBuffer => Self::CONSTANT_BUFFER,
            GfxResourceState::IndirectArgument => Self::INDIRECT_ARGUMENT,
            GfxResourceState::CopySource => Self::COPY_SOURCE,
            GfxResourceState::CopyDestination => Self::COPY_DESTINATION,
            GfxResourceState::ShaderResource => Self::SHADER_RESOURCE,
            GfxResourceState::UnorderedAccess => Self::UNORDERED_ACCESS,
            GfxResourceState::RenderTarget => Self::RENDER_TARGET,
            GfxResourceState::DepthRead => Self::DEPTH_READ,
            GfxResourceState::DepthWrite => Self::DEPTH_WRITE,
            GfxResourceState::ResolveSource => Self::RESOLVE_SOURCE,
            GfxResourceState::ResolveDestination => Self::RESOLVE_DESTINATION,
            GfxResourceState::Present => Self::PRESENT,
            GfxResourceState::AccelerationStructure => Self::ACCELERATION_STRUCTURE,
            GfxResourceState::AccelerationStructureBuildInput => Self::ACCELERATION_STRUCTURE_BUILD_INPUT,
        }
    }
}
