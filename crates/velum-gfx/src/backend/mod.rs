//! 后端抽象
//!
//! 核心逻辑只依赖这里的能力集合：创建命令录制器、提交、fence 的 signal / wait、
//! 创建 transient heap、释放原生对象。每个原生图形 API 提供一个实现。

pub mod null;
#[cfg(feature = "vulkan")]
pub mod vulkan;

use crate::commands::barrier::GfxBarrier;
use crate::commands::command_types::{
    GfxAccelerationStructureCopyMode, GfxBlitRegion, GfxBufferTextureCopy, GfxFilter, GfxIndexFormat, GfxRect,
    GfxTextureCopy, GfxViewport,
};
use crate::commands::rendering_info::GfxRenderingDesc;
use crate::error::GfxResult;
use crate::resources::subresource::GfxSubresourceRange;
use crate::sync::external::GfxExternalHandle;

/// 一个原生图形后端
///
/// 关联类型都是原生对象的句柄，核心层只负责转发，不解释其内容。
pub trait GfxBackend: Sized + Send + Sync + 'static {
    type Buffer: Send + Sync + 'static;
    type Texture: Send + Sync + 'static;
    type AccelerationStructure: Send + Sync + 'static;
    /// 加速结构的构建输入（几何体、实例等），原样传给后端
    type AccelerationStructureInputs: Send + Sync;
    type Pipeline: Send + Sync;
    /// 绑定到 pipeline 上的 shader 参数对象，原样传给后端
    type ShaderObject: Send + Sync;
    /// 光追的 shader binding table
    type ShaderTable: Send + Sync;
    type QueryPool: Send + Sync;
    type Fence: Send + Sync + 'static;
    type CommandList: GfxCommandList<Self> + Send + 'static;
    type TransientHeap: GfxTransientHeap<Self> + Send + 'static;

    fn backend_name(&self) -> &'static str;

    // 命令录制与提交
    /// 创建一个处于录制状态的原生命令列表
    fn create_command_list(&self, debug_name: &str) -> GfxResult<Self::CommandList>;
    /// 提交已经关闭的命令列表，执行完毕后在队列上把 `fence` signal 到 `signal_value`
    fn submit(&self, list: &Self::CommandList, fence: &Self::Fence, signal_value: u64) -> GfxResult<()>;
    fn queue_wait_idle(&self) -> GfxResult<()>;

    // fence
    fn create_fence(&self, initial_value: u64, shared: bool, debug_name: &str) -> GfxResult<Self::Fence>;
    /// 设备实际完成到的值
    fn fence_completed_value(&self, fence: &Self::Fence) -> GfxResult<u64>;
    /// 阻塞当前线程直到 fence 到达 `value`，没有超时
    fn wait_fence(&self, fence: &Self::Fence, value: u64) -> GfxResult<()>;
    /// 在队列上 signal fence（不带命令）
    fn queue_signal(&self, fence: &Self::Fence, value: u64) -> GfxResult<()>;
    /// 让队列上后续的工作等待 fence 到达 `value`
    fn queue_wait(&self, fence: &Self::Fence, value: u64) -> GfxResult<()>;
    /// 导出 fence 的共享句柄，供其他 API（例如 CUDA）导入
    fn export_fence(&self, fence: &Self::Fence) -> GfxResult<GfxExternalHandle>;
    fn destroy_fence(&self, fence: &Self::Fence);

    // transient heap
    fn create_transient_heap(&self, desc: &GfxTransientHeapDesc) -> GfxResult<Self::TransientHeap>;
    fn destroy_transient_heap(&self, heap: Self::TransientHeap);

    /// 立即释放原生对象，调用方保证 GPU 不再使用它
    fn release(&self, object: GfxReleasable<Self>);
}

/// 原生命令列表的录制接口
///
/// 录制本身不会失败，只有关闭录制时才会返回后端错误
pub trait GfxCommandList<B: GfxBackend> {
    /// 关闭原生录制
    fn finish(&mut self) -> GfxResult<()>;

    // 同步
    fn barriers(&mut self, barriers: &[GfxBarrier<'_, B>]);

    // 数据传输
    fn copy_buffer(&mut self, dst: &B::Buffer, dst_offset: u64, src: &B::Buffer, src_offset: u64, size: u64);
    fn copy_texture(&mut self, dst: &B::Texture, src: &B::Texture, copy: &GfxTextureCopy);
    fn copy_heap_to_buffer(&mut self, heap: &B::TransientHeap, heap_offset: u64, dst: &B::Buffer, dst_offset: u64, size: u64);
    fn copy_heap_to_texture(&mut self, heap: &B::TransientHeap, dst: &B::Texture, copy: &GfxBufferTextureCopy);
    fn fill_buffer(&mut self, buffer: &B::Buffer, offset: u64, size: u64, value: u32);
    fn clear_texture_color(&mut self, texture: &B::Texture, range: &GfxSubresourceRange, color: glam::Vec4);
    fn clear_texture_depth_stencil(&mut self, texture: &B::Texture, range: &GfxSubresourceRange, depth: f32, stencil: u32);
    fn resolve_texture(
        &mut self,
        dst: &B::Texture,
        dst_subresource: &GfxSubresourceRange,
        src: &B::Texture,
        src_subresource: &GfxSubresourceRange,
    );
    fn blit_texture(&mut self, dst: &B::Texture, src: &B::Texture, region: &GfxBlitRegion, filter: GfxFilter);

    // debug
    fn begin_label(&mut self, name: &str, color: glam::Vec4);
    fn end_label(&mut self);

    // compute
    fn bind_compute_pipeline(&mut self, pipeline: &B::Pipeline, shader_object: Option<&B::ShaderObject>);
    fn dispatch(&mut self, group_count: glam::UVec3);
    fn dispatch_indirect(&mut self, args: &B::Buffer, offset: u64);

    // render
    fn begin_rendering(&mut self, desc: &GfxRenderingDesc<'_, B>);
    fn end_rendering(&mut self);
    fn bind_graphics_pipeline(&mut self, pipeline: &B::Pipeline, shader_object: Option<&B::ShaderObject>);
    fn set_viewport(&mut self, viewport: &GfxViewport);
    fn set_scissor(&mut self, scissor: &GfxRect);
    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(&B::Buffer, u64)]);
    fn bind_index_buffer(&mut self, buffer: &B::Buffer, offset: u64, format: GfxIndexFormat);
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn draw_indirect(&mut self, args: &B::Buffer, offset: u64, draw_count: u32, stride: u32);
    fn draw_indexed_indirect(&mut self, args: &B::Buffer, offset: u64, draw_count: u32, stride: u32);

    // ray tracing
    fn bind_ray_tracing_pipeline(&mut self, pipeline: &B::Pipeline, shader_object: Option<&B::ShaderObject>);
    fn build_acceleration_structure(
        &mut self,
        dst: &B::AccelerationStructure,
        src: Option<&B::AccelerationStructure>,
        inputs: &B::AccelerationStructureInputs,
        scratch: &B::Buffer,
        scratch_offset: u64,
    );
    fn copy_acceleration_structure(
        &mut self,
        dst: &B::AccelerationStructure,
        src: &B::AccelerationStructure,
        mode: GfxAccelerationStructureCopyMode,
    );
    fn query_acceleration_structure_properties(
        &mut self,
        structures: &[&B::AccelerationStructure],
        query_pool: &B::QueryPool,
        first_query: u32,
    );
    fn dispatch_rays(&mut self, shader_table: &B::ShaderTable, size: glam::UVec3);
}

/// 每次提交使用的临时 GPU 可见存储（upload / constant / descriptor）
pub trait GfxTransientHeap<B: GfxBackend> {
    /// 回到空的状态，GPU 必须已经不再使用它
    fn reset(&mut self) -> GfxResult<()>;

    fn capacity(&self) -> u64;

    fn used(&self) -> u64;

    /// 把 data 写入 heap，返回在 heap 内的偏移
    fn write(&mut self, data: &[u8], alignment: u64) -> GfxResult<u64>;

    /// heap 背后的 buffer，用于把 constant 绑定给 shader
    fn buffer(&self) -> &B::Buffer;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxTransientHeapDesc {
    pub size: u64,
    pub descriptor_count: u32,
}

/// 可以交给延迟释放队列的原生对象
pub enum GfxReleasable<B: GfxBackend> {
    Buffer(B::Buffer),
    Texture(B::Texture),
    AccelerationStructure(B::AccelerationStructure),
    CommandList(B::CommandList),
}

impl<B: GfxBackend> GfxReleasable<B> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Texture(_) => "texture",
            Self::AccelerationStructure(_) => "acceleration-structure",
            Self::CommandList(_) => "command-list",
        }
    }
}

/// 按 `align` 向上取整，`align` 为 0 或 1 时原样返回
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 { value } else { value.div_ceil(align) * align }
}
