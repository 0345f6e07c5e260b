use crate::backend::null::{
    NullAccelerationStructure, NullAccelerationStructureInputs, NullBackend, NullBuffer, NullPipeline, NullQueryPool,
    NullShaderObject, NullShaderTable, NullTexture, NullTransientHeap,
};
use crate::backend::{GfxCommandList, GfxTransientHeap};
use crate::commands::barrier::GfxBarrier;
use crate::commands::command_types::{
    GfxAccelerationStructureCopyMode, GfxBlitRegion, GfxBufferTextureCopy, GfxFilter, GfxIndexFormat, GfxRect,
    GfxTextureCopy, GfxViewport,
};
use crate::commands::rendering_info::GfxRenderingDesc;
use crate::error::{GfxError, GfxResult};
use crate::resources::state::GfxResourceState;
use crate::resources::subresource::GfxSubresourceRange;

/// 录制下来的 barrier，资源以 id 表示
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NullBarrier {
    Buffer {
        buffer: u64,
        before: GfxResourceState,
        after: GfxResourceState,
    },
    Texture {
        texture: u64,
        range: GfxSubresourceRange,
        before: GfxResourceState,
        after: GfxResourceState,
    },
    BufferUav {
        buffer: u64,
    },
    TextureUav {
        texture: u64,
    },
    AccelerationStructureBuild {
        structure: u64,
    },
}

/// 录制下来的命令，资源以 id 表示
#[derive(Clone, Debug, PartialEq)]
pub enum NullCommand {
    Barrier(NullBarrier),
    CopyBuffer {
        dst: u64,
        dst_offset: u64,
        src: u64,
        src_offset: u64,
        size: u64,
    },
    CopyTexture {
        dst: u64,
        src: u64,
        copy: GfxTextureCopy,
    },
    CopyHeapToBuffer {
        heap: u64,
        data: Vec<u8>,
        dst: u64,
        dst_offset: u64,
    },
    CopyHeapToTexture {
        heap: u64,
        dst: u64,
        copy: GfxBufferTextureCopy,
    },
    FillBuffer {
        buffer: u64,
        offset: u64,
        size: u64,
        value: u32,
    },
    ClearTextureColor {
        texture: u64,
        range: GfxSubresourceRange,
        color: glam::Vec4,
    },
    ClearTextureDepthStencil {
        texture: u64,
        range: GfxSubresourceRange,
        depth: f32,
        stencil: u32,
    },
    ResolveTexture {
        dst: u64,
        src: u64,
    },
    BlitTexture {
        dst: u64,
        src: u64,
        filter: GfxFilter,
    },
    BeginLabel(String),
    EndLabel,
    BindComputePipeline(u64),
    Dispatch(glam::UVec3),
    DispatchIndirect {
        args: u64,
        offset: u64,
    },
    BeginRendering {
        colors: Vec<u64>,
        resolves: Vec<u64>,
        depth: Option<u64>,
        render_area: GfxRect,
    },
    EndRendering,
    BindGraphicsPipeline(u64),
    SetViewport(GfxViewport),
    SetScissor(GfxRect),
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<(u64, u64)>,
    },
    BindIndexBuffer {
        buffer: u64,
        offset: u64,
        format: GfxIndexFormat,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    DrawIndirect {
        args: u64,
        draw_count: u32,
    },
    DrawIndexedIndirect {
        args: u64,
        draw_count: u32,
    },
    BindRayTracingPipeline(u64),
    BuildAccelerationStructure {
        dst: u64,
        src: Option<u64>,
        scratch: u64,
    },
    CopyAccelerationStructure {
        dst: u64,
        src: u64,
        mode: GfxAccelerationStructureCopyMode,
    },
    QueryAccelerationStructureProperties {
        structures: Vec<u64>,
        first_query: u32,
    },
    DispatchRays(glam::UVec3),
}

impl NullCommand {
    #[inline]
    pub fn is_barrier(&self) -> bool {
        matches!(self, Self::Barrier(_))
    }
}

/// 把命令记录到内存中的命令列表
pub struct NullCommandList {
    id: u64,
    name: String,
    commands: Vec<NullCommand>,
    finished: bool,
}

impl NullCommandList {
    pub(crate) fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            commands: Vec::new(),
            finished: false,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn commands(&self) -> &[NullCommand] {
        &self.commands
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[inline]
    fn push(&mut self, command: NullCommand) {
        self.commands.push(command);
    }
}

impl GfxCommandList<NullBackend> for NullCommandList {
    fn finish(&mut self) -> GfxResult<()> {
        if self.finished {
            return Err(GfxError::InvalidArgument(format!("command list <{}> already finished", self.name)));
        }
        self.finished = true;
        Ok(())
    }

    fn barriers(&mut self, barriers: &[GfxBarrier<'_, NullBackend>]) {
        for barrier in barriers {
            let barrier = match barrier {
                GfxBarrier::Buffer { buffer, transition } => NullBarrier::Buffer {
                    buffer: buffer.id(),
                    before: transition.before,
                    after: transition.after,
                },
                GfxBarrier::Texture {
                    texture,
                    range,
                    transition,
                } => NullBarrier::Texture {
                    texture: texture.id(),
                    range: *range,
                    before: transition.before,
                    after: transition.after,
                },
                GfxBarrier::BufferUav { buffer } => NullBarrier::BufferUav { buffer: buffer.id() },
                GfxBarrier::TextureUav { texture } => NullBarrier::TextureUav { texture: texture.id() },
                GfxBarrier::AccelerationStructureBuild { structure } => NullBarrier::AccelerationStructureBuild {
                    structure: structure.id(),
                },
            };
            self.push(NullCommand::Barrier(barrier));
        }
    }

    fn copy_buffer(
        &mut self,
        dst: &NullBuffer,
        dst_offset: u64,
        src: &NullBuffer,
        src_offset: u64,
        size: u64,
    ) {
        self.push(NullCommand::CopyBuffer {
            dst: dst.id(),
            dst_offset,
            src: src.id(),
            src_offset,
            size,
        });
    }

    fn copy_texture(&mut self, dst: &NullTexture, src: &NullTexture, copy: &GfxTextureCopy) {
        self.push(NullCommand::CopyTexture {
            dst: dst.id(),
            src: src.id(),
            copy: *copy,
        });
    }

    fn copy_heap_to_buffer(
        &mut self,
        heap: &NullTransientHeap,
        heap_offset: u64,
        dst: &NullBuffer,
        dst_offset: u64,
        size: u64,
    ) {
        let data = heap.contents(heap_offset, size).map(<[u8]>::to_vec).unwrap_or_default();
        self.push(NullCommand::CopyHeapToBuffer {
            heap: heap.id(),
            data,
            dst: dst.id(),
            dst_offset,
        });
    }

    fn copy_heap_to_texture(&mut self, heap: &NullTransientHeap, dst: &NullTexture, copy: &GfxBufferTextureCopy) {
        debug_assert!(copy.buffer_offset <= heap.used());
        self.push(NullCommand::CopyHeapToTexture {
            heap: heap.id(),
            dst: dst.id(),
            copy: *copy,
        });
    }

    fn fill_buffer(&mut self, buffer: &NullBuffer, offset: u64, size: u64, value: u32) {
        self.push(NullCommand::FillBuffer {
            buffer: buffer.id(),
            offset,
            size,
            value,
        });
    }

    fn clear_texture_color(&mut self, texture: &NullTexture, range: &GfxSubresourceRange, color: glam::Vec4) {
        self.push(NullCommand::ClearTextureColor {
            texture: texture.id(),
            range: *range,
            color,
        });
    }

    fn clear_texture_depth_stencil(
        &mut self,
        texture: &NullTexture,
        range: &GfxSubresourceRange,
        depth: f32,
        stencil: u32,
    ) {
        self.push(NullCommand::ClearTextureDepthStencil {
            texture: texture.id(),
            range: *range,
            depth,
            stencil,
        });
    }

    fn resolve_texture(
        &mut self,
        dst: &NullTexture,
        _dst_subresource: &GfxSubresourceRange,
        src: &NullTexture,
        _src_subresource: &GfxSubresourceRange,
    ) {
        self.push(NullCommand::ResolveTexture {
            dst: dst.id(),
            src: src.id(),
        });
    }

    fn blit_texture(
        &mut self,
        dst: &NullTexture,
        src: &NullTexture,
        _region: &GfxBlitRegion,
        filter: GfxFilter,
    ) {
        self.push(NullCommand::BlitTexture {
            dst: dst.id(),
            src: src.id(),
            filter,
        });
    }

    fn begin_label(&mut self, name: &str, _color: glam::Vec4) {
        self.push(NullCommand::BeginLabel(name.to_string()));
    }

    fn end_label(&mut self) {
        self.push(NullCommand::EndLabel);
    }

    fn bind_compute_pipeline(&mut self, pipeline: &NullPipeline, _shader_object: Option<&NullShaderObject>) {
        self.push(NullCommand::BindComputePipeline(pipeline.id()));
    }

    fn dispatch(&mut self, group_count: glam::UVec3) {
        self.push(NullCommand::Dispatch(group_count));
    }

    fn dispatch_indirect(&mut self, args: &NullBuffer, offset: u64) {
        self.push(NullCommand::DispatchIndirect { args: args.id(), offset });
    }

    fn begin_rendering(&mut self, desc: &GfxRenderingDesc<'_, NullBackend>) {
        self.push(NullCommand::BeginRendering {
            colors: desc.color_attachments.iter().map(|a| a.texture.id()).collect(),
            resolves: desc
                .color_attachments
                .iter()
                .filter_map(|a| a.resolve_target.map(|t| t.id()))
                .collect(),
            depth: desc.depth_attachment.as_ref().map(|a| a.texture.id()),
            render_area: desc.render_area,
        });
    }

    fn end_rendering(&mut self) {
        self.push(NullCommand::EndRendering);
    }

    fn bind_graphics_pipeline(&mut self, pipeline: &NullPipeline, _shader_object: Option<&NullShaderObject>) {
        self.push(NullCommand::BindGraphicsPipeline(pipeline.id()));
    }

    fn set_viewport(&mut self, viewport: &GfxViewport) {
        self.push(NullCommand::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, scissor: &GfxRect) {
        self.push(NullCommand::SetScissor(*scissor));
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(&NullBuffer, u64)]) {
        self.push(NullCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.iter().map(|(buffer, offset)| (buffer.id(), *offset)).collect(),
        });
    }

    fn bind_index_buffer(&mut self, buffer: &NullBuffer, offset: u64, format: GfxIndexFormat) {
        self.push(NullCommand::BindIndexBuffer {
            buffer: buffer.id(),
            offset,
            format,
        });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.push(NullCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.push(NullCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }

    fn draw_indirect(&mut self, args: &NullBuffer, _offset: u64, draw_count: u32, _stride: u32) {
        self.push(NullCommand::DrawIndirect {
            args: args.id(),
            draw_count,
        });
    }

    fn draw_indexed_indirect(&mut self, args: &NullBuffer, _offset: u64, draw_count: u32, _stride: u32) {
        self.push(NullCommand::DrawIndexedIndirect {
            args: args.id(),
            draw_count,
        });
    }

    fn bind_ray_tracing_pipeline(
        &mut self,
        pipeline: &NullPipeline,
        _shader_object: Option<&NullShaderObject>,
    ) {
        self.push(NullCommand::BindRayTracingPipeline(pipeline.id()));
    }

    fn build_acceleration_structure(
        &mut self,
        dst: &NullAccelerationStructure,
        src: Option<&NullAccelerationStructure>,
        _inputs: &NullAccelerationStructureInputs,
        scratch: &NullBuffer,
        _scratch_offset: u64,
    ) {
        self.push(NullCommand::BuildAccelerationStructure {
            dst: dst.id(),
            src: src.map(|s| s.id()),
            scratch: scratch.id(),
        });
    }

    fn copy_acceleration_structure(
        &mut self,
        dst: &NullAccelerationStructure,
        src: &NullAccelerationStructure,
        mode: GfxAccelerationStructureCopyMode,
    ) {
        self.push(NullCommand::CopyAccelerationStructure {
            dst: dst.id(),
            src: src.id(),
            mode,
        });
    }

    fn query_acceleration_structure_properties(
        &mut self,
        structures: &[&NullAccelerationStructure],
        _query_pool: &NullQueryPool,
        first_query: u32,
    ) {
        self.push(NullCommand::QueryAccelerationStructureProperties {
            structures: structures.iter().map(|s| s.id()).collect(),
            first_query,
        });
    }

    fn dispatch_rays(&mut self, _shader_table: &NullShaderTable, size: glam::UVec3) {
        self.push(NullCommand::DispatchRays(size));
    }
}
