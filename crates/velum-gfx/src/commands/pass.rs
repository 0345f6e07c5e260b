//! pass encoder
//!
//! pass encoder 独占地借用 [`GfxCommandEncoder`]，借用期间 encoder 不能录制其他命令，
//! 也不能开始另一个 pass。`end()` 把 encoder 交还；忘记调用时在 drop 中补上。

use crate::backend::{GfxBackend, GfxCommandList};
use crate::commands::barrier::GfxBarrier;
use crate::commands::command_types::{GfxAccelerationStructureCopyMode, GfxIndexFormat, GfxRect, GfxViewport};
use crate::commands::encoder::{GfxCommandEncoder, GfxPassKind};
use crate::error::{GfxError, GfxResult};
use crate::resources::buffer::GfxBuffer;
use crate::resources::state::GfxResourceState;
use crate::resources::subresource::GfxSubresourceRange;
use crate::resources::texture::GfxTexture;

/// 三种 pass 共用的部分：持有 encoder 的独占借用，负责关闭 pass
struct GfxPassCore<'e, 'd, B: GfxBackend> {
    encoder: &'e mut GfxCommandEncoder<'d, B>,
    kind: GfxPassKind,
    ended: bool,
}

impl<'e, 'd, B: GfxBackend> GfxPassCore<'e, 'd, B> {
    fn new(encoder: &'e mut GfxCommandEncoder<'d, B>, kind: GfxPassKind) -> Self {
        Self {
            encoder,
            kind,
            ended: false,
        }
    }

    #[inline]
    fn list(&mut self) -> GfxResult<&mut B::CommandList> {
        self.encoder.list_mut()
    }

    fn end(&mut self) -> GfxResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.encoder.close_pass(self.kind)
    }
}

impl<B: GfxBackend> Drop for GfxPassCore<'_, '_, B> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if !std::thread::panicking() {
            log::warn!("{:?} pass on <{}> dropped without end()", self.kind, self.encoder.name());
        }
        if let Err(e) = self.end() {
            log::error!("failed to close {:?} pass: {}", self.kind, e);
        }
    }
}

/// 检查资源已经处于 pass 内需要的状态（render pass 内不能转换状态）
fn expect_buffer_state<B: GfxBackend>(buffer: &GfxBuffer<B>, expected: GfxResourceState) -> GfxResult<()> {
    let current = buffer.state_tracker().global_state();
    if current != Some(expected) {
        return Err(GfxError::InvalidArgument(format!(
            "buffer <{}> is in {:?}, expected {:?}; transition it before the render pass",
            buffer.name(),
            current,
            expected
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// compute
// ---------------------------------------------------------------------------

pub struct GfxComputePassEncoder<'e, 'd, B: GfxBackend> {
    core: GfxPassCore<'e, 'd, B>,
}

impl<'e, 'd, B: GfxBackend> GfxComputePassEncoder<'e, 'd, B> {
    pub(crate) fn new(encoder: &'e mut GfxCommandEncoder<'d, B>) -> Self {
        Self {
            core: GfxPassCore::new(encoder, GfxPassKind::Compute),
        }
    }

    pub fn bind_pipeline(&mut self, pipeline: &B::Pipeline, shader_object: Option<&B::ShaderObject>) -> GfxResult<()> {
        self.core.list()?.bind_compute_pipeline(pipeline, shader_object);
        Ok(())
    }

    /// 声明 dispatch 对 buffer 的访问方式，需要时插入 barrier
    pub fn use_buffer(&mut self, buffer: &mut GfxBuffer<B>, state: GfxResourceState) -> GfxResult<bool> {
        self.core.encoder.transition_buffer(buffer, state)
    }

    /// 声明 dispatch 对 texture 一段 subresource 的访问方式，需要时插入 barrier
    pub fn use_texture(
        &mut self,
        texture: &mut GfxTexture<B>,
        range: GfxSubresourceRange,
        state: GfxResourceState,
    ) -> GfxResult<bool> {
        self.core.encoder.transition_texture_range(texture, range, state)
    }

    pub fn buffer_uav_barrier(&mut self, buffer: &GfxBuffer<B>) -> GfxResult<()> {
        self.core.encoder.record_barrier(GfxBarrier::BufferUav {
            buffer: buffer.native(),
        })
    }

    pub fn texture_uav_barrier(&mut self, texture: &GfxTexture<B>) -> GfxResult<()> {
        self.core.encoder.record_barrier(GfxBarrier::TextureUav {
            texture: texture.native(),
        })
    }

    pub fn dispatch(&mut self, group_count: glam::UVec3) -> GfxResult<()> {
        self.core.list()?.dispatch(group_count);
        Ok(())
    }

    /// 参数 buffer 会被转换到 `IndirectArgument`
    pub fn dispatch_indirect(&mut self, args: &mut GfxBuffer<B>, offset: u64) -> GfxResult<()> {
        self.core.encoder.transition_buffer(args, GfxResourceState::IndirectArgument)?;
        self.core.list()?.dispatch_indirect(args.native(), offset);
        Ok(())
    }

    pub fn end(mut self) -> GfxResult<()> {
        self.core.end()
    }
}

// ---------------------------------------------------------------------------
// render
// ---------------------------------------------------------------------------

/// render pass 内的 attachment 已经在开始时转换好，这里只能使用已经处于正确状态的资源
pub struct GfxRenderPassEncoder<'e, 'd, B: GfxBackend> {
    core: GfxPassCore<'e, 'd, B>,
}

impl<'e, 'd, B: GfxBackend> GfxRenderPassEncoder<'e, 'd, B> {
    pub(crate) fn new(encoder: &'e mut GfxCommandEncoder<'d, B>) -> Self {
        Self {
            core: GfxPassCore::new(encoder, GfxPassKind::Render),
        }
    }

    pub fn bind_pipeline(&mut self, pipeline: &B::Pipeline, shader_object: Option<&B::ShaderObject>) -> GfxResult<()> {
        self.core.list()?.bind_graphics_pipeline(pipeline, shader_object);
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: &GfxViewport) -> GfxResult<()> {
        self.core.list()?.set_viewport(viewport);
        Ok(())
    }

    pub fn set_scissor(&mut self, scissor: &GfxRect) -> GfxResult<()> {
        self.core.list()?.set_scissor(scissor);
        Ok(())
    }

    /// buffer 必须已经处于 `VertexBuffer` 状态
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(&GfxBuffer<B>, u64)]) -> GfxResult<()> {
        for (buffer, _) in buffers {
            expect_buffer_state(buffer, GfxResourceState::VertexBuffer)?;
        }
        let natives = buffers.iter().map(|(buffer, offset)| (buffer.native(), *offset)).collect::<Vec<_>>();
        self.core.list()?.bind_vertex_buffers(first_binding, &natives);
        Ok(())
    }

    /// buffer 必须已经处于 `IndexBuffer` 状态
    pub fn bind_index_buffer(&mut self, buffer: &GfxBuffer<B>, offset: u64, format: GfxIndexFormat) -> GfxResult<()> {
        expect_buffer_state(buffer, GfxResourceState::IndexBuffer)?;
        self.core.list()?.bind_index_buffer(buffer.native(), offset, format);
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> GfxResult<()> {
        self.core.list()?.draw(vertex_count, instance_count, first_vertex, first_instance);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> GfxResult<()> {
        self.core.list()?.draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance);
        Ok(())
    }

    /// 参数 buffer 必须已经处于 `IndirectArgument` 状态
    pub fn draw_indirect(&mut self, args: &GfxBuffer<B>, offset: u64, draw_count: u32, stride: u32) -> GfxResult<()> {
        expect_buffer_state(args, GfxResourceState::IndirectArgument)?;
        self.core.list()?.draw_indirect(args.native(), offset, draw_count, stride);
        Ok(())
    }

    /// 参数 buffer 必须已经处于 `IndirectArgument` 状态
    pub fn draw_indexed_indirect(
        &mut self,
        args: &GfxBuffer<B>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> GfxResult<()> {
        expect_buffer_state(args, GfxResourceState::IndirectArgument)?;
        self.core.list()?.draw_indexed_indirect(args.native(), offset, draw_count, stride);
        Ok(())
    }

    pub fn end(mut self) -> GfxResult<()> {
        self.core.end()
    }
}

// ---------------------------------------------------------------------------
// ray tracing
// ---------------------------------------------------------------------------

pub struct GfxRayTracingPassEncoder<'e, 'd, B: GfxBackend> {
    core: GfxPassCore<'e, 'd, B>,
}

impl<'e, 'd, B: GfxBackend> GfxRayTracingPassEncoder<'e, 'd, B> {
    pub(crate) fn new(encoder: &'e mut GfxCommandEncoder<'d, B>) -> Self {
        Self {
            core: GfxPassCore::new(encoder, GfxPassKind::RayTracing),
        }
    }

    pub fn bind_pipeline(&mut self, pipeline: &B::Pipeline, shader_object: Option<&B::ShaderObject>) -> GfxResult<()> {
        self.core.list()?.bind_ray_tracing_pipeline(pipeline, shader_object);
        Ok(())
    }

    pub fn use_buffer(&mut self, buffer: &mut GfxBuffer<B>, state: GfxResourceState) -> GfxResult<bool> {
        self.core.encoder.transition_buffer(buffer, state)
    }

    pub fn use_texture(
        &mut self,
        texture: &mut GfxTexture<B>,
        range: GfxSubresourceRange,
        state: GfxResourceState,
    ) -> GfxResult<bool> {
        self.core.encoder.transition_texture_range(texture, range, state)
    }

    /// 构建（`src` 为 `None`）或更新加速结构
    ///
    /// scratch buffer 会被转换到 `UnorderedAccess`，已经处于该状态时插入 UAV barrier，
    /// 防止和上一次构建的 scratch 写入重叠。构建之后对 `dst` 插入一个构建 barrier。
    pub fn build_acceleration_structure(
        &mut self,
        dst: &B::AccelerationStructure,
        src: Option<&B::AccelerationStructure>,
        inputs: &B::AccelerationStructureInputs,
        scratch: &mut GfxBuffer<B>,
        scratch_offset: u64,
    ) -> GfxResult<()> {
        if !self.core.encoder.transition_buffer(scratch, GfxResourceState::UnorderedAccess)? {
            self.core.encoder.record_barrier(GfxBarrier::BufferUav {
                buffer: scratch.native(),
            })?;
        }
        self.core.list()?.build_acceleration_structure(dst, src, inputs, scratch.native(), scratch_offset);
        self.core.encoder.record_barrier(GfxBarrier::AccelerationStructureBuild { structure: dst })
    }

    pub fn copy_acceleration_structure(
        &mut self,
        dst: &B::AccelerationStructure,
        src: &B::AccelerationStructure,
        mode: GfxAccelerationStructureCopyMode,
    ) -> GfxResult<()> {
        self.core.list()?.copy_acceleration_structure(dst, src, mode);
        self.core.encoder.record_barrier(GfxBarrier::AccelerationStructureBuild { structure: dst })
    }

    /// 把加速结构的属性（例如压缩后的大小）写入 query pool
    pub fn query_acceleration_structure_properties(
        &mut self,
        structures: &[&B::AccelerationStructure],
        query_pool: &B::QueryPool,
        first_query: u32,
    ) -> GfxResult<()> {
        self.core.list()?.query_acceleration_structure_properties(structures, query_pool, first_query);
        Ok(())
    }

    pub fn dispatch_rays(&mut self, shader_table: &B::ShaderTable, size: glam::UVec3) -> GfxResult<()> {
        self.core.list()?.dispatch_rays(shader_table, size);
        Ok(())
    }

    pub fn end(mut self) -> GfxResult<()> {
        self.core.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, NullBarrier, NullCommand};
    use crate::commands::encoder::GfxEncoderState;
    use crate::commands::rendering_info::{GfxClearValue, GfxLoadOp, GfxRenderPassDesc, GfxStoreOp};
    use crate::config::GfxDeviceConfig;
    use crate::device::GfxDevice;
    use crate::resources::texture::GfxTextureDesc;

    fn test_device(backend: &NullBackend, debug_labels: bool) -> GfxDevice<NullBackend> {
        let config = GfxDeviceConfig {
            name: "pass-test".to_string(),
            transient_heap_size: 1024,
            transient_descriptor_count: 16,
            debug_labels,
            ..Default::default()
        };
        GfxDevice::new(backend.clone(), config).unwrap()
    }

    fn test_buffer(backend: &NullBackend, state: GfxResourceState) -> GfxBuffer<NullBackend> {
        GfxBuffer::from_native(backend.create_buffer(256), 256, state, "buffer")
    }

    #[test]
    fn test_compute_pass() {
        let backend = NullBackend::new();
        let device = test_device(&backend, true);
        let pipeline = backend.create_pipeline();
        let mut data = test_buffer(&backend, GfxResourceState::Undefined);
        let mut args = test_buffer(&backend, GfxResourceState::CopyDestination);
        let (data_id, args_id) = (data.native().id(), args.native().id());

        let mut encoder = device.create_command_encoder("compute").unwrap();
        let mut pass = encoder.begin_compute_pass("simulate").unwrap();
        pass.bind_pipeline(&pipeline, None).unwrap();
        assert!(pass.use_buffer(&mut data, GfxResourceState::UnorderedAccess).unwrap());
        pass.dispatch(glam::UVec3::new(8, 1, 1)).unwrap();
        pass.buffer_uav_barrier(&data).unwrap();
        pass.dispatch_indirect(&mut args, 0).unwrap();
        pass.end().unwrap();
        assert_eq!(encoder.barrier_count(), 3);

        let command_buffer = encoder.finish().unwrap();
        assert_eq!(
            command_buffer.native_list().unwrap().commands(),
            &[
                NullCommand::BeginLabel("simulate".to_string()),
                NullCommand::BindComputePipeline(pipeline.id()),
                NullCommand::Barrier(NullBarrier::Buffer {
                    buffer: data_id,
                    before: GfxResourceState::Undefined,
                    after: GfxResourceState::UnorderedAccess,
                }),
                NullCommand::Dispatch(glam::UVec3::new(8, 1, 1)),
                NullCommand::Barrier(NullBarrier::BufferUav { buffer: data_id }),
                NullCommand::Barrier(NullBarrier::Buffer {
                    buffer: args_id,
                    before: GfxResourceState::CopyDestination,
                    after: GfxResourceState::IndirectArgument,
                }),
                NullCommand::DispatchIndirect {
                    args: args_id,
                    offset: 0
                },
                NullCommand::EndLabel,
            ]
        );
        drop(command_buffer);
        device.destroy().unwrap();
    }

    #[test]
    fn test_dropped_pass_is_closed() {
        let backend = NullBackend::new();
        let device = test_device(&backend, true);

        let mut encoder = device.create_command_encoder("drop-pass").unwrap();
        {
            let mut pass = encoder.begin_compute_pass("forgotten").unwrap();
            pass.dispatch(glam::UVec3::ONE).unwrap();
        }
        assert_eq!(encoder.state(), GfxEncoderState::Open);

        let command_buffer = encoder.finish().unwrap();
        assert_eq!(command_buffer.native_list().unwrap().commands().last(), Some(&NullCommand::EndLabel));
        drop(command_buffer);
        device.destroy().unwrap();
    }

    #[test]
    fn test_render_pass() {
        let backend = NullBackend::new();
        let device = test_device(&backend, false);
        let pipeline = backend.create_pipeline();
        let mut color: GfxTexture<NullBackend> = GfxTexture::from_native(
            backend.create_texture(),
            GfxTextureDesc::new_2d(320, 240),
            GfxResourceState::Undefined,
            "color",
        );
        let mut depth: GfxTexture<NullBackend> = GfxTexture::from_native(
            backend.create_texture(),
            GfxTextureDesc::new_2d(320, 240),
            GfxResourceState::DepthWrite,
            "depth",
        );
        let (color_id, depth_id) = (color.native().id(), depth.native().id());
        let mut vertices = test_buffer(&backend, GfxResourceState::CopyDestination);
        let indices = test_buffer(&backend, GfxResourceState::IndexBuffer);

        let mut encoder = device.create_command_encoder("render").unwrap();
        encoder.set_buffer_state(&mut vertices, GfxResourceState::VertexBuffer).unwrap();
        let desc = GfxRenderPassDesc::new("main")
            .color(&mut color, GfxLoadOp::Clear(GfxClearValue::Color(glam::Vec4::ZERO)), GfxStoreOp::Store)
            .depth(
                &mut depth,
                GfxLoadOp::Clear(GfxClearValue::DepthStencil { depth: 1.0, stencil: 0 }),
                GfxStoreOp::DontCare,
            );
        let mut pass = encoder.begin_render_pass(desc).unwrap();
        pass.bind_pipeline(&pipeline, None).unwrap();
        pass.set_viewport(&GfxViewport::from_rect(GfxRect::new(0, 0, 320, 240))).unwrap();
        pass.bind_vertex_buffers(0, &[(&vertices, 0)]).unwrap();
        pass.bind_index_buffer(&indices, 0, GfxIndexFormat::Uint32).unwrap();
        pass.draw_indexed(36, 1, 0, 0, 0).unwrap();
        // 参数 buffer 没有提前转换
        assert!(matches!(pass.draw_indirect(&vertices, 0, 1, 16), Err(GfxError::InvalidArgument(_))));
        pass.end().unwrap();

        // vertex buffer 和 color attachment 各一次，depth 已经处于 DepthWrite
        assert_eq!(encoder.barrier_count(), 2);
        assert_eq!(color.state_tracker().global_state(), Some(GfxResourceState::RenderTarget));

        let command_buffer = encoder.finish().unwrap();
        let commands = command_buffer.native_list().unwrap().commands();
        assert!(commands.contains(&NullCommand::BeginRendering {
            colors: vec![color_id],
            resolves: vec![],
            depth: Some(depth_id),
            render_area: GfxRect::new(0, 0, 320, 240),
        }));
        assert_eq!(commands.last(), Some(&NullCommand::EndRendering));
        drop(command_buffer);
        device.destroy().unwrap();
    }

    #[test]
    fn test_render_pass_needs_an_attachment() {
        let backend = NullBackend::new();
        let device = test_device(&backend, false);

        let mut encoder = device.create_command_encoder("empty").unwrap();
        assert!(matches!(
            encoder.begin_render_pass(GfxRenderPassDesc::new("empty")),
            Err(GfxError::InvalidArgument(_))
        ));
        assert_eq!(encoder.state(), GfxEncoderState::Open);
        drop(encoder);
        device.destroy().unwrap();
    }

    #[test]
    fn test_acceleration_structure_builds_are_serialized() {
        let backend = NullBackend::new();
        let device = test_device(&backend, false);
        let blas = backend.create_acceleration_structure();
        let tlas = backend.create_acceleration_structure();
        let inputs = backend.create_acceleration_structure_inputs();
        let mut scratch = test_buffer(&backend, GfxResourceState::Undefined);
        let scratch_id = scratch.native().id();

        let mut encoder = device.create_command_encoder("build").unwrap();
        let mut pass = encoder.begin_ray_tracing_pass("build").unwrap();
        pass.build_acceleration_structure(&blas, None, &inputs, &mut scratch, 0).unwrap();
        pass.build_acceleration_structure(&tlas, None, &inputs, &mut scratch, 0).unwrap();
        pass.end().unwrap();
        assert_eq!(encoder.barrier_count(), 4);

        let command_buffer = encoder.finish().unwrap();
        let barriers = command_buffer
            .native_list()
            .unwrap()
            .commands()
            .iter()
            .filter_map(|command| match command {
                NullCommand::Barrier(barrier) => Some(barrier.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            barriers,
            vec![
                NullBarrier::Buffer {
                    buffer: scratch_id,
                    before: GfxResourceState::Undefined,
                    after: GfxResourceState::UnorderedAccess,
                },
                NullBarrier::AccelerationStructureBuild { structure: blas.id() },
                NullBarrier::BufferUav { buffer: scratch_id },
                NullBarrier::AccelerationStructureBuild { structure: tlas.id() },
            ]
        );
        drop(command_buffer);
        device.destroy().unwrap();
    }
}
