use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use super::resources::{
    VkAccelerationStructure, VkAccelerationStructureInputs, VkBuffer, VkPipeline, VkQueryPool, VkShaderObject,
    VkShaderTable, VkTexture,
};
use super::state::VkAccessState;
use super::transient_heap::VkTransientHeap;
use super::{VkBackend, VkContext, vk_error};
use crate::backend::GfxCommandList;
use crate::commands::barrier::GfxBarrier;
use crate::commands::command_types::{
    GfxAccelerationStructureCopyMode, GfxBlitRegion, GfxBufferTextureCopy, GfxFilter, GfxIndexFormat, GfxRect,
    GfxTextureCopy, GfxViewport,
};
use crate::commands::rendering_info::{GfxClearValue, GfxLoadOp, GfxRenderingAttachment, GfxRenderingDesc, GfxStoreOp};
use crate::error::{GfxError, GfxResult};
use crate::resources::subresource::GfxSubresourceRange;

/// 一个 command pool 加一个 primary command buffer，只提交一次
///
/// # Destroy
/// 由 [`VkBackend::release`](crate::backend::GfxBackend::release) 销毁 command pool
pub struct VkCommandList {
    ctx: Arc<VkContext>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    name: String,
    finished: bool,
}

// new & init
impl VkCommandList {
    pub(crate) fn new(ctx: Arc<VkContext>, name: &str) -> GfxResult<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(ctx.queue_family_index);
        let command_pool = unsafe { ctx.device.create_command_pool(&pool_ci, None) }.map_err(vk_error)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { ctx.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { ctx.device.destroy_command_pool(command_pool, None) };
                return Err(vk_error(e));
            }
        };

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(e) = unsafe { ctx.device.begin_command_buffer(command_buffer, &begin_info) } {
            unsafe { ctx.device.destroy_command_pool(command_pool, None) };
            return Err(vk_error(e));
        }

        ctx.set_debug_name(command_pool, &format!("CommandPool::{name}"));
        ctx.set_debug_name(command_buffer, &format!("CommandBuffer::{name}"));
        Ok(Self {
            ctx,
            command_pool,
            command_buffer,
            name: name.to_string(),
            finished: false,
        })
    }

    /// 同时释放 command buffer
    pub(crate) fn destroy(self) {
        unsafe { self.ctx.device.destroy_command_pool(self.command_pool, None) };
    }
}

// getters
impl VkCommandList {
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

// tools
impl VkCommandList {
    #[inline]
    fn device(&self) -> &ash::Device {
        &self.ctx.device
    }

    fn acceleration_structure_loader(&self) -> Option<&ash::khr::acceleration_structure::Device> {
        let loader = self.ctx.acceleration_structure.as_ref();
        if loader.is_none() {
            log::error!("<{}>: acceleration structure command recorded without ray tracing support", self.name);
        }
        loader
    }

    fn subresource_range(texture: &VkTexture, range: &GfxSubresourceRange) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: texture.aspect,
            base_mip_level: range.mip_level,
            level_count: range.mip_count,
            base_array_layer: range.base_array_layer,
            layer_count: range.layer_count,
        }
    }

    /// 拷贝类命令只能作用在单个 mip 上
    fn subresource_layers(texture: &VkTexture, range: &GfxSubresourceRange) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: texture.aspect,
            mip_level: range.mip_level,
            base_array_layer: range.base_array_layer,
            layer_count: range.layer_count,
        }
    }

    #[inline]
    fn offset_3d(v: glam::UVec3) -> vk::Offset3D {
        vk::Offset3D {
            x: v.x as i32,
            y: v.y as i32,
            z: v.z as i32,
        }
    }

    #[inline]
    fn extent_3d(v: glam::UVec3) -> vk::Extent3D {
        vk::Extent3D {
            width: v.x,
            height: v.y,
            depth: v.z.max(1),
        }
    }

    fn rendering_attachment(attachment: &GfxRenderingAttachment<'_, VkBackend>, layout: vk::ImageLayout) -> vk::RenderingAttachmentInfo<'static> {
        let (load_op, clear_value) = match attachment.load {
            GfxLoadOp::Load => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
            GfxLoadOp::DontCare => (vk::AttachmentLoadOp::DONT_CARE, vk::ClearValue::default()),
            GfxLoadOp::Clear(GfxClearValue::Color(color)) => (
                vk::AttachmentLoadOp::CLEAR,
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: color.to_array(),
                    },
                },
            ),
            GfxLoadOp::Clear(GfxClearValue::DepthStencil { depth, stencil }) => (
                vk::AttachmentLoadOp::CLEAR,
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
                },
            ),
        };
        let store_op = match attachment.store {
            GfxStoreOp::Store => vk::AttachmentStoreOp::STORE,
            GfxStoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        };

        let mut info = vk::RenderingAttachmentInfo::default()
            .image_view(attachment.texture.view)
            .image_layout(layout)
            .load_op(load_op)
            .store_op(store_op)
            .clear_value(clear_value);
        if let Some(resolve_target) = attachment.resolve_target {
            info = info
                .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                .resolve_image_view(resolve_target.view)
                .resolve_image_layout(VkAccessState::RESOLVE_DESTINATION.layout);
        }
        info
    }

    fn bind_pipeline(&mut self, pipeline: &VkPipeline, shader_object: Option<&VkShaderObject>) {
        unsafe {
            self.device().cmd_bind_pipeline(self.command_buffer, pipeline.bind_point, pipeline.pipeline);
            if let Some(shader_object) = shader_object {
                if !shader_object.descriptor_sets.is_empty() {
                    self.device().cmd_bind_descriptor_sets(
                        self.command_buffer,
                        pipeline.bind_point,
                        pipeline.layout,
                        shader_object.first_set,
                        &shader_object.descriptor_sets,
                        &shader_object.dynamic_offsets,
                    );
                }
            }
        }
    }
}

impl GfxCommandList<VkBackend> for VkCommandList {
    fn finish(&mut self) -> GfxResult<()> {
        if self.finished {
            return Err(GfxError::InvalidArgument(format!("command list <{}> is already finished", self.name)));
        }
        unsafe { self.ctx.device.end_command_buffer(self.command_buffer) }.map_err(vk_error)?;
        self.finished = true;
        Ok(())
    }

    /// - command type: synchronization
    fn barriers(&mut self, barriers: &[GfxBarrier<'_, VkBackend>]) {
        let buffer_barrier = |buffer: &VkBuffer, before: VkAccessState, after: VkAccessState| {
            vk::BufferMemoryBarrier2::default()
                .buffer(buffer.buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .src_stage_mask(before.stage)
                .src_access_mask(before.access)
                .dst_stage_mask(after.stage)
                .dst_access_mask(after.access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        };
        let image_barrier =
            |texture: &VkTexture, range: vk::ImageSubresourceRange, before: VkAccessState, after: VkAccessState| {
                vk::ImageMemoryBarrier2::default()
                    .image(texture.image)
                    .subresource_range(range)
                    .src_stage_mask(before.stage)
                    .src_access_mask(before.access)
                    .old_layout(before.layout)
                    .dst_stage_mask(after.stage)
                    .dst_access_mask(after.access)
                    .new_layout(after.layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            };

        let buffer_barriers = barriers
            .iter()
            .filter_map(|barrier| match barrier {
                GfxBarrier::Buffer { buffer, transition } => {
                    Some(buffer_barrier(buffer, transition.before.into(), transition.after.into()))
                }
                GfxBarrier::BufferUav { buffer } => {
                    Some(buffer_barrier(buffer, VkAccessState::UNORDERED_ACCESS, VkAccessState::UNORDERED_ACCESS))
                }
                _ => None,
            })
            .collect_vec();
        let image_barriers = barriers
            .iter()
            .filter_map(|barrier| match barrier {
                GfxBarrier::Texture {
                    texture,
                    range,
                    transition,
                } => Some(image_barrier(
                    texture,
                    Self::subresource_range(texture, range),
                    transition.before.into(),
                    transition.after.into(),
                )),
                GfxBarrier::TextureUav { texture } => Some(image_barrier(
                    texture,
                    vk::ImageSubresourceRange {
                        aspect_mask: texture.aspect,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    },
                    VkAccessState::UNORDERED_ACCESS,
                    VkAccessState::UNORDERED_ACCESS,
                )),
                _ => None,
            })
            .collect_vec();
        let memory_barriers = barriers
            .iter()
            .filter(|barrier| matches!(barrier, GfxBarrier::AccelerationStructureBuild { .. }))
            .map(|_| {
                vk::MemoryBarrier2::default()
                    .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
                    .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
                    .dst_stage_mask(
                        vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                            | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
                            | vk::PipelineStageFlags2::COMPUTE_SHADER,
                    )
                    .dst_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR)
            })
            .collect_vec();

        if buffer_barriers.is_empty() && image_barriers.is_empty() && memory_barriers.is_empty() {
            return;
        }
        let dependency_info = vk::DependencyInfo::default()
            .memory_barriers(&memory_barriers)
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);
        unsafe { self.device().cmd_pipeline_barrier2(self.command_buffer, &dependency_info) };
    }

    fn copy_buffer(&mut self, dst: &VkBuffer, dst_offset: u64, src: &VkBuffer, src_offset: u64, size: u64) {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe { self.device().cmd_copy_buffer(self.command_buffer, src.buffer, dst.buffer, std::slice::from_ref(&region)) };
    }

    fn copy_texture(&mut self, dst: &VkTexture, src: &VkTexture, copy: &GfxTextureCopy) {
        let region = vk::ImageCopy {
            src_subresource: Self::subresource_layers(src, &copy.src_subresource),
            src_offset: Self::offset_3d(copy.src_offset),
            dst_subresource: Self::subresource_layers(dst, &copy.dst_subresource),
            dst_offset: Self::offset_3d(copy.dst_offset),
            extent: Self::extent_3d(copy.extent),
        };
        unsafe {
            self.device().cmd_copy_image(
                self.command_buffer,
                src.image,
                VkAccessState::COPY_SOURCE.layout,
                dst.image,
                VkAccessState::COPY_DESTINATION.layout,
                std::slice::from_ref(&region),
            )
        };
    }

    fn copy_heap_to_buffer(&mut self, heap: &VkTransientHeap, heap_offset: u64, dst: &VkBuffer, dst_offset: u64, size: u64) {
        self.copy_buffer(dst, dst_offset, heap.upload_buffer(), heap_offset, size);
    }

    fn copy_heap_to_texture(&mut self, heap: &VkTransientHeap, dst: &VkTexture, copy: &GfxBufferTextureCopy) {
        let region = vk::BufferImageCopy {
            buffer_offset: copy.buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: Self::subresource_layers(dst, &copy.subresource),
            image_offset: Self::offset_3d(copy.texture_offset),
            image_extent: Self::extent_3d(copy.extent),
        };
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                self.command_buffer,
                heap.upload_buffer().buffer,
                dst.image,
                VkAccessState::COPY_DESTINATION.layout,
                std::slice::from_ref(&region),
            )
        };
    }

    fn fill_buffer(&mut self, buffer: &VkBuffer, offset: u64, size: u64, value: u32) {
        unsafe { self.device().cmd_fill_buffer(self.command_buffer, buffer.buffer, offset, size, value) };
    }

    fn clear_texture_color(&mut self, texture: &VkTexture, range: &GfxSubresourceRange, color: glam::Vec4) {
        let clear_value = vk::ClearColorValue {
            float32: color.to_array(),
        };
        let range = Self::subresource_range(texture, range);
        unsafe {
            self.device().cmd_clear_color_image(
                self.command_buffer,
                texture.image,
                VkAccessState::COPY_DESTINATION.layout,
                &clear_value,
                std::slice::from_ref(&range),
            )
        };
    }

    fn clear_texture_depth_stencil(&mut self, texture: &VkTexture, range: &GfxSubresourceRange, depth: f32, stencil: u32) {
        let clear_value = vk::ClearDepthStencilValue { depth, stencil };
        let range = Self::subresource_range(texture, range);
        unsafe {
            self.device().cmd_clear_depth_stencil_image(
                self.command_buffer,
                texture.image,
                VkAccessState::COPY_DESTINATION.layout,
                &clear_value,
                std::slice::from_ref(&range),
            )
        };
    }

    fn resolve_texture(
        &mut self,
        dst: &VkTexture,
        dst_subresource: &GfxSubresourceRange,
        src: &VkTexture,
        src_subresource: &GfxSubresourceRange,
    ) {
        let region = vk::ImageResolve {
            src_subresource: Self::subresource_layers(src, src_subresource),
            src_offset: vk::Offset3D::default(),
            dst_subresource: Self::subresource_layers(dst, dst_subresource),
            dst_offset: vk::Offset3D::default(),
            extent: src.mip_extent(src_subresource.mip_level),
        };
        unsafe {
            self.device().cmd_resolve_image(
                self.command_buffer,
                src.image,
                VkAccessState::RESOLVE_SOURCE.layout,
                dst.image,
                VkAccessState::RESOLVE_DESTINATION.layout,
                std::slice::from_ref(&region),
            )
        };
    }

    fn blit_texture(&mut self, dst: &VkTexture, src: &VkTexture, region: &GfxBlitRegion, filter: GfxFilter) {
        let blit = vk::ImageBlit {
            src_subresource: Self::subresource_layers(src, &region.src_subresource),
            src_offsets: [Self::offset_3d(region.src_min), Self::offset_3d(region.src_max)],
            dst_subresource: Self::subresource_layers(dst, &region.dst_subresource),
            dst_offsets: [Self::offset_3d(region.dst_min), Self::offset_3d(region.dst_max)],
        };
        let filter = match filter {
            GfxFilter::Nearest => vk::Filter::NEAREST,
            GfxFilter::Linear => vk::Filter::LINEAR,
        };
        unsafe {
            self.device().cmd_blit_image(
                self.command_buffer,
                src.image,
                VkAccessState::COPY_SOURCE.layout,
                dst.image,
                VkAccessState::COPY_DESTINATION.layout,
                std::slice::from_ref(&blit),
                filter,
            )
        };
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    fn begin_label(&mut self, name: &str, color: glam::Vec4) {
        let Some(debug_utils) = &self.ctx.debug_utils else {
            return;
        };
        let name = CString::new(name).unwrap_or_default();
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                self.command_buffer,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(color.into()),
            );
        }
    }

    fn end_label(&mut self) {
        if let Some(debug_utils) = &self.ctx.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.command_buffer) };
        }
    }

    fn bind_compute_pipeline(&mut self, pipeline: &VkPipeline, shader_object: Option<&VkShaderObject>) {
        self.bind_pipeline(pipeline, shader_object);
    }

    /// - command type: action
    /// - supported queue type: compute
    fn dispatch(&mut self, group_count: glam::UVec3) {
        unsafe { self.device().cmd_dispatch(self.command_buffer, group_count.x, group_count.y, group_count.z) };
    }

    fn dispatch_indirect(&mut self, args: &VkBuffer, offset: u64) {
        unsafe { self.device().cmd_dispatch_indirect(self.command_buffer, args.buffer, offset) };
    }

    fn begin_rendering(&mut self, desc: &GfxRenderingDesc<'_, VkBackend>) {
        let color_attachments = desc
            .color_attachments
            .iter()
            .map(|attachment| Self::rendering_attachment(attachment, VkAccessState::RENDER_TARGET.layout))
            .collect_vec();
        let depth_attachment = desc.depth_attachment.as_ref().map(|attachment| {
            let layout = if attachment.read_only {
                VkAccessState::DEPTH_READ.layout
            } else {
                VkAccessState::DEPTH_WRITE.layout
            };
            (Self::rendering_attachment(attachment, layout), attachment.texture.aspect)
        });

        let render_area = vk::Rect2D {
            offset: vk::Offset2D {
                x: desc.render_area.x,
                y: desc.render_area.y,
            },
            extent: vk::Extent2D {
                width: desc.render_area.width,
                height: desc.render_area.height,
            },
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(desc.layer_count)
            .color_attachments(&color_attachments);
        if let Some((depth, aspect)) = &depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
            if aspect.contains(vk::ImageAspectFlags::STENCIL) {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }
        unsafe { self.device().cmd_begin_rendering(self.command_buffer, &rendering_info) };
    }

    fn end_rendering(&mut self) {
        unsafe { self.device().cmd_end_rendering(self.command_buffer) };
    }

    fn bind_graphics_pipeline(&mut self, pipeline: &VkPipeline, shader_object: Option<&VkShaderObject>) {
        self.bind_pipeline(pipeline, shader_object);
    }

    fn set_viewport(&mut self, viewport: &GfxViewport) {
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device().cmd_set_viewport(self.command_buffer, 0, std::slice::from_ref(&viewport)) };
    }

    fn set_scissor(&mut self, scissor: &GfxRect) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device().cmd_set_scissor(self.command_buffer, 0, std::slice::from_ref(&scissor)) };
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(&VkBuffer, u64)]) {
        let (handles, offsets): (Vec<_>, Vec<_>) = buffers.iter().map(|(buffer, offset)| (buffer.buffer, *offset)).unzip();
        unsafe { self.device().cmd_bind_vertex_buffers(self.command_buffer, first_binding, &handles, &offsets) };
    }

    fn bind_index_buffer(&mut self, buffer: &VkBuffer, offset: u64, format: GfxIndexFormat) {
        let index_type = match format {
            GfxIndexFormat::Uint16 => vk::IndexType::UINT16,
            GfxIndexFormat::Uint32 => vk::IndexType::UINT32,
        };
        unsafe { self.device().cmd_bind_index_buffer(self.command_buffer, buffer.buffer, offset, index_type) };
    }

    /// - command type: action
    /// - supported queue types: graphics
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device().cmd_draw(self.command_buffer, vertex_count, instance_count, first_vertex, first_instance)
        };
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn draw_indirect(&mut self, args: &VkBuffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe { self.device().cmd_draw_indirect(self.command_buffer, args.buffer, offset, draw_count, stride) };
    }

    fn draw_indexed_indirect(&mut self, args: &VkBuffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe { self.device().cmd_draw_indexed_indirect(self.command_buffer, args.buffer, offset, draw_count, stride) };
    }

    fn bind_ray_tracing_pipeline(&mut self, pipeline: &VkPipeline, shader_object: Option<&VkShaderObject>) {
        self.bind_pipeline(pipeline, shader_object);
    }

    /// `src` 不为空时做 refit
    fn build_acceleration_structure(
        &mut self,
        dst: &VkAccelerationStructure,
        src: Option<&VkAccelerationStructure>,
        inputs: &VkAccelerationStructureInputs,
        scratch: &VkBuffer,
        scratch_offset: u64,
    ) {
        let Some(scratch_address) = scratch.device_address else {
            log::error!("<{}>: scratch buffer has no device address", self.name);
            return;
        };
        let mode = if src.is_some() {
            vk::BuildAccelerationStructureModeKHR::UPDATE
        } else {
            vk::BuildAccelerationStructureModeKHR::BUILD
        };
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(inputs.ty)
            .flags(inputs.flags)
            .mode(mode)
            .src_acceleration_structure(src.map_or(vk::AccelerationStructureKHR::null(), |src| src.handle))
            .dst_acceleration_structure(dst.handle)
            .geometries(&inputs.geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address + scratch_offset,
            });
        let Some(loader) = self.acceleration_structure_loader() else {
            return;
        };
        unsafe {
            // 一次可以构建多个，这里只构建 1 个
            loader.cmd_build_acceleration_structures(
                self.command_buffer,
                std::slice::from_ref(&build_info),
                &[inputs.ranges.as_slice()],
            )
        };
    }

    fn copy_acceleration_structure(
        &mut self,
        dst: &VkAccelerationStructure,
        src: &VkAccelerationStructure,
        mode: GfxAccelerationStructureCopyMode,
    ) {
        let mode = match mode {
            GfxAccelerationStructureCopyMode::Clone => vk::CopyAccelerationStructureModeKHR::CLONE,
            GfxAccelerationStructureCopyMode::Compact => vk::CopyAccelerationStructureModeKHR::COMPACT,
        };
        let copy_info = vk::CopyAccelerationStructureInfoKHR::default().src(src.handle).dst(dst.handle).mode(mode);
        let Some(loader) = self.acceleration_structure_loader() else {
            return;
        };
        unsafe { loader.cmd_copy_acceleration_structure(self.command_buffer, &copy_info) };
    }

    /// 这里涉及到对加速结构的 read，调用方负责同步
    fn query_acceleration_structure_properties(
        &mut self,
        structures: &[&VkAccelerationStructure],
        query_pool: &VkQueryPool,
        first_query: u32,
    ) {
        let handles = structures.iter().map(|structure| structure.handle).collect_vec();
        unsafe {
            self.device().cmd_reset_query_pool(self.command_buffer, query_pool.pool, first_query, handles.len() as u32)
        };
        let Some(loader) = self.acceleration_structure_loader() else {
            return;
        };
        unsafe {
            loader.cmd_write_acceleration_structures_properties(
                self.command_buffer,
                &handles,
                query_pool.query_type,
                query_pool.pool,
                first_query,
            )
        };
    }

    fn dispatch_rays(&mut self, shader_table: &VkShaderTable, size: glam::UVec3) {
        let Some(loader) = self.ctx.ray_tracing_pipeline.as_ref() else {
            log::error!("<{}>: dispatch_rays recorded without ray tracing support", self.name);
            return;
        };
        unsafe {
            loader.cmd_trace_rays(
                self.command_buffer,
                &shader_table.raygen,
                &shader_table.miss,
                &shader_table.hit,
                &shader_table.callable,
                size.x,
                size.y,
                size.z,
            )
        };
    }
}
