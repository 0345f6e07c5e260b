//! 命令录制
//!
//! `GfxCommandEncoder` 的状态机：
//! - `Open`：可以录制资源操作，可以开始一个 pass，可以 `finish`
//! - `InPass(kind)`：只能通过 pass encoder 录制；`end()` 之后回到 `Open`
//!
//! `finish(self)` 消耗 encoder，所以 finish 之后无法再使用。
//!
//! 每个资源操作在录制前都会先向资源的 tracker 请求需要的状态，状态变化时插入一个 barrier。

use crate::backend::{GfxBackend, GfxCommandList, GfxTransientHeap};
use crate::basic::color::LabelColor;
use crate::commands::barrier::GfxBarrier;
use crate::commands::command_buffer::{GfxCommandBuffer, GfxRecording};
use crate::commands::command_types::{GfxBlitRegion, GfxBufferTextureCopy, GfxFilter, GfxRect, GfxTextureCopy};
use crate::commands::pass::{GfxComputePassEncoder, GfxRayTracingPassEncoder, GfxRenderPassEncoder};
use crate::commands::rendering_info::{GfxRenderPassDesc, GfxRenderingAttachment, GfxRenderingDesc};
use crate::device::GfxDevice;
use crate::error::{GfxError, GfxResult};
use crate::resources::buffer::GfxBuffer;
use crate::resources::state::GfxResourceState;
use crate::resources::subresource::GfxSubresourceRange;
use crate::resources::texture::GfxTexture;

/// texture 上传时 heap 内数据的对齐
const TEXTURE_UPLOAD_ALIGNMENT: u64 = 512;
/// buffer 上传时 heap 内数据的对齐
const BUFFER_UPLOAD_ALIGNMENT: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxPassKind {
    Compute,
    Render,
    RayTracing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxEncoderState {
    Open,
    InPass(GfxPassKind),
}

/// # Destroy
/// 未 `finish` 就被 drop 时，原生命令列表直接释放，transient heap 回到池中
pub struct GfxCommandEncoder<'d, B: GfxBackend> {
    device: &'d GfxDevice<B>,
    recording: Option<GfxRecording<B>>,
    state: GfxEncoderState,
    barrier_count: u32,
    debug_labels: bool,
    name: String,
}

// new & init
impl<'d, B: GfxBackend> GfxCommandEncoder<'d, B> {
    pub(crate) fn new(device: &'d GfxDevice<B>, name: &str) -> GfxResult<Self> {
        let heap = device.gc().acquire_heap(device.backend(), &device.config().transient_heap_desc())?;
        let list = match device.backend().create_command_list(name) {
            Ok(list) => list,
            Err(e) => {
                device.gc().recycle_heap(device.backend(), heap);
                return Err(e);
            }
        };

        Ok(Self {
            device,
            recording: Some(GfxRecording { list, heap }),
            state: GfxEncoderState::Open,
            barrier_count: 0,
            debug_labels: device.config().debug_labels,
            name: name.to_string(),
        })
    }

    /// 关闭录制，得到可以提交的 command buffer
    ///
    /// 仍有 pass 打开时报错，encoder 随之被丢弃
    pub fn finish(mut self) -> GfxResult<GfxCommandBuffer<'d, B>> {
        if let GfxEncoderState::InPass(open) = self.state {
            return Err(GfxError::PassStillOpen { open });
        }
        let Some(mut recording) = self.recording.take() else {
            return Err(GfxError::UnsupportedOperation("command encoder has no native recording"));
        };
        if let Err(e) = recording.list.finish() {
            self.device.discard_recording(recording);
            return Err(e);
        }

        log::debug!("finish command encoder <{}>, {} barriers", self.name, self.barrier_count);
        Ok(GfxCommandBuffer::new(
            self.device,
            recording,
            self.barrier_count,
            std::mem::take(&mut self.name),
        ))
    }
}

// getters
impl<'d, B: GfxBackend> GfxCommandEncoder<'d, B> {
    #[inline]
    pub fn state(&self) -> GfxEncoderState {
        self.state
    }

    #[inline]
    pub fn barrier_count(&self) -> u32 {
        self.barrier_count
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn device(&self) -> &'d GfxDevice<B> {
        self.device
    }

    /// 当前 encoder 的 transient heap 还剩多少字节
    pub fn transient_heap_available(&self) -> u64 {
        self.recording.as_ref().map(|r| r.heap.capacity() - r.heap.used()).unwrap_or(0)
    }
}

// 状态转换
impl<B: GfxBackend> GfxCommandEncoder<'_, B> {
    /// 把整个 buffer 转换到 `state`
    ///
    /// # return
    /// 是否录制了 barrier
    pub fn set_buffer_state(&mut self, buffer: &mut GfxBuffer<B>, state: GfxResourceState) -> GfxResult<bool> {
        self.ensure_open()?;
        self.transition_buffer(buffer, state)
    }

    /// 把整个 texture 转换到 `state`
    ///
    /// texture 处于 per-subresource 跟踪时，所有 subresource 必须已经处于同一个状态
    pub fn set_texture_state(&mut self, texture: &mut GfxTexture<B>, state: GfxResourceState) -> GfxResult<bool> {
        self.ensure_open()?;
        self.transition_texture(texture, state)
    }

    /// 把 texture 的一段 subresource 转换到 `state`
    pub fn set_texture_subresource_state(
        &mut self,
        texture: &mut GfxTexture<B>,
        range: GfxSubresourceRange,
        state: GfxResourceState,
    ) -> GfxResult<bool> {
        self.ensure_open()?;
        self.transition_texture_range(texture, range, state)
    }

    /// UAV 的写后读依赖，状态不变也总是录制
    pub fn buffer_uav_barrier(&mut self, buffer: &GfxBuffer<B>) -> GfxResult<()> {
        self.ensure_open()?;
        self.record_barrier(GfxBarrier::BufferUav {
            buffer: buffer.native(),
        })
    }

    /// UAV 的写后读依赖，状态不变也总是录制
    pub fn texture_uav_barrier(&mut self, texture: &GfxTexture<B>) -> GfxResult<()> {
        self.ensure_open()?;
        self.record_barrier(GfxBarrier::TextureUav {
            texture: texture.native(),
        })
    }
}

// 资源操作
impl<B: GfxBackend> GfxCommandEncoder<'_, B> {
    pub fn copy_buffer(
        &mut self,
        dst: &mut GfxBuffer<B>,
        dst_offset: u64,
        src: &mut GfxBuffer<B>,
        src_offset: u64,
        size: u64,
    ) -> GfxResult<()> {
        self.ensure_open()?;
        check_buffer_range(src, src_offset, size)?;
        check_buffer_range(dst, dst_offset, size)?;

        self.transition_buffer(src, GfxResourceState::CopySource)?;
        self.transition_buffer(dst, GfxResourceState::CopyDestination)?;
        self.list_mut()?.copy_buffer(dst.native(), dst_offset, src.native(), src_offset, size);
        Ok(())
    }

    pub fn copy_texture(
        &mut self,
        dst: &mut GfxTexture<B>,
        src: &mut GfxTexture<B>,
        copy: &GfxTextureCopy,
    ) -> GfxResult<()> {
        self.ensure_open()?;
        if copy.extent.cmpeq(glam::UVec3::ZERO).any() {
            return Err(GfxError::InvalidArgument(format!("texture copy with empty extent {}", copy.extent)));
        }

        self.transition_texture_range(src, copy.src_subresource, GfxResourceState::CopySource)?;
        self.transition_texture_range(dst, copy.dst_subresource, GfxResourceState::CopyDestination)?;
        self.list_mut()?.copy_texture(dst.native(), src.native(), copy);
        Ok(())
    }

    /// 把 `data` 写入 transient heap，再在 GPU 时间线上拷贝到 `dst`
    pub fn upload_buffer_data(&mut self, dst: &mut GfxBuffer<B>, dst_offset: u64, data: &[u8]) -> GfxResult<()> {
        self.ensure_open()?;
        let size = data.len() as u64;
        check_buffer_range(dst, dst_offset, size)?;

        let heap_offset = self.recording_mut()?.heap.write(data, BUFFER_UPLOAD_ALIGNMENT)?;
        self.transition_buffer(dst, GfxResourceState::CopyDestination)?;
        let recording = self.recording_mut()?;
        recording.list.copy_heap_to_buffer(&recording.heap, heap_offset, dst.native(), dst_offset, size);
        Ok(())
    }

    /// 把一个 mip 的完整数据上传到 texture
    ///
    /// `subresource` 只能包含一个 mip，可以包含多个 layer，`data` 按 layer 紧密排列，
    /// 大小必须是 `mip_layer_size * layer_count`。校验失败时不占用 transient heap。
    pub fn upload_texture_data(
        &mut self,
        dst: &mut GfxTexture<B>,
        subresource: GfxSubresourceRange,
        data: &[u8],
    ) -> GfxResult<()> {
        self.ensure_open()?;
        if subresource.mip_count != 1 {
            return Err(GfxError::InvalidArgument(format!(
                "texture upload covers {} mips, upload one mip at a time",
                subresource.mip_count
            )));
        }
        if data.is_empty() {
            return Err(GfxError::InvalidArgument("empty texture upload".to_string()));
        }
        // range 越界或状态不一致都在写 heap 之前报错
        dst.state_tracker().range_state(&subresource)?;
        let expected = dst.desc().mip_layer_size(subresource.mip_level) * subresource.layer_count as u64;
        if data.len() as u64 != expected {
            return Err(GfxError::InvalidArgument(format!(
                "texture <{}> mip {} x {} layers needs {expected} bytes, got {}",
                dst.name(),
                subresource.mip_level,
                subresource.layer_count,
                data.len()
            )));
        }

        let buffer_offset = self.recording_mut()?.heap.write(data, TEXTURE_UPLOAD_ALIGNMENT)?;
        self.transition_texture_range(dst, subresource, GfxResourceState::CopyDestination)?;
        let extent = dst.desc().mip_extent(subresource.mip_level);
        let recording = self.recording_mut()?;
        recording.list.copy_heap_to_texture(
            &recording.heap,
            dst.native(),
            &GfxBufferTextureCopy {
                buffer_offset,
                subresource,
                texture_offset: glam::UVec3::ZERO,
                extent,
            },
        );
        Ok(())
    }

    /// 以 u32 填充 buffer，`offset` 和 `size` 需要 4 字节对齐
    pub fn clear_buffer(&mut self, buffer: &mut GfxBuffer<B>, offset: u64, size: u64, value: u32) -> GfxResult<()> {
        self.ensure_open()?;
        if offset % 4 != 0 || size % 4 != 0 {
            return Err(GfxError::InvalidArgument(format!(
                "clear_buffer needs 4-byte aligned offset and size, got {offset} / {size}"
            )));
        }
        check_buffer_range(buffer, offset, size)?;

        self.transition_buffer(buffer, GfxResourceState::CopyDestination)?;
        self.list_mut()?.fill_buffer(buffer.native(), offset, size, value);
        Ok(())
    }

    pub fn clear_texture_color(
        &mut self,
        texture: &mut GfxTexture<B>,
        range: GfxSubresourceRange,
        color: glam::Vec4,
    ) -> GfxResult<()> {
        self.ensure_open()?;
        self.transition_texture_range(texture, range, GfxResourceState::CopyDestination)?;
        self.list_mut()?.clear_texture_color(texture.native(), &range, color);
        Ok(())
    }

    pub fn clear_texture_depth_stencil(
        &mut self,
        texture: &mut GfxTexture<B>,
        range: GfxSubresourceRange,
        depth: f32,
        stencil: u32,
    ) -> GfxResult<()> {
        self.ensure_open()?;
        self.transition_texture_range(texture, range, GfxResourceState::CopyDestination)?;
        self.list_mut()?.clear_texture_depth_stencil(texture.native(), &range, depth, stencil);
        Ok(())
    }

    /// 把多重采样的 `src` resolve 到 `dst`
    pub fn resolve_texture(
        &mut self,
        dst: &mut GfxTexture<B>,
        dst_subresource: GfxSubresourceRange,
        src: &mut GfxTexture<B>,
        src_subresource: GfxSubresourceRange,
    ) -> GfxResult<()> {
        self.ensure_open()?;
        if src.desc().sample_count <= 1 {
            return Err(GfxError::InvalidArgument(format!("resolve source <{}> is not multisampled", src.name())));
        }
        if dst.desc().sample_count != 1 {
            return Err(GfxError::InvalidArgument(format!("resolve target <{}> is multisampled", dst.name())));
        }

        self.transition_texture_range(src, src_subresource, GfxResourceState::ResolveSource)?;
        self.transition_texture_range(dst, dst_subresource, GfxResourceState::ResolveDestination)?;
        self.list_mut()?.resolve_texture(dst.native(), &dst_subresource, src.native(), &src_subresource);
        Ok(())
    }

    pub fn blit_texture(
        &mut self,
        dst: &mut GfxTexture<B>,
        src: &mut GfxTexture<B>,
        region: &GfxBlitRegion,
        filter: GfxFilter,
    ) -> GfxResult<()> {
        self.ensure_open()?;
        self.transition_texture_range(src, region.src_subresource, GfxResourceState::CopySource)?;
        self.transition_texture_range(dst, region.dst_subresource, GfxResourceState::CopyDestination)?;
        self.list_mut()?.blit_texture(dst.native(), src.native(), region, filter);
        Ok(())
    }

    /// 在同一个 texture 的两段 subresource 之间 blit，常用于生成 mip
    ///
    /// 两段 range 不能重叠：src 转换到 `CopySource`，dst 转换到 `CopyDestination`
    pub fn blit_texture_mips(
        &mut self,
        texture: &mut GfxTexture<B>,
        region: &GfxBlitRegion,
        filter: GfxFilter,
    ) -> GfxResult<()> {
        self.ensure_open()?;
        self.transition_disjoint_ranges(texture, region.src_subresource, region.dst_subresource)?;
        self.list_mut()?.blit_texture(texture.native(), texture.native(), region, filter);
        Ok(())
    }

    /// 在同一个 texture 的两段 subresource 之间拷贝
    pub fn copy_texture_subresources(&mut self, texture: &mut GfxTexture<B>, copy: &GfxTextureCopy) -> GfxResult<()> {
        self.ensure_open()?;
        if copy.extent.cmpeq(glam::UVec3::ZERO).any() {
            return Err(GfxError::InvalidArgument(format!("texture copy with empty extent {}", copy.extent)));
        }
        self.transition_disjoint_ranges(texture, copy.src_subresource, copy.dst_subresource)?;
        self.list_mut()?.copy_texture(texture.native(), texture.native(), copy);
        Ok(())
    }

    /// 从 mip 0 逐级 blit 出整条 mip 链
    ///
    /// 结束后整个 texture 处于 `CopySource`
    pub fn generate_mips(&mut self, texture: &mut GfxTexture<B>, filter: GfxFilter) -> GfxResult<()> {
        self.ensure_open()?;
        let desc = *texture.desc();
        if desc.sample_count > 1 {
            return Err(GfxError::InvalidArgument(format!("cannot generate mips for multisampled <{}>", texture.name())));
        }
        if desc.mip_level_count <= 1 {
            return Ok(());
        }

        if self.debug_labels {
            let label = format!("generate mips <{}>", texture.name());
            self.list_mut()?.begin_label(&label, LabelColor::COLOR_TRANSFER);
        }
        for mip in 1..desc.mip_level_count {
            let region = GfxBlitRegion {
                src_subresource: GfxSubresourceRange::new(mip - 1, 1, 0, desc.array_layer_count),
                src_min: glam::UVec3::ZERO,
                src_max: desc.mip_extent(mip - 1),
                dst_subresource: GfxSubresourceRange::new(mip, 1, 0, desc.array_layer_count),
                dst_min: glam::UVec3::ZERO,
                dst_max: desc.mip_extent(mip),
            };
            self.blit_texture_mips(texture, &region, filter)?;
        }
        let last = GfxSubresourceRange::new(desc.mip_level_count - 1, 1, 0, desc.array_layer_count);
        self.transition_texture_range(texture, last, GfxResourceState::CopySource)?;
        if self.debug_labels {
            self.list_mut()?.end_label();
        }
        Ok(())
    }

    pub fn begin_debug_label(&mut self, name: &str) -> GfxResult<()> {
        self.ensure_open()?;
        if self.debug_labels {
            self.list_mut()?.begin_label(name, LabelColor::COLOR_ENCODER);
        }
        Ok(())
    }

    pub fn end_debug_label(&mut self) -> GfxResult<()> {
        self.ensure_open()?;
        if self.debug_labels {
            self.list_mut()?.end_label();
        }
        Ok(())
    }
}

// pass
impl<'d, B: GfxBackend> GfxCommandEncoder<'d, B> {
    pub fn begin_compute_pass(&mut self, label: &str) -> GfxResult<GfxComputePassEncoder<'_, 'd, B>> {
        self.open_pass(GfxPassKind::Compute, label)?;
        Ok(GfxComputePassEncoder::new(self))
    }

    pub fn begin_ray_tracing_pass(&mut self, label: &str) -> GfxResult<GfxRayTracingPassEncoder<'_, 'd, B>> {
        self.open_pass(GfxPassKind::RayTracing, label)?;
        Ok(GfxRayTracingPassEncoder::new(self))
    }

    /// 开始一个 render pass
    ///
    /// attachment 先被转换到 `RenderTarget` / `DepthWrite` / `DepthRead`，resolve target 转换到
    /// `ResolveDestination`。pass 内部不能再插入状态转换，顶点、索引、indirect buffer 需要提前转换好。
    pub fn begin_render_pass(&mut self, mut desc: GfxRenderPassDesc<'_, B>) -> GfxResult<GfxRenderPassEncoder<'_, 'd, B>> {
        self.ensure_open()?;
        let render_area = match desc.render_area {
            Some(area) => area,
            None => {
                let extent = desc
                    .color_attachments
                    .first()
                    .map(|a| a.texture.desc().extent)
                    .or_else(|| desc.depth_attachment.as_ref().map(|a| a.texture.desc().extent))
                    .ok_or_else(|| GfxError::InvalidArgument(format!("render pass <{}> has no attachment", desc.label)))?;
                GfxRect::new(0, 0, extent.x, extent.y)
            }
        };

        for attachment in &mut desc.color_attachments {
            self.transition_texture(attachment.texture, GfxResourceState::RenderTarget)?;
            if let Some(resolve_target) = attachment.resolve_target.as_deref_mut() {
                self.transition_texture(resolve_target, GfxResourceState::ResolveDestination)?;
            }
        }
        if let Some(depth) = desc.depth_attachment.as_mut() {
            let state = if depth.read_only { GfxResourceState::DepthRead } else { GfxResourceState::DepthWrite };
            self.transition_texture(depth.texture, state)?;
        }

        let layer_count = desc
            .color_attachments
            .iter()
            .map(|a| a.texture.desc().array_layer_count)
            .chain(desc.depth_attachment.iter().map(|a| a.texture.desc().array_layer_count))
            .min()
            .unwrap_or(1);
        let rendering = GfxRenderingDesc {
            color_attachments: desc
                .color_attachments
                .iter()
                .map(|a| GfxRenderingAttachment {
                    texture: a.texture.native(),
                    load: a.load,
                    store: a.store,
                    resolve_target: a.resolve_target.as_deref().map(|t| t.native()),
                    read_only: false,
                })
                .collect(),
            depth_attachment: desc.depth_attachment.as_ref().map(|a| GfxRenderingAttachment {
                texture: a.texture.native(),
                load: a.load,
                store: a.store,
                resolve_target: None,
                read_only: a.read_only,
            }),
            render_area,
            layer_count,
        };

        self.open_pass(GfxPassKind::Render, desc.label)?;
        self.list_mut()?.begin_rendering(&rendering);
        Ok(GfxRenderPassEncoder::new(self))
    }
}

// tools
impl<B: GfxBackend> GfxCommandEncoder<'_, B> {
    /// 资源操作只能在没有 pass 打开时录制
    #[inline]
    fn ensure_open(&self) -> GfxResult<()> {
        match self.state {
            GfxEncoderState::Open => Ok(()),
            GfxEncoderState::InPass(open) => Err(GfxError::PassAlreadyOpen { open }),
        }
    }

    fn open_pass(&mut self, kind: GfxPassKind, label: &str) -> GfxResult<()> {
        self.ensure_open()?;
        if self.debug_labels {
            let color = match kind {
                GfxPassKind::Compute => LabelColor::COLOR_COMPUTE_PASS,
                GfxPassKind::Render => LabelColor::COLOR_RENDER_PASS,
                GfxPassKind::RayTracing => LabelColor::COLOR_RAY_TRACING_PASS,
            };
            self.list_mut()?.begin_label(label, color);
        }
        self.state = GfxEncoderState::InPass(kind);
        Ok(())
    }

    /// 由 pass encoder 在 `end()` 或 drop 时调用
    pub(crate) fn close_pass(&mut self, kind: GfxPassKind) -> GfxResult<()> {
        let debug_labels = self.debug_labels;
        let list = self.list_mut()?;
        if kind == GfxPassKind::Render {
            list.end_rendering();
        }
        if debug_labels {
            list.end_label();
        }
        self.state = GfxEncoderState::Open;
        Ok(())
    }

    pub(crate) fn recording_mut(&mut self) -> GfxResult<&mut GfxRecording<B>> {
        self.recording
            .as_mut()
            .ok_or(GfxError::UnsupportedOperation("command encoder has no native recording"))
    }

    #[inline]
    pub(crate) fn list_mut(&mut self) -> GfxResult<&mut B::CommandList> {
        Ok(&mut self.recording_mut()?.list)
    }

    pub(crate) fn record_barrier(&mut self, barrier: GfxBarrier<'_, B>) -> GfxResult<()> {
        self.list_mut()?.barriers(std::slice::from_ref(&barrier));
        self.barrier_count += 1;
        Ok(())
    }

    pub(crate) fn transition_buffer(&mut self, buffer: &mut GfxBuffer<B>, state: GfxResourceState) -> GfxResult<bool> {
        let Some(transition) = buffer.state_tracker_mut().request_state(state)? else {
            return Ok(false);
        };
        self.record_barrier(GfxBarrier::Buffer {
            buffer: buffer.native(),
            transition,
        })?;
        Ok(true)
    }

    pub(crate) fn transition_texture(&mut self, texture: &mut GfxTexture<B>, state: GfxResourceState) -> GfxResult<bool> {
        let Some(transition) = texture.state_tracker_mut().request_state(state)? else {
            return Ok(false);
        };
        let range = texture.desc().whole_range();
        self.record_barrier(GfxBarrier::Texture {
            texture: texture.native(),
            range,
            transition,
        })?;
        Ok(true)
    }

    /// 同一个 texture 上的拷贝：src 进入 `CopySource`，dst 进入 `CopyDestination`
    fn transition_disjoint_ranges(
        &mut self,
        texture: &mut GfxTexture<B>,
        src: GfxSubresourceRange,
        dst: GfxSubresourceRange,
    ) -> GfxResult<()> {
        if src.overlaps(&dst) {
            return Err(GfxError::InvalidArgument(format!(
                "source {src:?} and destination {dst:?} of texture <{}> overlap",
                texture.name()
            )));
        }
        // 两段都先检查，避免 src 转换之后 dst 才报错
        texture.state_tracker().range_state(&src)?;
        texture.state_tracker().range_state(&dst)?;
        self.transition_texture_range(texture, src, GfxResourceState::CopySource)?;
        self.transition_texture_range(texture, dst, GfxResourceState::CopyDestination)?;
        Ok(())
    }

    pub(crate) fn transition_texture_range(
        &mut self,
        texture: &mut GfxTexture<B>,
        range: GfxSubresourceRange,
        state: GfxResourceState,
    ) -> GfxResult<bool> {
        let Some(transition) = texture.state_tracker_mut().request_range_state(&range, state)? else {
            return Ok(false);
        };
        self.record_barrier(GfxBarrier::Texture {
            texture: texture.native(),
            range,
            transition,
        })?;
        Ok(true)
    }
}

impl<B: GfxBackend> Drop for GfxCommandEncoder<'_, B> {
    fn drop(&mut self) {
        if let Some(recording) = self.recording.take() {
            if !std::thread::panicking() {
                log::warn!("command encoder <{}> dropped without finish(), recording discarded", self.name);
            }
            self.device.discard_recording(recording);
        }
    }
}

#[inline]
fn check_buffer_range<B: GfxBackend>(buffer: &GfxBuffer<B>, offset: u64, size: u64) -> GfxResult<()> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer.size() => Ok(()),
        _ => Err(GfxError::InvalidArgument(format!(
            "range {offset}+{size} exceeds buffer <{}> of {} bytes",
            buffer.name(),
            buffer.size()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, NullBarrier, NullCommand, NullReleased};
    use crate::commands::rendering_info::{GfxLoadOp, GfxStoreOp};
    use crate::config::GfxDeviceConfig;
    use crate::resources::texture::GfxTextureDesc;

    fn test_device(backend: &NullBackend) -> GfxDevice<NullBackend> {
        let config = GfxDeviceConfig {
            name: "encoder-test".to_string(),
            transient_heap_size: 4096,
            transient_descriptor_count: 16,
            debug_labels: false,
            ..Default::default()
        };
        GfxDevice::new(backend.clone(), config).unwrap()
    }

    fn test_buffer(backend: &NullBackend, size: u64, state: GfxResourceState) -> GfxBuffer<NullBackend> {
        GfxBuffer::from_native(backend.create_buffer(size), size, state, "buffer")
    }

    fn test_texture(backend: &NullBackend, desc: GfxTextureDesc, state: GfxResourceState) -> GfxTexture<NullBackend> {
        GfxTexture::from_native(backend.create_texture(), desc, state, "texture")
    }

    #[test]
    fn test_redundant_request_records_nothing() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let mut buffer = test_buffer(&backend, 64, GfxResourceState::Undefined);

        let mut encoder = device.create_command_encoder("redundant").unwrap();
        assert!(encoder.set_buffer_state(&mut buffer, GfxResourceState::ShaderResource).unwrap());
        assert!(!encoder.set_buffer_state(&mut buffer, GfxResourceState::ShaderResource).unwrap());
        assert_eq!(encoder.barrier_count(), 1);
        assert_eq!(buffer.state(), GfxResourceState::ShaderResource);
        drop(encoder);

        device.destroy().unwrap();
    }

    #[test]
    fn test_buffer_round_trip_records_two_barriers() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let mut buffer = test_buffer(&backend, 256, GfxResourceState::ShaderResource);
        let id = buffer.native().id();

        let mut encoder = device.create_command_encoder("round-trip").unwrap();
        encoder.clear_buffer(&mut buffer, 0, 256, 0).unwrap();
        encoder.set_buffer_state(&mut buffer, GfxResourceState::ShaderResource).unwrap();
        let command_buffer = encoder.finish().unwrap();
        assert_eq!(command_buffer.barrier_count(), 2);
        device.submit_command_buffer(command_buffer).unwrap();

        let submissions = backend.submissions();
        assert_eq!(
            submissions[0].commands,
            vec![
                NullCommand::Barrier(NullBarrier::Buffer {
                    buffer: id,
                    before: GfxResourceState::ShaderResource,
                    after: GfxResourceState::CopyDestination,
                }),
                NullCommand::FillBuffer {
                    buffer: id,
                    offset: 0,
                    size: 256,
                    value: 0,
                },
                NullCommand::Barrier(NullBarrier::Buffer {
                    buffer: id,
                    before: GfxResourceState::CopyDestination,
                    after: GfxResourceState::ShaderResource,
                }),
            ]
        );

        backend.complete_all();
        device.destroy().unwrap();
    }

    #[test]
    fn test_subresource_states_are_isolated() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let desc = GfxTextureDesc::new_2d(64, 64).mips(4);
        let mut texture = test_texture(&backend, desc, GfxResourceState::ShaderResource);

        let mut encoder = device.create_command_encoder("subresource").unwrap();
        let mip1 = GfxSubresourceRange::single(1, 0);
        assert!(encoder.set_texture_subresource_state(&mut texture, mip1, GfxResourceState::CopyDestination).unwrap());
        assert_eq!(texture.subresource_state(1, 0), Some(GfxResourceState::CopyDestination));
        assert_eq!(texture.subresource_state(0, 0), Some(GfxResourceState::ShaderResource));
        assert_eq!(texture.subresource_state(2, 0), Some(GfxResourceState::ShaderResource));

        // 状态不一致时不能整体转换
        assert!(matches!(
            encoder.set_texture_state(&mut texture, GfxResourceState::RenderTarget),
            Err(GfxError::MixedSubresourceStates { .. })
        ));
        assert_eq!(encoder.barrier_count(), 1);

        encoder.set_texture_subresource_state(&mut texture, mip1, GfxResourceState::ShaderResource).unwrap();
        assert!(encoder.set_texture_state(&mut texture, GfxResourceState::RenderTarget).unwrap());
        assert_eq!(texture.state_tracker().global_state(), Some(GfxResourceState::RenderTarget));
        drop(encoder);

        device.destroy().unwrap();
    }

    #[test]
    fn test_upload_buffer_data() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let mut buffer = test_buffer(&backend, 64, GfxResourceState::Undefined);
        let id = buffer.native().id();

        let mut encoder = device.create_command_encoder("upload").unwrap();
        encoder.upload_buffer_data(&mut buffer, 8, &[1, 2, 3, 4]).unwrap();
        assert_eq!(encoder.transient_heap_available(), 4096 - 4);

        let command_buffer = encoder.finish().unwrap();
        let commands = command_buffer.native_list().unwrap().commands().to_vec();
        assert_eq!(
            commands[0],
            NullCommand::Barrier(NullBarrier::Buffer {
                buffer: id,
                before: GfxResourceState::Undefined,
                after: GfxResourceState::CopyDestination,
            })
        );
        assert!(matches!(
            &commands[1],
            NullCommand::CopyHeapToBuffer { data, dst, dst_offset: 8, .. } if data == &[1, 2, 3, 4] && *dst == id
        ));
        drop(command_buffer);

        device.destroy().unwrap();
    }

    #[test]
    fn test_failed_upload_records_no_barrier() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let mut small = test_buffer(&backend, 64, GfxResourceState::Undefined);
        let mut large = test_buffer(&backend, 8192, GfxResourceState::Undefined);

        let mut encoder = device.create_command_encoder("upload").unwrap();
        assert!(matches!(
            encoder.upload_buffer_data(&mut small, 0, &[0; 65]),
            Err(GfxError::InvalidArgument(_))
        ));
        assert!(matches!(
            encoder.upload_buffer_data(&mut large, 0, &[0; 5000]),
            Err(GfxError::TransientHeapExhausted { requested: 5000, .. })
        ));
        assert_eq!(encoder.barrier_count(), 0);
        assert_eq!(large.state(), GfxResourceState::Undefined);
        drop(encoder);

        device.destroy().unwrap();
    }

    #[test]
    fn test_upload_texture_data_needs_single_mip() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let desc = GfxTextureDesc::new_2d(8, 8).mips(2);
        let mut texture = test_texture(&backend, desc, GfxResourceState::Undefined);

        let mut encoder = device.create_command_encoder("upload-texture").unwrap();
        assert!(matches!(
            encoder.upload_texture_data(&mut texture, GfxSubresourceRange::whole(2, 1), &[0; 16]),
            Err(GfxError::InvalidArgument(_))
        ));
        encoder.upload_texture_data(&mut texture, GfxSubresourceRange::single(1, 0), &[7; 64]).unwrap();
        assert_eq!(texture.subresource_state(1, 0), Some(GfxResourceState::CopyDestination));
        assert_eq!(texture.subresource_state(0, 0), Some(GfxResourceState::Undefined));

        let command_buffer = encoder.finish().unwrap();
        let commands = command_buffer.native_list().unwrap().commands();
        assert!(matches!(
            commands.last(),
            Some(NullCommand::CopyHeapToTexture { copy, .. }) if copy.extent == glam::UVec3::new(4, 4, 1)
        ));
        drop(command_buffer);

        device.destroy().unwrap();
    }

    #[test]
    fn test_upload_texture_data_checks_size() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let desc = GfxTextureDesc::new_2d(8, 8).mips(2);
        let mut texture = test_texture(&backend, desc, GfxResourceState::Undefined);

        let mut encoder = device.create_command_encoder("upload-size").unwrap();
        let available = encoder.transient_heap_available();
        // mip 1 是 4x4，需要 64 字节
        assert!(matches!(
            encoder.upload_texture_data(&mut texture, GfxSubresourceRange::single(1, 0), &[7; 63]),
            Err(GfxError::InvalidArgument(_))
        ));
        assert!(matches!(
            encoder.upload_texture_data(&mut texture, GfxSubresourceRange::single(1, 0), &[7; 65]),
            Err(GfxError::InvalidArgument(_))
        ));
        // mip 越界
        assert!(matches!(
            encoder.upload_texture_data(&mut texture, GfxSubresourceRange::single(2, 0), &[7; 16]),
            Err(GfxError::InvalidArgument(_))
        ));
        assert_eq!(encoder.transient_heap_available(), available);
        assert_eq!(encoder.barrier_count(), 0);
        assert_eq!(texture.subresource_state(1, 0), Some(GfxResourceState::Undefined));
        drop(encoder);

        device.destroy().unwrap();
    }

    #[test]
    fn test_upload_texture_data_with_layers() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let desc = GfxTextureDesc::new_2d(4, 4).layers(3).texel_size(2);
        let mut texture = test_texture(&backend, desc, GfxResourceState::Undefined);

        let mut encoder = device.create_command_encoder("upload-layers").unwrap();
        let layers = GfxSubresourceRange::new(0, 1, 1, 2);
        assert!(matches!(
            encoder.upload_texture_data(&mut texture, layers, &[1; 32]),
            Err(GfxError::InvalidArgument(_))
        ));
        encoder.upload_texture_data(&mut texture, layers, &[1; 64]).unwrap();
        assert_eq!(texture.subresource_state(0, 0), Some(GfxResourceState::Undefined));
        assert_eq!(texture.subresource_state(0, 1), Some(GfxResourceState::CopyDestination));
        assert_eq!(texture.subresource_state(0, 2), Some(GfxResourceState::CopyDestination));
        drop(encoder);

        device.destroy().unwrap();
    }

    #[test]
    fn test_blit_between_mips_of_one_texture() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let desc = GfxTextureDesc::new_2d(16, 16).mips(2);
        let mut texture = test_texture(&backend, desc, GfxResourceState::ShaderResource);
        let id = texture.native().id();

        let region = GfxBlitRegion {
            src_subresource: GfxSubresourceRange::single(0, 0),
            src_min: glam::UVec3::ZERO,
            src_max: desc.mip_extent(0),
            dst_subresource: GfxSubresourceRange::single(1, 0),
            dst_min: glam::UVec3::ZERO,
            dst_max: desc.mip_extent(1),
        };
        let mut encoder = device.create_command_encoder("blit-mips").unwrap();
        encoder.blit_texture_mips(&mut texture, &region, GfxFilter::Linear).unwrap();
        assert_eq!(texture.subresource_state(0, 0), Some(GfxResourceState::CopySource));
        assert_eq!(texture.subresource_state(1, 0), Some(GfxResourceState::CopyDestination));
        assert_eq!(encoder.barrier_count(), 2);

        let overlapping = GfxBlitRegion {
            src_subresource: GfxSubresourceRange::whole(2, 1),
            ..region
        };
        assert!(matches!(
            encoder.blit_texture_mips(&mut texture, &overlapping, GfxFilter::Linear),
            Err(GfxError::InvalidArgument(_))
        ));
        assert_eq!(encoder.barrier_count(), 2);

        let command_buffer = encoder.finish().unwrap();
        let commands = command_buffer.native_list().unwrap().commands();
        assert_eq!(
            commands,
            &[
                NullCommand::Barrier(NullBarrier::Texture {
                    texture: id,
                    range: GfxSubresourceRange::single(0, 0),
                    before: GfxResourceState::ShaderResource,
                    after: GfxResourceState::CopySource,
                }),
                NullCommand::Barrier(NullBarrier::Texture {
                    texture: id,
                    range: GfxSubresourceRange::single(1, 0),
                    before: GfxResourceState::ShaderResource,
                    after: GfxResourceState::CopyDestination,
                }),
                NullCommand::BlitTexture {
                    dst: id,
                    src: id,
                    filter: GfxFilter::Linear,
                },
            ]
        );
        drop(command_buffer);

        device.destroy().unwrap();
    }

    #[test]
    fn test_copy_between_layers_of_one_texture() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let desc = GfxTextureDesc::new_2d(8, 8).layers(2);
        let mut texture = test_texture(&backend, desc, GfxResourceState::Undefined);

        let copy = GfxTextureCopy {
            src_subresource: GfxSubresourceRange::single(0, 0),
            src_offset: glam::UVec3::ZERO,
            dst_subresource: GfxSubresourceRange::single(0, 1),
            dst_offset: glam::UVec3::ZERO,
            extent: desc.extent,
        };
        let mut encoder = device.create_command_encoder("copy-layers").unwrap();
        encoder.copy_texture_subresources(&mut texture, &copy).unwrap();
        assert_eq!(texture.subresource_state(0, 0), Some(GfxResourceState::CopySource));
        assert_eq!(texture.subresource_state(0, 1), Some(GfxResourceState::CopyDestination));

        let same = GfxTextureCopy {
            dst_subresource: GfxSubresourceRange::single(0, 0),
            ..copy
        };
        assert!(matches!(
            encoder.copy_texture_subresources(&mut texture, &same),
            Err(GfxError::InvalidArgument(_))
        ));
        drop(encoder);

        device.destroy().unwrap();
    }

    #[test]
    fn test_generate_mips() {
        let backend = NullBackend::new();
        let config = GfxDeviceConfig {
            name: "mips-test".to_string(),
            transient_heap_size: 4096,
            transient_descriptor_count: 16,
            debug_labels: true,
            ..Default::default()
        };
        let device = GfxDevice::new(backend.clone(), config).unwrap();
        let desc = GfxTextureDesc::new_2d(16, 16).mips(4);
        let mut texture = test_texture(&backend, desc, GfxResourceState::Undefined);

        let mut encoder = device.create_command_encoder("mips").unwrap();
        encoder.generate_mips(&mut texture, GfxFilter::Linear).unwrap();
        assert_eq!(texture.state_tracker().global_state(), Some(GfxResourceState::CopySource));
        // mip 0 一次，中间每个 mip 两次，最后一个 mip 两次
        assert_eq!(encoder.barrier_count(), 7);

        let command_buffer = encoder.finish().unwrap();
        let commands = command_buffer.native_list().unwrap().commands();
        assert_eq!(commands.first(), Some(&NullCommand::BeginLabel("generate mips <texture>".to_string())));
        assert_eq!(commands.last(), Some(&NullCommand::EndLabel));
        assert_eq!(commands.iter().filter(|c| matches!(c, NullCommand::BlitTexture { .. })).count(), 3);
        drop(command_buffer);

        device.destroy().unwrap();
    }

    #[test]
    fn test_clear_buffer_needs_alignment() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let mut buffer = test_buffer(&backend, 64, GfxResourceState::Undefined);

        let mut encoder = device.create_command_encoder("clear").unwrap();
        assert!(matches!(encoder.clear_buffer(&mut buffer, 2, 8, 0), Err(GfxError::InvalidArgument(_))));
        assert!(matches!(encoder.clear_buffer(&mut buffer, 0, 68, 0), Err(GfxError::InvalidArgument(_))));
        assert_eq!(encoder.barrier_count(), 0);
        drop(encoder);

        device.destroy().unwrap();
    }

    #[test]
    fn test_resolve_checks_sample_counts() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let mut msaa = test_texture(&backend, GfxTextureDesc::new_2d(16, 16).samples(4), GfxResourceState::RenderTarget);
        let mut single = test_texture(&backend, GfxTextureDesc::new_2d(16, 16), GfxResourceState::Undefined);
        let range = GfxSubresourceRange::single(0, 0);

        let mut encoder = device.create_command_encoder("resolve").unwrap();
        assert!(matches!(
            encoder.resolve_texture(&mut msaa, range, &mut single, range),
            Err(GfxError::InvalidArgument(_))
        ));
        encoder.resolve_texture(&mut single, range, &mut msaa, range).unwrap();
        assert_eq!(msaa.state_tracker().global_state(), Some(GfxResourceState::ResolveSource));
        assert_eq!(single.state_tracker().global_state(), Some(GfxResourceState::ResolveDestination));
        assert_eq!(encoder.barrier_count(), 2);
        drop(encoder);

        device.destroy().unwrap();
    }

    #[test]
    fn test_finish_with_open_pass_fails() {
        let backend = NullBackend::new();
        let device = test_device(&backend);

        let mut encoder = device.create_command_encoder("open-pass").unwrap();
        let pass = encoder.begin_compute_pass("compute").unwrap();
        std::mem::forget(pass);
        assert_eq!(encoder.state(), GfxEncoderState::InPass(GfxPassKind::Compute));
        assert!(matches!(
            encoder.finish(),
            Err(GfxError::PassStillOpen {
                open: GfxPassKind::Compute
            })
        ));

        // 录制被丢弃，heap 回到空闲队列
        assert_eq!(device.gc().free_heap_count(), 1);
        assert!(matches!(backend.released().as_slice(), [NullReleased::CommandList(_)]));
        device.destroy().unwrap();
    }

    #[test]
    fn test_only_one_pass_at_a_time() {
        let backend = NullBackend::new();
        let device = test_device(&backend);
        let mut buffer = test_buffer(&backend, 64, GfxResourceState::Undefined);
        let mut target = test_texture(&backend, GfxTextureDesc::new_2d(8, 8), GfxResourceState::Undefined);

        let mut encoder = device.create_command_encoder("exclusive").unwrap();
        std::mem::forget(encoder.begin_compute_pass("compute").unwrap());
        assert!(matches!(
            encoder.begin_render_pass(GfxRenderPassDesc::new("render").color(
                &mut target,
                GfxLoadOp::DontCare,
                GfxStoreOp::Store
            )),
            Err(GfxError::PassAlreadyOpen {
                open: GfxPassKind::Compute
            })
        ));
        assert!(matches!(
            encoder.clear_buffer(&mut buffer, 0, 64, 0),
            Err(GfxError::PassAlreadyOpen { .. })
        ));
        assert_eq!(target.state_tracker().global_state(), Some(GfxResourceState::Undefined));
        drop(encoder);

        let mut encoder = device.create_command_encoder("sequential").unwrap();
        encoder.begin_compute_pass("first").unwrap().end().unwrap();
        assert_eq!(encoder.state(), GfxEncoderState::Open);
        encoder.begin_ray_tracing_pass("second").unwrap().end().unwrap();
        encoder.clear_buffer(&mut buffer, 0, 64, 0).unwrap();
        drop(encoder.finish().unwrap());

        device.destroy().unwrap();
    }

    #[test]
    fn test_dropped_encoder_recycles_heap() {
        let backend = NullBackend::new();
        let device = test_device(&backend);

        drop(device.create_command_encoder("dropped").unwrap());
        assert_eq!(device.gc().free_heap_count(), 1);
        assert_eq!(device.gc().in_flight_heap_count(), 0);

        // 下一个 encoder 复用同一个 heap
        drop(device.create_command_encoder("reused").unwrap());
        assert_eq!(backend.heaps_created(), 1);
        assert_eq!(backend.released().len(), 2);
        device.destroy().unwrap();
    }
}
