//! Vulkan 后端
//!
//! 不负责创建 instance / device，由应用创建好之后传入。提交用 `vkQueueSubmit2`，
//! fence 是 timeline semaphore，barrier 用 synchronization2。

mod command_list;
mod resources;
pub mod state;
mod transient_heap;

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use vk_mem::Alloc;

pub use command_list::VkCommandList;
pub use resources::{
    VkAccelerationStructure, VkAccelerationStructureInputs, VkBuffer, VkFence, VkPipeline, VkQueryPool,
    VkShaderObject, VkShaderTable, VkTexture,
};
pub use transient_heap::VkTransientHeap;

use crate::backend::{GfxBackend, GfxReleasable, GfxTransientHeapDesc};
use crate::error::{GfxError, GfxResult};
use crate::resources::texture::GfxTextureDesc;
use crate::sync::external::GfxExternalHandle;

/// 把 Vulkan 的返回值翻译成 [`GfxError`]
pub(crate) fn vk_error(result: vk::Result) -> GfxError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => GfxError::OutOfMemory,
        other => GfxError::Vulkan(other),
    }
}

/// 创建 [`VkBackend`] 需要的外部对象
pub struct VkBackendCreateInfo<'a> {
    pub instance: &'a ash::Instance,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub allocator: Arc<vk_mem::Allocator>,
    /// 需要 instance 启用 `VK_EXT_debug_utils`
    pub debug_utils: bool,
    /// 需要 device 启用 `VK_KHR_acceleration_structure` 和 `VK_KHR_ray_tracing_pipeline`
    pub ray_tracing: bool,
    /// 需要 device 启用 `VK_KHR_external_semaphore_fd`，共享 fence 依赖它
    pub external_semaphore: bool,
}

/// 后端、命令列表、transient heap 共享的 device 上下文
pub(crate) struct VkContext {
    pub(crate) device: ash::Device,
    queue: Mutex<vk::Queue>,
    pub(crate) queue_family_index: u32,
    pub(crate) allocator: Arc<vk_mem::Allocator>,
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,
    pub(crate) acceleration_structure: Option<ash::khr::acceleration_structure::Device>,
    pub(crate) ray_tracing_pipeline: Option<ash::khr::ray_tracing_pipeline::Device>,
    external_semaphore_fd: Option<ash::khr::external_semaphore_fd::Device>,
}

impl VkContext {
    pub(crate) fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let result = unsafe {
            debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(name.as_c_str()),
            )
        };
        if let Err(e) = result {
            log::warn!("failed to set debug name {:?}: {}", name, e);
        }
    }

    /// 队列需要外部同步
    fn queue_submit(&self, submits: &[vk::SubmitInfo2<'_>]) -> GfxResult<()> {
        let queue = self.queue.lock();
        unsafe { self.device.queue_submit2(*queue, submits, vk::Fence::null()) }.map_err(vk_error)
    }

    fn destroy_buffer(&self, mut buffer: VkBuffer) {
        if let Some(allocation) = buffer.allocation.as_mut() {
            unsafe { self.allocator.destroy_buffer(buffer.buffer, allocation) };
        }
    }
}

/// # Destroy
/// 不拥有 device，只需要在 device 销毁前释放所有由它创建的对象
#[derive(Clone)]
pub struct VkBackend {
    ctx: Arc<VkContext>,
}

// new & init
impl VkBackend {
    pub fn new(ci: VkBackendCreateInfo<'_>) -> Self {
        let VkBackendCreateInfo {
            instance,
            device,
            queue,
            queue_family_index,
            allocator,
            debug_utils,
            ray_tracing,
            external_semaphore,
        } = ci;

        let debug_utils = debug_utils.then(|| ash::ext::debug_utils::Device::new(instance, &device));
        let acceleration_structure =
            ray_tracing.then(|| ash::khr::acceleration_structure::Device::new(instance, &device));
        let ray_tracing_pipeline = ray_tracing.then(|| ash::khr::ray_tracing_pipeline::Device::new(instance, &device));
        let external_semaphore_fd =
            external_semaphore.then(|| ash::khr::external_semaphore_fd::Device::new(instance, &device));

        log::info!(
            "create vulkan backend: queue family {}, debug utils: {}, ray tracing: {}, external semaphore: {}",
            queue_family_index,
            debug_utils.is_some(),
            ray_tracing,
            external_semaphore
        );
        Self {
            ctx: Arc::new(VkContext {
                device,
                queue: Mutex::new(queue),
                queue_family_index,
                allocator,
                debug_utils,
                acceleration_structure,
                ray_tracing_pipeline,
                external_semaphore_fd,
            }),
        }
    }
}

// getters
impl VkBackend {
    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.ctx.device
    }

    #[inline]
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.ctx.allocator
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.ctx.queue_family_index
    }

    #[inline]
    pub fn supports_ray_tracing(&self) -> bool {
        self.ctx.acceleration_structure.is_some() && self.ctx.ray_tracing_pipeline.is_some()
    }
}

// 资源创建
impl VkBackend {
    /// 创建一个 Buffer
    ///
    /// - `mapped`: 是否需要 host 访问
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        mapped: bool,
        name: &str,
    ) -> GfxResult<VkBuffer> {
        crate::gfx_span!("VkBackend::create_buffer");
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if mapped {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };
        let (buffer, allocation) =
            unsafe { self.ctx.allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, 8) }.map_err(vk_error)?;

        let device_address = usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS).then(|| unsafe {
            self.ctx.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        });
        self.ctx.set_debug_name(buffer, &format!("Buffer::{name}"));

        Ok(VkBuffer {
            buffer,
            allocation: Some(allocation),
            size,
            device_address,
        })
    }

    /// 创建一个 Image，同时创建一个覆盖所有 subresource 的默认 view
    pub fn create_texture(
        &self,
        desc: &GfxTextureDesc,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        name: &str,
    ) -> GfxResult<VkTexture> {
        crate::gfx_span!("VkBackend::create_texture");
        let extent = vk::Extent3D {
            width: desc.extent.x,
            height: desc.extent.y,
            depth: desc.extent.z.max(1),
        };
        let (image_type, view_type) = match (extent.depth > 1, desc.array_layer_count > 1) {
            (true, _) => (vk::ImageType::TYPE_3D, vk::ImageViewType::TYPE_3D),
            (false, true) => (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D_ARRAY),
            (false, false) => (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D),
        };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(format)
            .extent(extent)
            .mip_levels(desc.mip_level_count)
            .array_layers(desc.array_layer_count)
            .samples(vk::SampleCountFlags::from_raw(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) =
            unsafe { self.ctx.allocator.create_image(&image_ci, &alloc_ci) }.map_err(vk_error)?;

        let aspect = resources::format_aspect_mask(format);
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: desc.mip_level_count,
                base_array_layer: 0,
                layer_count: desc.array_layer_count,
            });
        let view = match unsafe { self.ctx.device.create_image_view(&view_ci, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.ctx.allocator.destroy_image(image, &mut allocation) };
                return Err(vk_error(e));
            }
        };
        self.ctx.set_debug_name(image, &format!("Image::{name}"));
        self.ctx.set_debug_name(view, &format!("ImageView::{name}"));

        Ok(VkTexture {
            image,
            view,
            allocation: Some(allocation),
            format,
            aspect,
            extent,
            owns_view: true,
        })
    }

    /// 查询构建加速结构需要的大小
    pub fn acceleration_structure_build_sizes(
        &self,
        inputs: &VkAccelerationStructureInputs,
    ) -> GfxResult<vk::AccelerationStructureBuildSizesInfoKHR<'static>> {
        let loader = self.acceleration_structure_loader()?;
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(inputs.ty)
            .flags(inputs.flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&inputs.geometries);
        let max_primitive_counts = inputs.ranges.iter().map(|range| range.primitive_count).collect::<Vec<_>>();
        let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &max_primitive_counts,
                &mut size_info,
            );
        }
        Ok(size_info)
    }

    pub fn create_acceleration_structure(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
        name: &str,
    ) -> GfxResult<VkAccelerationStructure> {
        let loader = self.acceleration_structure_loader()?;
        let buffer = self.create_buffer(
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            false,
            name,
        )?;
        let create_info =
            vk::AccelerationStructureCreateInfoKHR::default().ty(ty).size(size).buffer(buffer.buffer);
        let handle = match unsafe { loader.create_acceleration_structure(&create_info, None) } {
            Ok(handle) => handle,
            Err(e) => {
                self.ctx.destroy_buffer(buffer);
                return Err(vk_error(e));
            }
        };
        let device_address = unsafe {
            loader.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle),
            )
        };
        self.ctx.set_debug_name(handle, &format!("AccelerationStructure::{name}"));

        Ok(VkAccelerationStructure {
            handle,
            buffer,
            device_address,
        })
    }
}

// tools
impl VkBackend {
    fn acceleration_structure_loader(&self) -> GfxResult<&ash::khr::acceleration_structure::Device> {
        self.ctx
            .acceleration_structure
            .as_ref()
            .ok_or(GfxError::UnsupportedOperation("acceleration structures require ray tracing"))
    }

    fn signal_info(fence: &VkFence, value: u64) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(fence.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
    }
}

impl GfxBackend for VkBackend {
    type Buffer = VkBuffer;
    type Texture = VkTexture;
    type AccelerationStructure = VkAccelerationStructure;
    type AccelerationStructureInputs = VkAccelerationStructureInputs;
    type Pipeline = VkPipeline;
    type ShaderObject = VkShaderObject;
    type ShaderTable = VkShaderTable;
    type QueryPool = VkQueryPool;
    type Fence = VkFence;
    type CommandList = VkCommandList;
    type TransientHeap = VkTransientHeap;

    fn backend_name(&self) -> &'static str {
        "vulkan"
    }

    fn create_command_list(&self, debug_name: &str) -> GfxResult<VkCommandList> {
        VkCommandList::new(self.ctx.clone(), debug_name)
    }

    fn submit(&self, list: &VkCommandList, fence: &VkFence, signal_value: u64) -> GfxResult<()> {
        crate::gfx_span!("VkBackend::submit");
        if !list.is_finished() {
            return Err(GfxError::InvalidArgument(format!("command list <{}> is still recording", list.name())));
        }
        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(list.command_buffer())];
        let signal_infos = [Self::signal_info(fence, signal_value)];
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_infos);
        self.ctx.queue_submit(std::slice::from_ref(&submit_info))
    }

    fn queue_wait_idle(&self) -> GfxResult<()> {
        let queue = self.ctx.queue.lock();
        unsafe { self.ctx.device.queue_wait_idle(*queue) }.map_err(vk_error)
    }

    fn create_fence(&self, initial_value: u64, shared: bool, debug_name: &str) -> GfxResult<VkFence> {
        if shared && self.ctx.external_semaphore_fd.is_none() {
            return Err(GfxError::UnsupportedOperation("shared fences require VK_KHR_external_semaphore_fd"));
        }
        let mut timeline_type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let mut export_ci =
            vk::ExportSemaphoreCreateInfo::default().handle_types(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);
        let mut semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        if shared {
            semaphore_ci = semaphore_ci.push_next(&mut export_ci);
        }
        let semaphore = unsafe { self.ctx.device.create_semaphore(&semaphore_ci, None) }.map_err(vk_error)?;
        self.ctx.set_debug_name(semaphore, &format!("Semaphore::{debug_name}"));
        Ok(VkFence { semaphore, shared })
    }

    fn fence_completed_value(&self, fence: &VkFence) -> GfxResult<u64> {
        unsafe { self.ctx.device.get_semaphore_counter_value(fence.semaphore) }.map_err(vk_error)
    }

    fn wait_fence(&self, fence: &VkFence, value: u64) -> GfxResult<()> {
        let semaphores = [fence.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default().semaphores(&semaphores).values(&values);
        unsafe { self.ctx.device.wait_semaphores(&wait_info, u64::MAX) }.map_err(vk_error)
    }

    fn queue_signal(&self, fence: &VkFence, value: u64) -> GfxResult<()> {
        let signal_infos = [Self::signal_info(fence, value)];
        let submit_info = vk::SubmitInfo2::default().signal_semaphore_infos(&signal_infos);
        self.ctx.queue_submit(std::slice::from_ref(&submit_info))
    }

    fn queue_wait(&self, fence: &VkFence, value: u64) -> GfxResult<()> {
        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(fence.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit_info = vk::SubmitInfo2::default().wait_semaphore_infos(&wait_infos);
        self.ctx.queue_submit(std::slice::from_ref(&submit_info))
    }

    fn export_fence(&self, fence: &VkFence) -> GfxResult<GfxExternalHandle> {
        let Some(loader) = &self.ctx.external_semaphore_fd else {
            return Err(GfxError::UnsupportedOperation("VK_KHR_external_semaphore_fd is not enabled"));
        };
        if !fence.shared {
            return Err(GfxError::UnsupportedOperation("fence was not created as shared"));
        }
        let get_fd_info = vk::SemaphoreGetFdInfoKHR::default()
            .semaphore(fence.semaphore)
            .handle_type(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);
        let fd = unsafe { loader.get_semaphore_fd(&get_fd_info) }.map_err(vk_error)?;
        Ok(GfxExternalHandle::Fd(fd))
    }

    fn destroy_fence(&self, fence: &VkFence) {
        unsafe { self.ctx.device.destroy_semaphore(fence.semaphore, None) };
    }

    fn create_transient_heap(&self, desc: &GfxTransientHeapDesc) -> GfxResult<VkTransientHeap> {
        VkTransientHeap::new(self.ctx.clone(), desc)
    }

    fn destroy_transient_heap(&self, heap: VkTransientHeap) {
        heap.destroy();
    }

    fn release(&self, object: GfxReleasable<Self>) {
        log::trace!("release {}", object.kind_name());
        match object {
            GfxReleasable::Buffer(buffer) => self.ctx.destroy_buffer(buffer),
            GfxReleasable::Texture(mut texture) => unsafe {
                if texture.owns_view {
                    self.ctx.device.destroy_image_view(texture.view, None);
                }
                if let Some(allocation) = texture.allocation.as_mut() {
                    self.ctx.allocator.destroy_image(texture.image, allocation);
                }
            },
            GfxReleasable::AccelerationStructure(structure) => {
                match &self.ctx.acceleration_structure {
                    Some(loader) => unsafe { loader.destroy_acceleration_structure(structure.handle, None) },
                    None => log::error!("acceleration structure released without ray tracing support"),
                }
                self.ctx.destroy_buffer(structure.buffer);
            }
            GfxReleasable::CommandList(list) => list.destroy(),
        }
    }
}
