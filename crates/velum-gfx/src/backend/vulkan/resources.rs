//! Vulkan 后端的原生对象句柄
//!
//! 句柄本身不负责销毁，销毁统一走 [`super::VkBackend::release`]。

use ash::vk;

/// 由 vk_mem 分配或外部导入的 buffer
pub struct VkBuffer {
    pub(crate) buffer: vk::Buffer,
    /// 外部导入的 buffer 没有 allocation，由调用方销毁
    pub(crate) allocation: Option<vk_mem::Allocation>,
    pub(crate) size: vk::DeviceSize,
    pub(crate) device_address: Option<vk::DeviceAddress>,
}

// SAFETY: allocation 只在 release 时被访问，那时 GPU 已不再使用该 buffer
unsafe impl Send for VkBuffer {}
unsafe impl Sync for VkBuffer {}

impl VkBuffer {
    /// 导入外部创建的 buffer，释放时不会销毁
    pub fn from_raw(buffer: vk::Buffer, size: vk::DeviceSize, device_address: Option<vk::DeviceAddress>) -> Self {
        Self {
            buffer,
            allocation: None,
            size,
            device_address,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_address
    }
}

/// image 以及默认的 view
pub struct VkTexture {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) allocation: Option<vk_mem::Allocation>,
    pub(crate) format: vk::Format,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) extent: vk::Extent3D,
    /// view 是否由后端创建，外部 swapchain image 的 view 由调用方管理
    pub(crate) owns_view: bool,
}

// SAFETY: 同 VkBuffer
unsafe impl Send for VkTexture {}
unsafe impl Sync for VkTexture {}

impl VkTexture {
    /// 导入外部创建的 image（例如 swapchain image），释放时不会销毁 image 和 view
    pub fn from_raw(image: vk::Image, view: vk::ImageView, format: vk::Format, extent: vk::Extent3D) -> Self {
        Self {
            image,
            view,
            allocation: None,
            format,
            aspect: format_aspect_mask(format),
            extent,
            owns_view: false,
        }
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// 某个 mip 的大小，每个维度至少为 1
    pub fn mip_extent(&self, mip_level: u32) -> vk::Extent3D {
        let shrink = |v: u32| v.checked_shr(mip_level).unwrap_or(0).max(1);
        vk::Extent3D {
            width: shrink(self.extent.width),
            height: shrink(self.extent.height),
            depth: shrink(self.extent.depth),
        }
    }
}

pub struct VkAccelerationStructure {
    pub(crate) handle: vk::AccelerationStructureKHR,
    /// 加速结构所在的 buffer
    pub(crate) buffer: VkBuffer,
    pub(crate) device_address: vk::DeviceAddress,
}

impl VkAccelerationStructure {
    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    #[inline]
    pub fn buffer(&self) -> &VkBuffer {
        &self.buffer
    }
}

/// 加速结构的构建输入
///
/// geometry 中只能引用 device address，不能带 `p_next` 链
pub struct VkAccelerationStructureInputs {
    pub ty: vk::AccelerationStructureTypeKHR,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub geometries: Vec<vk::AccelerationStructureGeometryKHR<'static>>,
    pub ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR>,
}

// SAFETY: geometry 中只有 device address 和空的 p_next
unsafe impl Send for VkAccelerationStructureInputs {}
unsafe impl Sync for VkAccelerationStructureInputs {}

impl VkAccelerationStructureInputs {
    pub fn new(ty: vk::AccelerationStructureTypeKHR, flags: vk::BuildAccelerationStructureFlagsKHR) -> Self {
        Self {
            ty,
            flags,
            geometries: Vec::new(),
            ranges: Vec::new(),
        }
    }

    /// builder
    pub fn geometry(
        mut self,
        geometry: vk::AccelerationStructureGeometryKHR<'static>,
        range: vk::AccelerationStructureBuildRangeInfoKHR,
    ) -> Self {
        self.geometries.push(geometry);
        self.ranges.push(range);
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub struct VkPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
}

/// 绑定 pipeline 时一起绑定的 descriptor set
#[derive(Clone, Debug, Default)]
pub struct VkShaderObject {
    pub first_set: u32,
    pub descriptor_sets: Vec<vk::DescriptorSet>,
    pub dynamic_offsets: Vec<u32>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VkShaderTable {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

#[derive(Clone, Copy, Debug)]
pub struct VkQueryPool {
    pub pool: vk::QueryPool,
    pub query_type: vk::QueryType,
}

/// 提交用的 timeline semaphore
pub struct VkFence {
    pub(crate) semaphore: vk::Semaphore,
    pub(crate) shared: bool,
}

impl VkFence {
    #[inline]
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }
}

pub(crate) fn format_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => vk::ImageAspectFlags::DEPTH,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_aspect_mask() {
        assert_eq!(format_aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            format_aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(format_aspect_mask(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_mip_extent() {
        let texture = VkTexture::from_raw(
            vk::Image::null(),
            vk::ImageView::null(),
            vk::Format::R8G8B8A8_UNORM,
            vk::Extent3D {
                width: 64,
                height: 16,
                depth: 1,
            },
        );
        let extent = texture.mip_extent(5);
        assert_eq!((extent.width, extent.height, extent.depth), (2, 1, 1));
        assert_eq!(texture.mip_extent(40).width, 1);
    }
}
