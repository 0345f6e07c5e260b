use std::sync::Arc;

use ash::vk;
use vk_mem::Alloc;

use super::resources::VkBuffer;
use super::{VkBackend, VkContext, vk_error};
use crate::backend::{GfxTransientHeap, GfxTransientHeapDesc, align_up};
use crate::error::{GfxError, GfxResult};

/// 一块 host 可写的 upload buffer，加上一个 descriptor pool
///
/// upload buffer 线性分配，descriptor set 从 pool 中分配，`reset` 时一起归零
///
/// # Destroy
/// 由 [`GfxBackend::destroy_transient_heap`](crate::backend::GfxBackend::destroy_transient_heap) 销毁
pub struct VkTransientHeap {
    ctx: Arc<VkContext>,
    upload_buffer: VkBuffer,
    mapped_ptr: *mut u8,
    used: u64,
    descriptor_pool: vk::DescriptorPool,
}

// SAFETY: mapped_ptr 只通过 &mut self 写入
unsafe impl Send for VkTransientHeap {}

// new & init
impl VkTransientHeap {
    pub(crate) fn new(ctx: Arc<VkContext>, desc: &GfxTransientHeapDesc) -> GfxResult<Self> {
        crate::gfx_span!("VkTransientHeap::new");
        if desc.size == 0 {
            return Err(GfxError::InvalidArgument("transient heap size must not be 0".to_string()));
        }

        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(
            vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        );
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };
        let (buffer, mut allocation) =
            unsafe { ctx.allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, 256) }.map_err(vk_error)?;
        let mapped_ptr = match unsafe { ctx.allocator.map_memory(&mut allocation) } {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { ctx.allocator.destroy_buffer(buffer, &mut allocation) };
                return Err(vk_error(e));
            }
        };
        let device_address =
            unsafe { ctx.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer)) };

        let descriptor_pool = if desc.descriptor_count == 0 {
            vk::DescriptorPool::null()
        } else {
            let pool_sizes = [
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::DescriptorType::SAMPLER,
            ]
            .map(|ty| vk::DescriptorPoolSize {
                ty,
                descriptor_count: desc.descriptor_count,
            });
            let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(desc.descriptor_count).pool_sizes(&pool_sizes);
            match unsafe { ctx.device.create_descriptor_pool(&pool_ci, None) } {
                Ok(pool) => pool,
                Err(e) => {
                    unsafe {
                        ctx.allocator.unmap_memory(&mut allocation);
                        ctx.allocator.destroy_buffer(buffer, &mut allocation);
                    }
                    return Err(vk_error(e));
                }
            }
        };

        ctx.set_debug_name(buffer, "Buffer::transient-heap");
        Ok(Self {
            ctx,
            upload_buffer: VkBuffer {
                buffer,
                allocation: Some(allocation),
                size: desc.size,
                device_address: Some(device_address),
            },
            mapped_ptr,
            used: 0,
            descriptor_pool,
        })
    }

    pub(crate) fn destroy(mut self) {
        unsafe {
            if self.descriptor_pool != vk::DescriptorPool::null() {
                self.ctx.device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
            if let Some(allocation) = self.upload_buffer.allocation.as_mut() {
                self.ctx.allocator.unmap_memory(allocation);
                self.ctx.allocator.destroy_buffer(self.upload_buffer.buffer, allocation);
            }
        }
    }
}

// getters
impl VkTransientHeap {
    #[inline]
    pub fn upload_buffer(&self) -> &VkBuffer {
        &self.upload_buffer
    }

    #[inline]
    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }
}

// tools
impl VkTransientHeap {
    /// 分配只在本次提交内有效的 descriptor set
    pub fn allocate_descriptor_sets(&mut self, layouts: &[vk::DescriptorSetLayout]) -> GfxResult<Vec<vk::DescriptorSet>> {
        if self.descriptor_pool == vk::DescriptorPool::null() {
            return Err(GfxError::UnsupportedOperation("transient heap was created without descriptors"));
        }
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(self.descriptor_pool).set_layouts(layouts);
        unsafe { self.ctx.device.allocate_descriptor_sets(&alloc_info) }.map_err(vk_error)
    }
}

impl GfxTransientHeap<VkBackend> for VkTransientHeap {
    fn reset(&mut self) -> GfxResult<()> {
        if self.descriptor_pool != vk::DescriptorPool::null() {
            unsafe {
                self.ctx.device.reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty())
            }
            .map_err(vk_error)?;
        }
        self.used = 0;
        Ok(())
    }

    #[inline]
    fn capacity(&self) -> u64 {
        self.upload_buffer.size
    }

    #[inline]
    fn used(&self) -> u64 {
        self.used
    }

    fn write(&mut self, data: &[u8], alignment: u64) -> GfxResult<u64> {
        let offset = align_up(self.used, alignment);
        let end = offset.checked_add(data.len() as u64).filter(|end| *end <= self.capacity());
        let Some(end) = end else {
            return Err(GfxError::TransientHeapExhausted {
                requested: data.len() as u64,
                available: self.capacity().saturating_sub(offset),
            });
        };

        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped_ptr.add(offset as usize), data.len()) };
        if let Some(allocation) = &self.upload_buffer.allocation {
            self.ctx.allocator.flush_allocation(allocation, offset, data.len() as u64).map_err(vk_error)?;
        }
        self.used = end;
        Ok(offset)
    }

    #[inline]
    fn buffer(&self) -> &VkBuffer {
        &self.upload_buffer
    }
}
