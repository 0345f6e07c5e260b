use crate::backend::null::{NullBackend, NullBuffer};
use crate::backend::{GfxTransientHeap, align_up};
use crate::error::{GfxError, GfxResult};

/// 内存中的 transient heap，数据写入一个 `Vec<u8>`
pub struct NullTransientHeap {
    id: u64,
    data: Vec<u8>,
    used: u64,
    descriptor_count: u32,
    reset_count: u32,
    buffer: NullBuffer,
}

impl NullTransientHeap {
    pub(crate) fn new(id: u64, size: u64, descriptor_count: u32, buffer: NullBuffer) -> Self {
        Self {
            id,
            data: vec![0; size as usize],
            used: 0,
            descriptor_count,
            reset_count: 0,
            buffer,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn descriptor_count(&self) -> u32 {
        self.descriptor_count
    }

    /// 被 reset 的次数
    #[inline]
    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }

    /// 读取 heap 中的数据
    pub fn contents(&self, offset: u64, len: u64) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        (end <= self.used).then(|| &self.data[offset as usize..end as usize])
    }
}

impl GfxTransientHeap<NullBackend> for NullTransientHeap {
    fn reset(&mut self) -> GfxResult<()> {
        self.used = 0;
        self.reset_count += 1;
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn used(&self) -> u64 {
        self.used
    }

    fn write(&mut self, data: &[u8], alignment: u64) -> GfxResult<u64> {
        let offset = align_up(self.used, alignment);
        let capacity = self.capacity();
        let end = offset.checked_add(data.len() as u64).filter(|end| *end <= capacity).ok_or(
            GfxError::TransientHeapExhausted {
                requested: data.len() as u64,
                available: capacity.saturating_sub(offset),
            },
        )?;
        self.data[offset as usize..end as usize].copy_from_slice(data);
        self.used = end;
        Ok(offset)
    }

    fn buffer(&self) -> &NullBuffer {
        &self.buffer
    }
}
