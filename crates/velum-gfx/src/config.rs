use serde::{Deserialize, Serialize};

use crate::backend::GfxTransientHeapDesc;

/// [`crate::device::GfxDevice`] 的配置，可以从 TOML 读取，缺省的字段使用默认值
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxDeviceConfig {
    /// device 的 debug 名称
    pub name: String,
    /// 每个 transient heap 的 upload / constant 空间（字节）
    pub transient_heap_size: u64,
    /// 每个 transient heap 的 descriptor 数量
    pub transient_descriptor_count: u32,
    /// 创建 device 时预先分配的 transient heap 数量
    pub initial_transient_heaps: u32,
    /// 是否创建可导出的桥接 fence（CUDA 桥接需要）
    pub shared_fence: bool,
    /// 是否在 pass 周围插入 debug label
    pub debug_labels: bool,
}

impl Default for GfxDeviceConfig {
    fn default() -> Self {
        Self {
            name: "velum-device".to_string(),
            transient_heap_size: 4 * 1024 * 1024,
            transient_descriptor_count: 4096,
            initial_transient_heaps: 0,
            shared_fence: false,
            debug_labels: cfg!(debug_assertions),
        }
    }
}

impl GfxDeviceConfig {
    #[inline]
    pub fn transient_heap_desc(&self) -> GfxTransientHeapDesc {
        GfxTransientHeapDesc {
            size: self.transient_heap_size,
            descriptor_count: self.transient_descriptor_count,
        }
    }
}
