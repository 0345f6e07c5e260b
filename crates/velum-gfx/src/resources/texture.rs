use serde::{Deserialize, Serialize};

use crate::backend::GfxBackend;
use crate::resources::state::GfxResourceState;
use crate::resources::state_tracker::GfxResourceStateTracker;
use crate::resources::subresource::GfxSubresourceRange;

/// texture 的形状，决定 subresource 的数量
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GfxTextureDesc {
    pub extent: glam::UVec3,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub sample_count: u32,
    /// 每个 texel 的字节数，上传时用来校验数据大小
    #[serde(default = "default_texel_size")]
    pub texel_size: u32,
}

#[inline]
fn default_texel_size() -> u32 {
    4
}

impl GfxTextureDesc {
    #[inline]
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            extent: glam::UVec3::new(width, height, 1),
            mip_level_count: 1,
            array_layer_count: 1,
            sample_count: 1,
            texel_size: default_texel_size(),
        }
    }

    /// builder
    #[inline]
    pub fn mips(mut self, mip_level_count: u32) -> Self {
        self.mip_level_count = mip_level_count.max(1);
        self
    }

    /// builder
    #[inline]
    pub fn layers(mut self, array_layer_count: u32) -> Self {
        self.array_layer_count = array_layer_count.max(1);
        self
    }

    /// builder
    #[inline]
    pub fn samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }

    /// builder
    #[inline]
    pub fn texel_size(mut self, texel_size: u32) -> Self {
        self.texel_size = texel_size.max(1);
        self
    }

    #[inline]
    pub fn subresource_count(&self) -> u32 {
        self.mip_level_count * self.array_layer_count
    }

    #[inline]
    pub fn whole_range(&self) -> GfxSubresourceRange {
        GfxSubresourceRange::whole(self.mip_level_count, self.array_layer_count)
    }

    /// `mip_level` 这一级的大小
    #[inline]
    pub fn mip_extent(&self, mip_level: u32) -> glam::UVec3 {
        let shrink = |v: u32| v.checked_shr(mip_level).unwrap_or(0).max(1);
        glam::UVec3::new(shrink(self.extent.x), shrink(self.extent.y), shrink(self.extent.z))
    }

    /// `mip_level` 这一级单个 layer 紧密排列时的字节数
    #[inline]
    pub fn mip_layer_size(&self, mip_level: u32) -> u64 {
        let extent = self.mip_extent(mip_level);
        extent.x as u64 * extent.y as u64 * extent.z as u64 * self.texel_size as u64
    }
}

/// 外部资源层创建的 texture，附带每个 subresource 的状态 tracker
pub struct GfxTexture<B: GfxBackend> {
    native: B::Texture,
    desc: GfxTextureDesc,
    tracker: GfxResourceStateTracker,
    name: String,
}

// new & init
impl<B: GfxBackend> GfxTexture<B> {
    pub fn from_native(
        native: B::Texture,
        desc: GfxTextureDesc,
        initial_state: GfxResourceState,
        name: impl Into<String>,
    ) -> Self {
        Self {
            native,
            desc,
            tracker: GfxResourceStateTracker::new(initial_state, desc.mip_level_count, desc.array_layer_count),
            name: name.into(),
        }
    }

    #[inline]
    pub fn into_native(self) -> B::Texture {
        self.native
    }
}

// getters
impl<B: GfxBackend> GfxTexture<B> {
    #[inline]
    pub fn native(&self) -> &B::Texture {
        &self.native
    }

    #[inline]
    pub fn desc(&self) -> &GfxTextureDesc {
        &self.desc
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state_tracker(&self) -> &GfxResourceStateTracker {
        &self.tracker
    }

    #[inline]
    pub fn state_tracker_mut(&mut self) -> &mut GfxResourceStateTracker {
        &mut self.tracker
    }

    #[inline]
    pub fn subresource_state(&self, mip_level: u32, array_layer: u32) -> Option<GfxResourceState> {
        let index = crate::resources::subresource::subresource_index(mip_level, array_layer, self.desc.mip_level_count);
        self.tracker.subresource_state(index).ok()
    }
}
