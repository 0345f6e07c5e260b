//! 命令参数中用到的小型值类型

use crate::resources::subresource::GfxSubresourceRange;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GfxRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl GfxRect {
    #[inline]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxViewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl GfxViewport {
    /// 覆盖整个 rect，深度范围 [0, 1]
    pub fn from_rect(rect: GfxRect) -> Self {
        Self {
            x: rect.x as f32,
            y: rect.y as f32,
            width: rect.width as f32,
            height: rect.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxIndexFormat {
    Uint16,
    Uint32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GfxFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxAccelerationStructureCopyMode {
    Clone,
    Compact,
}

/// texture 到 texture 的拷贝区域
///
/// subresource 的 `mip_count` 必须为 1
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxTextureCopy {
    pub src_subresource: GfxSubresourceRange,
    pub src_offset: glam::UVec3,
    pub dst_subresource: GfxSubresourceRange,
    pub dst_offset: glam::UVec3,
    pub extent: glam::UVec3,
}

/// transient heap 到 texture 的拷贝区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxBufferTextureCopy {
    pub buffer_offset: u64,
    pub subresource: GfxSubresourceRange,
    pub texture_offset: glam::UVec3,
    pub extent: glam::UVec3,
}

/// blit 的源区域和目标区域，可以缩放
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxBlitRegion {
    pub src_subresource: GfxSubresourceRange,
    pub src_min: glam::UVec3,
    pub src_max: glam::UVec3,
    pub dst_subresource: GfxSubresourceRange,
    pub dst_min: glam::UVec3,
    pub dst_max: glam::UVec3,
}
