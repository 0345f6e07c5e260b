use serde::{Deserialize, Serialize};

/// texture 中连续的一段 subresource
///
/// subresource 的线性索引为 `mip_level + array_layer * mip_level_count`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GfxSubresourceRange {
    pub mip_level: u32,
    pub mip_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl Default for GfxSubresourceRange {
    fn default() -> Self {
        Self::single(0, 0)
    }
}

// new & init
impl GfxSubresourceRange {
    #[inline]
    pub const fn new(mip_level: u32, mip_count: u32, base_array_layer: u32, layer_count: u32) -> Self {
        Self {
            mip_level,
            mip_count,
            base_array_layer,
            layer_count,
        }
    }

    /// 单个 mip × 单个 layer
    #[inline]
    pub const fn single(mip_level: u32, array_layer: u32) -> Self {
        Self::new(mip_level, 1, array_layer, 1)
    }

    /// 覆盖整个 texture
    #[inline]
    pub const fn whole(mip_level_count: u32, array_layer_count: u32) -> Self {
        Self::new(0, mip_level_count, 0, array_layer_count)
    }
}

// tools
impl GfxSubresourceRange {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mip_count == 0 || self.layer_count == 0
    }

    /// 是否完全落在 `mip_level_count × array_layer_count` 的 texture 内
    #[inline]
    pub fn fits(&self, mip_level_count: u32, array_layer_count: u32) -> bool {
        self.mip_level.checked_add(self.mip_count).is_some_and(|end| end <= mip_level_count)
            && self.base_array_layer.checked_add(self.layer_count).is_some_and(|end| end <= array_layer_count)
    }

    /// 是否覆盖整个 texture
    #[inline]
    pub fn covers(&self, mip_level_count: u32, array_layer_count: u32) -> bool {
        *self == Self::whole(mip_level_count, array_layer_count)
    }

    /// 两个 range 是否包含同一个 subresource
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        let disjoint = |a: u32, a_count: u32, b: u32, b_count: u32| {
            a.saturating_add(a_count) <= b || b.saturating_add(b_count) <= a
        };
        !self.is_empty()
            && !other.is_empty()
            && !disjoint(self.mip_level, self.mip_count, other.mip_level, other.mip_count)
            && !disjoint(self.base_array_layer, self.layer_count, other.base_array_layer, other.layer_count)
    }

    /// 按 layer 优先的顺序遍历范围内所有 subresource 的线性索引
    pub fn indices(&self, mip_level_count: u32) -> impl Iterator<Item = u32> + '_ {
        (self.base_array_layer..self.base_array_layer + self.layer_count).flat_map(move |layer| {
            (self.mip_level..self.mip_level + self.mip_count)
                .map(move |mip| subresource_index(mip, layer, mip_level_count))
        })
    }
}

/// subresource 的线性索引
#[inline]
pub const fn subresource_index(mip_level: u32, array_layer: u32, mip_level_count: u32) -> u32 {
    mip_level + array_layer * mip_level_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_cover_range() {
        // 3 个 mip，范围是 mip 1..3，layer 1..2
        let range = GfxSubresourceRange::new(1, 2, 1, 1);
        let indices: Vec<u32> = range.indices(3).collect();
        assert_eq!(indices, vec![4, 5]);
    }

    #[test]
    fn test_fits_and_covers() {
        let whole = GfxSubresourceRange::whole(4, 2);
        assert!(whole.fits(4, 2));
        assert!(whole.covers(4, 2));
        assert!(!GfxSubresourceRange::new(3, 2, 0, 1).fits(4, 2));
        assert!(!GfxSubresourceRange::new(0, 1, u32::MAX, 2).fits(4, 2));
        assert!(!GfxSubresourceRange::single(0, 0).covers(4, 2));
    }

    #[test]
    fn test_overlaps() {
        let mip0 = GfxSubresourceRange::new(0, 1, 0, 2);
        assert!(!mip0.overlaps(&GfxSubresourceRange::new(1, 1, 0, 2)));
        assert!(mip0.overlaps(&GfxSubresourceRange::single(0, 1)));
        // 同一个 mip 的不同 layer
        assert!(!GfxSubresourceRange::single(2, 0).overlaps(&GfxSubresourceRange::single(2, 1)));
        assert!(GfxSubresourceRange::whole(4, 2).overlaps(&GfxSubresourceRange::single(3, 1)));
    }
}
