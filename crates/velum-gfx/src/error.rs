use thiserror::Error;

use crate::commands::encoder::GfxPassKind;
use crate::resources::subresource::GfxSubresourceRange;

pub type GfxResult<T> = Result<T, GfxError>;

/// GFX 层的错误
///
/// - 前置条件违例：调用方的编程错误，不可恢复
/// - 后端调用失败：携带后端的错误码，不会自动重试
/// - 资源耗尽：按后端调用失败处理
/// - 设备丢失：在 `collect()` / `wait()` 时上报
#[derive(Debug, Error)]
pub enum GfxError {
    #[error("a {open:?} pass is already open on this encoder")]
    PassAlreadyOpen { open: GfxPassKind },

    #[error("cannot finish the encoder while a {open:?} pass is still open")]
    PassStillOpen { open: GfxPassKind },

    #[error("subresources in {range:?} are in different states, normalize them first")]
    MixedSubresourceStates { range: GfxSubresourceRange },

    #[error("subresource index {index} is out of range (count = {count})")]
    SubresourceOutOfRange { index: u32, count: u32 },

    #[error("fence value {requested} is not greater than the last signaled value {current}")]
    NonMonotonicFenceValue { requested: u64, current: u64 },

    #[error("retire with fence value {value} after a later value {last}")]
    NonMonotonicRetire { value: u64, last: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not supported by this backend: {0}")]
    UnsupportedOperation(&'static str),

    #[error("transient heap exhausted: requested {requested} bytes, {available} available")]
    TransientHeapExhausted { requested: u64, available: u64 },

    #[error("out of memory")]
    OutOfMemory,

    #[error("backend call `{call}` failed with code {code}")]
    Backend { call: &'static str, code: i32 },

    #[cfg(feature = "vulkan")]
    #[error("vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("device lost")]
    DeviceLost,
}

impl GfxError {
    #[inline]
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::DeviceLost => true,
            #[cfg(feature = "vulkan")]
            Self::Vulkan(result) => *result == ash::vk::Result::ERROR_DEVICE_LOST,
            _ => false,
        }
    }

    /// 是否为调用方的编程错误
    #[inline]
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            Self::PassAlreadyOpen { .. }
                | Self::PassStillOpen { .. }
                | Self::MixedSubresourceStates { .. }
                | Self::SubresourceOutOfRange { .. }
                | Self::NonMonotonicFenceValue { .. }
                | Self::NonMonotonicRetire { .. }
                | Self::InvalidArgument(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(GfxError::DeviceLost.is_device_lost());
        assert!(!GfxError::OutOfMemory.is_device_lost());
        assert!(GfxError::PassAlreadyOpen { open: GfxPassKind::Compute }.is_precondition_violation());
        assert!(!GfxError::Backend { call: "submit", code: -4 }.is_precondition_violation());
    }

    #[test]
    fn test_backend_error_carries_code() {
        let err = GfxError::Backend { call: "vkQueueSubmit2", code: -2 };
        assert_eq!(err.to_string(), "backend call `vkQueueSubmit2` failed with code -2");
    }
}
