//! 延迟释放队列
//!
//! 对象入队时携带一个 fence 值，只有设备完成到该值之后才会被释放。
//! 入队的值单调不减，所以队头总是最早可以释放的对象，回收时只需要弹出前缀。

use std::collections::VecDeque;

use crate::error::{GfxError, GfxResult};

pub struct GfxDeferredReleaseQueue<T> {
    /// (object, fence value)
    entries: VecDeque<(T, u64)>,
}

impl<T> Default for GfxDeferredReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<T> GfxDeferredReleaseQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

// getters
impl<T> GfxDeferredReleaseQueue<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 队头（最早可释放）对象的 fence 值
    #[inline]
    pub fn front_value(&self) -> Option<u64> {
        self.entries.front().map(|(_, value)| *value)
    }

    #[inline]
    pub fn back_value(&self) -> Option<u64> {
        self.entries.back().map(|(_, value)| *value)
    }
}

// tools
impl<T> GfxDeferredReleaseQueue<T> {
    /// 入队，`fence_value` 不能小于队尾的值
    pub fn push(&mut self, object: T, fence_value: u64) -> GfxResult<()> {
        match self.back_value() {
            Some(last) if fence_value < last => {
                return Err(GfxError::NonMonotonicRetire {
                    value: fence_value,
                    last,
                });
            }
            _ => {}
        }
        self.entries.push_back((object, fence_value));
        Ok(())
    }

    /// 按入队顺序释放所有 `fence_value <= completed_value` 的对象
    ///
    /// # return
    /// 释放的数量
    pub fn drain(&mut self, completed_value: u64, mut release: impl FnMut(T)) -> usize {
        let mut released = 0;
        while self.front_value().is_some_and(|value| value <= completed_value) {
            if let Some((object, _)) = self.entries.pop_front() {
                release(object);
                released += 1;
            }
        }
        released
    }

    /// 无条件释放所有对象，只在设备 idle 之后调用
    pub fn drain_all(&mut self, release: impl FnMut(T)) -> usize {
        let count = self.entries.len();
        self.entries.drain(..).map(|(object, _)| object).for_each(release);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_releases_prefix_in_push_order() {
        let mut queue = GfxDeferredReleaseQueue::new();
        queue.push("A", 3).unwrap();
        queue.push("B", 5).unwrap();
        queue.push("C", 5).unwrap();

        let mut released = Vec::new();
        assert_eq!(queue.drain(4, |o| released.push(o)), 1);
        assert_eq!(released, vec!["A"]);

        assert_eq!(queue.drain(5, |o| released.push(o)), 2);
        assert_eq!(released, vec!["A", "B", "C"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_nothing_released_before_completion() {
        let mut queue = GfxDeferredReleaseQueue::new();
        queue.push(1, 2).unwrap();
        assert_eq!(queue.drain(1, |_| panic!("released too early")), 0);
        assert_eq!(queue.front_value(), Some(2));
    }

    #[test]
    fn test_push_rejects_decreasing_value() {
        let mut queue = GfxDeferredReleaseQueue::new();
        queue.push((), 7).unwrap();
        assert!(matches!(queue.push((), 6), Err(GfxError::NonMonotonicRetire { value: 6, last: 7 })));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_all_ignores_values() {
        let mut queue = GfxDeferredReleaseQueue::new();
        queue.push(1, 10).unwrap();
        queue.push(2, 20).unwrap();
        let mut released = Vec::new();
        assert_eq!(queue.drain_all(|o| released.push(o)), 2);
        assert_eq!(released, vec![1, 2]);
    }
}
