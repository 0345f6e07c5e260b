//! 进程内存活 device 的注册表
//!
//! 注册表只持有 device 的弱引用，不延长 device 的生命周期；device 通过 [`GfxDeviceId`]
//! 记住自己的位置。注册表由应用创建并传递，`shutdown_all` 按注册的逆序关闭 device。

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::error::GfxResult;

new_key_type! {
    /// 注册表中 device 的句柄
    pub struct GfxDeviceId;
}

/// 注册表批量关闭 device 时使用的接口
pub trait GfxDeviceLifecycle: Send + Sync {
    fn device_name(&self) -> &str;

    /// 等待所有已提交的工作完成，并回收所有可以回收的资源
    fn shutdown(&self) -> GfxResult<()>;

    fn on_registered(&self, _id: GfxDeviceId) {}
}

#[derive(Default)]
struct GfxRegistryInner {
    devices: SlotMap<GfxDeviceId, Weak<dyn GfxDeviceLifecycle>>,
    /// 注册顺序
    order: Vec<GfxDeviceId>,
}

#[derive(Default)]
pub struct GfxDeviceRegistry {
    inner: Mutex<GfxRegistryInner>,
}

// new & init
impl GfxDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

// register
impl GfxDeviceRegistry {
    pub fn register<D: GfxDeviceLifecycle + 'static>(&self, device: &Arc<D>) -> GfxDeviceId {
        let weak = Arc::downgrade(device);
        let weak: Weak<dyn GfxDeviceLifecycle> = weak;
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.devices.insert(weak);
            inner.order.push(id);
            id
        };
        log::info!("register device <{}>", device.device_name());
        device.on_registered(id);
        id
    }

    /// # return
    /// 该 id 是否在注册表中
    pub fn unregister(&self, id: GfxDeviceId) -> bool {
        let mut inner = self.inner.lock();
        inner.order.retain(|other| *other != id);
        inner.devices.remove(id).is_some()
    }
}

// getters
impl GfxDeviceRegistry {
    /// 仍然存活的 device 数量
    pub fn live_count(&self) -> usize {
        self.inner.lock().devices.values().filter(|weak| weak.strong_count() > 0).count()
    }

    #[inline]
    pub fn contains(&self, id: GfxDeviceId) -> bool {
        self.inner.lock().devices.contains_key(id)
    }
}

// tools
impl GfxDeviceRegistry {
    /// 按注册的逆序关闭所有仍然存活的 device，然后清空注册表
    ///
    /// 某个 device 关闭失败时继续关闭其余 device，最后返回第一个错误
    ///
    /// # return
    /// 关闭的 device 数量
    pub fn shutdown_all(&self) -> GfxResult<usize> {
        // 在锁外调用 shutdown，device 的回调可以再次访问注册表
        let devices = {
            let mut inner = self.inner.lock();
            let order = std::mem::take(&mut inner.order);
            let devices = order.iter().rev().filter_map(|id| inner.devices.get(*id)).filter_map(Weak::upgrade).collect::<Vec<_>>();
            inner.devices.clear();
            devices
        };

        let mut first_error = None;
        for device in &devices {
            log::info!("shutdown device <{}>", device.device_name());
            if let Err(e) = device.shutdown() {
                log::error!("failed to shutdown device <{}>: {}", device.device_name(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(devices.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GfxError;

    struct FakeDevice {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
        id: Mutex<Option<GfxDeviceId>>,
    }

    impl FakeDevice {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                fail,
                id: Mutex::new(None),
            })
        }
    }

    impl GfxDeviceLifecycle for FakeDevice {
        fn device_name(&self) -> &str {
            &self.name
        }

        fn shutdown(&self) -> GfxResult<()> {
            self.log.lock().push(self.name.clone());
            if self.fail { Err(GfxError::DeviceLost) } else { Ok(()) }
        }

        fn on_registered(&self, id: GfxDeviceId) {
            *self.id.lock() = Some(id);
        }
    }

    #[test]
    fn test_shutdown_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = GfxDeviceRegistry::new();
        let a = FakeDevice::new("a", &log, false);
        let b = FakeDevice::new("b", &log, false);
        let c = FakeDevice::new("c", &log, false);
        for device in [&a, &b, &c] {
            registry.register(device);
        }
        assert_eq!(*b.id.lock(), Some(registry.inner.lock().order[1]));

        assert_eq!(registry.shutdown_all().unwrap(), 3);
        assert_eq!(*log.lock(), vec!["c", "b", "a"]);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_dropped_device_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = GfxDeviceRegistry::new();
        let a = FakeDevice::new("a", &log, false);
        let b = FakeDevice::new("b", &log, false);
        registry.register(&a);
        registry.register(&b);
        drop(b);
        assert_eq!(registry.live_count(), 1);

        assert_eq!(registry.shutdown_all().unwrap(), 1);
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn test_failure_does_not_stop_shutdown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = GfxDeviceRegistry::new();
        let a = FakeDevice::new("a", &log, false);
        let b = FakeDevice::new("b", &log, true);
        registry.register(&a);
        let id = registry.register(&b);
        assert!(registry.contains(id));

        assert!(matches!(registry.shutdown_all(), Err(GfxError::DeviceLost)));
        assert_eq!(*log.lock(), vec!["b", "a"]);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_unregister() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = GfxDeviceRegistry::new();
        let a = FakeDevice::new("a", &log, false);
        let id = registry.register(&a);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert_eq!(registry.shutdown_all().unwrap(), 0);
    }
}
