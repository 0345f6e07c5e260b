use parking_lot::{Condvar, Mutex};

/// CPU 上模拟的 timeline fence
pub struct NullFenceState {
    id: u64,
    name: String,
    shared: bool,
    completed: Mutex<u64>,
    cond: Condvar,
}

impl NullFenceState {
    pub(crate) fn new(id: u64, initial_value: u64, shared: bool, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            shared,
            completed: Mutex::new(initial_value),
            cond: Condvar::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    #[inline]
    pub fn completed(&self) -> u64 {
        *self.completed.lock()
    }

    /// 完成值只增不减
    pub(crate) fn signal(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
        }
        self.cond.notify_all();
    }

    /// 唤醒所有等待者，用于设备丢失
    pub(crate) fn wake_all(&self) {
        let _completed = self.completed.lock();
        self.cond.notify_all();
    }

    /// 阻塞直到完成到 `value`，`is_lost` 返回 true 时提前返回 false
    pub(crate) fn wait(&self, value: u64, is_lost: impl Fn() -> bool) -> bool {
        let mut completed = self.completed.lock();
        loop {
            if *completed >= value {
                return true;
            }
            if is_lost() {
                return false;
            }
            self.cond.wait(&mut completed);
        }
    }
}
