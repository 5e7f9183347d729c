use crate::collector::Collector;
use crate::garbage::RetiredObject;
use crate::local::Local;
use crate::ptr::Shared;
use std::ptr;

/// A guard that keeps the current participant pinned to an epoch.
///
/// Obtained from [`pin`](crate::pin) or [`LocalHandle::pin`](crate::LocalHandle::pin).
/// It is `!Send` and `!Sync`. While a `Guard` is held, no object retired in
/// the guard's epoch or later can be freed, and every `Shared` loaded through
/// it stays valid.
///
/// `Guard` supports cloning (increments the nesting count), allowing nested
/// pinning. The participant remains pinned until all clones are dropped.
///
/// 一个保持当前参与者被钉住到某个纪元的守卫。
/// 通过 [`pin`](crate::pin) 或 [`LocalHandle::pin`](crate::LocalHandle::pin) 获得。
/// 它是 `!Send` 和 `!Sync` 的。持有 `Guard` 期间，在其纪元及之后退休的对象都不会被释放，
/// 通过它加载的每个 `Shared` 都保持有效。
/// `Guard` 支持克隆（增加嵌套计数），参与者在所有克隆被 drop 之前保持被钉住。
#[must_use]
pub struct Guard {
    /// Null for the guard returned by `unprotected()`.
    pub(crate) local: *const Local,
}

impl Guard {
    /// Declare that `val` is no longer reachable from any shared structure
    /// and schedule its destruction for when sufficient epochs have passed.
    ///
    /// Under [`unprotected`] the value is destroyed immediately.
    ///
    /// # Safety
    /// - `val` must have been unlinked (e.g. by a successful CAS) so that no
    ///   thread pinning later can reach it.
    /// - It must be retired at most once.
    /// - Its destructor may run on any thread.
    ///
    /// 声明 `val` 已无法从任何共享结构到达，并安排在经过足够纪元后销毁它。
    /// 在 [`unprotected`] 下会立即销毁。
    pub unsafe fn unlinked<T>(&self, val: Shared<'_, T>) {
        let raw = val.as_raw() as *mut T;
        if self.local.is_null() {
            unsafe { drop(Box::from_raw(raw)) };
        } else {
            unsafe { (*self.local).defer(RetiredObject::new(raw)) };
        }
    }

    /// Attempt to advance the global epoch and reclaim expired garbage.
    ///
    /// Returns `true` if the epoch advanced. Returns `false`, with no side
    /// effects, if some pinned participant has not yet observed the current
    /// epoch (this includes the calling thread if the epoch moved since it
    /// pinned).
    ///
    /// 尝试推进全局纪元并回收过期垃圾。
    /// 纪元推进则返回 `true`；若某个被钉住的参与者尚未观察到当前纪元，则无副作用地返回 `false`。
    pub fn try_collect(&self) -> bool {
        if self.local.is_null() {
            return false;
        }
        unsafe { (*self.local).try_collect() }
    }

    /// Move the thread-local garbage into the global set of garbage, so that
    /// any participant's collection can free it.
    ///
    /// 将线程本地垃圾移入全局垃圾集合，使任何参与者的回收都能释放它。
    pub fn migrate_garbage(&self) {
        if !self.local.is_null() {
            unsafe { (*self.local).flush_bag() }
        }
    }

    /// The collector this guard pins, or `None` for [`unprotected`].
    pub fn collector(&self) -> Option<&Collector> {
        if self.local.is_null() {
            None
        } else {
            Some(unsafe { (*self.local).collector() })
        }
    }
}

impl Clone for Guard {
    #[inline]
    fn clone(&self) -> Self {
        if !self.local.is_null() {
            unsafe { (*self.local).repin() };
        }
        Guard { local: self.local }
    }
}

impl Drop for Guard {
    /// Releasing the outermost guard marks the participant unpinned.
    ///
    /// If every `LocalHandle` is already gone, this also deregisters the
    /// participant: its bag is migrated and a final `try_collect` may free
    /// expired garbage.
    ///
    /// 释放最外层守卫会将参与者标记为未钉住。
    /// 若所有 `LocalHandle` 都已 drop，还会注销参与者：迁移其垃圾袋，最后一次 `try_collect` 可能释放过期垃圾。
    #[inline]
    fn drop(&mut self) {
        if !self.local.is_null() {
            unsafe { (*self.local).unpin() }
        }
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad("Guard { .. }")
    }
}

/// Returns a reference to a dummy guard that allows unprotected access to
/// `Atomic`s.
///
/// Loading through it yields `Shared`s with a `'static` lifetime, and
/// `unlinked` destroys values immediately. Use it only where no other thread
/// can access the data, such as in `Drop` implementations.
///
/// # Safety
/// The caller must guarantee that nothing loaded through this guard is freed
/// by another thread while still in use.
///
/// 返回一个伪守卫的引用，允许无保护地访问 `Atomic`。
/// 仅在没有其他线程能访问数据的地方使用，例如 `Drop` 实现中。
#[inline]
pub unsafe fn unprotected() -> &'static Guard {
    struct GuardWrapper(Guard);
    unsafe impl Sync for GuardWrapper {}

    static UNPROTECTED: GuardWrapper = GuardWrapper(Guard {
        local: ptr::null(),
    });
    &UNPROTECTED.0
}
