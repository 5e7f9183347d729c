use crate::collector::Collector;
use crate::garbage::{Bag, RetiredObject};
use crate::guard::Guard;
use crate::state::{Epoch, Global, Participant};
use crate::sync::{Cell, Ordering, fence};
use std::cell::RefCell;
use std::mem::ManuallyDrop;
use std::ptr;

/// A participating thread's local epoch state.
///
/// Lives on the heap so that `Guard`s can point at it. It is destroyed once
/// the last `LocalHandle` and the last `Guard` referring to it are gone.
///
/// 参与线程的本地纪元状态。
/// 分配在堆上，以便 `Guard` 可以指向它。当最后一个 `LocalHandle` 和最后一个 `Guard` 都消失时销毁。
pub(crate) struct Local {
    /// Registry entry owned by this thread while `Local` lives.
    participant: *const Participant,
    /// Keeps the global state (and thus `participant`) alive.
    collector: ManuallyDrop<Collector>,
    /// Retired objects not yet published to the global list.
    bag: RefCell<Bag>,
    /// The epoch of the previous pin, used to seal the bag when it changes.
    last_epoch: Cell<Epoch>,
    guard_count: Cell<usize>,
    handle_count: Cell<usize>,
    pin_count: Cell<usize>,
}

impl Local {
    /// Register a new participant with `collector`.
    pub(crate) fn register(collector: &Collector) -> LocalHandle {
        let (participant, reused) = collector.global.registry.acquire();
        let capacity = collector.global.config.bag_capacity;

        let local = Box::new(Local {
            participant,
            collector: ManuallyDrop::new(collector.clone()),
            bag: RefCell::new(Bag::with_capacity(capacity)),
            last_epoch: Cell::new(Epoch::starting()),
            guard_count: Cell::new(0),
            handle_count: Cell::new(1),
            pin_count: Cell::new(0),
        });

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                participant = ?(participant as *const Participant),
                reused,
                "participant registered"
            );
        }

        LocalHandle {
            local: Box::into_raw(local),
        }
    }

    #[inline]
    pub(crate) fn global(&self) -> &Global {
        &self.collector.global
    }

    #[inline]
    pub(crate) fn collector(&self) -> &Collector {
        &self.collector
    }

    #[inline]
    fn participant(&self) -> &Participant {
        // SAFETY: the entry lives as long as the registry, which `collector` keeps alive.
        unsafe { &*self.participant }
    }

    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        self.guard_count.get() > 0
    }

    /// Pin this participant to the current global epoch.
    ///
    /// Reentrant: only the outermost guard publishes the epoch.
    ///
    /// 将此参与者钉住到当前全局纪元。可重入：只有最外层的守卫会发布纪元。
    pub(crate) fn pin(&self) -> Guard {
        let guard = Guard {
            local: self as *const Local,
        };

        let guard_count = self.guard_count.get();
        self.guard_count.set(
            guard_count
                .checked_add(1)
                .unwrap_or_else(|| panic!("BUG: guard count overflow")),
        );

        if guard_count == 0 {
            let global_epoch = self.global().epoch.load(Ordering::Relaxed);
            self.participant()
                .epoch
                .store(global_epoch.pinned(), Ordering::Relaxed);
            // Publishing the pin must be ordered before any subsequent load
            // from a shared structure.
            fence(Ordering::SeqCst);

            if self.last_epoch.get() != global_epoch {
                self.last_epoch.set(global_epoch);
                self.flush_bag();
            }

            let pin_count = self.pin_count.get().wrapping_add(1);
            self.pin_count.set(pin_count);

            let config = &self.global().config;
            let periodic =
                config.pins_between_collect > 0 && pin_count % config.pins_between_collect == 0;
            let over_threshold = config
                .collect_threshold
                .is_some_and(|threshold| self.bag.borrow().len() > threshold);

            if over_threshold {
                self.flush_bag();
            }
            if periodic || over_threshold {
                self.try_collect();
            }
        }

        guard
    }

    /// Called by `Guard::drop`.
    pub(crate) fn unpin(&self) {
        let guard_count = self.guard_count.get();
        assert!(
            guard_count > 0,
            "BUG: Dropping a Guard in an unpinned state (guard_count = 0). \
             This indicates incorrect API usage or a library bug."
        );
        self.guard_count.set(guard_count - 1);

        if guard_count == 1 {
            self.participant()
                .epoch
                .store(Epoch::starting(), Ordering::Release);

            if self.handle_count.get() == 0 {
                self.finalize();
            }
        }
    }

    /// Called by `Guard::clone`.
    pub(crate) fn repin(&self) {
        let guard_count = self.guard_count.get();
        assert!(
            guard_count > 0,
            "BUG: Cloning a Guard in an unpinned state (guard_count = 0). \
             This indicates incorrect API usage or a library bug."
        );
        self.guard_count.set(guard_count + 1);
    }

    /// Add a retired object to the local bag, sealing the bag once it is full.
    pub(crate) fn defer(&self, object: RetiredObject) {
        let full = {
            let mut bag = self.bag.borrow_mut();
            bag.push(object);
            bag.len() >= self.global().config.bag_capacity
        };
        if full {
            self.flush_bag();
        }
    }

    /// Publish the local bag to the global garbage list.
    pub(crate) fn flush_bag(&self) {
        let capacity = self.global().config.bag_capacity;
        let bag = self.bag.replace(Bag::with_capacity(capacity));
        self.global().push_bag(bag);
    }

    /// Try to advance the global epoch; on success free expired garbage.
    pub(crate) fn try_collect(&self) -> bool {
        match self.global().try_advance() {
            Some(epoch) => {
                if tracing::enabled!(tracing::Level::TRACE) {
                    tracing::trace!(epoch = epoch.value(), "global epoch advanced");
                }
                self.global().collect(epoch);
                true
            }
            None => false,
        }
    }

    fn acquire_handle(&self) {
        self.handle_count.set(self.handle_count.get() + 1);
    }

    fn release_handle(&self) {
        let handle_count = self.handle_count.get();
        assert!(handle_count >= 1, "BUG: LocalHandle released twice");
        self.handle_count.set(handle_count - 1);

        if handle_count == 1 && self.guard_count.get() == 0 {
            self.finalize();
        }
    }

    /// Hand the remaining garbage to the global list, release the registry
    /// entry and free this `Local`.
    ///
    /// 将剩余垃圾交给全局链表，释放注册表项并释放此 `Local`。
    fn finalize(&self) {
        debug_assert_eq!(self.guard_count.get(), 0);
        debug_assert_eq!(self.handle_count.get(), 0);

        // Pretend a handle is still alive so dropping the guard below does not
        // call back into `finalize`.
        self.handle_count.set(1);
        {
            let guard = self.pin();
            self.flush_bag();
            self.try_collect();
            drop(guard);
        }
        self.handle_count.set(0);

        self.participant().release();

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                participant = ?self.participant,
                "participant deregistered"
            );
        }

        unsafe {
            // Take the collector out first: dropping it may free the registry
            // entry we just released.
            let collector: Collector = ptr::read(&*self.collector);
            drop(Box::from_raw(self as *const Local as *mut Local));
            drop(collector);
        }
    }
}

/// A handle to a registered participant.
///
/// Obtained from `Collector::register()`. It is `!Send` and `!Sync`: each
/// thread should register its own handle.
///
/// **Lifecycle**: dropping the handle while no guard is alive deregisters the
/// participant. Its pending garbage is moved to the collector and its registry
/// entry becomes available for the next thread.
///
/// 已注册参与者的句柄。
/// 通过 `Collector::register()` 获得。它是 `!Send` 和 `!Sync` 的：每个线程应注册自己的句柄。
/// **生命周期**：在没有存活守卫时 drop 句柄会注销参与者，其待回收垃圾被移交给回收器，
/// 注册表项可供下一个线程使用。
pub struct LocalHandle {
    local: *const Local,
}

impl LocalHandle {
    /// Pin the participant to the current epoch.
    ///
    /// **Reentrancy**: nested calls are allowed; the participant stays pinned
    /// until every returned guard is dropped.
    ///
    /// 将参与者钉住到当前纪元。
    /// **可重入性**：允许嵌套调用；参与者在所有返回的守卫被 drop 之前保持被钉住。
    #[inline]
    pub fn pin(&self) -> Guard {
        unsafe { (*self.local).pin() }
    }

    /// Returns `true` if the participant is currently pinned.
    /// 如果参与者当前被钉住，返回 `true`。
    #[inline]
    pub fn is_pinned(&self) -> bool {
        unsafe { (*self.local).is_pinned() }
    }

    /// The collector this handle is registered with.
    /// 此句柄所注册的回收器。
    #[inline]
    pub fn collector(&self) -> &Collector {
        unsafe { (*self.local).collector() }
    }
}

impl Clone for LocalHandle {
    fn clone(&self) -> Self {
        unsafe { (*self.local).acquire_handle() };
        LocalHandle { local: self.local }
    }
}

impl Drop for LocalHandle {
    #[inline]
    fn drop(&mut self) {
        unsafe { (*self.local).release_handle() }
    }
}

impl std::fmt::Debug for LocalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHandle")
            .field("pinned", &self.is_pinned())
            .finish()
    }
}
