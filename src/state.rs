use crate::garbage::{Bag, GlobalGarbage};
use crate::sync::{AtomicBool, AtomicPtr, AtomicUsize, Ordering, fence};
use std::boxed::Box;
use std::ptr;

/// Default local garbage count above which `pin()` attempts a collection.
/// 本地垃圾数量超过该值时，`pin()` 会尝试一次回收。
pub(crate) const DEFAULT_COLLECT_THRESHOLD: usize = 32;

/// Default number of pins between two periodic collection attempts.
/// 两次周期性回收尝试之间的默认 pin 次数。
pub(crate) const DEFAULT_PINS_BETWEEN_COLLECT: usize = 128;

/// Default capacity of a local garbage bag before it is sealed.
/// 本地垃圾袋被封存前的默认容量。
#[cfg(not(feature = "loom"))]
pub(crate) const DEFAULT_BAG_CAPACITY: usize = 64;
#[cfg(feature = "loom")]
pub(crate) const DEFAULT_BAG_CAPACITY: usize = 4;

/// Number of epoch advances a sealed bag must wait before it may be freed.
///
/// A pinned participant can witness at most one advance, so anything sealed
/// within one epoch of the current one may still be referenced.
///
/// 封存的垃圾袋在释放前必须等待的纪元推进次数。
/// 一个被钉住的参与者最多只能见证一次推进，因此距当前纪元一个纪元以内封存的对象仍可能被引用。
pub(crate) const GRACE_PERIOD: isize = 2;

/// An epoch value, possibly tagged as pinned.
///
/// The lowest bit is the "pinned" flag of a participant's copy; the global
/// epoch always has it cleared and advances in steps of two.
///
/// 一个纪元值，可能带有 pinned 标记。
/// 最低位是参与者副本的"被钉住"标记；全局纪元该位恒为 0，每次推进加 2。
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub(crate) struct Epoch {
    data: usize,
}

impl Epoch {
    #[inline]
    pub(crate) fn starting() -> Self {
        Self::default()
    }

    /// Signed distance `self - rhs` in epochs, ignoring the pinned bit.
    #[inline]
    pub(crate) fn wrapping_sub(self, rhs: Self) -> isize {
        (self.data.wrapping_sub(rhs.data & !1) as isize) >> 1
    }

    #[inline]
    pub(crate) fn is_pinned(self) -> bool {
        (self.data & 1) == 1
    }

    #[inline]
    pub(crate) fn pinned(self) -> Self {
        Epoch { data: self.data | 1 }
    }

    #[inline]
    pub(crate) fn unpinned(self) -> Self {
        Epoch { data: self.data & !1 }
    }

    #[inline]
    pub(crate) fn successor(self) -> Self {
        Epoch {
            data: self.data.wrapping_add(2),
        }
    }

    /// The logical epoch number, as exposed by `Collector::epoch`.
    #[inline]
    pub(crate) fn value(self) -> usize {
        self.data >> 1
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicEpoch {
    data: AtomicUsize,
}

impl AtomicEpoch {
    pub(crate) fn new(epoch: Epoch) -> Self {
        AtomicEpoch {
            data: AtomicUsize::new(epoch.data),
        }
    }

    #[inline]
    pub(crate) fn load(&self, ord: Ordering) -> Epoch {
        Epoch {
            data: self.data.load(ord),
        }
    }

    #[inline]
    pub(crate) fn store(&self, epoch: Epoch, ord: Ordering) {
        self.data.store(epoch.data, ord);
    }

    #[inline]
    pub(crate) fn compare_exchange(
        &self,
        current: Epoch,
        new: Epoch,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Epoch, Epoch> {
        self.data
            .compare_exchange(current.data, new.data, success, failure)
            .map(|data| Epoch { data })
            .map_err(|data| Epoch { data })
    }
}

/// A registry entry for one participating thread.
///
/// Only the owning thread writes `epoch`; every thread trying to advance the
/// global epoch reads it. Cache-aligned to prevent false sharing.
///
/// 一个参与线程的注册表项。
/// 只有所属线程写入 `epoch`；所有尝试推进全局纪元的线程都会读取它。缓存对齐以防止伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct Participant {
    /// The epoch the owner is pinned in, with the pinned bit as the active flag.
    /// 所属线程被钉住的纪元，pinned 位即活跃标记。
    pub(crate) epoch: AtomicEpoch,
    /// Set while a live `Local` owns this entry.
    /// 当有存活的 `Local` 持有此项时置位。
    in_use: AtomicBool,
    next: AtomicPtr<Participant>,
}

/// Insert-only lock-free list of participants.
///
/// Entries are never unlinked while the owning collector is alive. A released
/// entry is claimed again by the next registering thread instead.
///
/// 仅插入的无锁参与者链表。
/// 在所属回收器存活期间，表项永不被摘除；被释放的表项会被下一个注册的线程重新认领。
#[derive(Debug)]
pub(crate) struct Registry {
    head: AtomicPtr<Participant>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Claim a released entry, or push a fresh one.
    pub(crate) fn acquire(&self) -> (&Participant, bool) {
        for participant in self.iter() {
            if !participant.in_use.load(Ordering::Relaxed)
                && participant
                    .in_use
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return (participant, true);
            }
        }

        let node = Box::into_raw(Box::new(Participant {
            epoch: AtomicEpoch::new(Epoch::starting()),
            in_use: AtomicBool::new(true),
            next: AtomicPtr::new(ptr::null_mut()),
        }));

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `node` is not yet published, so we are its only user.
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                // SAFETY: entries live until the registry is dropped.
                Ok(_) => return (unsafe { &*node }, false),
                Err(current) => head = current,
            }
        }
    }

    pub(crate) fn iter(&self) -> RegistryIter<'_> {
        RegistryIter {
            next: self.head.load(Ordering::Acquire),
            _registry: self,
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            // SAFETY: we have exclusive access and every node came from `Box::into_raw`.
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next.load(Ordering::Relaxed);
        }
    }
}

pub(crate) struct RegistryIter<'a> {
    next: *mut Participant,
    _registry: &'a Registry,
}

impl<'a> Iterator for RegistryIter<'a> {
    type Item = &'a Participant;

    fn next(&mut self) -> Option<&'a Participant> {
        if self.next.is_null() {
            return None;
        }
        // SAFETY: nodes are never freed before the registry itself.
        let participant = unsafe { &*self.next };
        self.next = participant.next.load(Ordering::Acquire);
        Some(participant)
    }
}

impl Participant {
    /// Give this entry back to the registry.
    pub(crate) fn release(&self) {
        self.epoch.store(Epoch::starting(), Ordering::Release);
        self.in_use.store(false, Ordering::Release);
    }
}

/// Tunables shared by every participant of a collector.
/// 回收器所有参与者共享的可调参数。
#[derive(Debug, Clone, Copy)]
pub(crate) struct Config {
    pub(crate) collect_threshold: Option<usize>,
    pub(crate) pins_between_collect: usize,
    pub(crate) bag_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            collect_threshold: Some(DEFAULT_COLLECT_THRESHOLD),
            pins_between_collect: DEFAULT_PINS_BETWEEN_COLLECT,
            bag_capacity: DEFAULT_BAG_CAPACITY,
        }
    }
}

/// Global shared state of a collector.
///
/// Contains the global epoch, the participant registry and the global garbage
/// list. None of it is guarded by a lock.
///
/// 回收器的全局共享状态。
/// 包含全局纪元、参与者注册表和全局垃圾链表，均不受锁保护。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct Global {
    /// The global epoch counter.
    /// 全局纪元计数器。
    pub(crate) epoch: AtomicEpoch,
    pub(crate) registry: Registry,
    pub(crate) garbage: GlobalGarbage,
    pub(crate) config: Config,
}

impl Global {
    pub(crate) fn new(config: Config) -> Self {
        Global {
            epoch: AtomicEpoch::new(Epoch::starting()),
            registry: Registry::new(),
            garbage: GlobalGarbage::new(),
            config,
        }
    }

    /// Seal `bag` with the current global epoch and publish it.
    ///
    /// Every object in the bag was unlinked before this call, so tagging the
    /// bag with an epoch read afterwards is conservative.
    ///
    /// 用当前全局纪元封存 `bag` 并发布。
    /// 袋中所有对象在此调用前都已被摘除，因此用之后读到的纪元标记是保守的。
    pub(crate) fn push_bag(&self, bag: Bag) {
        if bag.is_empty() {
            return;
        }
        fence(Ordering::SeqCst);
        let epoch = self.epoch.load(Ordering::Relaxed);
        self.garbage.push(bag.seal(epoch));
    }

    /// Advance the global epoch if every pinned participant is pinned in it.
    ///
    /// Returns the new epoch on success. Returns `None` without side effects
    /// if some participant lags behind, or another thread advanced first.
    ///
    /// 如果所有被钉住的参与者都处于当前全局纪元，则推进全局纪元。
    /// 成功时返回新纪元；若有参与者落后或其他线程抢先推进，则无副作用地返回 `None`。
    #[cold]
    pub(crate) fn try_advance(&self) -> Option<Epoch> {
        let global_epoch = self.epoch.load(Ordering::Relaxed);
        fence(Ordering::SeqCst);

        for participant in self.registry.iter() {
            let local_epoch = participant.epoch.load(Ordering::Relaxed);
            if local_epoch.is_pinned() && local_epoch.unpinned() != global_epoch {
                return None;
            }
        }
        fence(Ordering::Acquire);

        let new_epoch = global_epoch.successor();
        self.epoch
            .compare_exchange(global_epoch, new_epoch, Ordering::Release, Ordering::Relaxed)
            .ok()
            .map(|_| new_epoch)
    }

    /// Free every global bag that is at least `GRACE_PERIOD` epochs old.
    pub(crate) fn collect(&self, current: Epoch) -> usize {
        let freed = self.garbage.collect(current);
        if freed > 0 && tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(epoch = current.value(), freed, "reclaimed expired garbage");
        }
        freed
    }
}
