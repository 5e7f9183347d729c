mod collection_tests;

use crate::{Atomic, Collector, unprotected};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// 一个在 drop 时计数的负载
#[derive(Debug)]
pub(crate) struct DropCounter {
    pub(crate) value: usize,
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    pub(crate) fn new(value: usize, drops: &Arc<AtomicUsize>) -> Self {
        DropCounter {
            value,
            drops: Arc::clone(drops),
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

const LIVE: u64 = 0x600D_CAFE_F00D_BEEF;
const DEAD: u64 = 0xDEAD_DEAD_DEAD_DEAD;

/// 在 drop 时自我毒化的负载，用于检测释放后读取
/// drop 时断言仍然存活，然后写入死亡标记；每次读取都通过 `check` 断言存活
#[derive(Debug)]
pub(crate) struct Canary {
    tag: AtomicU64,
    pub(crate) value: usize,
}

impl Canary {
    pub(crate) fn new(value: usize) -> Self {
        Canary {
            tag: AtomicU64::new(LIVE),
            value,
        }
    }

    /// 断言负载尚未被释放，返回其值
    pub(crate) fn check(&self) -> usize {
        let tag = self.tag.load(Ordering::SeqCst);
        assert_eq!(tag, LIVE, "read a freed value (tag = {tag:#x})");
        self.value
    }
}

impl Drop for Canary {
    fn drop(&mut self) {
        let tag = self.tag.swap(DEAD, Ordering::SeqCst);
        assert_eq!(tag, LIVE, "value dropped twice (tag = {tag:#x})");
    }
}

/// 只在显式调用 `try_collect` 时回收的回收器，便于确定性地观察纪元
pub(crate) fn manual_collector() -> Collector {
    Collector::builder()
        .collect_threshold(None)
        .pins_between_collect(0)
        .build()
}

/// 在测试结束时释放槽中剩余的值
pub(crate) fn drain<T>(atomic: &Atomic<T>) {
    unsafe {
        let guard = unprotected();
        if let Some(old) = atomic.swap(None, Ordering::Relaxed, guard) {
            guard.unlinked(old);
        }
    }
}
