//! The process-wide collector.
//!
//! Every thread lazily registers a handle with it on first use, and that
//! handle is dropped (deregistering the participant) when the thread exits.

use crate::collector::Collector;
use crate::guard::Guard;
use crate::local::LocalHandle;
use std::sync::OnceLock;

static COLLECTOR: OnceLock<Collector> = OnceLock::new();

thread_local! {
    static HANDLE: LocalHandle = default_collector().register();
}

/// Returns the process-wide collector used by [`pin`].
/// 返回 [`pin`] 使用的进程级回收器。
#[inline]
pub fn default_collector() -> &'static Collector {
    COLLECTOR.get_or_init(Collector::new)
}

/// Pin the current thread to the current epoch of the default collector.
///
/// Threads generally pin before interacting with a lock-free data structure.
/// Pinning is reentrant: nested guards are cheap and only the outermost one
/// publishes the epoch, so pinning once around a batch of operations is fine.
///
/// 将当前线程钉住到默认回收器的当前纪元。
/// 线程通常在访问无锁数据结构前 pin。pin 是可重入的：嵌套守卫代价很低，只有最外层的会发布纪元。
#[inline]
pub fn pin() -> Guard {
    with_handle(|handle| handle.pin())
}

/// Returns `true` if the current thread is pinned by the default collector.
/// 如果当前线程被默认回收器钉住，返回 `true`。
#[inline]
pub fn is_pinned() -> bool {
    with_handle(|handle| handle.is_pinned())
}

#[inline]
fn with_handle<F, R>(mut f: F) -> R
where
    F: FnMut(&LocalHandle) -> R,
{
    // During thread teardown the thread-local may already be gone; fall back
    // to a temporary registration.
    HANDLE
        .try_with(|handle| f(handle))
        .unwrap_or_else(|_| f(&default_collector().register()))
}
