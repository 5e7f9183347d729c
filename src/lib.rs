//! Epoch-based memory reclamation for lock-free data structures, with a few
//! collections built on it and scoped threads.
//!
//! # Overview
//!
//! Lock-free structures cannot free a node the moment it is unlinked, since
//! other threads may still be reading it. Every access therefore happens under
//! a [`Guard`] obtained by pinning the thread to the current global epoch.
//! Unlinked objects are handed to [`Guard::unlinked`] and destroyed only after
//! the global epoch has advanced twice past the point they were retired at,
//! which guarantees that no guard from that time is still alive.
//!
//! - [`pin`] pins on the process-wide collector; [`Collector`] and
//!   [`LocalHandle`] give the same for an isolated instance.
//! - [`Owned`], [`Shared`] and [`Atomic`] are the pointer types: a uniquely
//!   owned allocation, a guard-bound reference and an atomic slot.
//! - [`TreiberStack`], [`MsQueue`] and [`SegQueue`] are lock-free collections.
//! - [`scope`] spawns threads that can borrow from the enclosing stack frame.
//!
//! 面向无锁数据结构的基于纪元的内存回收，附带若干基于它构建的集合和作用域线程。
//!
//! # 概述
//!
//! 无锁结构不能在节点被摘除的瞬间释放它，因为其他线程可能仍在读取。因此每次访问都在一个
//! [`Guard`] 下进行，守卫通过将线程钉住到当前全局纪元获得。被摘除的对象交给 [`Guard::unlinked`]，
//! 只有在全局纪元从退休时刻起推进两次之后才会被销毁，这保证了那时的守卫都已不再存活。
//!
//! # Example
//!
//! ```
//! use mwmr_epoch::{Atomic, Owned, pin};
//! use std::sync::atomic::Ordering;
//!
//! let slot = Atomic::new(1);
//!
//! let guard = pin();
//! let old = slot.swap(Some(Owned::new(2)), Ordering::AcqRel, &guard);
//! if let Some(old) = old {
//!     assert_eq!(*old, 1);
//!     // Nobody can reach `old` through `slot` any more.
//!     unsafe { guard.unlinked(old) };
//! }
//! assert_eq!(slot.load(Ordering::Acquire, &guard).map(|v| *v), Some(2));
//! ```

mod collections;
mod collector;
mod garbage;
mod guard;
mod local;
mod ptr;
mod state;
mod sync;

#[cfg(not(feature = "loom"))]
mod default;
#[cfg(not(feature = "loom"))]
mod scope;

pub use collections::{MsQueue, SegQueue, TreiberStack};
pub use collector::{Collector, CollectorBuilder};
pub use guard::{Guard, unprotected};
pub use local::LocalHandle;
pub use ptr::{Atomic, Owned, Shared};

#[cfg(not(feature = "loom"))]
pub use default::{default_collector, is_pinned, pin};
#[cfg(not(feature = "loom"))]
pub use scope::{Scope, ScopeError, ScopedJoinHandle, scope, spawn_unsafe};

#[cfg(all(test, not(feature = "loom")))]
mod tests;
