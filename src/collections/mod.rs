//! Lock-free collections reclaimed through epochs.
//!
//! Each collection offers `push`/`pop` pinned on the default collector, and
//! `push_with`/`pop_with` for callers that pin through their own `Collector`.
//! Every guard used with one instance must come from the same collector.
//!
//! 基于纪元回收的无锁集合。
//! 每个集合都提供在默认回收器上 pin 的 `push`/`pop`，以及供通过自定义 `Collector` pin 的调用者使用的
//! `push_with`/`pop_with`。同一实例使用的所有守卫必须来自同一个回收器。

mod ms_queue;
mod seg_queue;
mod stack;

pub use ms_queue::MsQueue;
pub use seg_queue::SegQueue;
pub use stack::TreiberStack;
