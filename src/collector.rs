use crate::local::{Local, LocalHandle};
use crate::state::{
    Config, DEFAULT_BAG_CAPACITY, DEFAULT_COLLECT_THRESHOLD, DEFAULT_PINS_BETWEEN_COLLECT, Global,
};
use crate::sync::{Arc, Ordering};

/// Builder for configuring a `Collector`.
///
/// Use this builder to customize garbage collection behavior:
/// - `collect_threshold`: local garbage count above which `pin()` tries to collect
/// - `pins_between_collect`: how often `pin()` tries to collect regardless of garbage
/// - `bag_capacity`: how many retired objects a local bag holds before it is published
///
/// # Example
/// ```
/// use mwmr_epoch::Collector;
///
/// let collector = Collector::builder()
///     .collect_threshold(128)
///     .pins_between_collect(64)
///     .build();
/// ```
///
/// 用于配置 `Collector` 的构建器。
pub struct CollectorBuilder {
    collect_threshold: Option<usize>,
    pins_between_collect: usize,
    bag_capacity: usize,
}

impl CollectorBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            collect_threshold: Some(DEFAULT_COLLECT_THRESHOLD),
            pins_between_collect: DEFAULT_PINS_BETWEEN_COLLECT,
            bag_capacity: DEFAULT_BAG_CAPACITY,
        }
    }

    /// Set the local garbage threshold.
    ///
    /// When a participant pins while holding more than this many retired
    /// objects, it publishes them and calls `try_collect`.
    /// Pass `None` to disable threshold-triggered collection.
    ///
    /// Default: `Some(32)`
    ///
    /// 设置本地垃圾阈值。
    /// 当参与者 pin 时持有的已退休对象超过此数量，会发布它们并调用 `try_collect`。
    /// 传递 `None` 可禁用阈值触发的回收。
    #[inline]
    pub fn collect_threshold(mut self, threshold: impl Into<Option<usize>>) -> Self {
        self.collect_threshold = threshold.into();
        self
    }

    /// Set how many pins pass between two periodic `try_collect` calls.
    ///
    /// Set to `0` to disable periodic collection.
    ///
    /// Default: `128`
    ///
    /// 设置两次周期性 `try_collect` 调用之间的 pin 次数。设置为 `0` 可禁用周期性回收。
    #[inline]
    pub fn pins_between_collect(mut self, pins: usize) -> Self {
        self.pins_between_collect = pins;
        self
    }

    /// Set the capacity of a local garbage bag. `0` is treated as `1`.
    ///
    /// Default: `64`
    ///
    /// 设置本地垃圾袋的容量。`0` 视为 `1`。
    #[inline]
    pub fn bag_capacity(mut self, capacity: usize) -> Self {
        self.bag_capacity = capacity.max(1);
        self
    }

    /// Build the `Collector` with the configured settings.
    /// 使用配置的设置构建 `Collector`。
    #[inline]
    pub fn build(self) -> Collector {
        let config = Config {
            collect_threshold: self.collect_threshold,
            pins_between_collect: self.pins_between_collect,
            bag_capacity: self.bag_capacity,
        };
        Collector {
            global: Arc::new(Global::new(config)),
        }
    }
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An epoch-based garbage collector.
///
/// `Collector` owns:
/// - The global epoch counter.
/// - The registry of participants.
/// - The global list of garbage bags.
///
/// `Collector` is `Clone` and can be safely shared across threads; clones
/// refer to the same state. Most programs just use the process-wide collector
/// behind [`pin`](crate::pin). A dedicated collector keeps the garbage of one
/// set of structures separate from everything else.
///
/// **Typical Usage**:
/// ```
/// use mwmr_epoch::Collector;
///
/// let collector = Collector::new();
///
/// // Each thread registers once and pins around every access.
/// let handle = collector.register();
/// let guard = handle.pin();
/// assert!(handle.is_pinned());
/// drop(guard);
/// ```
///
/// 基于纪元的垃圾回收器。
/// `Collector` 拥有：全局纪元计数器、参与者注册表、全局垃圾袋链表。
/// `Collector` 是 `Clone` 的，可以安全地在线程间共享；克隆指向同一状态。
#[derive(Clone)]
pub struct Collector {
    pub(crate) global: Arc<Global>,
}

impl Collector {
    /// Create a new collector with default settings.
    /// 创建一个带有默认设置的新回收器。
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring a collector.
    /// 创建一个用于配置回收器的构建器。
    #[inline]
    pub fn builder() -> CollectorBuilder {
        CollectorBuilder::new()
    }

    /// Register a new participant for the current thread.
    ///
    /// The returned `LocalHandle` should be kept by one thread.
    ///
    /// 为当前线程注册一个新的参与者。返回的 `LocalHandle` 应由一个线程持有。
    #[inline]
    pub fn register(&self) -> LocalHandle {
        Local::register(self)
    }

    /// The current logical global epoch.
    ///
    /// Only useful for diagnostics: it may advance right after being read.
    ///
    /// 当前逻辑全局纪元。仅用于诊断：读取后可能立即推进。
    #[inline]
    pub fn epoch(&self) -> usize {
        self.global.epoch.load(Ordering::Acquire).value()
    }

    #[cfg(test)]
    pub(crate) fn pending_garbage(&self) -> usize {
        self.global.garbage.pending()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Collector {
    /// Two collectors are equal if they share the same state.
    fn eq(&self, rhs: &Collector) -> bool {
        Arc::ptr_eq(&self.global, &rhs.global)
    }
}

impl Eq for Collector {}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("epoch", &self.epoch())
            .finish()
    }
}
