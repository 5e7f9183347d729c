use crate::guard::{Guard, unprotected};
use crate::ptr::{Atomic, Owned, Shared};
use crate::sync::{self, AtomicBool, AtomicUsize, Ordering};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

/// Number of slots in each segment.
/// 每个段中的槽位数量。
const SEG_SIZE: usize = 32;

/// Segmented lock-free FIFO queue.
///
/// Elements live in fixed-size segments linked into a list. Pushers claim a
/// slot by bumping the tail segment's `high` index and poppers claim one by
/// bumping the head segment's `low` index, so most operations are a single
/// atomic increment. A segment is retired once its last slot is consumed.
///
/// ```
/// use mwmr_epoch::SegQueue;
///
/// let queue = SegQueue::new();
/// for i in 0..100 {
///     queue.push(i);
/// }
/// assert_eq!(queue.pop(), Some(0));
/// assert_eq!(queue.pop(), Some(1));
/// ```
///
/// 分段无锁先进先出队列。
/// 元素存放在链接成链表的定长段中。入队者通过递增尾段的 `high` 索引认领槽位，
/// 出队者通过递增头段的 `low` 索引认领槽位，因此大多数操作只是一次原子递增。段的最后一个槽位被消费后即被退休。
pub struct SegQueue<T> {
    head: Atomic<Segment<T>>,
    tail: Atomic<Segment<T>>,
}

struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    /// Set once `value` has been written.
    ready: AtomicBool,
}

struct Segment<T> {
    /// Next slot to pop.
    low: AtomicUsize,
    slots: [Slot<T>; SEG_SIZE],
    /// Next slot to push. May run past `SEG_SIZE` while pushers race.
    high: AtomicUsize,
    next: Atomic<Segment<T>>,
}

impl<T> Segment<T> {
    fn new() -> Segment<T> {
        Segment {
            low: AtomicUsize::new(0),
            slots: std::array::from_fn(|_| Slot {
                value: UnsafeCell::new(MaybeUninit::uninit()),
                ready: AtomicBool::new(false),
            }),
            high: AtomicUsize::new(0),
            next: Atomic::null(),
        }
    }
}

unsafe impl<T: Send> Send for SegQueue<T> {}
unsafe impl<T: Send> Sync for SegQueue<T> {}

#[inline]
fn load_end<'g, T>(end: &Atomic<Segment<T>>, guard: &'g Guard) -> Shared<'g, Segment<T>> {
    match end.load(Ordering::Acquire, guard) {
        Some(segment) => segment,
        None => unreachable!("queue ends always point at a segment"),
    }
}

impl<T> SegQueue<T> {
    /// Create a new, empty queue.
    /// 创建一个新的空队列。
    pub fn new() -> SegQueue<T> {
        let queue = SegQueue {
            head: Atomic::null(),
            tail: Atomic::null(),
        };
        unsafe {
            // Not shared with anyone yet.
            let guard = unprotected();
            let first = queue
                .head
                .store_and_ref(Owned::new(Segment::new()), Ordering::Relaxed, guard);
            queue.tail.store_shared(Some(first), Ordering::Relaxed);
        }
        queue
    }

    /// Add `t` to the back of the queue.
    ///
    /// # Safety
    /// Every guard ever used with this queue must come from the same collector.
    pub unsafe fn push_with(&self, t: T, guard: &Guard) {
        loop {
            let tail = load_end(&self.tail, guard);
            if tail.high.load(Ordering::Relaxed) >= SEG_SIZE {
                self.advance_tail(tail, guard);
                continue;
            }

            let i = tail.high.fetch_add(1, Ordering::Relaxed);
            if i < SEG_SIZE {
                let slot = &tail.slots[i];
                // SAFETY: index `i` was handed to this thread alone by `fetch_add`.
                unsafe { (*slot.value.get()).write(t) };
                slot.ready.store(true, Ordering::Release);

                if i + 1 == SEG_SIZE {
                    self.advance_tail(tail, guard);
                }
                return;
            }

            self.advance_tail(tail, guard);
        }
    }

    /// Make sure a successor of the full segment `tail` exists and swing
    /// `self.tail` to it.
    fn advance_tail<'g>(&self, tail: Shared<'g, Segment<T>>, guard: &'g Guard) {
        let next = match tail.next.load(Ordering::Acquire, guard) {
            Some(next) => next,
            None => match tail
                .next
                .cas_and_ref(None, Owned::new(Segment::new()), Ordering::Release, guard)
            {
                Ok(next) => next,
                // Lost the race; our spare segment is dropped here.
                Err(_) => match tail.next.load(Ordering::Acquire, guard) {
                    Some(next) => next,
                    None => unreachable!("a successor segment was just linked"),
                },
            },
        };
        self.tail.cas_shared(Some(tail), Some(next), Ordering::Release);
    }

    /// Attempt to take the front element of the queue.
    ///
    /// Returns `None` if the queue was observed empty.
    ///
    /// # Safety
    /// Every guard ever used with this queue must come from the same collector.
    pub unsafe fn pop_with(&self, guard: &Guard) -> Option<T> {
        loop {
            let head = load_end(&self.head, guard);

            loop {
                let low = head.low.load(Ordering::Relaxed);
                if low >= head.high.load(Ordering::Relaxed).min(SEG_SIZE) {
                    break;
                }
                if head
                    .low
                    .compare_exchange_weak(low, low + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let slot = &head.slots[low];
                    // The pusher owning this slot may not have finished writing.
                    while !slot.ready.load(Ordering::Acquire) {
                        sync::spin_loop();
                    }
                    // SAFETY: index `low` was handed to this thread alone, and `ready` is set.
                    let value = unsafe { (*slot.value.get()).assume_init_read() };

                    if low + 1 == SEG_SIZE {
                        self.retire_head(head, guard);
                    }
                    return Some(value);
                }
            }

            if head.next.load(Ordering::Acquire, guard).is_none() {
                return None;
            }
            // The head segment is drained; whoever took its last slot is
            // about to replace it.
            sync::spin_loop();
        }
    }

    /// Unlink the drained segment `head`. Only the popper of its last slot
    /// calls this.
    fn retire_head<'g>(&self, head: Shared<'g, Segment<T>>, guard: &'g Guard) {
        // The pusher of the last slot links a successor right after filling it.
        let next = loop {
            if let Some(next) = head.next.load(Ordering::Acquire, guard) {
                break next;
            }
            sync::spin_loop();
        };

        self.tail.cas_shared(Some(head), Some(next), Ordering::Release);
        self.head.store_shared(Some(next), Ordering::Release);
        unsafe { guard.unlinked(head) };
    }

    /// Returns `true` if the queue was observed empty.
    pub fn is_empty_with(&self, guard: &Guard) -> bool {
        let mut segment = load_end(&self.head, guard);
        loop {
            let low = segment.low.load(Ordering::Acquire);
            let high = segment.high.load(Ordering::Acquire).min(SEG_SIZE);
            if low < high {
                return false;
            }
            if high < SEG_SIZE {
                return true;
            }
            match segment.next.load(Ordering::Acquire, guard) {
                Some(next) => segment = next,
                None => return true,
            }
        }
    }
}

#[cfg(not(feature = "loom"))]
impl<T> SegQueue<T> {
    /// Add `t` to the back of the queue.
    /// 将 `t` 加入队尾。
    pub fn push(&self, t: T) {
        let guard = crate::pin();
        unsafe { self.push_with(t, &guard) }
    }

    /// Attempt to take the front element of the queue.
    /// 尝试取出队首元素。
    pub fn pop(&self) -> Option<T> {
        let guard = crate::pin();
        unsafe { self.pop_with(&guard) }
    }

    /// Returns `true` if the queue was observed empty.
    /// 如果观察到队列为空，返回 `true`。
    pub fn is_empty(&self) -> bool {
        self.is_empty_with(&crate::pin())
    }
}

impl<T> Default for SegQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SegQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();
            let mut cur = self.head.load(Ordering::Relaxed, guard);
            while let Some(segment) = cur {
                cur = segment.next.load(Ordering::Relaxed, guard);
                let mut owned = Owned::from_raw(segment.as_raw() as *mut Segment<T>);
                let high = owned.high.load(Ordering::Relaxed).min(SEG_SIZE);
                let low = owned.low.load(Ordering::Relaxed).min(high);
                for slot in &mut owned.slots[low..high] {
                    slot.value.get_mut().assume_init_drop();
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for SegQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad("SegQueue { .. }")
    }
}
