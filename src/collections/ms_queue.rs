use crate::guard::{Guard, unprotected};
use crate::ptr::{Atomic, Owned, Shared};
use crate::sync::Ordering;
use std::mem::MaybeUninit;
use std::ptr;

/// Michael-Scott lock-free FIFO queue.
///
/// `head` always points at a sentinel node whose payload has already been
/// taken (or never existed); the front element lives in the sentinel's
/// successor. `tail` points at the last or second-to-last node and never
/// lags behind `head`.
///
/// Michael-Scott 无锁先进先出队列。
/// `head` 始终指向一个哨兵节点，其负载已被取走（或从未存在）；队首元素位于哨兵的后继节点中。
/// `tail` 指向最后一个或倒数第二个节点，且永远不会落后于 `head`。
pub struct MsQueue<T> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
}

struct Node<T> {
    /// Initialized for every node after the sentinel.
    data: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

unsafe impl<T: Send> Send for MsQueue<T> {}
unsafe impl<T: Send> Sync for MsQueue<T> {}

#[inline]
fn load_end<'g, T>(end: &Atomic<Node<T>>, guard: &'g Guard) -> Shared<'g, Node<T>> {
    match end.load(Ordering::Acquire, guard) {
        Some(node) => node,
        None => unreachable!("queue ends always point at a node"),
    }
}

impl<T> MsQueue<T> {
    /// Create a new, empty queue.
    /// 创建一个新的空队列。
    pub fn new() -> MsQueue<T> {
        let queue = MsQueue {
            head: Atomic::null(),
            tail: Atomic::null(),
        };
        let sentinel = Owned::new(Node {
            data: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        unsafe {
            // Not shared with anyone yet.
            let guard = unprotected();
            let sentinel = queue.head.store_and_ref(sentinel, Ordering::Relaxed, guard);
            queue.tail.store_shared(Some(sentinel), Ordering::Relaxed);
        }
        queue
    }

    /// Add `t` to the back of the queue.
    ///
    /// # Safety
    /// Every guard ever used with this queue must come from the same collector.
    pub unsafe fn push_with(&self, t: T, guard: &Guard) {
        let mut node = Owned::new(Node {
            data: MaybeUninit::new(t),
            next: Atomic::null(),
        });

        loop {
            let tail = load_end(&self.tail, guard);

            // Help a lagging tail along before trying to link after it.
            if let Some(next) = tail.next.load(Ordering::Acquire, guard) {
                self.tail.cas_shared(Some(tail), Some(next), Ordering::Release);
                continue;
            }

            match tail.next.cas_and_ref(None, node, Ordering::Release, guard) {
                Ok(new) => {
                    self.tail.cas_shared(Some(tail), Some(new), Ordering::Release);
                    return;
                }
                Err(owned) => node = owned,
            }
        }
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
            let next = head.next.load(Ordering::Acquire, guard)?;

            // The old sentinel is about to be retired; move `tail` off it first.
            let tail = load_end(&self.tail, guard);
            if tail == head {
                self.tail.cas_shared(Some(tail), Some(next), Ordering::Release);
            }

            if self.head.cas_shared(Some(head), Some(next), Ordering::Release) {
                unsafe {
                    // `next` becomes the sentinel; its payload is moved out exactly once.
                    let data = ptr::read(next.data.as_ptr());
                    guard.unlinked(head);
                    return Some(data);
                }
            }
        }
    }

    /// Returns `true` if the queue was observed empty.
    pub fn is_empty_with(&self, guard: &Guard) -> bool {
        let head = load_end(&self.head, guard);
        head.next.load(Ordering::Acquire, guard).is_none()
    }
}

#[cfg(not(feature = "loom"))]
impl<T> MsQueue<T> {
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

impl<T> Default for MsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MsQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();
            let mut cur = self.head.load(Ordering::Relaxed, guard);
            let mut sentinel = true;
            while let Some(node) = cur {
                cur = node.next.load(Ordering::Relaxed, guard);
                let mut owned = Owned::from_raw(node.as_raw() as *mut Node<T>);
                if !sentinel {
                    owned.data.assume_init_drop();
                }
                sentinel = false;
            }
        }
    }
}

impl<T> std::fmt::Debug for MsQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad("MsQueue { .. }")
    }
}
