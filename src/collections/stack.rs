use crate::guard::{Guard, unprotected};
use crate::ptr::{Atomic, Owned};
use crate::sync::Ordering;
use std::mem::ManuallyDrop;
use std::ptr;

/// Treiber's lock-free stack.
///
/// ```
/// use mwmr_epoch::TreiberStack;
///
/// let stack = TreiberStack::new();
/// stack.push(1);
/// stack.push(2);
/// assert_eq!(stack.pop(), Some(2));
/// assert_eq!(stack.pop(), Some(1));
/// assert_eq!(stack.pop(), None);
/// ```
///
/// Treiber 无锁栈。
pub struct TreiberStack<T> {
    head: Atomic<Node<T>>,
}

struct Node<T> {
    /// Moved out by the popper; the node itself never drops it.
    data: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

unsafe impl<T: Send> Send for TreiberStack<T> {}
unsafe impl<T: Send> Sync for TreiberStack<T> {}

impl<T> TreiberStack<T> {
    /// Create a new, empty stack.
    /// 创建一个新的空栈。
    pub fn new() -> TreiberStack<T> {
        TreiberStack {
            head: Atomic::null(),
        }
    }

    /// Push `t` on top of the stack.
    ///
    /// # Safety
    /// Every guard ever used with this stack must come from the same collector.
    pub unsafe fn push_with(&self, t: T, guard: &Guard) {
        let mut node = Owned::new(Node {
            data: ManuallyDrop::new(t),
            next: Atomic::null(),
        });

        loop {
            let head = self.head.load(Ordering::Relaxed, guard);
            node.next.store_shared(head, Ordering::Relaxed);

            match self.head.cas_and_ref(head, node, Ordering::Release, guard) {
                Ok(_) => return,
                Err(owned) => node = owned,
            }
        }
    }

    /// Attempt to pop the top element of the stack.
    ///
    /// Returns `None` if the stack was observed empty.
    ///
    /// # Safety
    /// Every guard ever used with this stack must come from the same collector.
    pub unsafe fn pop_with(&self, guard: &Guard) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire, guard)?;
            let next = head.next.load(Ordering::Relaxed, guard);

            if self.head.cas_shared(Some(head), next, Ordering::Release) {
                unsafe {
                    let data = ptr::read(&*head.data);
                    guard.unlinked(head);
                    return Some(data);
                }
            }
        }
    }

    /// Returns `true` if the stack was observed empty.
    pub fn is_empty_with(&self, guard: &Guard) -> bool {
        self.head.load(Ordering::Acquire, guard).is_none()
    }
}

#[cfg(not(feature = "loom"))]
impl<T> TreiberStack<T> {
    /// Push `t` on top of the stack.
    /// 将 `t` 压入栈顶。
    pub fn push(&self, t: T) {
        let guard = crate::pin();
        unsafe { self.push_with(t, &guard) }
    }

    /// Attempt to pop the top element of the stack.
    /// 尝试弹出栈顶元素。
    pub fn pop(&self) -> Option<T> {
        let guard = crate::pin();
        unsafe { self.pop_with(&guard) }
    }

    /// Returns `true` if the stack was observed empty.
    /// 如果观察到栈为空，返回 `true`。
    pub fn is_empty(&self) -> bool {
        self.is_empty_with(&crate::pin())
    }
}

impl<T> Default for TreiberStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for TreiberStack<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();
            let mut cur = self.head.load(Ordering::Relaxed, guard);
            while let Some(node) = cur {
                cur = node.next.load(Ordering::Relaxed, guard);
                let mut owned = Owned::from_raw(node.as_raw() as *mut Node<T>);
                ManuallyDrop::drop(&mut owned.data);
            }
        }
    }
}

impl<T> std::fmt::Debug for TreiberStack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad("TreiberStack { .. }")
    }
}
