use crate::state::{Epoch, GRACE_PERIOD};
use crate::sync::{AtomicPtr, Ordering};
use std::boxed::Box;
use std::ptr;
use std::vec::Vec;

/// An object that has been retired (unlinked from every shared structure) but
/// not yet deleted. It stores the raw pointer and a destructor function to
/// safely drop the concrete type.
///
/// 一个已被退休（从所有共享结构中摘除）但尚未删除的对象。
/// 它存储原始指针和析构函数，以安全地 drop 具体类型。
pub(crate) struct RetiredObject {
    /// The raw pointer to the data.
    /// 数据的原始指针。
    ptr: *mut (),
    /// Function pointer to the type-specific destructor.
    /// 类型特定析构函数的函数指针。
    dtor: unsafe fn(*mut ()),
}

// Whoever retires an object promises its destructor may run on any thread.
unsafe impl Send for RetiredObject {}

/// Generic destructor for retired objects.
/// Converts the raw pointer back to Box<T> and drops it.
///
/// 已退休对象的通用析构函数。
/// 将原始指针转换回 Box<T> 并将其 drop。
#[inline(always)]
unsafe fn drop_value<T>(ptr: *mut ()) {
    let ptr = ptr as *mut T;
    unsafe {
        drop(Box::from_raw(ptr));
    }
}

impl RetiredObject {
    /// Wrap a pointer obtained from `Box::into_raw`.
    ///
    /// # Safety
    /// `ptr` must come from `Box<T>` and must not be freed by anyone else.
    #[inline(always)]
    pub(crate) unsafe fn new<T>(ptr: *mut T) -> Self {
        RetiredObject {
            ptr: ptr as *mut (),
            dtor: drop_value::<T>,
        }
    }
}

impl Drop for RetiredObject {
    /// Executes the type-erased destructor.
    /// 执行类型擦除的析构函数。
    #[inline(always)]
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                (self.dtor)(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// A participant's bag of retired objects, not yet tagged with an epoch.
/// 参与者的已退休对象袋，尚未标记纪元。
pub(crate) struct Bag {
    objects: Vec<RetiredObject>,
}

impl Bag {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Bag {
            objects: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[inline]
    pub(crate) fn push(&mut self, object: RetiredObject) {
        self.objects.push(object);
    }

    /// Tag the bag with the epoch it was sealed in.
    pub(crate) fn seal(self, epoch: Epoch) -> SealedBag {
        SealedBag {
            epoch,
            objects: self.objects,
            next: ptr::null_mut(),
        }
    }
}

/// A bag tagged with the global epoch it was published in, linked into the
/// global garbage list.
///
/// 标记了发布时全局纪元的垃圾袋，链接在全局垃圾链表中。
pub(crate) struct SealedBag {
    epoch: Epoch,
    objects: Vec<RetiredObject>,
    next: *mut SealedBag,
}

impl SealedBag {
    /// Whether no pinned participant can still reference anything in the bag.
    #[inline]
    fn is_expired(&self, current: Epoch) -> bool {
        current.wrapping_sub(self.epoch) >= GRACE_PERIOD
    }
}

/// Lock-free list of sealed bags shared by all participants.
///
/// Bags are pushed one at a time with CAS and taken all at once with `swap`,
/// so no node is ever popped individually and the list is immune to ABA.
///
/// 所有参与者共享的已封存垃圾袋无锁链表。
/// 垃圾袋通过 CAS 逐个压入，通过 `swap` 一次性整体取出，因此不会单独弹出节点，也不受 ABA 问题影响。
pub(crate) struct GlobalGarbage {
    head: AtomicPtr<SealedBag>,
}

impl GlobalGarbage {
    pub(crate) fn new() -> Self {
        GlobalGarbage {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn push(&self, bag: SealedBag) {
        let node = Box::into_raw(Box::new(bag));
        self.push_chain(node, node);
    }

    /// Link the chain `first ..= last` in front of the current head.
    fn push_chain(&self, first: *mut SealedBag, last: *mut SealedBag) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: the chain is owned by this thread until the CAS succeeds.
            unsafe { (*last).next = head };
            match self
                .head
                .compare_exchange_weak(head, first, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Free every expired bag and put the rest back.
    ///
    /// Returns the number of objects destroyed.
    ///
    /// 释放所有过期的垃圾袋，并将其余的放回。返回被销毁的对象数量。
    pub(crate) fn collect(&self, current: Epoch) -> usize {
        let mut cur = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        if cur.is_null() {
            return 0;
        }

        let mut kept_first: *mut SealedBag = ptr::null_mut();
        let mut kept_last: *mut SealedBag = ptr::null_mut();
        let mut expired = Vec::new();

        while !cur.is_null() {
            // SAFETY: the swap above gave this thread exclusive ownership of the chain.
            let next = unsafe { (*cur).next };
            if unsafe { (*cur).is_expired(current) } {
                expired.push(unsafe { Box::from_raw(cur) });
            } else {
                unsafe { (*cur).next = ptr::null_mut() };
                if kept_last.is_null() {
                    kept_first = cur;
                } else {
                    unsafe { (*kept_last).next = cur };
                }
                kept_last = cur;
            }
            cur = next;
        }

        if !kept_first.is_null() {
            self.push_chain(kept_first, kept_last);
        }

        // Destructors run after the survivors are back in place, so one that
        // retires more garbage never observes a half-taken list.
        let freed = expired.iter().map(|bag| bag.objects.len()).sum();
        drop(expired);
        freed
    }

    /// Number of objects waiting in the global list.
    ///
    /// Only exact without concurrent collection.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        let mut count = 0;
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: callers guarantee no concurrent `collect` frees bags.
            unsafe {
                count += (*cur).objects.len();
                cur = (*cur).next;
            }
        }
        count
    }
}

impl std::fmt::Debug for GlobalGarbage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = self.head.load(Ordering::Relaxed);
        f.debug_struct("GlobalGarbage").field("head", &head).finish()
    }
}

impl Drop for GlobalGarbage {
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            // SAFETY: exclusive access; every node came from `Box::into_raw`.
            let bag = unsafe { Box::from_raw(cur) };
            cur = bag.next;
        }
    }
}
