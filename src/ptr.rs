use crate::guard::Guard;
use crate::sync::{AtomicPtr, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

/// Like `Box<T>`: an owned, heap-allocated value not yet reachable by any
/// other thread.
///
/// Dropping an `Owned` frees the value immediately, since nobody else can
/// observe it. Ownership passes into a shared structure through
/// [`Atomic::store`], [`Atomic::cas`] and friends.
///
/// 类似 `Box<T>`：一个独占的堆上值，尚未被任何其他线程访问到。
/// drop `Owned` 会立即释放该值，因为没有其他线程能观察到它。
pub struct Owned<T> {
    ptr: NonNull<T>,
    _marker: PhantomData<Box<T>>,
}

unsafe impl<T: Send> Send for Owned<T> {}
unsafe impl<T: Sync> Sync for Owned<T> {}

impl<T> Owned<T> {
    /// Move `t` to a new heap allocation.
    /// 将 `t` 移动到新的堆分配中。
    #[inline]
    pub fn new(t: T) -> Owned<T> {
        Self::from_box(Box::new(t))
    }

    /// Take ownership of an existing heap allocation.
    /// 接管一个已有的堆分配。
    #[inline]
    pub fn from_box(b: Box<T>) -> Owned<T> {
        // SAFETY: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(b)) };
        Owned {
            ptr,
            _marker: PhantomData,
        }
    }

    /// Convert back into a `Box`, without ever having been shared.
    #[inline]
    pub fn into_box(self) -> Box<T> {
        unsafe { Box::from_raw(self.into_raw()) }
    }

    /// Publish the value, yielding a shared reference bounded by `guard`.
    ///
    /// The allocation is leaked unless it is later stored into a structure
    /// and retired from there.
    ///
    /// 发布该值，得到一个受 `guard` 约束的共享引用。
    #[inline]
    pub fn into_shared<'g>(self, _guard: &'g Guard) -> Shared<'g, T> {
        Shared {
            ptr: self.into_non_null(),
            _marker: PhantomData,
        }
    }

    /// Take ownership of a raw heap pointer.
    ///
    /// # Safety
    /// `raw` must be non-null, come from `Box::into_raw` (or `Owned::into_raw`)
    /// and not be owned by anything else.
    #[inline]
    pub(crate) unsafe fn from_raw(raw: *mut T) -> Owned<T> {
        debug_assert!(!raw.is_null(), "Owned::from_raw with a null pointer");
        Owned {
            ptr: unsafe { NonNull::new_unchecked(raw) },
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn into_raw(self) -> *mut T {
        self.into_non_null().as_ptr()
    }

    #[inline]
    fn into_non_null(self) -> NonNull<T> {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl<T> Drop for Owned<T> {
    #[inline]
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) }
    }
}

impl<T> Deref for Owned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for Owned<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> From<Box<T>> for Owned<T> {
    fn from(b: Box<T>) -> Self {
        Owned::from_box(b)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owned").field(&**self).finish()
    }
}

/// Like `&'g T`: a shared reference into a concurrent structure, valid for
/// the lifetime `'g` of the guard it was loaded under.
///
/// `Shared` is `Copy`, never null (a null slot loads as `None`), and compares
/// by address rather than by value.
///
/// 类似 `&'g T`：指向并发结构的共享引用，在加载它的守卫的生命周期 `'g` 内有效。
/// `Shared` 是 `Copy` 的，永不为空（空槽加载为 `None`），按地址而非值比较。
pub struct Shared<'g, T: 'g> {
    ptr: NonNull<T>,
    _marker: PhantomData<(&'g (), &'g T)>,
}

impl<'g, T> Clone for Shared<'g, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<'g, T> Copy for Shared<'g, T> {}

impl<'g, T> PartialEq for Shared<'g, T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<'g, T> Eq for Shared<'g, T> {}

impl<'g, T> Deref for Shared<'g, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard bounding `'g` keeps the pointee alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl<'g, T> Shared<'g, T> {
    /// The address this reference points at.
    #[inline]
    pub fn as_raw(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// # Safety
    /// A non-null `raw` must stay valid for `'g`.
    #[inline]
    pub(crate) unsafe fn from_raw(raw: *mut T) -> Option<Shared<'g, T>> {
        NonNull::new(raw).map(|ptr| Shared {
            ptr,
            _marker: PhantomData,
        })
    }
}

impl<'g, T> std::fmt::Debug for Shared<'g, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Shared").field(&self.ptr).finish()
    }
}

#[inline]
fn shared_as_raw<T>(val: Option<Shared<'_, T>>) -> *mut T {
    val.map_or(ptr::null_mut(), |s| s.ptr.as_ptr())
}

#[inline]
fn owned_as_raw<T>(val: &Option<Owned<T>>) -> *mut T {
    val.as_ref().map_or(ptr::null_mut(), |o| o.ptr.as_ptr())
}

/// The strongest failure ordering allowed for a CAS with success ordering `ord`.
#[inline]
fn failure_ordering(ord: Ordering) -> Ordering {
    match ord {
        Ordering::Relaxed | Ordering::Release => Ordering::Relaxed,
        Ordering::Acquire | Ordering::AcqRel => Ordering::Acquire,
        _ => Ordering::SeqCst,
    }
}

/// Like `std::sync::atomic::AtomicPtr`: an atomic slot holding either null
/// or the address of a heap object, updated through `Owned` and `Shared`.
///
/// **Safety Contract**:
/// - Reads require a `Guard`; the returned `Shared` cannot outlive it.
/// - Storing an `Owned` moves ownership into the slot.
/// - Whoever removes a value from the slot (CAS or swap) is responsible for
///   retiring it with [`Guard::unlinked`] once it is unreachable.
/// - Like `AtomicPtr`, dropping an `Atomic` does not drop its pointee.
///
/// Every operation takes its own memory ordering.
///
/// **Typical Usage**:
/// ```
/// use mwmr_epoch::{Atomic, Owned, pin};
/// use std::sync::atomic::Ordering;
///
/// let slot = Atomic::new(1i32);
/// let guard = pin();
///
/// let old = slot.load(Ordering::Acquire, &guard);
/// assert_eq!(old.map(|v| *v), Some(1));
///
/// let new = slot.cas_and_ref(old, Owned::new(2), Ordering::AcqRel, &guard).unwrap();
/// assert_eq!(*new, 2);
/// unsafe { guard.unlinked(old.unwrap()) };
/// ```
///
/// 类似 `std::sync::atomic::AtomicPtr`：一个原子槽，存放空值或堆对象地址，通过 `Owned` 和 `Shared` 更新。
/// **安全合约**：
/// - 读取需要 `Guard`；返回的 `Shared` 不能比它活得更久。
/// - 存入 `Owned` 会将所有权转移到槽中。
/// - 从槽中移除值（CAS 或 swap）的一方负责在其不可达后用 [`Guard::unlinked`] 退休它。
/// - 与 `AtomicPtr` 一样，drop `Atomic` 不会 drop 其指向的值。
pub struct Atomic<T> {
    ptr: AtomicPtr<T>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send + Sync> Send for Atomic<T> {}
unsafe impl<T: Send + Sync> Sync for Atomic<T> {}

impl<T> Atomic<T> {
    /// Create a new, null atomic pointer.
    /// 创建一个新的空原子指针。
    #[inline]
    pub fn null() -> Atomic<T> {
        Atomic {
            ptr: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// Create a new atomic pointer owning `t`.
    /// 创建一个拥有 `t` 的新原子指针。
    #[inline]
    pub fn new(t: T) -> Atomic<T> {
        Atomic {
            ptr: AtomicPtr::new(Owned::new(t).into_raw()),
            _marker: PhantomData,
        }
    }

    /// Do an atomic load with the given memory ordering.
    ///
    /// The lifetime of the result is bound to `guard`, so it cannot be used
    /// after the guard is dropped.
    ///
    /// 以给定内存序进行原子读取。结果的生命周期被绑定到 `guard`。
    #[inline]
    pub fn load<'g>(&self, ord: Ordering, _guard: &'g Guard) -> Option<Shared<'g, T>> {
        unsafe { Shared::from_raw(self.ptr.load(ord)) }
    }

    /// Do an atomic store with the given memory ordering.
    ///
    /// The previous value is neither returned nor retired.
    ///
    /// 以给定内存序进行原子写入。旧值既不返回也不退休。
    #[inline]
    pub fn store(&self, val: Option<Owned<T>>, ord: Ordering) {
        self.ptr.store(val.map_or(ptr::null_mut(), Owned::into_raw), ord);
    }

    /// Do an atomic store, immediately yielding a shared reference to the
    /// value that was stored.
    ///
    /// 原子写入，并立即返回指向所存值的共享引用。
    #[inline]
    pub fn store_and_ref<'g>(&self, val: Owned<T>, ord: Ordering, guard: &'g Guard) -> Shared<'g, T> {
        let shared = val.into_shared(guard);
        self.store_shared(Some(shared), ord);
        shared
    }

    /// Do an atomic store of a `Shared` pointer with the given memory ordering.
    ///
    /// 以给定内存序原子写入一个 `Shared` 指针。
    #[inline]
    pub fn store_shared(&self, val: Option<Shared<'_, T>>, ord: Ordering) {
        self.ptr.store(shared_as_raw(val), ord);
    }

    /// Do a compare-and-set from a `Shared` to an `Owned` pointer.
    ///
    /// On success ownership of `new` moves into the slot. On failure `new` is
    /// handed back untouched.
    ///
    /// 从 `Shared` 到 `Owned` 指针的比较并设置。
    /// 成功时 `new` 的所有权移入槽中；失败时 `new` 原样返还。
    #[inline]
    pub fn cas(
        &self,
        old: Option<Shared<'_, T>>,
        new: Option<Owned<T>>,
        ord: Ordering,
    ) -> Result<(), Option<Owned<T>>> {
        match self.ptr.compare_exchange(
            shared_as_raw(old),
            owned_as_raw(&new),
            ord,
            failure_ordering(ord),
        ) {
            Ok(_) => {
                std::mem::forget(new);
                Ok(())
            }
            Err(_) => Err(new),
        }
    }

    /// Do a compare-and-set from a `Shared` to an `Owned` pointer, yielding a
    /// `Shared` reference to the newly stored value on success.
    ///
    /// 从 `Shared` 到 `Owned` 指针的比较并设置，成功时返回指向新值的 `Shared` 引用。
    #[inline]
    pub fn cas_and_ref<'g>(
        &self,
        old: Option<Shared<'_, T>>,
        new: Owned<T>,
        ord: Ordering,
        guard: &'g Guard,
    ) -> Result<Shared<'g, T>, Owned<T>> {
        match self.ptr.compare_exchange(
            shared_as_raw(old),
            new.ptr.as_ptr(),
            ord,
            failure_ordering(ord),
        ) {
            Ok(_) => Ok(new.into_shared(guard)),
            Err(_) => Err(new),
        }
    }

    /// Do a compare-and-set from a `Shared` to another `Shared` pointer.
    ///
    /// Returns `true` on success.
    ///
    /// 从一个 `Shared` 到另一个 `Shared` 指针的比较并设置，成功时返回 `true`。
    #[inline]
    pub fn cas_shared(
        &self,
        old: Option<Shared<'_, T>>,
        new: Option<Shared<'_, T>>,
        ord: Ordering,
    ) -> bool {
        self.ptr
            .compare_exchange(
                shared_as_raw(old),
                shared_as_raw(new),
                ord,
                failure_ordering(ord),
            )
            .is_ok()
    }

    /// Do an atomic swap with an `Owned` pointer.
    ///
    /// The previous value is returned as a `Shared`, since other threads may
    /// still be reading it.
    ///
    /// 与 `Owned` 指针进行原子交换。旧值以 `Shared` 返回，因为其他线程可能仍在读取它。
    #[inline]
    pub fn swap<'g>(
        &self,
        new: Option<Owned<T>>,
        ord: Ordering,
        _guard: &'g Guard,
    ) -> Option<Shared<'g, T>> {
        let new = new.map_or(ptr::null_mut(), Owned::into_raw);
        unsafe { Shared::from_raw(self.ptr.swap(new, ord)) }
    }

    /// Do an atomic swap with a `Shared` pointer.
    ///
    /// 与 `Shared` 指针进行原子交换。
    #[inline]
    pub fn swap_shared<'g>(
        &self,
        new: Option<Shared<'_, T>>,
        ord: Ordering,
        _guard: &'g Guard,
    ) -> Option<Shared<'g, T>> {
        unsafe { Shared::from_raw(self.ptr.swap(shared_as_raw(new), ord)) }
    }
}

impl<T> Default for Atomic<T> {
    fn default() -> Self {
        Atomic::null()
    }
}

impl<T> From<Owned<T>> for Atomic<T> {
    fn from(owned: Owned<T>) -> Self {
        Atomic {
            ptr: AtomicPtr::new(owned.into_raw()),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ptr = self.ptr.load(Ordering::Relaxed);
        f.debug_tuple("Atomic").field(&ptr).finish()
    }
}
