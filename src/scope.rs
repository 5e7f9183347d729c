//! Scoped threads.
//!
//! Threads spawned inside [`scope`] may borrow anything that outlives the
//! scope, because the scope joins every one of them before it returns.
//!
//! ```
//! use mwmr_epoch::scope;
//!
//! let mut counts = [0usize; 4];
//! scope(|s| {
//!     for (i, count) in counts.iter_mut().enumerate() {
//!         s.spawn(move || *count = i * 10);
//!     }
//! });
//! assert_eq!(counts, [0, 10, 20, 30]);
//! ```
//!
//! 作用域线程。
//! 在 [`scope`] 内派生的线程可以借用任何比作用域存活更久的数据，因为作用域在返回前会 join 所有线程。

use std::any::Any;
use std::cell::RefCell;
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread::{self, Thread};
use thiserror::Error;
use tracing::{debug, warn};

type Payload = Box<dyn Any + Send + 'static>;
type JoinSlot<T> = Rc<RefCell<Option<thread::JoinHandle<T>>>>;

/// Errors produced by scoped threads.
/// 作用域线程产生的错误。
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The thread panicked; carries the panic payload.
    /// 线程发生 panic，携带 panic 负载。
    #[error("scoped thread panicked")]
    Panicked(Payload),

    /// The OS refused to create the thread.
    /// 操作系统拒绝创建线程。
    #[error("failed to spawn scoped thread: {0}")]
    Spawn(#[from] io::Error),
}

impl ScopeError {
    /// The panic message, if the thread panicked with a string payload.
    /// 如果线程以字符串负载 panic，返回该消息。
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            ScopeError::Panicked(payload) => payload
                .downcast_ref::<&'static str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str)),
            ScopeError::Spawn(_) => None,
        }
    }
}

/// A scope in which threads borrowing from `'env` can be spawned.
///
/// 可在其中派生借用 `'env` 数据的线程的作用域。
pub struct Scope<'env> {
    /// Implicit joins, in spawn order. Each yields the panic payload, if any.
    joins: RefCell<Vec<Box<dyn FnOnce() -> Option<Payload> + 'env>>>,
    /// Deferred closures, run in reverse order at close.
    defers: RefCell<Vec<Box<dyn FnOnce() + 'env>>>,
    /// Invariant over `'env`.
    _marker: PhantomData<&'env mut &'env ()>,
}

/// Create a new scope, run `f` in it, then close the scope.
///
/// Closing joins every thread still outstanding, in spawn order, and then runs
/// the deferred closures in reverse order of registration. This happens even
/// if `f` panics; its panic is then resumed. Otherwise, if an implicitly joined
/// thread panicked, the first such panic is resumed.
///
/// 创建一个新作用域，在其中运行 `f`，然后关闭作用域。
/// 关闭时按派生顺序 join 所有尚未 join 的线程，再按注册的相反顺序运行延迟闭包。
/// 即使 `f` panic 也会如此，随后恢复其 panic；否则若某个被隐式 join 的线程 panic，则恢复第一个这样的 panic。
pub fn scope<'env, F, R>(f: F) -> R
where
    F: FnOnce(&Scope<'env>) -> R,
{
    let scope = Scope {
        joins: RefCell::new(Vec::new()),
        defers: RefCell::new(Vec::new()),
        _marker: PhantomData,
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| f(&scope)));
    let thread_panic = scope.close();

    match result {
        Err(payload) => panic::resume_unwind(payload),
        Ok(value) => {
            if let Some(payload) = thread_panic {
                warn!("re-raising panic caught while closing the scope");
                panic::resume_unwind(payload);
            }
            value
        }
    }
}

impl<'env> Scope<'env> {
    /// Spawn a thread that may borrow from `'env`.
    ///
    /// # Panics
    /// Panics if the OS fails to create a thread; use [`Scope::try_spawn`] to
    /// recover from such errors.
    ///
    /// 派生一个可以借用 `'env` 数据的线程。操作系统无法创建线程时 panic。
    pub fn spawn<F, T>(&self, f: F) -> ScopedJoinHandle<'_, T>
    where
        F: FnOnce() -> T + Send + 'env,
        T: Send + 'env,
    {
        match self.try_spawn(f) {
            Ok(handle) => handle,
            Err(err) => panic!("failed to spawn thread: {err}"),
        }
    }

    /// Spawn a thread, returning an error if the OS fails to create it.
    /// 派生一个线程，操作系统无法创建时返回错误。
    pub fn try_spawn<F, T>(&self, f: F) -> Result<ScopedJoinHandle<'_, T>, ScopeError>
    where
        F: FnOnce() -> T + Send + 'env,
        T: Send + 'env,
    {
        self.spawn_with(thread::Builder::new(), f)
    }

    /// Spawn a thread with the given OS thread name.
    /// 以给定的操作系统线程名派生一个线程。
    pub fn spawn_named<F, T>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<ScopedJoinHandle<'_, T>, ScopeError>
    where
        F: FnOnce() -> T + Send + 'env,
        T: Send + 'env,
    {
        self.spawn_with(thread::Builder::new().name(name.into()), f)
    }

    fn spawn_with<F, T>(
        &self,
        builder: thread::Builder,
        f: F,
    ) -> Result<ScopedJoinHandle<'_, T>, ScopeError>
    where
        F: FnOnce() -> T + Send + 'env,
        T: Send + 'env,
    {
        // SAFETY: `scope` joins this thread before `'env` ends.
        let handle = unsafe { builder.spawn_unchecked(f) }.inspect_err(|err| {
            debug!(error = %err, "scoped thread spawn failed");
        })?;

        let thread = handle.thread().clone();
        let slot: JoinSlot<T> = Rc::new(RefCell::new(Some(handle)));

        let pending = Rc::clone(&slot);
        self.joins.borrow_mut().push(Box::new(move || {
            let handle = pending.borrow_mut().take()?;
            handle.join().err()
        }));

        Ok(ScopedJoinHandle {
            slot,
            thread,
            _marker: PhantomData,
        })
    }

    /// Schedule `f` to run when the scope closes, after every thread is joined.
    ///
    /// 安排 `f` 在作用域关闭时、所有线程 join 之后运行。
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + 'env,
    {
        self.defers.borrow_mut().push(Box::new(f));
    }

    /// Join outstanding threads, then run deferred closures.
    ///
    /// Returns the first panic observed.
    fn close(&self) -> Option<Payload> {
        let mut first_panic = None;

        let joins = mem::take(&mut *self.joins.borrow_mut());
        for join in joins {
            if let Some(payload) = join() {
                first_panic.get_or_insert(payload);
            }
        }

        let defers = mem::take(&mut *self.defers.borrow_mut());
        for deferred in defers.into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(deferred)) {
                first_panic.get_or_insert(payload);
            }
        }

        first_panic
    }
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("threads", &self.joins.borrow().len())
            .field("deferred", &self.defers.borrow().len())
            .finish()
    }
}

/// A handle to a scoped thread.
///
/// Dropping the handle does not detach the thread; the scope still joins it.
///
/// 作用域线程的句柄。drop 句柄不会分离线程，作用域仍会 join 它。
pub struct ScopedJoinHandle<'scope, T> {
    slot: JoinSlot<T>,
    thread: Thread,
    _marker: PhantomData<&'scope ()>,
}

impl<T> ScopedJoinHandle<'_, T> {
    /// Wait for the thread to finish and return its result.
    ///
    /// If the thread panicked, returns [`ScopeError::Panicked`] with its payload.
    ///
    /// 等待线程结束并返回其结果。若线程 panic，返回携带负载的 [`ScopeError::Panicked`]。
    pub fn join(self) -> Result<T, ScopeError> {
        let handle = self.slot.borrow_mut().take();
        match handle {
            Some(handle) => handle.join().map_err(ScopeError::Panicked),
            // The scope only joins after every handle is out of reach.
            None => unreachable!("scoped thread joined twice"),
        }
    }

    /// The underlying thread.
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Returns `true` if the thread has finished running.
    pub fn is_finished(&self) -> bool {
        self.slot
            .borrow()
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }
}

impl<T> std::fmt::Debug for ScopedJoinHandle<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedJoinHandle")
            .field("thread", &self.thread)
            .finish()
    }
}

/// Spawn a thread without the `'static` bound on the closure.
///
/// # Safety
/// The returned handle must be joined before any data borrowed by `f`
/// goes out of scope; leaking or dropping it unjoined is undefined behavior.
///
/// # Panics
/// Panics if the OS fails to create a thread, like `std::thread::spawn`.
///
/// 派生线程而不要求闭包满足 `'static`。
/// 安全性：必须在 `f` 借用的任何数据离开作用域前 join 返回的句柄。
pub unsafe fn spawn_unsafe<'a, F, T>(f: F) -> thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'a,
    T: Send + 'a,
{
    match unsafe { thread::Builder::new().spawn_unchecked(f) } {
        Ok(handle) => handle,
        Err(err) => panic!("failed to spawn thread: {err}"),
    }
}
