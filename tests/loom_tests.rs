//! Loom-based concurrency tests
//!
//! These tests use the `loom` library to exhaustively check all possible
//! thread interleavings of pinning, epoch advancement and the lock-free
//! collections.
//!
//! Run with: `LOOM_MAX_PREEMPTIONS=3 cargo test --features loom --test loom_tests --release`

#![cfg(feature = "loom")]

use loom::sync::Arc;
use loom::sync::atomic::AtomicUsize;
use loom::thread;
use mwmr_epoch::{Atomic, Collector, MsQueue, Owned, SegQueue, TreiberStack, unprotected};
use std::sync::atomic::Ordering;

fn manual_collector() -> Collector {
    Collector::builder()
        .collect_threshold(None)
        .pins_between_collect(0)
        .build()
}

fn drain<T>(atomic: &Atomic<T>) {
    unsafe {
        let guard = unprotected();
        if let Some(old) = atomic.swap(None, Ordering::Relaxed, guard) {
            guard.unlinked(old);
        }
    }
}

/// Test: Multiple participants can safely read concurrently
#[test]
fn loom_concurrent_readers() {
    loom::model(|| {
        let collector = Collector::new();
        let ptr = Arc::new(Atomic::new(42i32));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let collector = collector.clone();
                let ptr = Arc::clone(&ptr);
                thread::spawn(move || {
                    let local = collector.register();
                    let guard = local.pin();
                    let value = ptr.load(Ordering::Acquire, &guard).map(|v| *v);
                    assert_eq!(value, Some(42));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        drain(&ptr);
    });
}

const POISON: usize = usize::MAX;

/// Payload backed by a loom atomic, so loom tracks every access to it.
/// Dropping it writes `POISON` first.
struct Tracked {
    value: AtomicUsize,
}

impl Tracked {
    fn new(value: usize) -> Self {
        Tracked {
            value: AtomicUsize::new(value),
        }
    }

    fn read(&self) -> usize {
        let value = self.value.load(Ordering::Acquire);
        assert_ne!(value, POISON, "read a reclaimed value");
        value
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.value.store(POISON, Ordering::Release);
    }
}

/// Test: A swapped-out value stays readable while the reader is pinned,
/// even once the writer has advanced far enough to reclaim it
#[test]
fn loom_swap_with_concurrent_reader() {
    loom::model(|| {
        let collector = manual_collector();
        let ptr = Arc::new(Atomic::new(Tracked::new(1)));

        let reader = {
            let collector = collector.clone();
            let ptr = Arc::clone(&ptr);
            thread::spawn(move || {
                let local = collector.register();
                let guard = local.pin();
                let first = ptr.load(Ordering::Acquire, &guard);
                let value = first.map(|v| v.read());
                assert!(value == Some(1) || value == Some(2));
                thread::yield_now();
                // The first snapshot is still readable after the writer may
                // have retired it.
                assert_eq!(first.map(|v| v.read()), value);
            })
        };

        let local = collector.register();
        {
            let guard = local.pin();
            if let Some(old) = ptr.swap(Some(Owned::new(Tracked::new(2))), Ordering::AcqRel, &guard) {
                unsafe { guard.unlinked(old) };
            }
            guard.migrate_garbage();
        }
        for _ in 0..3 {
            local.pin().try_collect();
        }

        reader.join().unwrap();
        drain(&ptr);
    });
}

/// Test: Reentrant pinning (nested pin calls)
#[test]
fn loom_reentrant_pinning() {
    loom::model(|| {
        let collector = Collector::new();
        let ptr = Arc::new(Atomic::new(100i32));

        let handle = {
            let ptr = Arc::clone(&ptr);
            thread::spawn(move || {
                let local = collector.register();

                let guard1 = local.pin();
                let guard2 = local.pin();
                assert_eq!(ptr.load(Ordering::Acquire, &guard2).map(|v| *v), Some(100));
                drop(guard2);

                assert!(local.is_pinned());
                assert_eq!(ptr.load(Ordering::Acquire, &guard1).map(|v| *v), Some(100));
            })
        };

        handle.join().unwrap();
        drain(&ptr);
    });
}

/// Test: Concurrent pushes on the stack are all observed
#[test]
fn loom_stack_push_pop() {
    loom::model(|| {
        let collector = Collector::new();
        let stack = Arc::new(TreiberStack::new());

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let collector = collector.clone();
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    let local = collector.register();
                    unsafe { stack.push_with(i, &local.pin()) };
                })
            })
            .collect();

        let local = collector.register();
        let popped = unsafe { stack.pop_with(&local.pin()) };

        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen: Vec<_> = popped.into_iter().collect();
        while let Some(v) = unsafe { stack.pop_with(&local.pin()) } {
            seen.push(v);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1]);
    });
}

/// Test: The linked queue keeps FIFO order with a concurrent consumer
#[test]
fn loom_ms_queue_push_pop() {
    loom::model(|| {
        let collector = Collector::new();
        let queue = Arc::new(MsQueue::new());

        let producer = {
            let collector = collector.clone();
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let local = collector.register();
                unsafe {
                    queue.push_with(1, &local.pin());
                    queue.push_with(2, &local.pin());
                }
            })
        };

        let local = collector.register();
        let first = unsafe { queue.pop_with(&local.pin()) };
        assert!(first.is_none() || first == Some(1));

        producer.join().unwrap();

        let mut rest = Vec::new();
        while let Some(v) = unsafe { queue.pop_with(&local.pin()) } {
            rest.push(v);
        }
        match first {
            Some(_) => assert_eq!(rest, vec![2]),
            None => assert_eq!(rest, vec![1, 2]),
        }
    });
}

/// Test: Two producers on the segmented queue lose nothing
#[test]
fn loom_seg_queue_concurrent_push() {
    loom::model(|| {
        let collector = Collector::new();
        let queue = Arc::new(SegQueue::new());

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let collector = collector.clone();
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let local = collector.register();
                    unsafe { queue.push_with(i, &local.pin()) };
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let local = collector.register();
        let guard = local.pin();
        let mut seen = Vec::new();
        while let Some(v) = unsafe { queue.pop_with(&guard) } {
            seen.push(v);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1]);
    });
}
