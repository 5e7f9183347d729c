/// 集合测试模块
/// 测试 Treiber 栈、Michael-Scott 队列和分段队列的顺序语义、并发正确性与资源释放
use super::{Canary, DropCounter, manual_collector};
use crate::{MsQueue, SegQueue, TreiberStack, scope};
use antidote::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const PRODUCERS: usize = 4;
const CONSUMERS: usize = 4;
const PER_PRODUCER: usize = 2_000;

/// 测试1: 栈后进先出
#[test]
fn test_stack_lifo() {
    let stack = TreiberStack::new();
    assert!(stack.is_empty());

    for i in 0..10 {
        stack.push(i);
    }
    assert!(!stack.is_empty());

    for i in (0..10).rev() {
        assert_eq!(stack.pop(), Some(i));
    }
    assert_eq!(stack.pop(), None);
    assert!(stack.is_empty());
}

/// 测试2: 链表队列先进先出
#[test]
fn test_ms_queue_fifo() {
    let queue = MsQueue::new();
    assert!(queue.is_empty());
    assert_eq!(queue.pop(), None);

    for i in 0..10 {
        queue.push(i);
    }
    assert!(!queue.is_empty());

    for i in 0..10 {
        assert_eq!(queue.pop(), Some(i));
    }
    assert_eq!(queue.pop(), None);
    assert!(queue.is_empty());
}

/// 测试3: 分段队列跨越多个段仍保持先进先出
#[test]
fn test_seg_queue_fifo_across_segments() {
    let queue = SegQueue::new();
    assert!(queue.is_empty());

    for i in 0..1_000 {
        queue.push(i);
    }
    assert!(!queue.is_empty());

    for i in 0..1_000 {
        assert_eq!(queue.pop(), Some(i));
    }
    assert_eq!(queue.pop(), None);
    assert!(queue.is_empty());
}

/// 测试4: 分段队列交替 push/pop，恰好在段边界清空
#[test]
fn test_seg_queue_interleaved_at_segment_boundary() {
    let queue = SegQueue::new();

    for round in 0..5 {
        for i in 0..32 {
            queue.push(round * 32 + i);
        }
        for i in 0..32 {
            assert_eq!(queue.pop(), Some(round * 32 + i));
        }
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    queue.push(usize::MAX);
    assert_eq!(queue.pop(), Some(usize::MAX));
}

/// 测试5: 空集合 pop 立即返回 None
#[test]
fn test_empty_pop_returns_none() {
    assert_eq!(TreiberStack::<u8>::new().pop(), None);
    assert_eq!(MsQueue::<u8>::new().pop(), None);
    assert_eq!(SegQueue::<u8>::new().pop(), None);
}

/// 测试6: drop 非空集合时每个剩余元素恰好 drop 一次
#[test]
fn test_drop_remaining_elements_once() {
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let stack = TreiberStack::new();
        let ms = MsQueue::new();
        let seg = SegQueue::new();
        for i in 0..50 {
            stack.push(DropCounter::new(i, &drops));
            ms.push(DropCounter::new(i, &drops));
            seg.push(DropCounter::new(i, &drops));
        }

        // 弹出的元素由调用者 drop
        for _ in 0..10 {
            drop(stack.pop());
            drop(ms.pop());
            drop(seg.pop());
        }
        assert_eq!(drops.load(Ordering::SeqCst), 30);
    }

    assert_eq!(drops.load(Ordering::SeqCst), 150);
}

/// 测试7: 弹出的值在 drop 前完整可用
#[test]
fn test_popped_values_are_intact() {
    let queue = MsQueue::new();
    queue.push(String::from("first"));
    queue.push(String::from("second"));

    let first = queue.pop().unwrap();
    assert_eq!(first, "first");
    drop(queue);
    assert_eq!(first, "first");
}

/// 测试8: 自定义回收器下使用集合
#[test]
fn test_collections_with_custom_collector() {
    let collector = manual_collector();
    let handle = collector.register();

    let stack = TreiberStack::new();
    let queue = SegQueue::new();
    {
        let guard = handle.pin();
        for i in 0..40 {
            unsafe {
                stack.push_with(i, &guard);
                queue.push_with(i, &guard);
            }
        }
        assert!(!stack.is_empty_with(&guard));
        for i in 0..40 {
            unsafe {
                assert_eq!(stack.pop_with(&guard), Some(39 - i));
                assert_eq!(queue.pop_with(&guard), Some(i));
            }
        }
        assert!(queue.is_empty_with(&guard));
    }

    // 40 个栈节点和 1 个耗尽的段等待回收
    for _ in 0..3 {
        handle.pin().try_collect();
    }
    assert_eq!(collector.pending_garbage(), 0);
}

/// 测试9: 栈并发 push/pop，不丢失不重复
#[test]
fn test_stack_concurrent_no_loss_no_duplication() {
    let stack = TreiberStack::new();
    let popped = Mutex::new(Vec::new());

    scope(|s| {
        for p in 0..PRODUCERS {
            let stack = &stack;
            s.spawn(move || {
                for i in 0..PER_PRODUCER {
                    stack.push(p * PER_PRODUCER + i);
                }
            });
        }
        for _ in 0..CONSUMERS {
            let (stack, popped) = (&stack, &popped);
            s.spawn(move || {
                let mut local = Vec::new();
                for _ in 0..PER_PRODUCER {
                    if let Some(v) = stack.pop() {
                        local.push(v);
                    }
                }
                popped.lock().extend(local);
            });
        }
    });

    let mut all = popped.into_inner();
    while let Some(v) = stack.pop() {
        all.push(v);
    }

    assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
}

/// 测试10: 两种队列在并发下都保持每个生产者内部的顺序
fn check_queue_linearizable<Q, Push, Pop>(queue: &Q, push: Push, pop: Pop)
where
    Q: Sync,
    Push: Fn(&Q, (usize, usize)) + Sync,
    Pop: Fn(&Q) -> Option<(usize, usize)> + Sync,
{
    let consumed = Mutex::new(Vec::new());
    let remaining = AtomicUsize::new(PRODUCERS * PER_PRODUCER);

    scope(|s| {
        for p in 0..PRODUCERS {
            let push = &push;
            s.spawn(move || {
                for i in 0..PER_PRODUCER {
                    push(queue, (p, i));
                }
            });
        }
        for _ in 0..CONSUMERS {
            let (pop, consumed, remaining) = (&pop, &consumed, &remaining);
            s.spawn(move || {
                let mut last = vec![None; PRODUCERS];
                let mut local = Vec::new();
                while remaining.load(Ordering::Acquire) > 0 {
                    if let Some((p, i)) = pop(queue) {
                        remaining.fetch_sub(1, Ordering::AcqRel);
                        // 同一生产者的元素按入队顺序出队
                        if let Some(prev) = last[p] {
                            assert!(i > prev, "producer {p}: {i} after {prev}");
                        }
                        last[p] = Some(i);
                        local.push((p, i));
                    } else {
                        std::thread::yield_now();
                    }
                }
                consumed.lock().extend(local);
            });
        }
    });

    let consumed = consumed.into_inner();
    assert_eq!(consumed.len(), PRODUCERS * PER_PRODUCER);
    let unique: HashSet<_> = consumed.into_iter().collect();
    assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
    assert!(pop(queue).is_none());
}

#[test]
fn test_ms_queue_concurrent_fifo() {
    let queue = MsQueue::new();
    check_queue_linearizable(&queue, |q, v| q.push(v), |q| q.pop());
}

#[test]
fn test_seg_queue_concurrent_fifo() {
    let queue = SegQueue::new();
    check_queue_linearizable(&queue, |q, v| q.push(v), |q| q.pop());
}

/// 测试11: 并发下每个元素恰好 drop 一次
#[test]
fn test_concurrent_drop_counting() {
    let drops = Arc::new(AtomicUsize::new(0));
    let popped = AtomicUsize::new(0);
    let queue = SegQueue::new();

    scope(|s| {
        for t in 0..4 {
            let (queue, drops, popped) = (&queue, &drops, &popped);
            s.spawn(move || {
                for i in 0..500 {
                    queue.push(DropCounter::new(t * 500 + i, drops));
                    if i % 2 == 0 && queue.pop().is_some() {
                        popped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(drops.load(Ordering::SeqCst), popped.load(Ordering::Relaxed));
    drop(queue);
    assert_eq!(drops.load(Ordering::SeqCst), 2_000);
}

/// 测试12: 多线程交替 push/pop 自我毒化的负载，弹出的值都未被释放，总数与总和不变
fn check_push_pop_stress<C, Push, Pop>(collection: &C, push: Push, pop: Pop)
where
    C: Sync,
    Push: Fn(&C, Canary) + Sync,
    Pop: Fn(&C) -> Option<Canary> + Sync,
{
    const THREADS: usize = 8;
    const OPS: usize = 20_000;

    let count = AtomicUsize::new(0);
    let sum = AtomicUsize::new(0);

    scope(|s| {
        for t in 0..THREADS {
            let (push, pop, count, sum) = (&push, &pop, &count, &sum);
            s.spawn(move || {
                for i in 0..OPS {
                    push(collection, Canary::new(t * OPS + i));
                    if let Some(value) = pop(collection) {
                        count.fetch_add(1, Ordering::Relaxed);
                        sum.fetch_add(value.check(), Ordering::Relaxed);
                    }
                }
            });
        }
    });

    while let Some(value) = pop(collection) {
        count.fetch_add(1, Ordering::Relaxed);
        sum.fetch_add(value.check(), Ordering::Relaxed);
    }

    let total = THREADS * OPS;
    assert_eq!(count.into_inner(), total);
    assert_eq!(sum.into_inner(), total * (total - 1) / 2);
}

#[test]
fn test_stack_push_pop_stress() {
    let stack = TreiberStack::new();
    check_push_pop_stress(&stack, |c, v| c.push(v), |c| c.pop());
}

#[test]
fn test_ms_queue_push_pop_stress() {
    let queue = MsQueue::new();
    check_push_pop_stress(&queue, |c, v| c.push(v), |c| c.pop());
}

#[test]
fn test_seg_queue_push_pop_stress() {
    let queue = SegQueue::new();
    check_push_pop_stress(&queue, |c, v| c.push(v), |c| c.pop());
}
