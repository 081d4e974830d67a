mod common;

use common::Canary;
use haven::{HazardDomain, Rcu};
use haven_collections::optimistic_ms_queue::TAIL_LAG_THRESHOLD;
use haven_collections::OptimisticMsQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_optimistic_fifo_order() {
    let domain = HazardDomain::with_defaults();
    let handle = domain.register().unwrap();
    let queue = OptimisticMsQueue::new(domain.clone());

    queue.enqueue(1, &handle);
    queue.enqueue(2, &handle);
    assert_eq!(queue.dequeue(&handle), Some(1));
    assert_eq!(queue.dequeue(&handle), Some(2));
    assert_eq!(queue.dequeue(&handle), None);
    assert!(queue.is_empty(&handle));
}

#[test]
fn test_tail_advances_only_past_threshold() {
    common::init_tracing();
    let domain = HazardDomain::with_defaults();
    let handle = domain.register().unwrap();
    let queue = OptimisticMsQueue::new(domain.clone());
    assert_eq!(queue.tail_lag(&handle), 0);

    for i in 1..TAIL_LAG_THRESHOLD {
        queue.enqueue(i, &handle);
        assert_eq!(queue.tail_lag(&handle), i);
    }
    queue.enqueue(TAIL_LAG_THRESHOLD, &handle);
    assert_eq!(queue.tail_lag(&handle), 0);

    for i in 1..=TAIL_LAG_THRESHOLD {
        assert_eq!(queue.dequeue(&handle), Some(i));
    }
    assert_eq!(queue.dequeue(&handle), None);
}

#[test]
fn test_dequeue_helps_a_lagging_tail() {
    let rcu = Rcu::with_defaults();
    let handle = rcu.register().unwrap();
    let queue = OptimisticMsQueue::new(rcu.clone());

    queue.enqueue("only", &handle);
    assert_eq!(queue.tail_lag(&handle), 1);
    assert_eq!(queue.dequeue(&handle), Some("only"));
    assert_eq!(queue.tail_lag(&handle), 0);

    queue.enqueue("again", &handle);
    assert_eq!(queue.dequeue(&handle), Some("again"));
}

#[test]
fn test_optimistic_drop_frees_remaining_values() {
    let drops = Arc::new(AtomicUsize::new(0));
    let domain = HazardDomain::with_defaults();
    let handle = domain.register().unwrap();
    {
        let queue = OptimisticMsQueue::new(domain.clone());
        for i in 0..10 {
            queue.enqueue(Canary::new(i, &drops), &handle);
        }
        assert_eq!(queue.dequeue(&handle).map(|c| c.get()), Some(0));
    }
    assert_eq!(drops.load(Ordering::SeqCst), 10);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_optimistic_spsc_preserves_order() {
    const COUNT: usize = 20_000;

    let domain = HazardDomain::with_defaults();
    let queue = Arc::new(OptimisticMsQueue::new(domain.clone()));

    let producer = {
        let queue = queue.clone();
        let domain = domain.clone();
        thread::spawn(move || {
            let handle = domain.register().unwrap();
            for i in 0..COUNT {
                queue.enqueue(i, &handle);
            }
        })
    };

    let handle = domain.register().unwrap();
    let mut expected = 0;
    while expected < COUNT {
        if let Some(v) = queue.dequeue(&handle) {
            assert_eq!(v, expected);
            expected += 1;
        } else {
            thread::yield_now();
        }
    }
    producer.join().unwrap();
    assert!(queue.tail_lag(&handle) < TAIL_LAG_THRESHOLD);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_optimistic_mpmc_conserves_values() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 4_000;

    let rcu = Rcu::with_defaults();
    let queue = Arc::new(OptimisticMsQueue::new(rcu.clone()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let (queue, rcu, barrier) = (queue.clone(), rcu.clone(), barrier.clone());
            thread::spawn(move || {
                let handle = rcu.register().unwrap();
                barrier.wait();
                let mut sum = 0;
                for i in 0..PER_THREAD {
                    queue.enqueue(t * PER_THREAD + i, &handle);
                    if i % 3 != 0 {
                        sum += queue.dequeue(&handle).unwrap_or(0);
                    }
                }
                sum
            })
        })
        .collect();

    let mut total: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    let handle = rcu.register().unwrap();
    while let Some(v) = queue.dequeue(&handle) {
        total += v;
    }
    let n = THREADS * PER_THREAD;
    assert_eq!(total, n * (n - 1) / 2);
}
