mod common;

use common::Canary;
use haven::{HazardConfig, HazardDomain, Protect, Rcu};
use haven_collections::{MsQueue, OptimisticMsQueue};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

struct Flagged {
    value: u32,
    freed: Arc<AtomicBool>,
}

impl Drop for Flagged {
    fn drop(&mut self) {
        self.freed.store(true, Ordering::Release);
    }
}

#[test]
fn test_queue_fifo_order() {
    common::init_tracing();
    let domain = HazardDomain::with_defaults();
    let handle = domain.register().unwrap();
    let queue = MsQueue::new(domain.clone());

    assert!(queue.is_empty(&handle));
    queue.enqueue(1, &handle);
    queue.enqueue(2, &handle);
    assert!(!queue.is_empty(&handle));
    assert_eq!(queue.dequeue(&handle), Some(1));
    assert_eq!(queue.dequeue(&handle), Some(2));
    assert_eq!(queue.dequeue(&handle), None);
    assert!(queue.is_empty(&handle));
}

#[test]
fn test_queue_reuse_after_draining() {
    let rcu = Rcu::with_defaults();
    let handle = rcu.register().unwrap();
    let queue = MsQueue::new(rcu.clone());

    for round in 0..3 {
        for i in 0..50 {
            queue.enqueue(round * 100 + i, &handle);
        }
        for i in 0..50 {
            assert_eq!(queue.dequeue(&handle), Some(round * 100 + i));
        }
        assert_eq!(queue.dequeue(&handle), None);
    }
}

#[test]
fn test_queue_drop_frees_remaining_values() {
    let drops = Arc::new(AtomicUsize::new(0));
    let domain = HazardDomain::with_defaults();
    let handle = domain.register().unwrap();
    {
        let queue = MsQueue::new(domain.clone());
        for i in 0..8 {
            queue.enqueue(Canary::new(i, &drops), &handle);
        }
        assert_eq!(queue.dequeue(&handle).map(|c| c.get()), Some(0));
        assert_eq!(queue.dequeue(&handle).map(|c| c.get()), Some(1));
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 8);
}

#[test]
#[should_panic(expected = "different reclamation domain")]
fn test_queue_rejects_foreign_handle() {
    let queue: MsQueue<u8, Rcu> = MsQueue::new(Rcu::with_defaults());
    let other = Rcu::with_defaults();
    let handle = other.register().unwrap();
    queue.dequeue(&handle);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_queue_spsc_preserves_order() {
    const COUNT: usize = 20_000;

    let domain = HazardDomain::with_defaults();
    let queue = Arc::new(MsQueue::new(domain.clone()));

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
        match queue.dequeue(&handle) {
            Some(v) => {
                assert_eq!(v, expected);
                expected += 1;
            }
            None => thread::yield_now(),
        }
    }
    producer.join().unwrap();
    assert_eq!(queue.dequeue(&handle), None);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_queue_mpmc_keeps_per_producer_order() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 5_000;

    // Three slots is the smallest configuration the queue supports.
    let config = HazardConfig::builder().slots_per_thread(3).build().unwrap();
    let domain = HazardDomain::new(config);
    let drops = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(MsQueue::new(domain.clone()));
    let consumed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(PRODUCERS + CONSUMERS));
    let mut threads = Vec::new();

    for p in 0..PRODUCERS {
        let (queue, domain, barrier, drops) =
            (queue.clone(), domain.clone(), barrier.clone(), drops.clone());
        threads.push(thread::spawn(move || {
            let handle = domain.register().unwrap();
            barrier.wait();
            for i in 0..PER_PRODUCER {
                queue.enqueue(Canary::new(p * PER_PRODUCER + i, &drops), &handle);
            }
        }));
    }

    for _ in 0..CONSUMERS {
        let (queue, domain, barrier, consumed) =
            (queue.clone(), domain.clone(), barrier.clone(), consumed.clone());
        threads.push(thread::spawn(move || {
            let handle = domain.register().unwrap();
            barrier.wait();
            let mut last = vec![None; PRODUCERS];
            while consumed.load(Ordering::Acquire) < PRODUCERS * PER_PRODUCER {
                let Some(item) = queue.dequeue(&handle) else {
                    thread::yield_now();
                    continue;
                };
                let value = item.get();
                let producer = value / PER_PRODUCER;
                if let Some(prev) = last[producer] {
                    assert!(value > prev, "producer {producer} reordered");
                }
                last[producer] = Some(value);
                consumed.fetch_add(1, Ordering::AcqRel);
            }
        }));
    }

    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(consumed.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
    assert_eq!(drops.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
}

#[test]
fn test_queue_operations_inside_a_live_guard_keep_its_protection() {
    let domain = HazardDomain::with_defaults();
    let reader = domain.register().unwrap();
    let writer = domain.register().unwrap();
    let freed = Arc::new(AtomicBool::new(false));
    let shared = AtomicPtr::new(Box::into_raw(Box::new(Flagged {
        value: 23,
        freed: freed.clone(),
    })));
    let queue = MsQueue::new(domain.clone());
    let optimistic = OptimisticMsQueue::new(domain.clone());

    let guard = reader.pin();
    let node = guard.protect(0, &shared);
    for i in 0..6 {
        queue.enqueue(i, &reader);
        optimistic.enqueue(i, &reader);
    }
    assert_eq!(queue.dequeue(&reader), Some(0));
    assert_eq!(optimistic.dequeue(&reader), Some(0));
    assert!(reader.is_held(0));

    unsafe { writer.retire(shared.swap(ptr::null_mut(), Ordering::AcqRel)) };
    writer.scan();
    assert!(
        !freed.load(Ordering::Acquire),
        "node protected by a live guard was freed"
    );
    assert_eq!(unsafe { (*node).value }, 23);

    drop(guard);
    assert_eq!(writer.scan(), 1);
}
