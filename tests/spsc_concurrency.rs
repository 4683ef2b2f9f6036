// ==============================================
// SPSC QUEUE CONCURRENCY TESTS (integration)
// ==============================================
//
// Cross-thread behaviour of BoundedSpscQueue and BlockPool. These need real
// threads and cannot live inline.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use quantcore::ds::{BlockPool, BoundedSpscQueue};

// ==============================================
// Ordering: every value exactly once, in order
// ==============================================

mod fifo_delivery {
    use super::*;

    #[test]
    fn split_endpoints_deliver_in_order() {
        const N: u64 = 200_000;
        let (producer, consumer) = BoundedSpscQueue::new(64).split();

        let writer = thread::spawn(move || {
            for i in 0..N {
                let mut value = i;
                loop {
                    match producer.try_push(value) {
                        Ok(()) => break,
                        Err(back) => {
                            value = back;
                            thread::yield_now();
                        },
                    }
                }
            }
        });

        let mut expected = 0;
        while expected < N {
            match consumer.try_pop() {
                Some(value) => {
                    assert_eq!(value, expected, "value delivered out of order");
                    expected += 1;
                },
                None => thread::yield_now(),
            }
        }
        writer.join().unwrap();
        assert!(consumer.try_pop().is_none());
    }

    #[test]
    fn shared_queue_with_one_thread_per_side() {
        const N: usize = 50_000;
        let queue = Arc::new(BoundedSpscQueue::<String>::new(8));
        let barrier = Arc::new(Barrier::new(2));

        let producer_queue = Arc::clone(&queue);
        let producer_barrier = Arc::clone(&barrier);
        let writer = thread::spawn(move || {
            producer_barrier.wait();
            for i in 0..N {
                let mut item = i.to_string();
                while let Err(back) = producer_queue.try_push(item) {
                    item = back;
                    thread::yield_now();
                }
            }
        });

        barrier.wait();
        let mut received = Vec::with_capacity(N);
        while received.len() < N {
            if let Some(item) = queue.try_pop() {
                received.push(item);
            } else {
                thread::yield_now();
            }
        }
        writer.join().unwrap();

        for (i, item) in received.iter().enumerate() {
            assert_eq!(item, &i.to_string());
        }
        assert!(queue.is_empty());
    }
}

// ==============================================
// Drop: payloads left in the ring are released
// ==============================================

mod drop_in_flight {
    use super::*;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dropping_endpoints_drops_remaining_items() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (producer, consumer) = BoundedSpscQueue::new(16).split();
        for _ in 0..10 {
            assert!(producer.try_push(Tracked(Arc::clone(&drops))).is_ok());
        }
        drop(consumer.try_pop());
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        let handle = thread::spawn(move || drop(producer));
        handle.join().unwrap();
        drop(consumer);
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }
}

// ==============================================
// Block pool under contention
// ==============================================

mod block_pool_contention {
    use super::*;

    #[test]
    fn concurrent_allocations_are_unique_and_balanced() {
        let pool = Arc::new(BlockPool::new(32, 8).unwrap());
        let threads = 8;
        let per_thread = 500;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut held = Vec::with_capacity(per_thread);
                    for i in 0..per_thread {
                        let h = pool.allocate();
                        let tag = (t * per_thread + i) as u64;
                        pool.write(h, &tag.to_le_bytes()).unwrap();
                        held.push((h, tag));
                    }
                    for (h, tag) in &held {
                        let bytes = pool.read(*h).unwrap();
                        assert_eq!(u64::from_le_bytes(bytes[..8].try_into().unwrap()), *tag);
                    }
                    held.into_iter().map(|(h, _)| h.index()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for index in handle.join().unwrap() {
                assert!(seen.insert(index), "block {index} handed out twice");
            }
        }
        assert_eq!(pool.allocated_blocks(), threads * per_thread);
        assert!(pool.total_blocks() >= threads * per_thread);
    }

    #[test]
    fn churn_returns_every_block() {
        let pool = Arc::new(BlockPool::new(16, 4).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut rounds = 0;
                    while !stop.load(Ordering::Relaxed) || rounds < 100 {
                        let block = pool.allocate_scoped();
                        block.with_bytes(|bytes| bytes.fill(0x5A));
                        rounds += 1;
                    }
                })
            })
            .collect();

        thread::sleep(std::time::Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(pool.allocated_blocks(), 0);
        assert_eq!(pool.free_blocks(), pool.total_blocks());
    }
}
