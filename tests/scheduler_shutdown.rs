// ==============================================
// TASK SCHEDULER TESTS (integration)
// ==============================================
//
// Shutdown, draining and fault isolation of TaskScheduler across threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use quantcore::error::{SchedulerError, TaskError};
use quantcore::runtime::TaskScheduler;

// ==============================================
// wait_all / shutdown
// ==============================================

mod draining {
    use super::*;

    #[test]
    fn wait_all_returns_after_every_task_ran() {
        let scheduler = TaskScheduler::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..1_000 {
            let counter = Arc::clone(&counter);
            let _ = scheduler
                .submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
        scheduler.wait_all();
        assert_eq!(counter.load(Ordering::Relaxed), 1_000);
        assert_eq!(scheduler.pending_tasks(), 0);
        assert_eq!(scheduler.active_tasks(), 0);
        assert_eq!(scheduler.completed_tasks(), 1_000);
    }

    #[test]
    fn drop_runs_queued_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = TaskScheduler::new(2).unwrap();
            for _ in 0..100 {
                let counter = Arc::clone(&counter);
                let _ = scheduler
                    .submit(move || {
                        thread::sleep(Duration::from_micros(50));
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn every_concurrent_shutdown_caller_waits_for_workers() {
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let finished = Arc::new(AtomicBool::new(false));
        {
            let finished = Arc::clone(&finished);
            let _ = scheduler
                .submit(move || {
                    thread::sleep(Duration::from_millis(200));
                    finished.store(true, Ordering::SeqCst);
                })
                .unwrap();
        }
        while scheduler.active_tasks() == 0 {
            thread::yield_now();
        }

        let barrier = Arc::new(Barrier::new(3));
        let callers: Vec<_> = (0..3)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                let finished = Arc::clone(&finished);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    scheduler.shutdown();
                    finished.load(Ordering::SeqCst)
                })
            })
            .collect();
        for caller in callers {
            assert!(caller.join().unwrap(), "shutdown returned before the running task finished");
        }
        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[test]
    fn concurrent_submit_and_shutdown_never_loses_accepted_tasks() {
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let ran = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(5));

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                let ran = Arc::clone(&ran);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut accepted = 0usize;
                    for _ in 0..500 {
                        let ran = Arc::clone(&ran);
                        match scheduler.submit(move || {
                            ran.fetch_add(1, Ordering::Relaxed);
                        }) {
                            Ok(_) => accepted += 1,
                            Err(SchedulerError::ShutDown) => break,
                            Err(err) => panic!("unexpected error: {err}"),
                        }
                    }
                    accepted
                })
            })
            .collect();

        barrier.wait();
        thread::sleep(Duration::from_millis(1));
        scheduler.shutdown();

        let accepted: usize = submitters.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(ran.load(Ordering::Relaxed), accepted);
    }
}

// ==============================================
// Fault isolation
// ==============================================

mod panics {
    use super::*;

    #[test]
    fn panicking_tasks_do_not_shrink_the_pool() {
        let scheduler = TaskScheduler::new(2).unwrap();
        let failures: Vec<_> = (0..10)
            .map(|i| scheduler.submit(move || -> u32 { panic!("task {i} failed") }).unwrap())
            .collect();
        for (i, handle) in failures.into_iter().enumerate() {
            assert_eq!(handle.get(), Err(TaskError::Panicked(format!("task {i} failed"))));
        }

        let results: Vec<_> = (0..10u32)
            .map(|i| scheduler.submit(move || i + 1).unwrap())
            .map(|h| h.get().unwrap())
            .collect();
        assert_eq!(results, (1..=10).collect::<Vec<_>>());
        assert_eq!(scheduler.thread_count(), 2);
    }
}

// ==============================================
// Nested submission
// ==============================================

mod nested {
    use super::*;

    #[test]
    fn tasks_can_submit_follow_up_work() {
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let inner = Arc::clone(&scheduler);
        let outer = scheduler
            .submit(move || inner.submit(|| 21 * 2).map(|h| h.get()))
            .unwrap();
        assert_eq!(outer.get().unwrap().unwrap(), Ok(42));
    }
}
