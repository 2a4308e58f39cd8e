// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! A fixed-size worker pool with deferred start.
//!
//! Creating a [`ThreadPool`] does not spawn any threads; tasks may be queued
//! first and begin executing once [`ThreadPool::start`] is called. Every task
//! receives a [`ThreadWorker`] carrying the worker's identity, which callers
//! use to index per-thread resources (CRS transformers) and to draw random
//! numbers without sharing generator state.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use rand::SeedableRng as _;
use rand_xoshiro::Xoshiro256PlusPlus;

/// A boxed unit of work run on a pool worker.
pub type Task = Box<dyn FnOnce(&mut ThreadWorker) + Send + 'static>;

/// Identity and thread-local state of one pool worker.
#[derive(Debug)]
pub struct ThreadWorker {
    id: usize,
    /// Worker-owned RNG, seeded from the pool seed and the worker id so that
    /// repeated renders draw identical sample sequences.
    pub rng: Xoshiro256PlusPlus,
}

impl ThreadWorker {
    fn new(id: usize, base_seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(base_seed);
        for _ in 0..id {
            rng.long_jump();
        }
        Self { id, rng }
    }

    /// The worker's index in `0..n_threads`.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
}

struct Queue {
    tasks: VecDeque<Task>,
    stop: bool,
    started: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    task_cv: Condvar,
    pending_tasks: AtomicUsize,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
    /// Set when a task panicked; the submitter re-raises after draining so a
    /// failed frame surfaces instead of silently missing pixels.
    panicked: AtomicBool,
}

/// A pool of worker threads consuming a shared FIFO task queue.
pub struct ThreadPool {
    n_threads: usize,
    base_seed: u64,
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool with `n_threads` workers (at least one) without
    /// starting it.
    pub fn new(n_threads: usize) -> Self {
        Self::with_seed(n_threads, 0)
    }

    /// As [`Self::new`], seeding every worker RNG from `base_seed`.
    pub fn with_seed(n_threads: usize, base_seed: u64) -> Self {
        Self {
            n_threads: n_threads.max(1),
            base_seed,
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    tasks: VecDeque::new(),
                    stop: false,
                    started: false,
                }),
                task_cv: Condvar::new(),
                pending_tasks: AtomicUsize::new(0),
                wait_lock: Mutex::new(()),
                wait_cv: Condvar::new(),
                panicked: AtomicBool::new(false),
            }),
            workers: Vec::new(),
        }
    }

    #[inline]
    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Number of queued-or-running tasks.
    #[inline]
    pub fn n_pending_tasks(&self) -> usize {
        self.shared.pending_tasks.load(Ordering::Acquire)
    }

    /// Whether any task is queued or running.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.n_pending_tasks() != 0
    }

    /// Whether the workers have been spawned.
    pub fn is_running(&self) -> bool {
        self.lock_queue().started
    }

    /// Spawn the workers. Idempotent.
    pub fn start(&mut self) {
        {
            let mut queue = self.lock_queue();
            if queue.started {
                return;
            }
            queue.started = true;
            queue.stop = false;
        }

        for id in 0..self.n_threads {
            let shared = Arc::clone(&self.shared);
            let mut worker = ThreadWorker::new(id, self.base_seed);
            self.workers.push(thread::spawn(move || {
                worker_loop(&shared, &mut worker);
            }));
        }
    }

    /// Stop the pool: running tasks complete, queued tasks are dropped, and
    /// the workers are joined. The pool can be started again afterwards.
    pub fn stop(&mut self) {
        let dropped;
        {
            let mut queue = self.lock_queue();
            queue.stop = true;
            queue.started = false;
            dropped = queue.tasks.len();
            queue.tasks.clear();
        }
        self.shared
            .pending_tasks
            .fetch_sub(dropped, Ordering::AcqRel);
        self.shared.task_cv.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.shared.wait_cv.notify_all();
    }

    /// Queue a task for execution and wake one worker.
    pub fn add_task(&self, task: impl FnOnce(&mut ThreadWorker) + Send + 'static) {
        {
            let mut queue = self.lock_queue();
            self.shared.pending_tasks.fetch_add(1, Ordering::AcqRel);
            queue.tasks.push_back(Box::new(task));
        }
        self.shared.task_cv.notify_one();
    }

    /// Whether any task panicked since the last call; reading clears the
    /// flag.
    pub fn take_panicked(&self) -> bool {
        self.shared.panicked.swap(false, Ordering::AcqRel)
    }

    /// Block the calling thread until every queued task has completed.
    pub fn wait_completion(&self) {
        let mut guard = self
            .shared
            .wait_lock
            .lock()
            .expect("pool wait lock poisoned");
        while self.shared.pending_tasks.load(Ordering::Acquire) != 0 {
            guard = self
                .shared
                .wait_cv
                .wait(guard)
                .expect("pool wait lock poisoned");
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.shared.queue.lock().expect("pool queue lock poisoned")
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared, worker: &mut ThreadWorker) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("pool queue lock poisoned");
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.stop {
                    return;
                }
                queue = shared
                    .task_cv
                    .wait(queue)
                    .expect("pool queue lock poisoned");
            }
        };

        if catch_unwind(AssertUnwindSafe(|| task(worker))).is_err() {
            shared.panicked.store(true, Ordering::Release);
        }

        if shared.pending_tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Taking the wait lock orders this notification with a
            // concurrent check in wait_completion.
            let _guard = shared.wait_lock.lock().expect("pool wait lock poisoned");
            shared.wait_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn deferred_start_runs_queued_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut pool = ThreadPool::new(3);
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.add_task(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert!(!pool.is_running());
        assert_eq!(pool.n_pending_tasks(), 10);

        pool.start();
        pool.wait_completion();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert!(!pool.is_busy());
    }

    #[test]
    fn workers_have_distinct_ids() {
        let seen = Arc::new(Mutex::new(std::collections::HashSet::new()));
        let mut pool = ThreadPool::new(4);
        pool.start();
        for _ in 0..64 {
            let seen = Arc::clone(&seen);
            pool.add_task(move |worker| {
                seen.lock().unwrap().insert(worker.id());
                std::thread::sleep(std::time::Duration::from_millis(1));
            });
        }
        pool.wait_completion();
        for id in seen.lock().unwrap().iter() {
            assert!(*id < 4);
        }
    }

    #[test]
    fn worker_rngs_are_reproducible() {
        use rand::Rng as _;

        let draw = |seed: u64| -> Vec<u64> {
            let mut out = Vec::new();
            for id in 0..3 {
                out.push(ThreadWorker::new(id, seed).rng.gen());
            }
            out
        };
        assert_eq!(draw(42), draw(42));
        assert_ne!(draw(42), draw(43));

        // Distinct workers must not share a stream.
        let streams = draw(42);
        assert_ne!(streams[0], streams[1]);
    }

    #[test]
    fn start_is_idempotent() {
        let mut pool = ThreadPool::new(2);
        pool.start();
        pool.start();
        pool.add_task(|_| {});
        pool.wait_completion();
    }

    #[test]
    fn stop_drops_queued_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut pool = ThreadPool::new(1);
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.add_task(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        // Never started: stop must clear the queue without running anything.
        pool.stop();
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert_eq!(pool.n_pending_tasks(), 0);
    }
}
