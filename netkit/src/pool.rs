//! Bounded worker pool with lazy growth.
//!
//! The pool starts with a fixed number of workers and grows one worker
//! at a time, only when a task is submitted while no worker is free,
//! up to a hard maximum. Workers are never retired before the pool
//! itself shuts down.

use std::{
  collections::VecDeque,
  sync::{
    Arc, Condvar, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use crossbeam_channel::{Receiver, bounded};
use log::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
  queue: Mutex<VecDeque<Job>>,
  new_job: Condvar,
  active: AtomicBool,
}

/// Handle to a submitted task's eventual result.
///
/// The result arrives over a single-slot channel; if the pool shuts
/// down before the task ran, the channel closes and waiting yields
/// `None`.
pub struct TaskHandle<T> {
  result: Receiver<T>,
}

impl<T> TaskHandle<T> {
  /// Blocks until the task finished, or `None` if it was abandoned.
  pub fn wait(self) -> Option<T> {
    self.result.recv().ok()
  }

  /// The result if the task already finished.
  pub fn try_wait(&self) -> Option<T> {
    self.result.try_recv().ok()
  }

  /// Waits up to `timeout` for the result.
  pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
    self.result.recv_timeout(timeout).ok()
  }
}

/// Bounded, lazily growing pool of background workers.
pub struct WorkerPool {
  shared: Arc<PoolShared>,
  workers: Mutex<Vec<JoinHandle<()>>>,
  max_workers: usize,
}

impl WorkerPool {
  /// Creates a pool with `start_workers` threads, growable up to
  /// `max_workers`.
  ///
  /// # Panics
  ///
  /// Panics if `max_workers` is zero or below `start_workers`.
  pub fn new(start_workers: usize, max_workers: usize) -> Self {
    assert!(max_workers > 0, "pool needs at least one worker slot");
    assert!(max_workers >= start_workers, "max_workers below start_workers");

    let shared = Arc::new(PoolShared {
      queue: Mutex::new(VecDeque::new()),
      new_job: Condvar::new(),
      active: AtomicBool::new(true),
    });
    let pool = Self {
      shared,
      workers: Mutex::new(Vec::with_capacity(max_workers)),
      max_workers,
    };
    {
      let mut workers = pool.workers.lock().unwrap();
      for _ in 0..start_workers {
        workers.push(pool.spawn_worker());
      }
    }
    pool
  }

  /// Current number of worker threads.
  pub fn worker_count(&self) -> usize {
    self.workers.lock().unwrap().len()
  }

  /// Number of tasks waiting for a worker.
  pub fn queued_tasks(&self) -> usize {
    self.shared.queue.lock().unwrap().len()
  }

  /// Enqueues `task` and returns a handle to its result.
  ///
  /// If every worker is presumed busy (queued tasks have caught up with
  /// the worker count) and the pool is below its maximum, one extra
  /// worker is spawned first.
  pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
  where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
  {
    let queued = self.queued_tasks();
    {
      let mut workers = self.workers.lock().unwrap();
      if workers.len().saturating_sub(queued) == 0 && workers.len() < self.max_workers {
        trace!("growing worker pool to {} workers", workers.len() + 1);
        let handle = self.spawn_worker();
        workers.push(handle);
      }
    }

    let (tx, rx) = bounded(1);
    let job: Job = Box::new(move || {
      // The handle may have been dropped; the result is discarded then.
      let _ = tx.send(task());
    });
    let mut queue = self.shared.queue.lock().unwrap();
    queue.push_back(job);
    drop(queue);
    self.shared.new_job.notify_one();

    TaskHandle { result: rx }
  }

  fn spawn_worker(&self) -> JoinHandle<()> {
    let shared = Arc::clone(&self.shared);
    thread::spawn(move || {
      loop {
        let job = {
          let mut queue = shared.queue.lock().unwrap();
          loop {
            if !shared.active.load(Ordering::Acquire) {
              return;
            }
            if let Some(job) = queue.pop_front() {
              break job;
            }
            queue = shared.new_job.wait(queue).unwrap();
          }
        };
        job();
      }
    })
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    self.shared.active.store(false, Ordering::Release);
    // Take the queue lock once so no worker can be between its active
    // check and the condvar wait when the wakeup goes out.
    drop(self.shared.queue.lock().unwrap());
    self.shared.new_job.notify_all();
    for worker in self.workers.get_mut().unwrap().drain(..) {
      let _ = worker.join();
    }
  }
}
