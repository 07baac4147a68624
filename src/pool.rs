// Bounded, reusable worker pool.
//
// Workers park on a shared condition variable with a short timeout so a
// shutdown (the running flag dropping) is noticed within one period; joiners
// wait on a per-task condition variable the same way. The queue is a plain
// FIFO: sub-frame tasks within one frame are independent and the codec joins
// all of them before the next frame, so no further ordering is needed.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};

// Worker park period; shutdown is observed within one of these.
const WORKER_PARK: Duration = Duration::from_millis(1);

// Join-side wait period between completion-flag checks.
const JOIN_WAIT: Duration = Duration::from_micros(10);

type TaskFn = Box<dyn FnOnce() -> Result<u64> + Send + 'static>;

enum TaskState {
  Queued(TaskFn),
  Running,
  Done(Result<u64>),
  Taken,
}

struct TaskInner {
  state: Mutex<TaskState>,
  completed: Condvar,
}

// A handle to one unit of work. Executes at most once; `join` returns the
// task's result to exactly one caller.
#[derive(Clone)]
pub struct TaskHandle {
  inner: Arc<TaskInner>,
}

impl TaskHandle {
  fn new(f: TaskFn) -> Self {
    Self {
      inner: Arc::new(TaskInner {
        state: Mutex::new(TaskState::Queued(f)),
        completed: Condvar::new(),
      }),
    }
  }

  fn run(&self) {
    let f = {
      let mut state = self.inner.state.lock().unwrap();
      match mem::replace(&mut *state, TaskState::Running) {
        TaskState::Queued(f) => f,
        other => {
          // Someone already ran (or is running) this task.
          *state = other;
          return;
        }
      }
    };

    let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
      Ok(result) => result,
      Err(_) => Err(Error::TaskPanicked),
    };

    *self.inner.state.lock().unwrap() = TaskState::Done(result);
    self.inner.completed.notify_all();
  }

  // Wait for completion and take the result. A task's result can be taken
  // only once.
  pub fn join(&self) -> Result<u64> {
    let mut state = self.inner.state.lock().unwrap();

    loop {
      match *state {
        TaskState::Done(_) => break,
        TaskState::Taken => panic!("task joined twice"),
        _ => {}
      }

      let (next, _) = self.inner.completed.wait_timeout(state, JOIN_WAIT).unwrap();
      state = next;
    }

    match mem::replace(&mut *state, TaskState::Taken) {
      TaskState::Done(result) => result,
      _ => unreachable!(),
    }
  }

  // Wait for completion without taking the result.
  fn wait(&self) {
    let mut state = self.inner.state.lock().unwrap();

    loop {
      match *state {
        TaskState::Done(_) | TaskState::Taken => return,
        _ => {}
      }

      let (next, _) = self.inner.completed.wait_timeout(state, JOIN_WAIT).unwrap();
      state = next;
    }
  }
}

struct PoolShared {
  queue: Mutex<VecDeque<TaskHandle>>,
  work: Condvar,
  running: AtomicBool,
}

pub struct WorkerPool {
  shared: Arc<PoolShared>,
  workers: Vec<JoinHandle<()>>,
}

fn worker_loop(shared: Arc<PoolShared>) {
  while shared.running.load(Ordering::Acquire) {
    let task = {
      let mut queue = shared.queue.lock().unwrap();
      match queue.pop_front() {
        Some(task) => Some(task),
        None => {
          let _ = shared.work.wait_timeout(queue, WORKER_PARK).unwrap();
          None
        }
      }
    };

    if let Some(task) = task {
      task.run();
    }
  }
}

impl WorkerPool {
  pub fn new(threads: usize) -> Self {
    assert!(threads > 0);

    let shared = Arc::new(PoolShared {
      queue: Mutex::new(VecDeque::new()),
      work: Condvar::new(),
      running: AtomicBool::new(true),
    });

    let workers = (0..threads)
      .map(|_| {
        let shared = Arc::clone(&shared);
        thread::spawn(move || worker_loop(shared))
      })
      .collect();

    Self {
      shared: shared,
      workers: workers,
    }
  }

  // One worker per hardware thread.
  pub fn with_default_threads() -> Self {
    let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Self::new(threads)
  }

  pub fn create_task(f: impl FnOnce() -> Result<u64> + Send + 'static) -> TaskHandle {
    TaskHandle::new(Box::new(f))
  }

  pub fn enqueue(&self, task: &TaskHandle) {
    self.shared.queue.lock().unwrap().push_back(task.clone());
    self.shared.work.notify_one();
  }

  // Run a batch of borrowed tasks with a guaranteed join barrier: every task
  // spawned inside the closure completes before `scope` returns, on the
  // success, error, and unwind paths alike. The first task error (in spawn
  // order) wins over later ones; an error from the closure itself wins over
  // task errors.
  pub fn scope<'env, R, F>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut PoolScope<'_, 'env>) -> Result<R>,
  {
    let mut scope = PoolScope {
      pool: self,
      pending: Vec::new(),
      _env: PhantomData,
    };

    let result = f(&mut scope);
    let joined = scope.join_all();

    match result {
      Ok(value) => joined.map(|_| value),
      Err(e) => Err(e),
    }
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    self.shared.running.store(false, Ordering::Release);
    self.shared.work.notify_all();

    for worker in self.workers.drain(..) {
      let _ = worker.join();
    }
  }
}

// A dispatch scope over a pool. Tasks spawned here may borrow from the
// enclosing frame ('env), which is what lets sub-frame jobs share stripe
// views of one source buffer without copying.
pub struct PoolScope<'pool, 'env> {
  pool: &'pool WorkerPool,
  pending: Vec<TaskHandle>,
  _env: PhantomData<&'env mut &'env ()>,
}

impl<'pool, 'env> PoolScope<'pool, 'env> {
  pub fn spawn<F>(&mut self, f: F)
  where
    F: FnOnce() -> Result<u64> + Send + 'env,
  {
    let task: Box<dyn FnOnce() -> Result<u64> + Send + 'env> = Box::new(f);
    // SAFETY: the closure only ever runs while its borrows are live. Every
    // task spawned on this scope is driven to completion before the scope
    // ends: join_all on the success and error paths, Drop::drop on unwind.
    // The scope itself cannot be leaked by the caller, who only holds an
    // exclusive borrow of it.
    let task: TaskFn = unsafe { mem::transmute(task) };

    let handle = TaskHandle::new(task);
    self.pending.push(handle.clone());
    self.pool.enqueue(&handle);
  }

  pub fn join_all(&mut self) -> Result<()> {
    let mut first_err = None;

    for task in self.pending.drain(..) {
      if let Err(e) = task.join() {
        first_err.get_or_insert(e);
      }
    }

    match first_err {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

impl Drop for PoolScope<'_, '_> {
  fn drop(&mut self) {
    for task in self.pending.drain(..) {
      task.wait();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn join_returns_each_result_in_order() {
    // 4 workers, 100 tasks each returning its own index; joining in order
    // must return the matching index regardless of scheduling.
    let pool = WorkerPool::new(4);
    let tasks: Vec<TaskHandle> =
      (0..100u64).map(|i| WorkerPool::create_task(move || Ok(i))).collect();

    for task in &tasks {
      pool.enqueue(task);
    }

    for (i, task) in tasks.iter().enumerate() {
      assert_eq!(task.join().unwrap(), i as u64);
    }
  }

  #[test]
  fn scope_tasks_borrow_disjoint_slices() {
    let pool = WorkerPool::new(2);
    let mut data = vec![0u8; 64];
    let (a, b) = data.split_at_mut(32);

    pool
      .scope(|scope| {
        scope.spawn(move || {
          a.fill(1);
          Ok(0)
        });
        scope.spawn(move || {
          b.fill(2);
          Ok(0)
        });
        Ok(())
      })
      .unwrap();

    assert!(data[..32].iter().all(|&x| x == 1));
    assert!(data[32..].iter().all(|&x| x == 2));
  }

  #[test]
  fn scope_propagates_first_error() {
    let pool = WorkerPool::new(2);
    let result: Result<()> = pool.scope(|scope| {
      scope.spawn(|| Err(Error::EndOfStream));
      scope.spawn(|| Ok(0));
      Ok(())
    });

    assert!(matches!(result, Err(Error::EndOfStream)));
  }

  #[test]
  fn task_panic_is_reported() {
    let pool = WorkerPool::new(1);
    let task = WorkerPool::create_task(|| panic!("boom"));
    pool.enqueue(&task);
    assert!(matches!(task.join(), Err(Error::TaskPanicked)));
  }

  #[test]
  fn shutdown_is_prompt() {
    let pool = WorkerPool::new(4);
    let task = WorkerPool::create_task(|| Ok(7));
    pool.enqueue(&task);
    assert_eq!(task.join().unwrap(), 7);
    drop(pool);
  }
}
