// src/fiber/mod.rs

//! The fiber scheduler: cooperative tasks multiplexed over a fixed pool of
//! worker threads.
//!
//! Each worker owns a local deque it pops LIFO (the most recently woken
//! fiber is cache-hot); thieves steal FIFO from the other end. Wakes from
//! a worker thread land on that worker's local deque, wakes from anywhere
//! else go through the shared injector and unpark an idle worker. A fiber
//! parks by returning `Poll::Pending` from a suspension point after
//! leaving a wait node behind; whoever completes the node wakes the fiber
//! through its task's waker.

use crate::error::{Cause, Interrupted, JoinError};
use crate::internal::rng::FastRng;
use crate::internal::wake::WakeHandle;
use crate::sync_util;
use crossbeam_utils::CachePadded;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

pub mod timer;

mod task;

pub use timer::{sleep, sleep_until, Sleep};

pub(crate) use task::{consume_interrupt, current_task, interrupt_pending};

use task::{CurrentTaskGuard, Task, PARKED, RUNNING};

/// Configures a fiber before it is spawned.
#[derive(Debug, Default, Clone)]
pub struct FiberConfig {
  /// Name shown by diagnostics and the telemetry report.
  pub name: Option<String>,
}

impl FiberConfig {
  /// A config carrying only a name.
  pub fn named(name: impl Into<String>) -> Self {
    FiberConfig {
      name: Some(name.into()),
    }
  }
}

/// Builds a [`Scheduler`].
#[derive(Debug, Default)]
pub struct Builder {
  workers: Option<usize>,
  name: Option<String>,
}

impl Builder {
  /// A builder with default settings.
  pub fn new() -> Self {
    Builder::default()
  }

  /// Number of worker threads. Defaults to the available parallelism.
  pub fn workers(mut self, workers: usize) -> Self {
    assert!(workers > 0, "a scheduler needs at least one worker");
    self.workers = Some(workers);
    self
  }

  /// Thread-name prefix for the workers.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn build(self) -> Scheduler {
    let workers = self.workers.unwrap_or_else(|| {
      std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
    });
    let name = self.name.unwrap_or_else(|| "strand".to_string());
    Scheduler::start(name, workers)
  }
}

/// Parks an idle worker until new work arrives.
struct Parker {
  lock: Mutex<bool>,
  cond: Condvar,
  parked: AtomicBool,
}

impl Parker {
  fn new() -> Self {
    Parker {
      lock: Mutex::new(false),
      cond: Condvar::new(),
      parked: AtomicBool::new(false),
    }
  }

  fn park(&self) {
    let mut notified = self.lock.lock();
    while !*notified {
      self.cond.wait(&mut notified);
    }
    *notified = false;
  }

  fn unpark(&self) {
    let mut notified = self.lock.lock();
    *notified = true;
    self.cond.notify_one();
  }
}

type LocalQueue = Arc<Mutex<VecDeque<Arc<Task>>>>;

pub(crate) struct SchedShared {
  name: String,
  injector: CachePadded<Mutex<VecDeque<Arc<Task>>>>,
  locals: Vec<LocalQueue>,
  parkers: Vec<Arc<Parker>>,
  shutdown: AtomicBool,
  next_id: AtomicU64,
  rng: FastRng,
}

impl SchedShared {
  /// Makes `task` runnable: on a worker thread of this scheduler, push to
  /// that worker's local deque; anywhere else, inject and unpark someone.
  pub(crate) fn enqueue(self: &Arc<Self>, task: Arc<Task>) {
    if let Some(index) = current_worker_index(self) {
      self.locals[index].lock().push_back(task);
      // A parked sibling can steal this while we finish the current poll.
      self.unpark_one();
      return;
    }
    self.injector.lock().push_back(task);
    self.unpark_one();
  }

  fn unpark_one(&self) {
    for parker in &self.parkers {
      if parker.parked.swap(false, Ordering::AcqRel) {
        parker.unpark();
        return;
      }
    }
  }

  fn unpark_all(&self) {
    for parker in &self.parkers {
      parker.parked.store(false, Ordering::Release);
      parker.unpark();
    }
  }

  fn has_injected(&self) -> bool {
    !self.injector.lock().is_empty()
  }
}

impl Drop for SchedShared {
  fn drop(&mut self) {
    self.shutdown.store(true, Ordering::Release);
    // Whatever was still queued terminates with a cause so joiners do not
    // hang on a torn-down scheduler.
    let cause = Cause::msg("scheduler shut down");
    let mut queued: Vec<Arc<Task>> = self.injector.lock().drain(..).collect();
    for local in &self.locals {
      queued.extend(local.lock().drain(..));
    }
    for task in queued {
      task.terminate(Some(cause.clone()));
    }
    // Workers idle at their parkers only re-check the upgrade after a
    // wake; the unpark is sticky, so even one caught between publishing
    // idleness and parking still wakes, loops, and exits.
    self.unpark_all();
  }
}

thread_local! {
  static CURRENT_WORKER: std::cell::RefCell<Option<(Weak<SchedShared>, usize)>> =
    const { std::cell::RefCell::new(None) };
}

fn current_worker_index(shared: &Arc<SchedShared>) -> Option<usize> {
  CURRENT_WORKER.with(|cell| {
    let borrow = cell.borrow();
    let (weak, index) = borrow.as_ref()?;
    let current = weak.upgrade()?;
    Arc::ptr_eq(&current, shared).then_some(*index)
  })
}

/// A handle to a fiber scheduler. Clones share the same worker pool.
#[derive(Clone)]
pub struct Scheduler {
  shared: Arc<SchedShared>,
}

impl fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("name", &self.shared.name)
      .field("workers", &self.shared.locals.len())
      .finish()
  }
}

static GLOBAL: Lazy<Scheduler> = Lazy::new(|| Builder::new().name("strand-global").build());

impl Scheduler {
  /// Starts configuring a scheduler.
  pub fn builder() -> Builder {
    Builder::new()
  }

  /// A scheduler with default settings.
  pub fn new() -> Scheduler {
    Builder::new().build()
  }

  /// The lazily initialized process-global default scheduler.
  pub fn global() -> &'static Scheduler {
    &GLOBAL
  }

  fn start(name: String, workers: usize) -> Scheduler {
    let locals: Vec<LocalQueue> = (0..workers)
      .map(|_| Arc::new(Mutex::new(VecDeque::new())))
      .collect();
    let parkers: Vec<Arc<Parker>> = (0..workers).map(|_| Arc::new(Parker::new())).collect();
    let shared = Arc::new(SchedShared {
      name: name.clone(),
      injector: CachePadded::new(Mutex::new(VecDeque::new())),
      locals,
      parkers,
      shutdown: AtomicBool::new(false),
      next_id: AtomicU64::new(1),
      rng: FastRng::from_entropy(),
    });

    for index in 0..workers {
      let weak = Arc::downgrade(&shared);
      let local = Arc::clone(&shared.locals[index]);
      let parker = Arc::clone(&shared.parkers[index]);
      std::thread::Builder::new()
        .name(format!("{name}-worker-{index}"))
        .spawn(move || worker_loop(weak, local, parker, index))
        .expect("failed to spawn a scheduler worker");
    }
    log::debug!("scheduler {name} started with {workers} workers");
    Scheduler { shared }
  }

  /// Spawns a fiber running `fut` on this scheduler.
  pub fn spawn<F>(&self, fut: F) -> FiberHandle<F::Output>
  where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
  {
    self.spawn_with(FiberConfig::default(), fut)
  }

  /// Spawns a configured fiber.
  pub fn spawn_with<F>(&self, config: FiberConfig, fut: F) -> FiberHandle<F::Output>
  where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
  {
    let result: Arc<Mutex<Option<F::Output>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&result);
    let wrapped = async move {
      let value = fut.await;
      *slot.lock() = Some(value);
    };
    let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
    let task = Arc::new(Task::new(
      id,
      config.name,
      Arc::downgrade(&self.shared),
      Box::pin(wrapped),
    ));
    if self.shared.shutdown.load(Ordering::Acquire) {
      task.terminate(Some(Cause::msg("scheduler shut down")));
    } else {
      task.schedule();
    }
    FiberHandle {
      fiber: Fiber {
        task,
      },
      result,
    }
  }

  /// Stops the workers. Queued fibers terminate with a "scheduler shut
  /// down" cause; parked fibers are abandoned.
  pub fn shutdown(&self) {
    self.shared.shutdown.store(true, Ordering::Release);
    self.shared.unpark_all();
  }

  /// The scheduler's name (worker threads carry it as a prefix).
  pub fn name(&self) -> &str {
    &self.shared.name
  }

  /// Number of worker threads.
  pub fn worker_count(&self) -> usize {
    self.shared.locals.len()
  }
}

impl Default for Scheduler {
  fn default() -> Self {
    Scheduler::new()
  }
}

/// Spawns a fiber on the process-global scheduler.
pub fn spawn<F>(fut: F) -> FiberHandle<F::Output>
where
  F: Future + Send + 'static,
  F::Output: Send + 'static,
{
  Scheduler::global().spawn(fut)
}

/// Spawns a named fiber on the process-global scheduler.
pub fn spawn_named<F>(name: impl Into<String>, fut: F) -> FiberHandle<F::Output>
where
  F: Future + Send + 'static,
  F::Output: Send + 'static,
{
  Scheduler::global().spawn_with(FiberConfig::named(name), fut)
}

fn worker_loop(
  shared: Weak<SchedShared>,
  local: LocalQueue,
  parker: Arc<Parker>,
  index: usize,
) {
  CURRENT_WORKER.with(|cell| {
    *cell.borrow_mut() = Some((Weak::clone(&shared), index));
  });
  log::trace!("worker {index} up");

  loop {
    let Some(strong) = shared.upgrade() else {
      break;
    };
    if strong.shutdown.load(Ordering::Acquire) {
      break;
    }

    // Local LIFO first, then the injector, then steal FIFO from a peer.
    let task = local
      .lock()
      .pop_back()
      .or_else(|| strong.injector.lock().pop_front())
      .or_else(|| steal(&strong, index));

    match task {
      Some(task) => run_task(&strong, task),
      None => {
        parker.parked.store(true, Ordering::Release);
        // Re-check after publishing idleness; an enqueue that missed the
        // flag must not leave us parked on a non-empty injector.
        if strong.has_injected() || !local.lock().is_empty() {
          parker.parked.store(false, Ordering::Release);
          continue;
        }
        drop(strong);
        parker.park();
      }
    }
  }
  log::trace!("worker {index} down");
}

fn steal(shared: &Arc<SchedShared>, thief: usize) -> Option<Arc<Task>> {
  let n = shared.locals.len();
  if n <= 1 {
    return None;
  }
  let start = shared.rng.gen_below(n);
  for offset in 0..n {
    let victim = (start + offset) % n;
    if victim == thief {
      continue;
    }
    if let Some(task) = shared.locals[victim].lock().pop_front() {
      return Some(task);
    }
  }
  None
}

fn run_task(shared: &Arc<SchedShared>, task: Arc<Task>) {
  let Some(mut fut) = task.future.lock().take() else {
    // Another worker is polling it right now; it re-enqueues on restore.
    task.mark_missed();
    return;
  };
  task.clear_notified();
  task.set_state(RUNNING);

  let waker = Waker::from(Arc::clone(&task));
  let mut cx = Context::from_waker(&waker);
  let guard = CurrentTaskGuard::enter(Arc::clone(&task));
  let poll = catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx)));
  drop(guard);

  match poll {
    Ok(Poll::Ready(())) => task.terminate(None),
    Ok(Poll::Pending) => {
      task.set_state(PARKED);
      *task.future.lock() = Some(fut);
      if task.take_missed() {
        shared.enqueue(Arc::clone(&task));
      }
    }
    Err(payload) => {
      log::warn!(
        "fiber {} ({:?}) terminated by panic",
        task.id,
        task.name.as_deref().unwrap_or("unnamed")
      );
      task.terminate(Some(Cause::from_panic(payload)));
    }
  }
}

/// A lightweight reference to a fiber: identity, liveness, interrupt.
#[derive(Clone)]
pub struct Fiber {
  task: Arc<Task>,
}

impl fmt::Debug for Fiber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Fiber")
      .field("id", &self.task.id)
      .field("name", &self.task.name)
      .field("state", &self.task.state())
      .finish()
  }
}

impl Fiber {
  /// Scheduler-assigned fiber id.
  pub fn id(&self) -> u64 {
    self.task.id
  }

  /// The name given at spawn, if any.
  pub fn name(&self) -> Option<&str> {
    self.task.name.as_deref()
  }

  /// `true` until the fiber has terminated.
  pub fn is_alive(&self) -> bool {
    !self.task.is_terminated()
  }

  /// Sets the fiber's edge-triggered interrupt; the next suspension point
  /// fails with the `Interrupted` variant of its operation.
  pub fn interrupt(&self) {
    self.task.interrupt();
  }
}

/// The fiber currently running on this thread, if any.
pub fn current() -> Option<Fiber> {
  current_task().map(|task| Fiber { task })
}

/// Owner handle for a spawned fiber: join it (blocking or as a future),
/// interrupt it, poll its state.
pub struct FiberHandle<T> {
  fiber: Fiber,
  result: Arc<Mutex<Option<T>>>,
}

impl<T> fmt::Debug for FiberHandle<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FiberHandle").field("fiber", &self.fiber).finish()
  }
}

impl<T> FiberHandle<T> {
  /// The underlying fiber reference.
  pub fn fiber(&self) -> &Fiber {
    &self.fiber
  }

  /// `true` once the fiber has terminated (with a value or a cause).
  pub fn is_done(&self) -> bool {
    self.fiber.task.is_terminated()
  }

  /// Interrupts the fiber (see [`Fiber::interrupt`]).
  pub fn interrupt(&self) {
    self.fiber.interrupt();
  }

  fn outcome(&self) -> Result<T, JoinError> {
    if let Some(value) = self.result.lock().take() {
      return Ok(value);
    }
    let cause = self
      .fiber
      .task
      .termination_cause()
      .unwrap_or_else(|| Cause::msg("fiber result already taken"));
    Err(JoinError::Failed(cause))
  }

  /// Parks the calling thread until the fiber terminates, then returns its
  /// value or re-raises its cause.
  pub fn join(self) -> Result<T, JoinError> {
    let task = &self.fiber.task;
    if !task.is_terminated() {
      task.add_join_waiter(WakeHandle::current_thread());
      sync_util::adaptive_wait(|| task.is_terminated());
    }
    self.outcome()
  }

  /// Like [`FiberHandle::join`], bounded by a timeout.
  pub fn join_timeout(&self, timeout: Duration) -> Result<T, JoinError> {
    self.join_deadline(Instant::now() + timeout)
  }

  pub(crate) fn join_deadline(&self, deadline: Instant) -> Result<T, JoinError> {
    let task = &self.fiber.task;
    if !task.is_terminated() {
      task.add_join_waiter(WakeHandle::current_thread());
      if !sync_util::adaptive_wait_deadline(|| task.is_terminated(), deadline) {
        return Err(JoinError::Timeout);
      }
    }
    self.outcome()
  }
}

impl<T> Future for FiberHandle<T> {
  type Output = Result<T, JoinError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    // Join is a suspension point.
    if interrupt_pending() {
      consume_interrupt();
      return Poll::Ready(Err(JoinError::Interrupted));
    }
    let task = &self.fiber.task;
    if task.is_terminated() {
      return Poll::Ready(self.outcome());
    }
    task.add_join_waiter(WakeHandle::Task(cx.waker().clone()));
    if task.is_terminated() {
      return Poll::Ready(self.outcome());
    }
    Poll::Pending
  }
}

/// Future that yields the worker once, rescheduling the fiber at the back
/// of the wake order.
#[must_use = "futures do nothing unless you .await or poll them"]
#[derive(Debug, Default)]
pub struct YieldNow {
  yielded: bool,
}

impl Future for YieldNow {
  type Output = Result<(), Interrupted>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    if interrupt_pending() {
      consume_interrupt();
      return Poll::Ready(Err(Interrupted));
    }
    if self.yielded {
      Poll::Ready(Ok(()))
    } else {
      self.yielded = true;
      cx.waker().wake_by_ref();
      Poll::Pending
    }
  }
}

/// Explicitly yields the current fiber.
pub fn yield_now() -> YieldNow {
  YieldNow::default()
}
