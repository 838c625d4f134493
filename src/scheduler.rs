//! Work-stealing thread pool with priority, delayed, and affinity
//! dispatch.
//!
//! N workers each own a small deque and a semaphore; two dispatcher
//! threads feed them. The priority dispatcher drains a max-heap of
//! submitted jobs into idle workers (the pending list). The lazy
//! dispatcher sleeps until the earliest deadline in a min-heap and then
//! dispatches directly, falling back to a maximum-priority submission when
//! every worker is busy. Affinity submissions bypass both dispatchers and
//! land on one specific worker's deque.
//!
//! A worker that consumes a dispatcher-assigned job re-enters the pending
//! list afterwards and pokes the priority dispatcher, which is what keeps
//! queued work flowing once all workers were busy.
//!
//! Shutdown drops queued jobs; in-flight jobs finish. Jobs are not
//! individually cancellable.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

const MIN_WORKERS: usize = 2;
const LAZY_FALLBACK_PRIORITY: usize = usize::MAX;

/// Counting semaphore over a mutex and condvar.
struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Semaphore {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Returns false if the deadline passed without a permit.
    fn try_acquire_until(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock().unwrap();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(count, deadline - now).unwrap();
            count = guard;
        }
    }

    fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }
}

/// Opaque capture of a worker's thread identity, taken with
/// [`Scheduler::capture_context`] from inside a running job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Context {
    thread_id: ThreadId,
}

struct PriorityTask {
    priority: usize,
    /// Submission order; ties on priority resolve LIFO.
    seq: u64,
    job: Job,
}

impl PartialEq for PriorityTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for PriorityTask {}
impl PartialOrd for PriorityTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PriorityTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct LazyTask {
    deadline: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for LazyTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for LazyTask {}
impl PartialOrd for LazyTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for LazyTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: the heap's max is the earliest deadline.
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

struct WorkerState {
    queue: VecDeque<Job>,
    /// Set by dispatcher pushes: re-enter the pending list after the next
    /// job.
    return_to_pending: bool,
}

struct Worker {
    state: Mutex<WorkerState>,
    semaphore: Semaphore,
    thread_id: OnceLock<ThreadId>,
}

impl Worker {
    fn new() -> Self {
        Worker {
            state: Mutex::new(WorkerState {
                queue: VecDeque::new(),
                return_to_pending: false,
            }),
            semaphore: Semaphore::new(),
            thread_id: OnceLock::new(),
        }
    }

    /// Direct submission, used for affinity; the worker stays off the
    /// pending list.
    fn push(&self, job: Job) {
        self.state.lock().unwrap().queue.push_back(job);
        self.semaphore.release();
    }

    /// Dispatcher submission: the worker returns to the pending list
    /// after consuming it.
    fn push_dispatched(&self, job: Job) {
        {
            let mut state = self.state.lock().unwrap();
            state.queue.push_back(job);
            state.return_to_pending = true;
        }
        self.semaphore.release();
    }
}

struct Inner {
    workers: Vec<Worker>,
    /// Indices of idle workers awaiting dispatch.
    pending: Mutex<Vec<usize>>,
    priority_queue: Mutex<BinaryHeap<PriorityTask>>,
    priority_sem: Semaphore,
    lazy_queue: Mutex<BinaryHeap<LazyTask>>,
    lazy_sem: Semaphore,
    submit_seq: AtomicU64,
    exit: AtomicBool,
}

impl Inner {
    fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    fn next_seq(&self) -> u64 {
        self.submit_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn submit_job(&self, job: Job, priority: usize) {
        let seq = self.next_seq();
        self.priority_queue
            .lock()
            .unwrap()
            .push(PriorityTask { priority, seq, job });
        self.priority_sem.release();
    }

    /// Hands the job to an idle worker, or gives it back.
    fn try_dispatch(&self, job: Job) -> std::result::Result<(), Job> {
        let index = {
            let mut pending = self.pending.lock().unwrap();
            match pending.pop() {
                Some(index) => index,
                None => return Err(job),
            }
        };
        self.workers[index].push_dispatched(job);
        Ok(())
    }

    fn priority_loop(&self) {
        loop {
            self.priority_sem.acquire();
            if self.exit_requested() {
                break;
            }
            let Some(task) = self.priority_queue.lock().unwrap().pop() else {
                continue;
            };
            if let Err(job) = self.try_dispatch(task.job) {
                // Every worker is busy. Requeue; the next worker to go
                // idle re-releases the semaphore.
                self.priority_queue.lock().unwrap().push(PriorityTask {
                    priority: task.priority,
                    seq: task.seq,
                    job,
                });
            }
        }
    }

    fn lazy_loop(&self) {
        loop {
            self.lazy_sem.acquire();
            if self.exit_requested() {
                break;
            }

            enum Step {
                Run(Job),
                Sleep(Instant),
            }
            let step = {
                let mut queue = self.lazy_queue.lock().unwrap();
                match queue.peek() {
                    None => continue,
                    Some(top) if top.deadline <= Instant::now() => {
                        let task = queue.pop().expect("peeked");
                        if !queue.is_empty() {
                            self.lazy_sem.release();
                        }
                        Step::Run(task.job)
                    }
                    Some(top) => Step::Sleep(top.deadline),
                }
            };

            match step {
                Step::Run(job) => {
                    if let Err(job) = self.try_dispatch(job) {
                        // Overdue with no idle worker: jump the priority
                        // queue at maximum priority.
                        self.submit_job(job, LAZY_FALLBACK_PRIORITY);
                    }
                }
                Step::Sleep(deadline) => {
                    // Wake at the deadline (or earlier on a new
                    // submission) and re-examine the heap.
                    let _ = self.lazy_sem.try_acquire_until(deadline);
                    self.lazy_sem.release();
                }
            }
        }
    }

    fn worker_loop(&self, index: usize) {
        let worker = &self.workers[index];
        let _ = worker.thread_id.set(thread::current().id());
        loop {
            worker.semaphore.acquire();
            if self.exit_requested() {
                break;
            }
            let job = {
                let mut state = worker.state.lock().unwrap();
                match state.queue.pop_front() {
                    Some(job) => job,
                    None => continue,
                }
            };

            job();

            let return_to_pending =
                std::mem::take(&mut worker.state.lock().unwrap().return_to_pending);
            if return_to_pending {
                self.pending.lock().unwrap().push(index);
                self.priority_sem.release();
            }
        }
    }
}

pub struct Scheduler {
    inner: Arc<Inner>,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// A pool of worker threads plus the two dispatcher threads. The
    /// requested count is floored to at least
    /// `max(hardware parallelism, 2)`, so a small `num_workers` (zero
    /// included) yields the hardware default rather than being honored.
    pub fn new(num_workers: usize) -> Self {
        let hw = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let count = hw.max(num_workers).max(MIN_WORKERS);

        let inner = Arc::new(Inner {
            workers: (0..count).map(|_| Worker::new()).collect(),
            pending: Mutex::new((0..count).collect()),
            priority_queue: Mutex::new(BinaryHeap::new()),
            priority_sem: Semaphore::new(),
            lazy_queue: Mutex::new(BinaryHeap::new()),
            lazy_sem: Semaphore::new(),
            submit_seq: AtomicU64::new(0),
            exit: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(count + 2);
        for index in 0..count {
            let inner = Arc::clone(&inner);
            threads.push(
                thread::Builder::new()
                    .name(format!("cinderdb-worker-{index}"))
                    .spawn(move || inner.worker_loop(index))
                    .expect("spawn worker thread"),
            );
        }
        {
            let inner = Arc::clone(&inner);
            threads.push(
                thread::Builder::new()
                    .name("cinderdb-priority".to_string())
                    .spawn(move || inner.priority_loop())
                    .expect("spawn priority dispatcher"),
            );
        }
        {
            let inner = Arc::clone(&inner);
            threads.push(
                thread::Builder::new()
                    .name("cinderdb-lazy".to_string())
                    .spawn(move || inner.lazy_loop())
                    .expect("spawn lazy dispatcher"),
            );
        }

        Scheduler { inner, threads }
    }

    /// The calling thread's identity, for later [`submit_in`]. Meaningful
    /// only when called from inside a job running on this pool.
    ///
    /// [`submit_in`]: Scheduler::submit_in
    pub fn capture_context() -> Context {
        Context {
            thread_id: thread::current().id(),
        }
    }

    /// Queues `job`; higher `priority` runs first, ties run LIFO.
    pub fn submit(&self, job: Job, priority: usize) {
        self.inner.submit_job(job, priority);
    }

    /// Runs `job` no earlier than `delay` from now.
    pub fn submit_after(&self, delay: Duration, job: Job) {
        self.submit_at(Instant::now() + delay, job);
    }

    /// Runs `job` no earlier than `deadline`.
    pub fn submit_at(&self, deadline: Instant, job: Job) {
        let seq = self.inner.next_seq();
        self.inner
            .lazy_queue
            .lock()
            .unwrap()
            .push(LazyTask { deadline, seq, job });
        self.inner.lazy_sem.release();
    }

    /// Runs `job` on the worker identified by `ctx` (continuation on the
    /// same thread, for cache locality). Falls back to the priority path
    /// when the context names no live worker.
    pub fn submit_in(&self, ctx: Context, job: Job) {
        for worker in &self.inner.workers {
            if worker.thread_id.get() == Some(&ctx.thread_id) {
                worker.push(job);
                return;
            }
        }
        self.submit(job, 0);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.exit.store(true, Ordering::Release);
        self.inner.priority_sem.release();
        self.inner.lazy_sem.release();
        for worker in &self.inner.workers {
            worker.semaphore.release();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
