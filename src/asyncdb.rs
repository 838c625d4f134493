//! Awaitable wrappers over the synchronous engine.
//!
//! Every operation gets an `_async` counterpart returning an [`AsyncOp`]:
//! a single-shot future that, on first poll, submits the captured
//! synchronous closure to the scheduler at priority 0, parks the waker in
//! shared state, and wakes it from the worker that ran the closure. A
//! panic inside the closure is caught on the worker and re-raised on the
//! awaiting task when it resumes.
//!
//! This is a thick offload: one scheduler dispatch buys the whole
//! synchronous operation. The shape leaves room to push asynchrony down
//! to the file layer later without changing this interface. There is no
//! cancellation; dropping an `AsyncOp` merely abandons the result.

use std::future::Future;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::batch::WriteBatch;
use crate::config::{Options, ReadOptions, WriteOptions};
use crate::db::Database;
use crate::error::Result;
use crate::scheduler::Scheduler;

type Work<T> = Box<dyn FnOnce() -> T + Send>;

struct OpState<T> {
    scheduler: Arc<Scheduler>,
    work: Mutex<Option<Work<T>>>,
    result: Mutex<Option<std::thread::Result<T>>>,
    waker: Mutex<Option<Waker>>,
    submitted: AtomicBool,
    done: AtomicBool,
}

/// A single-shot awaitable. The work runs once, on the pool, triggered by
/// the first poll.
pub struct AsyncOp<T> {
    state: Arc<OpState<T>>,
}

impl<T: Send + 'static> AsyncOp<T> {
    pub fn new(scheduler: Arc<Scheduler>, work: impl FnOnce() -> T + Send + 'static) -> Self {
        AsyncOp {
            state: Arc::new(OpState {
                scheduler,
                work: Mutex::new(Some(Box::new(work))),
                result: Mutex::new(None),
                waker: Mutex::new(None),
                submitted: AtomicBool::new(false),
                done: AtomicBool::new(false),
            }),
        }
    }

    fn take_result(&self) -> T {
        let result = self
            .state
            .result
            .lock()
            .unwrap()
            .take()
            .expect("AsyncOp polled after completion");
        match result {
            Ok(value) => value,
            Err(panic) => resume_unwind(panic),
        }
    }
}

impl<T: Send + 'static> Future for AsyncOp<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        if self.state.done.load(Ordering::Acquire) {
            return Poll::Ready(self.take_result());
        }

        // Park the waker before submitting (and re-check afterwards) so a
        // completion racing this poll is never lost.
        *self.state.waker.lock().unwrap() = Some(cx.waker().clone());

        if !self.state.submitted.swap(true, Ordering::AcqRel) {
            let state = Arc::clone(&self.state);
            self.state.scheduler.submit(
                Box::new(move || {
                    let work = state
                        .work
                        .lock()
                        .unwrap()
                        .take()
                        .expect("work ran twice");
                    let result = catch_unwind(AssertUnwindSafe(work));
                    *state.result.lock().unwrap() = Some(result);
                    state.done.store(true, Ordering::Release);
                    if let Some(waker) = state.waker.lock().unwrap().take() {
                        waker.wake();
                    }
                }),
                0,
            );
        }

        if self.state.done.load(Ordering::Acquire) {
            return Poll::Ready(self.take_result());
        }
        Poll::Pending
    }
}

/// The engine lifted onto the scheduler. Also usable synchronously
/// through [`database`](AsyncDatabase::database).
pub struct AsyncDatabase {
    scheduler: Arc<Scheduler>,
    db: Arc<Database>,
}

impl AsyncDatabase {
    pub fn new(scheduler: Arc<Scheduler>, db: Arc<Database>) -> Self {
        AsyncDatabase { scheduler, db }
    }

    /// Opens a database on a pool thread.
    pub fn open_async(
        scheduler: Arc<Scheduler>,
        options: Options,
        dir: impl Into<PathBuf>,
    ) -> AsyncOp<Result<AsyncDatabase>> {
        let dir = dir.into();
        let pool = Arc::clone(&scheduler);
        AsyncOp::new(scheduler, move || {
            let db = Database::open(options, dir)?;
            Ok(AsyncDatabase::new(pool, Arc::new(db)))
        })
    }

    pub fn put_async(
        &self,
        options: WriteOptions,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> AsyncOp<Result<()>> {
        let db = Arc::clone(&self.db);
        AsyncOp::new(Arc::clone(&self.scheduler), move || {
            db.put(&options, &key, &value)
        })
    }

    pub fn get_async(&self, options: ReadOptions, key: Vec<u8>) -> AsyncOp<Result<Vec<u8>>> {
        let db = Arc::clone(&self.db);
        AsyncOp::new(Arc::clone(&self.scheduler), move || db.get(&options, &key))
    }

    pub fn delete_async(&self, options: WriteOptions, key: Vec<u8>) -> AsyncOp<Result<()>> {
        let db = Arc::clone(&self.db);
        AsyncOp::new(Arc::clone(&self.scheduler), move || db.delete(&options, &key))
    }

    pub fn write_async(&self, options: WriteOptions, batch: WriteBatch) -> AsyncOp<Result<()>> {
        let db = Arc::clone(&self.db);
        AsyncOp::new(Arc::clone(&self.scheduler), move || db.write(&options, batch))
    }

    /// The underlying synchronous engine, for mixed usage.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}
