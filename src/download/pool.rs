//! 固定大小的下载工作池。
//!
//! 生命周期是显式状态机：Idle →（start）→ Accepting →（drain）→ Draining → Closed。
//! 只有 Accepting 状态接受提交；drain 关闭提交通道并等待队列中所有任务执行完毕。
//! 任务返回的 `Err` 与 panic 都走失败通道，由 drain 统一交还给调用方，不会拖垮其它 worker。

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel as channel;
use thiserror::Error;

type Task<E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Accepting,
    Draining,
    Closed,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    ZeroWorkers,
    #[error("worker pool is {0:?} and does not accept tasks")]
    NotAccepting(PoolState),
    #[error("worker pool was already started ({0:?})")]
    AlreadyStarted(PoolState),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug)]
pub enum TaskFailure<E> {
    Failed(E),
    Panicked(String),
}

impl<E: fmt::Display> fmt::Display for TaskFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Failed(e) => write!(f, "{e}"),
            TaskFailure::Panicked(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

#[derive(Debug)]
pub struct DrainReport<E> {
    /// Tasks that ran to the end, failed ones included.
    pub finished: usize,
    pub failures: Vec<TaskFailure<E>>,
}

impl<E> Default for DrainReport<E> {
    fn default() -> Self {
        Self {
            finished: 0,
            failures: Vec::new(),
        }
    }
}

pub struct WorkerPool<E: Send + 'static> {
    size: usize,
    name: String,
    state: PoolState,
    tx: Option<channel::Sender<Task<E>>>,
    rx_failure: Option<channel::Receiver<TaskFailure<E>>>,
    finished: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
}

impl<E: Send + 'static> WorkerPool<E> {
    pub fn new(size: usize, name: impl Into<String>) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        Ok(Self {
            size,
            name: name.into(),
            state: PoolState::Idle,
            tx: None,
            rx_failure: None,
            finished: Arc::new(AtomicUsize::new(0)),
            handles: Vec::with_capacity(size),
        })
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Spawns the workers and opens the pool for submissions.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.state != PoolState::Idle {
            return Err(PoolError::AlreadyStarted(self.state));
        }

        let (tx, rx) = channel::unbounded::<Task<E>>();
        let (tx_failure, rx_failure) = channel::unbounded::<TaskFailure<E>>();

        for idx in 0..self.size {
            let rx = rx.clone();
            let tx_failure = tx_failure.clone();
            let finished = self.finished.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{idx}", self.name))
                .spawn(move || worker_loop(rx, tx_failure, finished));
            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(err) => {
                    // Let the workers that did start exit before reporting.
                    drop(tx);
                    for h in self.handles.drain(..) {
                        let _ = h.join();
                    }
                    self.state = PoolState::Closed;
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        self.tx = Some(tx);
        self.rx_failure = Some(rx_failure);
        self.state = PoolState::Accepting;
        Ok(())
    }

    /// Queues a task; never waits for it to run.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        match (&self.tx, self.state) {
            (Some(tx), PoolState::Accepting) => tx
                .send(Box::new(task))
                .map_err(|_| PoolError::NotAccepting(self.state)),
            (_, state) => Err(PoolError::NotAccepting(state)),
        }
    }

    /// Stops accepting work and blocks until every queued and running task is done.
    pub fn drain(&mut self) -> DrainReport<E> {
        match self.state {
            PoolState::Accepting => {}
            PoolState::Idle | PoolState::Draining | PoolState::Closed => {
                self.state = PoolState::Closed;
                return DrainReport::default();
            }
        }

        self.state = PoolState::Draining;
        self.tx.take();
        for h in self.handles.drain(..) {
            // Task panics are caught inside the worker, so join only fails on a bug there.
            let _ = h.join();
        }

        let failures = self
            .rx_failure
            .take()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();

        self.state = PoolState::Closed;
        DrainReport {
            finished: self.finished.load(Ordering::SeqCst),
            failures,
        }
    }
}

impl<E: Send + 'static> Drop for WorkerPool<E> {
    fn drop(&mut self) {
        if self.state == PoolState::Accepting {
            let _ = self.drain();
        }
    }
}

fn worker_loop<E>(
    rx: channel::Receiver<Task<E>>,
    tx_failure: channel::Sender<TaskFailure<E>>,
    finished: Arc<AtomicUsize>,
) {
    // `iter` ends once the sender is gone and the queue is empty.
    for task in rx.iter() {
        let failure = match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(TaskFailure::Failed(err)),
            Err(payload) => Some(TaskFailure::Panicked(panic_message(payload.as_ref()))),
        };
        if let Some(failure) = failure {
            let _ = tx_failure.send(failure);
        }
        finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
