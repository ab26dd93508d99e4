//! Cross-runtime execution.
//!
//! The registry and the agent core live on the owner runtime.  Some
//! transports must drive their client library on a dedicated
//! single-threaded runtime on another OS thread ([`ForeignLoop`]).  Work that
//! belongs to the owner is submitted with [`CrossLoopExecutor::submit`]; the
//! returned [`OwnerTask`] can be awaited from any runtime without blocking
//! that runtime's thread, and every wait carries a timeout after which the
//! owner task is force-stopped.

use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

use sb_domain::error::{Error, Result};
use sb_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CrossLoopExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Schedules work onto the owner runtime from any thread.
#[derive(Clone, Debug)]
pub struct CrossLoopExecutor {
    owner: Handle,
    default_timeout: Duration,
}

impl CrossLoopExecutor {
    pub fn new(owner: Handle, default_timeout: Duration) -> Self {
        Self {
            owner,
            default_timeout,
        }
    }

    /// Bind to the runtime the caller is running on.
    pub fn current(default_timeout: Duration) -> Result<Self> {
        let owner = Handle::try_current()
            .map_err(|e| Error::LoopClosed(format!("no owner runtime: {e}")))?;
        Ok(Self::new(owner, default_timeout))
    }

    pub fn owner(&self) -> &Handle {
        &self.owner
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Schedule `fut` on the owner runtime and return a handle that any
    /// thread may wait on.
    pub fn submit<F>(&self, operation: &str, fut: F) -> OwnerTask<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        OwnerTask {
            operation: operation.to_owned(),
            owner: self.owner.clone(),
            join: self.owner.spawn(fut),
        }
    }

    /// Submit and wait in one step.
    pub async fn call<F>(&self, operation: &str, fut: F, timeout: Duration) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.submit(operation, fut).wait(timeout).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OwnerTask
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A unit of work running on the owner runtime.
///
/// Dropping an `OwnerTask` without waiting detaches the work.  Dropping a
/// pending [`OwnerTask::wait`] future stops it.
pub struct OwnerTask<T> {
    operation: String,
    owner: Handle,
    join: JoinHandle<T>,
}

struct AbortOnDrop(Option<AbortHandle>);

impl AbortOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl<T: Send + 'static> OwnerTask<T> {
    /// Await the result from any runtime.
    ///
    /// The caller's runtime keeps servicing its other tasks while this is
    /// pending: the owner task wakes the waiter when it completes.  On
    /// timeout the owner task is aborted and [`Error::CrossLoopTimeout`] is
    /// returned.
    pub async fn wait(self, timeout: Duration) -> Result<T> {
        let Self {
            operation, join, ..
        } = self;
        let mut stop_on_drop = AbortOnDrop(Some(join.abort_handle()));

        let outcome = tokio::time::timeout(timeout, join).await;
        match outcome {
            Ok(joined) => {
                stop_on_drop.disarm();
                joined.map_err(|e| {
                    if e.is_cancelled() {
                        Error::Cancelled(operation.clone())
                    } else {
                        Error::Other(format!("{operation}: owner task panicked"))
                    }
                })
            }
            Err(_) => {
                // `stop_on_drop` aborts the owner task on return.
                tracing::warn!(
                    operation = %operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "cross-loop call timed out, stopping owner task"
                );
                TraceEvent::CrossLoopTimeout {
                    operation: operation.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }
                .emit();
                Err(Error::CrossLoopTimeout { operation, timeout })
            }
        }
    }

    /// Block the calling thread until the result is ready.
    ///
    /// Only for plain threads.  Any thread that sees a runtime context is
    /// refused with [`Error::WouldBlockLoop`], blocking-pool threads
    /// included; async callers use [`OwnerTask::wait`] or
    /// [`OwnerTask::wait_on_worker`].
    pub fn wait_blocking(self, timeout: Duration) -> Result<T> {
        if Handle::try_current().is_ok() {
            return Err(Error::WouldBlockLoop(self.operation));
        }
        let owner = self.owner.clone();
        owner.block_on(self.wait(timeout))
    }

    /// Park a blocking-pool thread of the caller's runtime on the result.
    ///
    /// For callers that must not register wakers across runtimes.  The
    /// caller's own thread stays free and the timeout behaves as in
    /// [`OwnerTask::wait`].
    pub async fn wait_on_worker(self, timeout: Duration) -> Result<T> {
        let operation = self.operation.clone();
        let owner = self.owner.clone();
        tokio::task::spawn_blocking(move || owner.block_on(self.wait(timeout)))
            .await
            .map_err(|e| Error::Other(format!("{operation}: blocking wait failed: {e}")))?
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ForeignLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A dedicated OS thread driving a single-threaded runtime, for transports
/// whose client library needs its own long-lived loop.
pub struct ForeignLoop {
    name: String,
    handle: Handle,
    close_tx: Option<oneshot::Sender<()>>,
    done_rx: std_mpsc::Receiver<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ForeignLoop {
    /// Start the thread and its runtime.  Tasks still running when the loop
    /// is closed get `grace` to finish before they are dropped.
    pub fn spawn(name: impl Into<String>, grace: Duration) -> Result<Self> {
        let name = name.into();
        let (handle_tx, handle_rx) = std_mpsc::channel();
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = std_mpsc::channel();

        let thread_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let rt = match Builder::new_current_thread()
                    .enable_all()
                    .thread_name(thread_name.clone())
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(rt.handle().clone()));

                // Runs until a close request arrives or every ForeignLoop
                // handle is gone.
                rt.block_on(async {
                    let _ = close_rx.await;
                });
                rt.shutdown_timeout(grace);
                tracing::debug!(name = %thread_name, "foreign loop runtime shut down");
                let _ = done_tx.send(());
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| Error::LoopClosed(format!("foreign loop {name} exited during startup")))?
            .map_err(Error::Io)?;

        tracing::info!(name = %name, "foreign loop started");
        Ok(Self {
            name,
            handle,
            close_tx: Some(close_tx),
            done_rx,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schedule a task on this loop from any thread.
    pub fn spawn_task<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    fn request_close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Close the loop and block until its thread has exited.
    ///
    /// Remaining tasks get the grace period given to [`ForeignLoop::spawn`]
    /// and are then dropped.  If the thread still has not exited after
    /// `timeout` (a task is blocking it) it is detached and
    /// [`Error::CrossLoopTimeout`] is returned.
    pub fn shutdown(mut self, timeout: Duration) -> Result<()> {
        self.request_close();

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                let clean = match self.thread.take().map(|t| t.join()) {
                    Some(Err(_)) => {
                        tracing::warn!(name = %self.name, "foreign loop thread panicked");
                        false
                    }
                    _ => true,
                };
                tracing::info!(name = %self.name, "foreign loop stopped");
                TraceEvent::ForeignLoopStopped {
                    name: self.name.clone(),
                    clean,
                }
                .emit();
                Ok(())
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                self.thread.take();
                tracing::warn!(
                    name = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "foreign loop did not stop in time, detaching its thread"
                );
                TraceEvent::ForeignLoopStopped {
                    name: self.name.clone(),
                    clean: false,
                }
                .emit();
                Err(Error::CrossLoopTimeout {
                    operation: format!("shutdown of foreign loop {}", self.name),
                    timeout,
                })
            }
        }
    }

    /// [`ForeignLoop::shutdown`] for callers on a runtime: the blocking wait
    /// runs on the blocking pool instead of the caller's thread.
    pub async fn shutdown_async(self, timeout: Duration) -> Result<()> {
        tokio::task::spawn_blocking(move || self.shutdown(timeout))
            .await
            .map_err(|e| Error::Other(format!("foreign loop shutdown task failed: {e}")))?
    }
}

impl Drop for ForeignLoop {
    fn drop(&mut self) {
        if self.close_tx.is_some() {
            tracing::warn!(name = %self.name, "foreign loop dropped without shutdown, detaching");
            self.request_close();
        }
    }
}
