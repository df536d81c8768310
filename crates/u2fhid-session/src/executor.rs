//! Timeout-bounded execution of blocking USB transfers.
//!
//! USB request waits cannot be interrupted, so each transfer runs on a
//! dedicated worker thread while the caller waits on a deadline. When the
//! deadline passes, the caller cancels the request, which eventually releases
//! the worker, and reports a timeout. The request is closed on every exit
//! path. Dropping the executor never waits on a transfer that already timed
//! out: the worker is detached instead and exits once that transfer returns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use u2fhid_usb::TransferRequest;

use crate::error::{Result, SessionError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One worker thread that runs transfer tasks in submission order.
pub struct BoundedExecutor {
    name: String,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl BoundedExecutor {
    /// Spawn the worker thread.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let finished = Arc::clone(&in_flight);

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for job in receiver {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("transfer task panicked");
                    }
                    finished.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .map_err(|err| SessionError::WorkerUnavailable(err.to_string()))?;

        debug!(worker = %name, "transfer worker started");
        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
            in_flight,
        })
    }

    /// Worker thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `task` against `request` on the worker and wait at most `timeout`.
    ///
    /// On expiry the request is cancelled once and `SessionError::Timeout` is
    /// returned; the task may still be running when this returns. The request
    /// is closed exactly once, whatever the outcome.
    pub fn run<Req, T, F>(&self, request: Req, timeout: Duration, task: F) -> Result<T>
    where
        Req: TransferRequest + 'static,
        T: Send + 'static,
        F: FnOnce(&Req) -> Result<T> + Send + 'static,
    {
        let guard = CloseOnDrop(Arc::new(request));
        let request = Arc::clone(&guard.0);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);

        let job: Job = Box::new(move || {
            let result = task(&request);
            // The caller may have given up already.
            let _ = reply_tx.send(result);
        });

        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SessionError::WorkerUnavailable("executor shut down".to_string()))?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if sender.send(job).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(SessionError::WorkerUnavailable(
                "worker thread exited".to_string(),
            ));
        }

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "transfer exceeded its budget, cancelling");
                guard.0.cancel();
                Err(SessionError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::WorkerUnavailable(
                "transfer task aborted".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("name", &self.name)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl Drop for BoundedExecutor {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop.
        self.sender.take();
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            // A timed-out transfer is still blocked in the USB stack.
            debug!(worker = %self.name, "detaching transfer worker with a pending task");
            return;
        }
        if worker.join().is_err() {
            warn!(worker = %self.name, "transfer worker terminated abnormally");
        }
    }
}

struct CloseOnDrop<Req: TransferRequest>(Arc<Req>);

impl<Req: TransferRequest> Drop for CloseOnDrop<Req> {
    fn drop(&mut self) {
        self.0.close();
    }
}
