//! Request hand-off between caller threads and the poller thread.
//!
//! Every registration, cancellation, and shutdown goes through a single
//! background thread that owns the backend. Callers push a [`Request`] onto
//! the shared [`RequestQueue`], ring the backend's [`Wakeup`], and block on
//! a per-request reply channel until the poller answers.
//!
//! # Architecture
//!
//! ```text
//!  caller threads                         poller thread
//!  ──────────────                         ─────────────
//!  submit(Register) ──┐                   loop {
//!  submit(Cancel) ────┼──► RequestQueue       backend.wait_for_wakeup()
//!  submit(Close) ─────┘    (FIFO, mutex)      drain queue ──► backend
//!         ▲                   │               reply on each request
//!         └──── reply ◄───────┘               stop after Close
//!                                         }
//! ```
//!
//! Once a close request has been processed the queue is marked shut down:
//! requests still waiting in the same batch and any request submitted later
//! fail with [`WatchError::ServiceClosed`] without reaching the backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;

use crate::error::WatchError;
use crate::event::{EventKinds, WatchModifier};
use crate::key::WatchKey;

type Reply<T> = Sender<Result<T, WatchError>>;

/// A backend that registers directories and produces events for them.
///
/// The backend lives on the poller thread for its whole life; all methods
/// are called from that thread only, in request order.
pub trait PollerBackend: Send + 'static {
    /// Returns the handle callers use to wake the poller thread.
    fn waker(&self) -> Arc<dyn Wakeup>;

    /// Blocks until woken. Returns `false` once the wakeup source is gone,
    /// which makes the poller close the backend and exit.
    fn wait_for_wakeup(&mut self) -> bool;

    /// Registers (or re-registers) a directory.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad target or modifier, or an I/O
    /// error if the directory cannot be read.
    fn register(
        &mut self,
        dir: &Utf8Path,
        kinds: EventKinds,
        modifiers: &[WatchModifier],
    ) -> Result<WatchKey, WatchError>;

    /// Drops the registration behind `key`. Must not fail.
    fn cancel_key(&mut self, key: &WatchKey);

    /// Drops every registration and releases backend resources.
    fn close_all(&mut self);
}

/// Wakes the poller thread after a request has been queued.
pub trait Wakeup: Send + Sync {
    /// Wakes the poller thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the wakeup could not be delivered.
    fn wakeup(&self) -> std::io::Result<()>;
}

/// A request waiting to be processed by the poller thread.
pub enum Request {
    /// Register a directory.
    Register {
        /// Directory to watch.
        dir: Utf8PathBuf,
        /// Requested event kinds.
        kinds: EventKinds,
        /// Registration modifiers.
        modifiers: Vec<WatchModifier>,
        /// Reply channel.
        reply: Reply<WatchKey>,
    },
    /// Cancel a registration.
    Cancel {
        /// Key to cancel.
        key: WatchKey,
        /// Reply channel.
        reply: Reply<()>,
    },
    /// Close the backend and stop the poller.
    Close {
        /// Reply channel.
        reply: Reply<()>,
    },
}

impl Request {
    fn label(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Cancel { .. } => "cancel",
            Self::Close { .. } => "close",
        }
    }

    /// Answers the request with [`WatchError::ServiceClosed`].
    fn fail_closed(self) {
        // A caller that gave up waiting has dropped its receiver.
        match self {
            Self::Register { reply, .. } => {
                let _ = reply.send(Err(WatchError::ServiceClosed));
            }
            Self::Cancel { reply, .. } | Self::Close { reply } => {
                let _ = reply.send(Err(WatchError::ServiceClosed));
            }
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.label())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Request>,
    shutdown: bool,
}

/// FIFO of requests shared by all callers and the poller thread.
#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
}

impl RequestQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ServiceClosed`] if the queue has been shut
    /// down; the request is dropped.
    pub fn push(&self, request: Request) -> Result<(), WatchError> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(WatchError::ServiceClosed);
        }
        state.pending.push_back(request);
        Ok(())
    }

    /// Returns `true` once a close request has been processed.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    fn take_pending(&self) -> VecDeque<Request> {
        std::mem::take(&mut self.state.lock().pending)
    }

    /// Marks the queue shut down and returns whatever was still queued.
    fn shut_down(&self) -> VecDeque<Request> {
        let mut state = self.state.lock();
        state.shutdown = true;
        std::mem::take(&mut state.pending)
    }

    /// Processes every queued request against `backend`.
    ///
    /// Returns `true` if a close request was processed.
    pub fn process<B: PollerBackend + ?Sized>(&self, backend: &mut B) -> bool {
        let mut shutdown = false;

        for request in self.take_pending() {
            if shutdown {
                request.fail_closed();
                continue;
            }

            tracing::debug!(request = request.label(), "processing request");
            match request {
                Request::Register {
                    dir,
                    kinds,
                    modifiers,
                    reply,
                } => {
                    let _ = reply.send(backend.register(&dir, kinds, &modifiers));
                }
                Request::Cancel { key, reply } => {
                    backend.cancel_key(&key);
                    let _ = reply.send(Ok(()));
                }
                Request::Close { reply } => {
                    backend.close_all();
                    shutdown = true;
                    let _ = reply.send(Ok(()));
                }
            }
        }

        if shutdown {
            for request in self.shut_down() {
                request.fail_closed();
            }
        }
        shutdown
    }
}

/// Caller-side handle for submitting requests to the poller thread.
#[derive(Clone)]
pub struct PollerHandle {
    requests: Arc<RequestQueue>,
    waker: Arc<dyn Wakeup>,
}

impl PollerHandle {
    /// Submits a request built around a fresh reply channel and waits for
    /// the answer.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ServiceClosed`] if the poller has shut down,
    /// [`WatchError::Wakeup`] if the poller could not be woken, and
    /// [`WatchError::WorkerGone`] if it exited without replying. Otherwise
    /// returns whatever the backend produced.
    pub fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, WatchError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.requests.push(build(reply_tx))?;
        self.waker.wakeup().map_err(|err| {
            tracing::warn!(error = %err, "failed to wake poller thread");
            WatchError::Wakeup(err)
        })?;
        reply_rx.recv().map_err(|_| WatchError::WorkerGone)?
    }

    /// Registers a directory through the poller.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn register(
        &self,
        dir: &Utf8Path,
        kinds: EventKinds,
        modifiers: &[WatchModifier],
    ) -> Result<WatchKey, WatchError> {
        self.submit(|reply| Request::Register {
            dir: dir.to_owned(),
            kinds,
            modifiers: modifiers.to_vec(),
            reply,
        })
    }

    /// Cancels a key through the poller, ignoring every failure.
    pub fn cancel(&self, key: &WatchKey) {
        let result = self.submit(|reply| Request::Cancel {
            key: key.clone(),
            reply,
        });
        if let Err(error) = result {
            tracing::debug!(dir = %key.watchable(), error = %error, "cancel request not processed");
        }
    }

    /// Closes the backend and stops the poller thread.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn close(&self) -> Result<(), WatchError> {
        self.submit(|reply| Request::Close { reply })
    }

    /// Returns `true` once the poller has processed a close request.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.requests.is_shutdown()
    }
}

impl std::fmt::Debug for PollerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerHandle")
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

/// Starts the poller thread for `backend`.
///
/// # Errors
///
/// Returns [`WatchError::Scheduler`] if the thread cannot be spawned.
pub fn spawn<B: PollerBackend>(
    backend: B,
    thread_name: &str,
) -> Result<(PollerHandle, JoinHandle<()>), WatchError> {
    let requests = Arc::new(RequestQueue::new());
    let handle = PollerHandle {
        requests: Arc::clone(&requests),
        waker: backend.waker(),
    };

    let thread = std::thread::Builder::new()
        .name(thread_name.to_owned())
        .spawn(move || run_poller(backend, &requests))
        .map_err(WatchError::Scheduler)?;

    Ok((handle, thread))
}

fn run_poller<B: PollerBackend>(mut backend: B, requests: &RequestQueue) {
    tracing::debug!("poller thread started");
    loop {
        if !backend.wait_for_wakeup() {
            tracing::debug!("wakeup source disconnected, closing backend");
            backend.close_all();
            for request in requests.shut_down() {
                request.fail_closed();
            }
            break;
        }
        if requests.process(&mut backend) {
            break;
        }
    }
    tracing::debug!("poller thread stopped");
}
