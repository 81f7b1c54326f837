//! The watch service: registration front door and the signalled-key queue.
//!
//! [`WatchService`] ties three pieces together:
//!
//! - a backend ([`PollerBackend`]) that owns the registrations and detects
//!   changes,
//! - the poller thread that runs every registration, cancellation, and
//!   close request against that backend (see [`crate::poller`]),
//! - the ready queue from which consumers take signalled keys.
//!
//! # Shutdown
//!
//! [`close`](WatchService::close) marks the service closed, asks the poller
//! to drop every registration, empties the ready queue, and leaves a closed
//! marker behind. Any consumer blocked in [`take`](WatchService::take) wakes
//! up with [`WatchError::ServiceClosed`]; the marker is put back after each
//! wake-up so every other blocked consumer sees it too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use parking_lot::Mutex;
use pw_core::{Config, ServiceConfig};

use crate::error::WatchError;
use crate::event::{EventKinds, WatchModifier};
use crate::key::WatchKey;
use crate::poller::{self, PollerBackend, PollerHandle};
use crate::polling::PollingBackend;
use crate::stats::{ServiceStats, StatsSnapshot};

/// Item in the ready queue.
#[derive(Debug)]
enum Signalled {
    Key(WatchKey),
    Closed,
}

/// State shared between the service, its keys, and its backend.
pub(crate) struct ServiceShared {
    ready_tx: Sender<Signalled>,
    ready_rx: Receiver<Signalled>,
    closed: AtomicBool,
    close_lock: Mutex<()>,
    poller: OnceLock<PollerHandle>,
    stats: Arc<ServiceStats>,
    max_events: usize,
}

impl ServiceShared {
    pub(crate) fn new(max_events: usize) -> Self {
        let (ready_tx, ready_rx) = unbounded();
        Self {
            ready_tx,
            ready_rx,
            closed: AtomicBool::new(false),
            close_lock: Mutex::new(()),
            poller: OnceLock::new(),
            stats: Arc::new(ServiceStats::new()),
            max_events,
        }
    }

    pub(crate) fn handle(self: &Arc<Self>) -> ServiceHandle {
        ServiceHandle {
            shared: Arc::downgrade(self),
            stats: Arc::clone(&self.stats),
            max_events: self.max_events,
        }
    }

    pub(crate) fn stats(&self) -> &Arc<ServiceStats> {
        &self.stats
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), WatchError> {
        if self.is_closed() {
            Err(WatchError::ServiceClosed)
        } else {
            Ok(())
        }
    }

    /// Appends a signalled key to the ready queue. Dropped once closed.
    pub(crate) fn enqueue_key(&self, key: WatchKey) {
        if self.is_closed() {
            return;
        }
        // Both ends live in `self`, so the send cannot fail.
        let _ = self.ready_tx.send(Signalled::Key(key));
    }

    /// Asks the backend to drop a key's registration. Failures are ignored.
    pub(crate) fn cancel_key(&self, key: &WatchKey) {
        if let Some(poller) = self.poller.get() {
            poller.cancel(key);
        }
    }

    fn accept(&self, item: Signalled) -> Result<WatchKey, WatchError> {
        match item {
            Signalled::Key(key) if !self.is_closed() => Ok(key),
            Signalled::Key(_) => Err(WatchError::ServiceClosed),
            Signalled::Closed => {
                let _ = self.ready_tx.send(Signalled::Closed);
                Err(WatchError::ServiceClosed)
            }
        }
    }

    pub(crate) fn poll(&self) -> Result<Option<WatchKey>, WatchError> {
        self.ensure_open()?;
        match self.ready_rx.try_recv() {
            Ok(item) => self.accept(item).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WatchError::ServiceClosed),
        }
    }

    pub(crate) fn poll_timeout(&self, timeout: Duration) -> Result<Option<WatchKey>, WatchError> {
        self.ensure_open()?;
        match self.ready_rx.recv_timeout(timeout) {
            Ok(item) => self.accept(item).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WatchError::ServiceClosed),
        }
    }

    pub(crate) fn take(&self) -> Result<WatchKey, WatchError> {
        self.ensure_open()?;
        let item = self
            .ready_rx
            .recv()
            .map_err(|_| WatchError::ServiceClosed)?;
        self.accept(item)
    }
}

/// Backend-side handle to a watch service.
///
/// Passed to the backend constructor in [`WatchService::with_backend`]. It
/// only holds a weak reference, so a backend never keeps its service alive.
#[derive(Clone)]
pub struct ServiceHandle {
    shared: Weak<ServiceShared>,
    stats: Arc<ServiceStats>,
    max_events: usize,
}

impl ServiceHandle {
    /// Creates a key bound to this service for `dir`.
    #[must_use]
    pub fn new_key(&self, dir: Utf8PathBuf) -> WatchKey {
        WatchKey::new(
            dir,
            Weak::clone(&self.shared),
            Arc::clone(&self.stats),
            self.max_events,
        )
    }

    /// Returns the service's statistics counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<ServiceStats> {
        &self.stats
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("max_events", &self.max_events)
            .finish_non_exhaustive()
    }
}

/// A directory watch service.
///
/// Safe to share between threads: registration, polling, and closing may
/// all happen concurrently. Dropping the service closes it.
///
/// # Examples
///
/// ```no_run
/// use pw_watcher::{EventKinds, WatchService};
/// use pw_core::Config;
///
/// let service = WatchService::polling(&Config::default())?;
/// let key = service.register("/tmp", EventKinds::ENTRY_ALL, &[])?;
///
/// let signalled = service.take()?;
/// for event in signalled.poll_events() {
///     println!("{} {:?} x{}", event.kind(), event.context(), event.count());
/// }
/// signalled.reset();
/// # drop(key);
/// # Ok::<(), pw_watcher::WatchError>(())
/// ```
pub struct WatchService {
    shared: Arc<ServiceShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WatchService {
    /// Creates a service backed by periodic directory scans.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] for invalid settings and
    /// [`WatchError::Scheduler`] if a background thread cannot be started.
    pub fn polling(config: &Config) -> Result<Self, WatchError> {
        config.validate()?;
        Self::with_backend(&config.service, |handle| {
            PollingBackend::new(
                handle,
                config.polling,
                &config.service.scheduler_thread_name,
            )
        })
    }

    /// Creates a service around a custom backend.
    ///
    /// `make` receives the handle the backend uses to create keys.
    ///
    /// # Errors
    ///
    /// Returns whatever `make` fails with, or [`WatchError::Scheduler`] if
    /// the poller thread cannot be started.
    pub fn with_backend<B, F>(config: &ServiceConfig, make: F) -> Result<Self, WatchError>
    where
        B: PollerBackend,
        F: FnOnce(ServiceHandle) -> Result<B, WatchError>,
    {
        let shared = Arc::new(ServiceShared::new(config.max_event_list_size));
        let backend = make(shared.handle())?;
        let (poller, worker) = poller::spawn(backend, &config.poller_thread_name)?;
        // Freshly created; nothing else can have set it.
        let _ = shared.poller.set(poller);

        tracing::info!(
            max_events = config.max_event_list_size,
            thread = %config.poller_thread_name,
            "watch service started"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Registers `dir` for the given event kinds.
    ///
    /// [`EventKinds::OVERFLOW`] is ignored; overflow is always reported.
    /// Registering a directory that is already watched updates the existing
    /// registration and returns the same key.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ServiceClosed`] if the service is closed,
    /// [`WatchError::NoEventsRequested`] if no entry kinds remain, and any
    /// validation or I/O error raised by the backend.
    pub fn register(
        &self,
        dir: impl AsRef<Utf8Path>,
        kinds: EventKinds,
        modifiers: &[WatchModifier],
    ) -> Result<WatchKey, WatchError> {
        self.shared.ensure_open()?;

        let kinds = kinds.difference(EventKinds::OVERFLOW);
        if kinds.is_empty() {
            return Err(WatchError::NoEventsRequested);
        }

        let poller = self.shared.poller.get().ok_or(WatchError::WorkerGone)?;
        let dir = dir.as_ref();
        let key = poller.register(dir, kinds, modifiers)?;
        tracing::info!(%dir, ?kinds, "directory registered");
        Ok(key)
    }

    /// Returns the next signalled key, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ServiceClosed`] once the service is closed.
    pub fn poll(&self) -> Result<Option<WatchKey>, WatchError> {
        self.shared.poll()
    }

    /// Waits up to `timeout` for a signalled key.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ServiceClosed`] if the service is closed before
    /// or during the wait.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<WatchKey>, WatchError> {
        self.shared.poll_timeout(timeout)
    }

    /// Blocks until a key is signalled.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ServiceClosed`] if the service is closed before
    /// or during the wait.
    pub fn take(&self) -> Result<WatchKey, WatchError> {
        self.shared.take()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Returns a snapshot of the service's statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats().snapshot()
    }

    /// Closes the service.
    ///
    /// Every key is invalidated, blocked consumers are woken, and the
    /// background threads are stopped. Later calls return `Ok(())`
    /// immediately; concurrent calls wait for the first one to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the poller could not be reached. The service is
    /// marked closed regardless.
    pub fn close(&self) -> Result<(), WatchError> {
        let _guard = self.shared.close_lock.lock();
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = match self.shared.poller.get() {
            Some(poller) => match poller.close() {
                Err(err) if err.is_closed() => Ok(()),
                other => other,
            },
            None => Ok(()),
        };

        while self.shared.ready_rx.try_recv().is_ok() {}
        let _ = self.shared.ready_tx.send(Signalled::Closed);

        if let Some(worker) = self.worker.lock().take()
            && worker.join().is_err()
        {
            tracing::warn!("poller thread panicked");
        }

        match &result {
            Ok(()) => tracing::info!(stats = ?self.stats(), "watch service closed"),
            Err(err) => tracing::warn!(error = %err, "watch service closed with errors"),
        }
        result
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::debug!(error = %err, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for WatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchService")
            .field("closed", &self.is_closed())
            .field("max_events", &self.shared.max_events)
            .finish_non_exhaustive()
    }
}
