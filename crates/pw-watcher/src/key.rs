//! Watch keys: one per registered directory.
//!
//! A [`WatchKey`] accumulates the events detected for its directory and
//! moves between two states:
//!
//! ```text
//!            signal()                       reset(), no events left
//!   READY ─────────────► SIGNALLED ───────────────────────────────► READY
//!                           │  ▲
//!                           │  │ reset() with events pending: re-queued
//!                           └──┘
//! ```
//!
//! A key sits in its service's ready queue exactly while it is SIGNALLED.
//! Validity is tracked separately: a cancelled key stays in whatever state
//! it was in, but `reset()` returns `false` and no further events are
//! recorded.
//!
//! # Coalescing
//!
//! Events are appended under the key's lock. A repeat of the most recent
//! event, or any event arriving after an overflow, only bumps a count. A
//! repeated modification of an entry that already has a pending modify
//! event bumps that event even if other events came in between. When the
//! pending list is full, it is replaced by a single overflow event.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use pw_core::FxHashMap;
use smallvec::SmallVec;

use crate::event::{EventKind, WatchEvent};
use crate::service::ServiceShared;
use crate::stats::ServiceStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyStatus {
    Ready,
    Signalled,
}

#[derive(Debug)]
struct KeyState {
    status: KeyStatus,
    events: SmallVec<[WatchEvent; 8]>,
    /// Entry name -> index in `events` of its pending modify event.
    last_modify: FxHashMap<Utf8PathBuf, usize>,
}

struct KeyInner {
    dir: Utf8PathBuf,
    service: Weak<ServiceShared>,
    stats: Arc<ServiceStats>,
    max_events: usize,
    valid: AtomicBool,
    state: Mutex<KeyState>,
}

/// Handle to one directory registration and its pending events.
///
/// Handles are cheap to clone; clones refer to the same registration and
/// compare equal.
///
/// # Consumer Protocol
///
/// 1. Obtain a signalled key from [`WatchService::take`](crate::WatchService::take)
///    or one of the `poll` variants.
/// 2. Drain it with [`poll_events`](Self::poll_events).
/// 3. Call [`reset`](Self::reset). If it returns `false` the key has been
///    cancelled and will not be signalled again.
///
/// The `signal*` and [`invalidate`](Self::invalidate) methods are meant for
/// backends, not consumers.
#[derive(Clone)]
pub struct WatchKey {
    inner: Arc<KeyInner>,
}

impl WatchKey {
    pub(crate) fn new(
        dir: Utf8PathBuf,
        service: Weak<ServiceShared>,
        stats: Arc<ServiceStats>,
        max_events: usize,
    ) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                dir,
                service,
                stats,
                max_events,
                valid: AtomicBool::new(true),
                state: Mutex::new(KeyState {
                    status: KeyStatus::Ready,
                    events: SmallVec::new(),
                    last_modify: FxHashMap::default(),
                }),
            }),
        }
    }

    /// Returns the directory this key was registered for, as given to
    /// `register`.
    #[inline]
    #[must_use]
    pub fn watchable(&self) -> &Utf8Path {
        &self.inner.dir
    }

    /// Returns `true` until the key is cancelled or its service closes.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// Returns `true` while the key is signalled (queued or handed out and
    /// not yet reset).
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.inner.state.lock().status == KeyStatus::Signalled
    }

    /// Removes and returns all pending events, oldest first.
    ///
    /// The key stays signalled until [`reset`](Self::reset) is called.
    #[must_use]
    pub fn poll_events(&self) -> Vec<WatchEvent> {
        let mut state = self.inner.state.lock();
        state.last_modify.clear();
        std::mem::take(&mut state.events).into_vec()
    }

    /// Re-arms the key after its events were drained.
    ///
    /// If events arrived since the last [`poll_events`](Self::poll_events)
    /// the key is queued again immediately. Returns whether the key is
    /// still valid.
    pub fn reset(&self) -> bool {
        let mut state = self.inner.state.lock();
        let valid = self.is_valid();
        if state.status == KeyStatus::Signalled && valid {
            if state.events.is_empty() {
                state.status = KeyStatus::Ready;
            } else {
                self.enqueue();
            }
        }
        valid
    }

    /// Cancels the registration.
    ///
    /// Idempotent and never fails. A key that is already sitting in the
    /// ready queue stays there; consumers see the cancellation through
    /// [`reset`](Self::reset).
    pub fn cancel(&self) {
        if !self.is_valid() {
            return;
        }
        if let Some(service) = self.inner.service.upgrade() {
            service.cancel_key(self);
        }
        self.invalidate();
    }

    /// Marks the key invalid without contacting the backend.
    ///
    /// Backends call this when they drop a registration themselves.
    pub fn invalidate(&self) {
        if self.inner.valid.swap(false, Ordering::AcqRel) {
            tracing::debug!(dir = %self.inner.dir, "watch key invalidated");
        }
    }

    /// Queues the key for consumers if it is READY.
    ///
    /// Also used after [`invalidate`](Self::invalidate) so that a consumer
    /// learns about the cancellation.
    pub fn signal(&self) {
        let mut state = self.inner.state.lock();
        self.signal_locked(&mut state);
    }

    /// Records an event and signals the key.
    ///
    /// Ignored once the key is invalid.
    pub fn signal_event(&self, kind: EventKind, context: Option<Utf8PathBuf>) {
        if !self.is_valid() {
            return;
        }

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if let Some(prev) = state.events.last_mut()
            && (prev.kind().is_overflow() || prev.matches(kind, context.as_deref()))
        {
            prev.increment();
            return;
        }

        if let Some(name) = context.as_deref() {
            if kind == EventKind::Modify {
                if let Some(&index) = state.last_modify.get(name) {
                    state.events[index].increment();
                    return;
                }
            } else {
                state.last_modify.remove(name);
            }
        }

        let event = if kind.is_overflow() || state.events.len() >= self.inner.max_events {
            tracing::debug!(
                dir = %self.inner.dir,
                dropped = state.events.len(),
                "watch key overflowed"
            );
            state.events.clear();
            state.last_modify.clear();
            self.inner.stats.record_overflow();
            WatchEvent::overflow()
        } else {
            WatchEvent::new(kind, context)
        };

        tracing::trace!(
            dir = %self.inner.dir,
            kind = %event.kind(),
            context = ?event.context(),
            "event signalled"
        );

        if event.kind() == EventKind::Modify
            && let Some(name) = event.context()
        {
            state.last_modify.insert(name.to_owned(), state.events.len());
        }
        state.events.push(event);
        self.inner.stats.record_event();

        self.signal_locked(state);
    }

    fn signal_locked(&self, state: &mut KeyState) {
        if state.status == KeyStatus::Ready {
            state.status = KeyStatus::Signalled;
            self.enqueue();
        }
    }

    fn enqueue(&self) {
        if let Some(service) = self.inner.service.upgrade() {
            service.enqueue_key(self.clone());
        }
    }
}

impl PartialEq for WatchKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for WatchKey {}

impl Hash for WatchKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

impl fmt::Debug for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchKey")
            .field("dir", &self.inner.dir)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shared(max_events: usize) -> Arc<ServiceShared> {
        Arc::new(ServiceShared::new(max_events))
    }

    fn key_for(shared: &Arc<ServiceShared>) -> WatchKey {
        shared.handle().new_key(Utf8PathBuf::from("/watched"))
    }

    fn name(s: &str) -> Option<Utf8PathBuf> {
        Some(Utf8PathBuf::from(s))
    }

    #[test]
    fn test_repeated_event_coalesces() {
        let shared = shared(512);
        let key = key_for(&shared);

        for _ in 0..5 {
            key.signal_event(EventKind::Create, name("a"));
        }

        let events = key.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::Create);
        assert_eq!(events[0].count(), 5);
    }

    #[test]
    fn test_modify_coalesces_across_other_contexts() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.signal_event(EventKind::Modify, name("a"));
        key.signal_event(EventKind::Modify, name("b"));
        key.signal_event(EventKind::Modify, name("a"));

        let events = key.poll_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].context().map(Utf8Path::as_str), Some("a"));
        assert_eq!(events[0].count(), 2);
        assert_eq!(events[1].context().map(Utf8Path::as_str), Some("b"));
        assert_eq!(events[1].count(), 1);
    }

    #[test]
    fn test_non_modify_event_ends_modify_tracking() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.signal_event(EventKind::Modify, name("a"));
        key.signal_event(EventKind::Create, name("b"));
        key.signal_event(EventKind::Delete, name("a"));
        key.signal_event(EventKind::Modify, name("a"));

        let kinds: Vec<_> = key.poll_events().iter().map(WatchEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Modify,
                EventKind::Create,
                EventKind::Delete,
                EventKind::Modify
            ]
        );
    }

    #[test]
    fn test_modify_tracking_cleared_by_drain() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.signal_event(EventKind::Modify, name("a"));
        let _ = key.poll_events();
        key.signal_event(EventKind::Create, name("b"));
        key.signal_event(EventKind::Modify, name("a"));

        let events = key.poll_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind(), EventKind::Modify);
        assert_eq!(events[1].count(), 1);
    }

    #[test]
    fn test_overflow_replaces_pending_events() {
        let shared = shared(4);
        let key = key_for(&shared);

        for i in 0..6 {
            key.signal_event(EventKind::Create, name(&format!("f{i}")));
        }

        let events = key.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::Overflow);
        assert!(events[0].context().is_none());
        assert_eq!(events[0].count(), 2);
        assert_eq!(shared.stats().snapshot().overflows, 1);
    }

    #[test]
    fn test_overflow_at_default_bound() {
        let shared = shared(512);
        let key = key_for(&shared);

        for i in 0..600 {
            key.signal_event(EventKind::Delete, name(&format!("entry-{i}")));
        }

        let events = key.poll_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].kind().is_overflow());
    }

    #[test]
    fn test_explicit_overflow_clears_list() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.signal_event(EventKind::Create, name("a"));
        key.signal_event(EventKind::Overflow, None);
        key.signal_event(EventKind::Create, name("b"));

        let events = key.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::Overflow);
        assert_eq!(events[0].count(), 2);
    }

    #[test]
    fn test_signal_enqueues_once() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.signal_event(EventKind::Create, name("a"));
        key.signal_event(EventKind::Create, name("b"));
        key.signal();

        assert_eq!(shared.poll().unwrap(), Some(key.clone()));
        assert_eq!(shared.poll().unwrap(), None);
        assert!(key.is_signalled());
    }

    #[test]
    fn test_reset_after_drain_returns_to_ready() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.signal_event(EventKind::Create, name("a"));
        let taken = shared.poll().unwrap().unwrap();
        assert_eq!(taken.poll_events().len(), 1);
        assert!(taken.reset());
        assert!(!key.is_signalled());
        assert_eq!(shared.poll().unwrap(), None);

        key.signal_event(EventKind::Delete, name("a"));
        assert_eq!(shared.poll().unwrap(), Some(key));
    }

    #[test]
    fn test_reset_with_new_events_requeues() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.signal_event(EventKind::Create, name("a"));
        let taken = shared.poll().unwrap().unwrap();
        let _ = taken.poll_events();

        key.signal_event(EventKind::Modify, name("a"));
        assert_eq!(shared.poll().unwrap(), None);

        assert!(taken.reset());
        assert!(key.is_signalled());
        let again = shared.poll().unwrap().unwrap();
        assert_eq!(again.poll_events().len(), 1);
    }

    #[test]
    fn test_reset_on_ready_key_is_noop() {
        let shared = shared(512);
        let key = key_for(&shared);

        assert!(key.reset());
        assert_eq!(shared.poll().unwrap(), None);
    }

    #[test]
    fn test_invalid_key_ignores_events() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.invalidate();
        key.signal_event(EventKind::Create, name("a"));

        assert!(!key.is_valid());
        assert!(key.poll_events().is_empty());
        assert_eq!(shared.poll().unwrap(), None);
    }

    #[test]
    fn test_signal_after_invalidate_notifies_consumer() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.invalidate();
        key.signal();

        let taken = shared.poll().unwrap().unwrap();
        assert!(!taken.reset());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let shared = shared(512);
        let key = key_for(&shared);

        key.cancel();
        key.cancel();
        assert!(!key.is_valid());
        assert!(!key.reset());
    }

    #[test]
    fn test_key_equality_is_identity() {
        let shared = shared(512);
        let a = key_for(&shared);
        let b = key_for(&shared);

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.watchable(), b.watchable());
    }

    #[test]
    fn test_concurrent_producers_lose_no_counts() {
        let shared = shared(100_000);
        let key = key_for(&shared);
        let total = std::sync::atomic::AtomicU64::new(0);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let key = key.clone();
                scope.spawn(move || {
                    for i in 0..500 {
                        let kind = if i % 2 == 0 {
                            EventKind::Modify
                        } else {
                            EventKind::Create
                        };
                        key.signal_event(kind, name(&format!("t{t}-{}", i % 7)));
                    }
                });
            }

            let consumer_key = key.clone();
            let total = &total;
            let shared = &shared;
            scope.spawn(move || {
                let deadline = std::time::Instant::now() + Duration::from_secs(5);
                while total.load(Ordering::Relaxed) < 2_000
                    && std::time::Instant::now() < deadline
                {
                    if let Ok(Some(taken)) = shared.poll_timeout(Duration::from_millis(10)) {
                        let sum: u64 = taken
                            .poll_events()
                            .iter()
                            .map(|e| u64::from(e.count()))
                            .sum();
                        total.fetch_add(sum, Ordering::Relaxed);
                        taken.reset();
                    }
                }
                let rest: u64 = consumer_key
                    .poll_events()
                    .iter()
                    .map(|e| u64::from(e.count()))
                    .sum();
                total.fetch_add(rest, Ordering::Relaxed);
            });
        });

        assert_eq!(total.load(Ordering::Relaxed), 2_000);
    }
}
