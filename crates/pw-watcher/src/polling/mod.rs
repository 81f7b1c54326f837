//! Polling backend: detects changes by listing directories periodically.
//!
//! Every registered directory gets a repeating scan task on a small
//! dedicated tokio runtime. A scan compares the directory's listing against
//! the [`DirectorySnapshot`] taken on the previous pass and signals the
//! differences on the directory's [`WatchKey`].
//!
//! # Architecture
//!
//! ```text
//!  poller thread                      scheduler runtime (1 worker)
//!  ─────────────                      ────────────────────────────
//!  register ──► Registration ──spawn──► scan task (every interval)
//!                    │                      │ rescan snapshot
//!                    ▼                      ▼
//!               registry              WatchKey::signal_event
//!        (canonical path -> entry)
//! ```
//!
//! Directories are identified by their canonical path, so registering the
//! same directory twice (through different spellings) updates the existing
//! registration instead of creating a second one.
//!
//! If a directory can no longer be opened, its scan task invalidates the
//! key, removes the registration, and signals the key one last time so a
//! consumer notices.

mod snapshot;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use pw_core::{FxHashMap, PollingConfig, Sensitivity, fx_hash_map};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::WatchError;
use crate::event::{EventKinds, WatchModifier};
use crate::key::WatchKey;
use crate::poller::{PollerBackend, Wakeup};
use crate::service::ServiceHandle;
use crate::stats::ServiceStats;

use snapshot::DirectorySnapshot;

type Registry = Arc<Mutex<FxHashMap<Utf8PathBuf, Arc<Registration>>>>;

/// Outcome of one scan pass.
enum ScanOutcome {
    Continue,
    /// The key was cancelled; stop quietly.
    Stop,
    /// The directory could not be listed.
    Failed,
}

struct ScanState {
    kinds: EventKinds,
    snapshot: DirectorySnapshot,
    task: Option<JoinHandle<()>>,
}

struct Registration {
    key: WatchKey,
    canonical: Utf8PathBuf,
    state: Mutex<ScanState>,
}

impl Registration {
    fn scan(&self, stats: &ServiceStats) -> ScanOutcome {
        let mut state = self.state.lock();
        if !self.key.is_valid() {
            return ScanOutcome::Stop;
        }

        let kinds = state.kinds;
        let dir = self.key.watchable();
        let result = state.snapshot.rescan(dir, kinds, |kind, name| {
            self.key.signal_event(kind, Some(name));
        });

        match result {
            Ok(summary) => {
                stats.record_scan();
                if summary.skipped > 0 {
                    stats.record_skipped(summary.skipped);
                }
                tracing::trace!(
                    %dir,
                    entries = summary.entries_seen,
                    skipped = summary.skipped,
                    events = summary.events,
                    "scan complete"
                );
                ScanOutcome::Continue
            }
            Err(err) => {
                tracing::warn!(%dir, error = %err, "cannot scan watched directory, cancelling");
                stats.record_scan_failure();
                ScanOutcome::Failed
            }
        }
    }

    fn stop(&self) {
        if let Some(task) = self.state.lock().task.take() {
            task.abort();
        }
    }
}

async fn scan_loop(
    registration: Arc<Registration>,
    registry: Registry,
    stats: Arc<ServiceStats>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match registration.scan(&stats) {
            ScanOutcome::Continue => {}
            ScanOutcome::Stop => break,
            ScanOutcome::Failed => {
                registration.key.invalidate();
                {
                    let mut registry = registry.lock();
                    if registry
                        .get(&registration.canonical)
                        .is_some_and(|current| Arc::ptr_eq(current, &registration))
                    {
                        registry.remove(&registration.canonical);
                    }
                }
                registration.key.signal();
                break;
            }
        }
    }
}

/// Wakes the poller thread through a one-slot channel.
#[derive(Debug)]
struct Doorbell(Sender<()>);

impl Wakeup for Doorbell {
    fn wakeup(&self) -> io::Result<()> {
        match self.0.try_send(()) {
            // A pending ring already covers this request.
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "poller thread has stopped",
            )),
        }
    }
}

/// Picks the scan interval from the modifiers. The last sensitivity wins.
fn resolve_sensitivity(
    modifiers: &[WatchModifier],
    default: Sensitivity,
) -> Result<Sensitivity, WatchError> {
    modifiers
        .iter()
        .try_fold(default, |_, modifier| match modifier {
            WatchModifier::Sensitivity(level) => Ok(*level),
            WatchModifier::FileTree => Err(WatchError::UnsupportedModifier(modifier.name())),
        })
}

/// Backend that finds changes by rescanning each directory on a timer.
pub struct PollingBackend {
    handle: ServiceHandle,
    config: PollingConfig,
    runtime: Option<Runtime>,
    registry: Registry,
    doorbell: Receiver<()>,
    waker: Arc<Doorbell>,
}

impl PollingBackend {
    /// Creates the backend and starts its scheduler runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Scheduler`] if the runtime cannot be built.
    pub fn new(
        handle: ServiceHandle,
        config: PollingConfig,
        scheduler_thread_name: &str,
    ) -> Result<Self, WatchError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(scheduler_thread_name)
            .enable_time()
            .build()
            .map_err(WatchError::Scheduler)?;

        let (ring, doorbell) = bounded(1);

        tracing::debug!(
            high_ms = config.high_interval_ms,
            medium_ms = config.medium_interval_ms,
            low_ms = config.low_interval_ms,
            "polling backend started"
        );

        Ok(Self {
            handle,
            config,
            runtime: Some(runtime),
            registry: Arc::new(Mutex::new(fx_hash_map())),
            doorbell,
            waker: Arc::new(Doorbell(ring)),
        })
    }

    fn spawn_scan(
        &self,
        registration: &Arc<Registration>,
        period: Duration,
    ) -> Result<JoinHandle<()>, WatchError> {
        let runtime = self.runtime.as_ref().ok_or(WatchError::ServiceClosed)?;
        Ok(runtime.spawn(scan_loop(
            Arc::clone(registration),
            Arc::clone(&self.registry),
            Arc::clone(self.handle.stats()),
            period,
        )))
    }
}

impl PollerBackend for PollingBackend {
    fn waker(&self) -> Arc<dyn Wakeup> {
        Arc::clone(&self.waker) as Arc<dyn Wakeup>
    }

    fn wait_for_wakeup(&mut self) -> bool {
        self.doorbell.recv().is_ok()
    }

    fn register(
        &mut self,
        dir: &Utf8Path,
        kinds: EventKinds,
        modifiers: &[WatchModifier],
    ) -> Result<WatchKey, WatchError> {
        let sensitivity = resolve_sensitivity(modifiers, self.config.default_sensitivity)?;

        let metadata = match std::fs::metadata(dir) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(WatchError::path_not_found(dir));
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_dir() {
            return Err(WatchError::not_a_directory(dir));
        }

        let canonical = Utf8PathBuf::from_path_buf(dir.as_std_path().canonicalize()?)
            .map_err(WatchError::NonUtf8Path)?;
        let period = self.config.interval_for(sensitivity);

        let existing = self
            .registry
            .lock()
            .get(&canonical)
            .filter(|registration| registration.key.is_valid())
            .map(Arc::clone);
        if let Some(registration) = existing {
            let task = self.spawn_scan(&registration, period)?;
            let mut state = registration.state.lock();
            if let Some(old) = state.task.replace(task) {
                old.abort();
            }
            state.kinds = kinds;
            tracing::debug!(%dir, %sensitivity, "registration updated");
            return Ok(registration.key.clone());
        }

        let snapshot = DirectorySnapshot::capture(dir)?;
        let key = self.handle.new_key(dir.to_owned());
        let registration = Arc::new(Registration {
            key: key.clone(),
            canonical: canonical.clone(),
            state: Mutex::new(ScanState {
                kinds,
                snapshot,
                task: None,
            }),
        });

        let task = self.spawn_scan(&registration, period)?;
        registration.state.lock().task = Some(task);
        self.registry.lock().insert(canonical, registration);

        tracing::debug!(%dir, %sensitivity, interval = ?period, "directory watched");
        Ok(key)
    }

    fn cancel_key(&mut self, key: &WatchKey) {
        let mut removed = Vec::new();
        self.registry.lock().retain(|_, registration| {
            let matched = registration.key == *key;
            if matched {
                removed.push(Arc::clone(registration));
            }
            !matched
        });

        for registration in removed {
            registration.stop();
        }
        key.invalidate();
    }

    fn close_all(&mut self) {
        let registrations: Vec<_> = self
            .registry
            .lock()
            .drain()
            .map(|(_, registration)| registration)
            .collect();

        for registration in &registrations {
            registration.stop();
            registration.key.invalidate();
        }

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            tracing::debug!(
                registrations = registrations.len(),
                "polling backend closed"
            );
        }
    }
}

impl Drop for PollingBackend {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, WatchEvent};
    use crate::service::WatchService;
    use filetime::FileTime;
    use pw_core::{Config, ServiceConfig};
    use std::fs;
    use std::time::Instant as StdInstant;
    use tempfile::TempDir;

    fn fast_config() -> Config {
        Config {
            polling: PollingConfig::uniform(Duration::from_millis(50)),
            service: ServiceConfig::default(),
        }
    }

    fn utf8(dir: &TempDir) -> &Utf8Path {
        Utf8Path::from_path(dir.path()).unwrap()
    }

    /// Collects events for `key` until `done` is satisfied or five seconds pass.
    fn collect_until(
        service: &WatchService,
        key: &WatchKey,
        mut done: impl FnMut(&[WatchEvent]) -> bool,
    ) -> Vec<WatchEvent> {
        let deadline = StdInstant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while !done(&events) && StdInstant::now() < deadline {
            if let Some(signalled) = service.poll_timeout(Duration::from_millis(100)).unwrap() {
                assert_eq!(&signalled, key);
                events.extend(signalled.poll_events());
                signalled.reset();
            }
        }
        events
    }

    fn has(events: &[WatchEvent], kind: EventKind, name: &str) -> bool {
        events
            .iter()
            .any(|e| e.kind() == kind && e.context().map(Utf8Path::as_str) == Some(name))
    }

    #[test]
    fn test_resolve_sensitivity() {
        use Sensitivity::{High, Low, Medium};
        assert_eq!(resolve_sensitivity(&[], Medium).unwrap(), Medium);
        assert_eq!(
            resolve_sensitivity(
                &[WatchModifier::Sensitivity(High), WatchModifier::Sensitivity(Low)],
                Medium
            )
            .unwrap(),
            Low
        );
        assert!(matches!(
            resolve_sensitivity(&[WatchModifier::FileTree], Medium).unwrap_err(),
            WatchError::UnsupportedModifier("file_tree")
        ));
    }

    #[test]
    fn test_doorbell_ring_is_idempotent() {
        let (ring, doorbell) = bounded(1);
        let bell = Doorbell(ring);
        bell.wakeup().unwrap();
        bell.wakeup().unwrap();
        assert!(doorbell.try_recv().is_ok());
        assert!(doorbell.try_recv().is_err());

        drop(doorbell);
        assert_eq!(
            bell.wakeup().unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_create_modify_delete_end_to_end() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let service = WatchService::polling(&fast_config()).unwrap();
        let key = service.register(root, EventKinds::ENTRY_ALL, &[]).unwrap();

        let file = root.join("data.txt");
        fs::write(&file, "v1").unwrap();
        let events = collect_until(&service, &key, |ev| has(ev, EventKind::Create, "data.txt"));
        assert!(has(&events, EventKind::Create, "data.txt"));

        filetime::set_file_mtime(&file, FileTime::from_unix_time(1_000_000, 0)).unwrap();
        let events = collect_until(&service, &key, |ev| has(ev, EventKind::Modify, "data.txt"));
        assert!(has(&events, EventKind::Modify, "data.txt"));

        fs::remove_file(&file).unwrap();
        let events = collect_until(&service, &key, |ev| has(ev, EventKind::Delete, "data.txt"));
        assert!(has(&events, EventKind::Delete, "data.txt"));
    }

    #[test]
    fn test_only_requested_kinds_delivered() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let service = WatchService::polling(&fast_config()).unwrap();
        let key = service.register(root, EventKinds::DELETE, &[]).unwrap();

        fs::write(root.join("x"), "1").unwrap();
        assert_eq!(service.poll_timeout(Duration::from_millis(300)).unwrap(), None);

        fs::remove_file(root.join("x")).unwrap();
        let events = collect_until(&service, &key, |ev| !ev.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::Delete);
    }

    #[test]
    fn test_preexisting_entries_not_reported() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::write(root.join("old"), "1").unwrap();

        let service = WatchService::polling(&fast_config()).unwrap();
        let _key = service.register(root, EventKinds::ENTRY_ALL, &[]).unwrap();
        assert_eq!(service.poll_timeout(Duration::from_millis(300)).unwrap(), None);
    }

    #[test]
    fn test_reregistration_by_other_spelling_shares_key() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let service = WatchService::polling(&fast_config()).unwrap();

        let first = service.register(root, EventKinds::CREATE, &[]).unwrap();
        let second = service
            .register(root.join("."), EventKinds::DELETE, &[])
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.watchable(), root);

        // Only deletions are wanted now.
        fs::write(root.join("a"), "1").unwrap();
        assert_eq!(service.poll_timeout(Duration::from_millis(300)).unwrap(), None);
        fs::remove_file(root.join("a")).unwrap();
        let events = collect_until(&service, &first, |ev| !ev.is_empty());
        assert_eq!(events[0].kind(), EventKind::Delete);
    }

    #[test]
    fn test_reregistration_keeps_pending_events() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let service = WatchService::polling(&fast_config()).unwrap();
        let key = service.register(root, EventKinds::CREATE, &[]).unwrap();

        fs::write(root.join("a"), "1").unwrap();
        let signalled = service
            .poll_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();

        let again = service.register(root, EventKinds::ENTRY_ALL, &[]).unwrap();
        assert_eq!(again, key);
        assert!(has(&signalled.poll_events(), EventKind::Create, "a"));
    }

    #[test]
    fn test_removed_directory_cancels_key() {
        let parent = TempDir::new().unwrap();
        let watched = utf8(&parent).join("watched");
        fs::create_dir(&watched).unwrap();

        let service = WatchService::polling(&fast_config()).unwrap();
        let key = service.register(&watched, EventKinds::ENTRY_ALL, &[]).unwrap();
        fs::remove_dir(&watched).unwrap();

        let signalled = service
            .poll_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(signalled, key);
        assert!(!signalled.is_valid());
        assert!(!signalled.reset());
        assert!(service.stats().scans_failed >= 1);

        // The directory can be registered again once it is back.
        fs::create_dir(&watched).unwrap();
        let fresh = service.register(&watched, EventKinds::CREATE, &[]).unwrap();
        assert_ne!(fresh, key);
        assert!(fresh.is_valid());
    }

    #[test]
    fn test_reregistration_switches_interval() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let config = Config {
            polling: PollingConfig {
                high_interval_ms: 50,
                medium_interval_ms: 60_000,
                low_interval_ms: 60_000,
                default_sensitivity: Sensitivity::Medium,
            },
            service: ServiceConfig::default(),
        };
        let service = WatchService::polling(&config).unwrap();

        let slow = [WatchModifier::Sensitivity(Sensitivity::Low)];
        let key = service.register(root, EventKinds::CREATE, &slow).unwrap();
        let fast = [WatchModifier::Sensitivity(Sensitivity::High)];
        let again = service.register(root, EventKinds::CREATE, &fast).unwrap();
        assert_eq!(again, key);

        fs::write(root.join("quick"), "1").unwrap();
        let signalled = service
            .poll_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("scan should run on the high interval");
        assert_eq!(signalled, key);
        assert!(has(&signalled.poll_events(), EventKind::Create, "quick"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_target_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join(OsStr::from_bytes(b"bad\xff"));
        fs::create_dir(&target).unwrap();
        let link = utf8(&dir).join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let service = WatchService::polling(&fast_config()).unwrap();
        let err = service
            .register(&link, EventKinds::CREATE, &[])
            .unwrap_err();
        assert!(matches!(err, WatchError::NonUtf8Path(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn test_cancelled_key_stops_scanning() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let service = WatchService::polling(&fast_config()).unwrap();
        let key = service.register(root, EventKinds::CREATE, &[]).unwrap();

        key.cancel();
        fs::write(root.join("late"), "1").unwrap();
        assert_eq!(service.poll_timeout(Duration::from_millis(300)).unwrap(), None);

        let fresh = service.register(root, EventKinds::CREATE, &[]).unwrap();
        assert_ne!(fresh, key);
    }

    #[test]
    fn test_burst_overflows_small_list() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let mut config = fast_config();
        config.service.max_event_list_size = 4;
        let service = WatchService::polling(&config).unwrap();
        let key = service.register(root, EventKinds::CREATE, &[]).unwrap();

        for i in 0..10 {
            fs::write(root.join(format!("f{i}")), "x").unwrap();
        }

        let events = collect_until(&service, &key, |ev| ev.iter().any(|e| e.kind().is_overflow()));
        assert!(events.iter().any(|e| e.kind().is_overflow()));
        assert!(service.stats().overflows >= 1);
    }
}
