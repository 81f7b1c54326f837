//! Polling directory watch service with coalescing watch keys.
//!
//! This crate watches directories for entries being created, modified, or
//! deleted by listing them periodically and comparing each listing with the
//! previous one. It does not depend on any platform notification facility,
//! so it behaves the same everywhere.
//!
//! # Overview
//!
//! - [`WatchService`] is the entry point. Directories are registered with
//!   it, and consumers take signalled [`WatchKey`]s from it.
//! - A [`WatchKey`] belongs to one registered directory. It collects
//!   [`WatchEvent`]s, folding repeats into a count, and sits in the
//!   service's ready queue while it has something to report.
//! - The [`PollingBackend`] owns the registrations and runs one repeating
//!   scan per directory on a dedicated scheduler thread.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Caller threads                                                   │
//! │   WatchService::register / WatchKey::cancel / WatchService::close│
//! └───────────────┬──────────────────────────────────────────────────┘
//!                 │ Request + reply channel
//!                 ▼
//! ┌──────────────────────────────┐        ┌──────────────────────────┐
//! │ Poller thread                │ spawn  │ Scheduler runtime        │
//! │   PollingBackend             │ ─────► │   scan task per directory│
//! │   (registry of directories)  │        │   DirectorySnapshot diff │
//! └──────────────────────────────┘        └────────────┬─────────────┘
//!                                                      │ signal_event
//!                                                      ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ WatchKey (pending events) ──► ready queue ──► take / poll        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! pw-cli ──► pw-watcher ──► pw-core
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use pw_core::{Config, Sensitivity};
//! use pw_watcher::{EventKinds, WatchModifier, WatchService};
//!
//! let service = WatchService::polling(&Config::default())?;
//! service.register(
//!     "/var/spool/incoming",
//!     EventKinds::CREATE | EventKinds::DELETE,
//!     &[WatchModifier::Sensitivity(Sensitivity::High)],
//! )?;
//!
//! while let Some(key) = service.poll_timeout(Duration::from_secs(30))? {
//!     for event in key.poll_events() {
//!         println!("{} {:?} (x{})", event.kind(), event.context(), event.count());
//!     }
//!     if !key.reset() {
//!         println!("{} is no longer watched", key.watchable());
//!     }
//! }
//! # Ok::<(), pw_watcher::WatchError>(())
//! ```
//!
//! # Custom Backends
//!
//! [`WatchService::with_backend`] accepts any [`PollerBackend`]. The backend
//! receives a [`ServiceHandle`] for creating keys and is driven from the
//! poller thread, one request at a time.
//!
//! # Error Handling
//!
//! Every fallible operation returns [`WatchError`]. Problems found while a
//! directory is already being watched are not returned anywhere: the
//! affected key is invalidated and signalled, and [`WatchKey::reset`]
//! returns `false`.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod key;
pub mod poller;
pub mod polling;
pub mod service;
pub mod stats;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use event::{EventKind, EventKinds, WatchEvent, WatchModifier};

// Re-export key and service types
pub use key::WatchKey;
pub use service::{ServiceHandle, WatchService};

// Re-export backend plumbing
pub use poller::{PollerBackend, PollerHandle, Request, RequestQueue, Wakeup};
pub use polling::PollingBackend;

// Re-export statistics
pub use stats::{ServiceStats, StatsSnapshot};
