//! Per-directory listing cache used to detect changes between scans.
//!
//! Each scan bumps a tick counter and stamps every entry it sees with it.
//! An entry that is new produces a create event, one whose modification
//! time moved produces a modify event, and any entry still carrying an old
//! tick after the listing is done has disappeared.

use std::fs::DirEntry;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use pw_core::FxHashMap;

use crate::error::WatchError;
use crate::event::{EventKind, EventKinds};

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    modified: SystemTime,
    last_tick: u64,
}

/// What a single rescan found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ScanSummary {
    /// Entries whose attributes were read.
    pub entries_seen: usize,
    /// Entries skipped because their attributes or name were unusable.
    pub skipped: usize,
    /// Events emitted.
    pub events: usize,
}

/// Last known modification time of every entry in one directory.
#[derive(Debug, Default)]
pub(crate) struct DirectorySnapshot {
    tick: u64,
    entries: FxHashMap<Utf8PathBuf, CacheEntry>,
}

enum Stamp {
    Read(Utf8PathBuf, SystemTime),
    /// Name known, attributes unreadable.
    Unreadable(Utf8PathBuf),
    Skip,
}

fn stamp(entry: &DirEntry) -> Stamp {
    let name = match Utf8PathBuf::from_path_buf(entry.file_name().into()) {
        Ok(name) => name,
        Err(raw) => {
            tracing::warn!(name = %raw.display(), "skipping entry with non UTF-8 name");
            return Stamp::Skip;
        }
    };

    match entry.metadata().and_then(|meta| meta.modified()) {
        Ok(modified) => Stamp::Read(name, modified),
        Err(err) => {
            tracing::trace!(%name, error = %err, "cannot read entry attributes");
            Stamp::Unreadable(name)
        }
    }
}

/// Filters events by kind and tallies what one scan found.
struct Reporter<F> {
    kinds: EventKinds,
    summary: ScanSummary,
    emit: F,
}

impl<F: FnMut(EventKind, Utf8PathBuf)> Reporter<F> {
    fn new(kinds: EventKinds, emit: F) -> Self {
        Self {
            kinds,
            summary: ScanSummary::default(),
            emit,
        }
    }

    fn report(&mut self, kind: EventKind, name: &Utf8Path) {
        if self.kinds.wants(kind) {
            self.summary.events += 1;
            (self.emit)(kind, name.to_owned());
        }
    }
}

impl DirectorySnapshot {
    /// Records the current contents of `dir` without reporting anything.
    pub(crate) fn capture(dir: &Utf8Path) -> Result<Self, WatchError> {
        let mut snapshot = Self::default();
        snapshot.rescan(dir, EventKinds::empty(), |_, _| {})?;
        Ok(snapshot)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Lists `dir` again and reports differences through `emit`.
    ///
    /// Only kinds contained in `kinds` are emitted. A new entry is reported
    /// as a modification when creations are not requested but modifications
    /// are.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Io`] if `dir` cannot be opened. The snapshot
    /// is left untouched in that case.
    pub(crate) fn rescan(
        &mut self,
        dir: &Utf8Path,
        kinds: EventKinds,
        emit: impl FnMut(EventKind, Utf8PathBuf),
    ) -> Result<ScanSummary, WatchError> {
        let listing = dir.as_std_path().read_dir()?;
        let tick = self.next_tick();
        let mut out = Reporter::new(kinds, emit);

        let mut complete = true;
        for entry in listing {
            match entry {
                Ok(entry) => self.apply(tick, stamp(&entry), &mut out),
                Err(err) => {
                    tracing::debug!(%dir, error = %err, "directory listing interrupted");
                    complete = false;
                    break;
                }
            }
        }

        if complete {
            self.sweep(tick, &mut out);
        }

        Ok(out.summary)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    /// Folds one listed entry into the cache.
    fn apply<F: FnMut(EventKind, Utf8PathBuf)>(
        &mut self,
        tick: u64,
        stamp: Stamp,
        out: &mut Reporter<F>,
    ) {
        let (name, modified) = match stamp {
            Stamp::Read(name, modified) => (name, modified),
            Stamp::Unreadable(name) => {
                out.summary.skipped += 1;
                // Keep it alive; a failed stat is not a deletion.
                if let Some(cached) = self.entries.get_mut(&name) {
                    cached.last_tick = tick;
                }
                return;
            }
            Stamp::Skip => {
                out.summary.skipped += 1;
                return;
            }
        };
        out.summary.entries_seen += 1;

        match self.entries.get_mut(&name) {
            Some(cached) => {
                if cached.modified != modified {
                    out.report(EventKind::Modify, &name);
                }
                cached.modified = modified;
                cached.last_tick = tick;
            }
            None => {
                if out.kinds.wants(EventKind::Create) {
                    out.report(EventKind::Create, &name);
                } else {
                    out.report(EventKind::Modify, &name);
                }
                self.entries.insert(
                    name,
                    CacheEntry {
                        modified,
                        last_tick: tick,
                    },
                );
            }
        }
    }

    /// Drops every entry not seen during `tick` and reports it deleted.
    fn sweep<F: FnMut(EventKind, Utf8PathBuf)>(&mut self, tick: u64, out: &mut Reporter<F>) {
        let mut gone = Vec::new();
        self.entries.retain(|name, cached| {
            let alive = cached.last_tick == tick;
            if !alive {
                gone.push(name.clone());
            }
            alive
        });
        for name in gone {
            out.report(EventKind::Delete, &name);
        }
    }
}
