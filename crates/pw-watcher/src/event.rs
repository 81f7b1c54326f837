//! Event records delivered through watch keys.
//!
//! A [`WatchEvent`] is what a consumer gets back from
//! [`WatchKey::poll_events`](crate::WatchKey::poll_events). Repeated
//! occurrences of the same change are folded into one record whose
//! [`count`](WatchEvent::count) grows instead of producing new records.
//!
//! # Event Flow
//!
//! ```text
//! directory scan ──► WatchKey::signal_event ──► pending list (coalesced)
//!                                                      │
//!                                   WatchKey::poll_events
//!                                                      ▼
//!                                              Vec<WatchEvent>
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use pw_core::Sensitivity;
use serde::Serialize;

/// The kind of change an event reports.
///
/// # Examples
///
/// ```
/// use pw_watcher::EventKind;
///
/// assert_eq!(EventKind::Create.label(), "create");
/// assert!(EventKind::Overflow.is_overflow());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An entry appeared in the directory.
    Create,
    /// An entry's modification time changed.
    Modify,
    /// An entry disappeared from the directory.
    Delete,
    /// Events were discarded because the key's pending list was full.
    Overflow,
}

impl EventKind {
    /// Returns the lowercase name of this kind.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Overflow => "overflow",
        }
    }

    /// Returns `true` for [`EventKind::Overflow`].
    #[inline]
    #[must_use]
    pub const fn is_overflow(self) -> bool {
        matches!(self, Self::Overflow)
    }

    /// Returns the single-kind set for this kind.
    #[must_use]
    pub const fn as_set(self) -> EventKinds {
        match self {
            Self::Create => EventKinds::CREATE,
            Self::Modify => EventKinds::MODIFY,
            Self::Delete => EventKinds::DELETE,
            Self::Overflow => EventKinds::OVERFLOW,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

bitflags::bitflags! {
    /// A set of [`EventKind`]s requested at registration.
    ///
    /// # Examples
    ///
    /// ```
    /// use pw_watcher::{EventKind, EventKinds};
    ///
    /// let kinds = EventKinds::CREATE | EventKinds::DELETE;
    /// assert!(kinds.wants(EventKind::Create));
    /// assert!(!kinds.wants(EventKind::Modify));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventKinds: u8 {
        /// Entry created.
        const CREATE = 1;
        /// Entry modified.
        const MODIFY = 1 << 1;
        /// Entry deleted.
        const DELETE = 1 << 2;
        /// Overflow. Always delivered; requesting it has no effect.
        const OVERFLOW = 1 << 3;
        /// Create, modify, and delete.
        const ENTRY_ALL = Self::CREATE.bits() | Self::MODIFY.bits() | Self::DELETE.bits();
    }
}

impl EventKinds {
    /// Returns `true` if events of `kind` were requested.
    #[inline]
    #[must_use]
    pub const fn wants(self, kind: EventKind) -> bool {
        self.contains(kind.as_set())
    }

    /// Parses a comma-separated list such as `"create,delete"`.
    ///
    /// Returns `None` if any item is not a known kind name.
    #[must_use]
    pub fn parse_list(list: &str) -> Option<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .try_fold(Self::empty(), |acc, item| {
                let kind = match item {
                    "create" => Self::CREATE,
                    "modify" => Self::MODIFY,
                    "delete" => Self::DELETE,
                    "overflow" => Self::OVERFLOW,
                    "all" => Self::ENTRY_ALL,
                    _ => return None,
                };
                Some(acc | kind)
            })
    }
}

impl From<EventKind> for EventKinds {
    fn from(kind: EventKind) -> Self {
        kind.as_set()
    }
}

/// An optional adjustment applied to a registration.
///
/// # Examples
///
/// ```
/// use pw_watcher::WatchModifier;
/// use pw_core::Sensitivity;
///
/// let modifiers = [WatchModifier::Sensitivity(Sensitivity::High)];
/// assert_eq!(modifiers[0].name(), "sensitivity");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchModifier {
    /// Select the scan interval for this registration.
    Sensitivity(Sensitivity),
    /// Watch the whole tree below the directory.
    ///
    /// Not supported by the polling backend.
    FileTree,
}

impl WatchModifier {
    /// Returns the name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sensitivity(_) => "sensitivity",
            Self::FileTree => "file_tree",
        }
    }
}

/// A single (possibly repeated) change reported by a watch key.
///
/// `context` is the entry name relative to the watched directory, or `None`
/// for [`EventKind::Overflow`]. `count` is at least 1 and only ever grows
/// while the event is pending.
///
/// # Examples
///
/// ```
/// use pw_watcher::{EventKind, WatchEvent};
/// use camino::Utf8PathBuf;
///
/// let event = WatchEvent::new(EventKind::Create, Some(Utf8PathBuf::from("a.txt")));
/// assert_eq!(event.count(), 1);
/// assert_eq!(event.context().map(|p| p.as_str()), Some("a.txt"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    kind: EventKind,
    context: Option<Utf8PathBuf>,
    count: u32,
}

impl WatchEvent {
    /// Creates an event with a count of 1.
    #[inline]
    #[must_use]
    pub const fn new(kind: EventKind, context: Option<Utf8PathBuf>) -> Self {
        Self {
            kind,
            context,
            count: 1,
        }
    }

    /// Creates a context-free overflow event.
    #[inline]
    #[must_use]
    pub const fn overflow() -> Self {
        Self::new(EventKind::Overflow, None)
    }

    /// Returns the event kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the entry name this event refers to.
    #[inline]
    #[must_use]
    pub fn context(&self) -> Option<&Utf8Path> {
        self.context.as_deref()
    }

    /// Returns how many times this event occurred.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Returns `true` if this event has the given kind and context.
    #[inline]
    pub(crate) fn matches(&self, kind: EventKind, context: Option<&Utf8Path>) -> bool {
        self.kind == kind && self.context() == context
    }

    #[inline]
    pub(crate) fn increment(&mut self) {
        self.count = self.count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kinds_wants() {
        let kinds = EventKinds::ENTRY_ALL;
        assert!(kinds.wants(EventKind::Create));
        assert!(kinds.wants(EventKind::Modify));
        assert!(kinds.wants(EventKind::Delete));
        assert!(!kinds.wants(EventKind::Overflow));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            EventKinds::parse_list("create, delete"),
            Some(EventKinds::CREATE | EventKinds::DELETE)
        );
        assert_eq!(EventKinds::parse_list("all"), Some(EventKinds::ENTRY_ALL));
        assert_eq!(EventKinds::parse_list(""), Some(EventKinds::empty()));
        assert_eq!(EventKinds::parse_list("create,rename"), None);
    }

    #[test]
    fn test_overflow_has_no_context() {
        let event = WatchEvent::overflow();
        assert!(event.kind().is_overflow());
        assert!(event.context().is_none());
        assert_eq!(event.count(), 1);
    }

    #[test]
    fn test_increment_and_matches() {
        let mut event = WatchEvent::new(EventKind::Modify, Some(Utf8PathBuf::from("a")));
        event.increment();
        event.increment();
        assert_eq!(event.count(), 3);
        assert!(event.matches(EventKind::Modify, Some(Utf8Path::new("a"))));
        assert!(!event.matches(EventKind::Delete, Some(Utf8Path::new("a"))));
        assert!(!event.matches(EventKind::Modify, Some(Utf8Path::new("b"))));
    }

    #[test]
    fn test_event_serializes_kind_in_snake_case() {
        let event = WatchEvent::new(EventKind::Delete, Some(Utf8PathBuf::from("gone.txt")));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"kind":"delete","context":"gone.txt","count":1}"#);
    }
}
