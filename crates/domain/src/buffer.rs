//! Per-aggregate buffer of published, not yet persisted events.

use event_store::Version;

/// An event together with the aggregate version it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent<E> {
    pub version: Version,
    pub event: E,
}

/// Ordered, append-only sequence of pending events.
///
/// Versions are strictly increasing. The buffer is emptied only by
/// [`EventBuffer::drain`], which the repository calls after a successful
/// write.
#[derive(Debug, Clone)]
pub struct EventBuffer<E> {
    events: Vec<PendingEvent<E>>,
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> EventBuffer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, version: Version, event: E) {
        debug_assert!(
            self.last_version().is_none_or(|last| last < version),
            "pending versions must be strictly increasing"
        );
        self.events.push(PendingEvent { version, event });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Pending events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingEvent<E>> {
        self.events.iter()
    }

    /// Version of the oldest pending event.
    pub fn first_version(&self) -> Option<Version> {
        self.events.first().map(|p| p.version)
    }

    /// Version of the newest pending event.
    pub fn last_version(&self) -> Option<Version> {
        self.events.last().map(|p| p.version)
    }

    /// Removes and returns every pending event, oldest first.
    pub fn drain(&mut self) -> Vec<PendingEvent<E>> {
        std::mem::take(&mut self.events)
    }
}

impl<'a, E> IntoIterator for &'a EventBuffer<E> {
    type Item = &'a PendingEvent<E>;
    type IntoIter = std::slice::Iter<'a, PendingEvent<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
