use std::collections::HashMap;

use crate::stream::StreamHandle;

/// Map from stream id to live stream, scoped to one control session.
///
/// Not synchronized on its own: the owning session keeps it behind its
/// single lock. Removing an entry never closes the socket; the caller that
/// removed it does.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: HashMap<String, StreamHandle>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` under its id, returning any handle it displaced.
    pub fn register(&mut self, handle: StreamHandle) -> Option<StreamHandle> {
        self.streams.insert(handle.id().to_string(), handle)
    }

    pub fn lookup(&self, id: &str) -> Option<StreamHandle> {
        self.streams.get(id).cloned()
    }

    /// Get-and-delete. `None` if the stream is already gone.
    pub fn remove(&mut self, id: &str) -> Option<StreamHandle> {
        self.streams.remove(id)
    }

    /// Close every remaining socket and clear the map. Returns how many
    /// sockets this call closed.
    pub fn close_all(&mut self) -> usize {
        self.streams
            .drain()
            .filter(|(_, handle)| handle.close())
            .count()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
