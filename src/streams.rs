//! Bookkeeping of application streams the audio server announces.
//!
//! The registry mirrors the server's set of playback and capture streams so
//! UI collaborators can hang per-stream items onto it and have them torn
//! down when the stream goes away. Virtual streams and event-sound blips
//! are filtered out on the way in.

use tracing::debug;

use crate::mixer::{StreamInfo, StreamKind};

/// `application.id` of the event-sound daemon; its short-lived blip
/// streams are never worth tracking.
pub const NOISE_APP_ID: &str = "org.freedesktop.libcanberra";

/// UI attachment whose lifetime follows a tracked stream.
pub trait StreamItem {
    /// Called exactly once, when the owning stream is removed.
    fn destroy(&mut self);
}

/// One tracked stream: the server's id, its direction, and an optional UI
/// item attached later by a collaborator.
pub struct TrackedStream {
    pub id: u32,
    pub kind: StreamKind,
    item: Option<Box<dyn StreamItem>>,
}

/// Set of currently known application streams.
#[derive(Default)]
pub struct StreamRegistry {
    entries: Vec<TrackedStream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stream the server announced, unless it is filtered.
    ///
    /// A duplicate add refreshes the recorded kind and keeps the existing
    /// entry, so there is never more than one entry per id.
    pub fn on_stream_added(&mut self, info: &StreamInfo) {
        if info.is_virtual || info.application_id.as_deref() == Some(NOISE_APP_ID) {
            debug!(id = info.id, "Ignoring system stream");
            return;
        }
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == info.id) {
            entry.kind = info.kind;
            return;
        }
        debug!(id = info.id, kind = ?info.kind, "Tracking stream");
        self.entries.push(TrackedStream {
            id: info.id,
            kind: info.kind,
            item: None,
        });
    }

    /// Drops the entry for `id`, destroying its attached item.
    ///
    /// Unknown ids are a silent no-op: the remove notification can race the
    /// add, and removal must stay idempotent.
    pub fn on_stream_removed(&mut self, id: u32) {
        let Some(position) = self.entries.iter().position(|entry| entry.id == id) else {
            return;
        };
        let mut entry = self.entries.remove(position);
        if let Some(mut item) = entry.item.take() {
            item.destroy();
        }
        debug!(id, "Stream removed");
    }

    /// Hangs a UI item onto an already tracked stream. Returns whether the
    /// id was tracked; the item is dropped untouched otherwise.
    pub fn attach_item(&mut self, id: u32, item: Box<dyn StreamItem>) -> bool {
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.item = Some(item);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn kind_of(&self, id: u32) -> Option<StreamKind> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
