//! Audio mixer capability surface.
//!
//! The daemon talks to the audio server through the narrow [`Mixer`] trait:
//! read the default output, push a volume back, and know the server's raw
//! volume ceiling. Stream lifecycle notifications arrive separately as
//! [`MixerEvent`]s emitted by the backend's monitor connection.

pub mod pulse;

pub use pulse::{PulseMixer, StreamMonitor};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("Audio server connection failed: {0}")]
    Connect(String),
    #[error("Mixer operation failed: {0}")]
    Operation(String),
}

/// Direction of an application stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Playback stream into a sink.
    SinkInput,
    /// Capture stream out of a source.
    SourceOutput,
}

/// Classification of a stream the server announced, fetched at
/// notification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: u32,
    pub kind: StreamKind,
    /// Streams without an owning client (loopbacks, monitors) are virtual.
    pub is_virtual: bool,
    /// The server's `application.id` property, when the client set one.
    pub application_id: Option<String>,
}

/// Stream lifecycle notification from the monitor connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEvent {
    StreamAdded(StreamInfo),
    StreamRemoved { id: u32 },
}

/// Non-owning view of the default output device.
///
/// `channels` is carried along so a volume write can address every channel
/// of the device uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSnapshot {
    pub index: u32,
    pub channels: u8,
    pub raw_volume: u32,
}

/// Control operations the volume controller needs from the audio server.
pub trait Mixer {
    /// The raw volume value the server considers 100%.
    fn vol_max_norm(&self) -> u32;

    /// Snapshot of the current default output, or `None` when the server
    /// has no default sink configured.
    fn default_sink(&mut self) -> Option<SinkSnapshot>;

    /// Writes a raw volume to the given sink and publishes it to the server.
    fn set_sink_volume(&mut self, sink: &SinkSnapshot, raw: u32) -> Result<(), MixerError>;
}
