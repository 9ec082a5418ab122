//! Hotkey-driven volume stepping for the default audio output, with an OSD.

pub mod config;
pub mod daemon;
pub mod hotkeys;
pub mod mixer;
pub mod osd;
pub mod streams;
pub mod volume;

pub use daemon::{Daemon, Event, HotkeyAction};

/// Client name presented to the desktop services.
pub const APP_NAME: &str = "finevol";
