//! Volume handling.
//!
//! - [`scale`] holds the pure conversions between the audio server's raw
//!   volume range and the percent scale the rest of the daemon works in.
//! - [`controller`] drives an actual adjustment: read the default sink,
//!   step, show the OSD, write back.

pub mod controller;
pub mod scale;

pub use controller::VolumeController;
pub use scale::{IconTier, ScaleError};
