//! Volume stepping against the default output.

use tracing::{debug, trace, warn};

use crate::mixer::Mixer;
use crate::osd::{OsdDisplay, OSD_TIMEOUT_DEFAULT_MS};
use crate::volume::scale::{self, ScaleError};

/// Applies hotkey volume steps to the default output and mirrors each
/// change on the OSD.
pub struct VolumeController<M, O> {
    mixer: M,
    osd: O,
}

impl<M: Mixer, O: OsdDisplay> VolumeController<M, O> {
    pub fn new(mixer: M, osd: O) -> Self {
        Self { mixer, osd }
    }

    /// Raises the default output volume by `step` percent.
    pub fn volume_up(&mut self, step: u8) -> Result<(), ScaleError> {
        self.adjust(i32::from(step))
    }

    /// Lowers the default output volume by `step` percent.
    pub fn volume_down(&mut self, step: u8) -> Result<(), ScaleError> {
        self.adjust(-i32::from(step))
    }

    fn adjust(&mut self, delta: i32) -> Result<(), ScaleError> {
        let Some(sink) = self.mixer.default_sink() else {
            // Expected idle state: no default output configured.
            trace!("Ignoring volume key, no default sink");
            return Ok(());
        };

        let ceiling = self.mixer.vol_max_norm();
        let current = scale::normalize(sink.raw_volume, ceiling)?;
        let target = scale::apply_step(current, delta);

        // The overlay goes out first so a failing write cannot suppress it.
        self.osd
            .show(OSD_TIMEOUT_DEFAULT_MS, scale::icon_tier(target), target);

        let raw = scale::denormalize(target, ceiling);
        if let Err(err) = self.mixer.set_sink_volume(&sink, raw) {
            warn!("Volume write failed: {}", err);
        }
        debug!(current, target, raw, "Adjusted volume");
        Ok(())
    }
}
