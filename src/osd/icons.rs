//! Themed icon names for the volume tiers.

use crate::volume::scale::IconTier;

const ICON_SIZE: u16 = 48;

/// Freedesktop icon name for a tier.
pub fn themed_name(tier: IconTier) -> &'static str {
    match tier {
        IconTier::Muted => "audio-volume-muted-symbolic",
        IconTier::Low => "audio-volume-low-symbolic",
        IconTier::Medium => "audio-volume-medium-symbolic",
        IconTier::High => "audio-volume-high-symbolic",
    }
}

/// Resolves a tier against the installed icon theme.
///
/// Falls back to the bare name, which lets the notification server resolve
/// it against its own theme instead.
pub fn resolve(tier: IconTier) -> String {
    let name = themed_name(tier);
    freedesktop_icons::lookup(name)
        .with_size(ICON_SIZE)
        .find()
        .and_then(|path| path.to_str().map(str::to_owned))
        .unwrap_or_else(|| name.to_owned())
}
