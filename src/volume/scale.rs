//! Pure volume-scale conversions.
//!
//! The audio server reports volumes in its native integer range; everything
//! above the mixer boundary works in whole percents (0-100). These helpers
//! convert between the two representations and pick the OSD icon tier for a
//! given percentage. No state, no side effects.

/// Upper bound of the percent scale.
pub const MAX_PERCENT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleError {
    ZeroCeiling,
}

impl std::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleError::ZeroCeiling => write!(f, "Raw volume ceiling must be greater than zero"),
        }
    }
}

impl std::error::Error for ScaleError {}

/// Icon tier for a percent volume, from silent to loud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconTier {
    Muted,
    Low,
    Medium,
    High,
}

/// Converts a raw device volume into percent, rounding to nearest.
///
/// The result is not clamped: a raw volume above `raw_max` (overdriven
/// output) maps above 100 and is brought back into range by [`apply_step`].
pub fn normalize(raw: u32, raw_max: u32) -> Result<u32, ScaleError> {
    if raw_max == 0 {
        return Err(ScaleError::ZeroCeiling);
    }
    let scaled = (u64::from(raw) * 100 + u64::from(raw_max) / 2) / u64::from(raw_max);
    Ok(u32::try_from(scaled).unwrap_or(u32::MAX))
}

/// Adds a signed step to a percent volume, saturating at 0 and 100.
pub fn apply_step(percent: u32, delta: i32) -> u8 {
    (i64::from(percent) + i64::from(delta)).clamp(0, i64::from(MAX_PERCENT)) as u8
}

/// Converts a percent volume back into the raw device range, rounding to
/// nearest so repeated conversions do not drift.
pub fn denormalize(percent: u8, raw_max: u32) -> u32 {
    let raw = (u64::from(percent) * u64::from(raw_max) + 50) / 100;
    u32::try_from(raw).unwrap_or(u32::MAX)
}

/// Picks the icon tier for a percent volume.
///
/// Tier upper bounds are inclusive: exactly 25 is still `Low` and exactly 75
/// is still `Medium`.
pub fn icon_tier(percent: u8) -> IconTier {
    match percent {
        0 => IconTier::Muted,
        1..=25 => IconTier::Low,
        26..=75 => IconTier::Medium,
        _ => IconTier::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CEILING: u32 = 0x10000;

    #[test]
    fn normalize_stays_in_percent_range() {
        for raw in [0, 1, CEILING / 4, CEILING / 2, CEILING - 1, CEILING] {
            let percent = normalize(raw, CEILING).unwrap();
            assert!(percent <= 100, "raw {} mapped to {}", raw, percent);
        }
    }

    #[test]
    fn normalize_rounds_to_nearest() {
        assert_eq!(normalize(CEILING / 2, CEILING).unwrap(), 50);
        // 1000 / 65536 is 1.52%, closer to 2 than to 1.
        assert_eq!(normalize(1000, CEILING).unwrap(), 2);
        assert_eq!(normalize(CEILING, CEILING).unwrap(), 100);
    }

    #[test]
    fn normalize_rejects_zero_ceiling() {
        assert_eq!(normalize(1234, 0), Err(ScaleError::ZeroCeiling));
    }

    #[test]
    fn normalize_keeps_overdriven_volumes_above_hundred() {
        let percent = normalize(CEILING + CEILING / 2, CEILING).unwrap();
        assert_eq!(percent, 150);
        assert_eq!(apply_step(percent, 5), 100);
    }

    #[test]
    fn apply_step_saturates_at_both_ends() {
        assert_eq!(apply_step(100, 5), 100);
        assert_eq!(apply_step(0, -5), 0);
        assert_eq!(apply_step(98, 5), 100);
        assert_eq!(apply_step(3, -5), 0);
    }

    #[test]
    fn apply_step_moves_by_delta_inside_range() {
        assert_eq!(apply_step(50, 5), 55);
        assert_eq!(apply_step(50, -5), 45);
        assert_eq!(apply_step(50, 0), 50);
    }

    #[test]
    fn round_trip_stays_within_one_percent_unit() {
        let tolerance = CEILING / 100 + 1;
        for raw in [0, 1, 417, 1000, CEILING / 3, CEILING / 2, CEILING - 1, CEILING] {
            let percent = normalize(raw, CEILING).unwrap();
            let back = denormalize(apply_step(percent, 0), CEILING);
            let drift = back.abs_diff(raw);
            assert!(drift <= tolerance, "raw {} drifted by {}", raw, drift);
        }
    }

    #[test]
    fn denormalize_hits_exact_endpoints() {
        assert_eq!(denormalize(0, CEILING), 0);
        assert_eq!(denormalize(100, CEILING), CEILING);
        assert_eq!(denormalize(50, CEILING), CEILING / 2);
    }

    #[test]
    fn icon_tier_boundaries() {
        assert_eq!(icon_tier(0), IconTier::Muted);
        assert_eq!(icon_tier(1), IconTier::Low);
        assert_eq!(icon_tier(25), IconTier::Low);
        assert_eq!(icon_tier(26), IconTier::Medium);
        assert_eq!(icon_tier(75), IconTier::Medium);
        assert_eq!(icon_tier(76), IconTier::High);
        assert_eq!(icon_tier(100), IconTier::High);
    }
}
