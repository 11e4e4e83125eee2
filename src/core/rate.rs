//! Playback-rate arithmetic and readout formatting.
//!
//! No bounds are enforced here. Whatever the media element accepts is
//! kept; clamping belongs to the host media primitive.

use super::keys::SpeedAction;

/// Default increment per button click or shortcut
pub const RATE_STEP: f64 = 0.10;

/// Rate after applying `action` once with `step`.
pub fn step_rate(rate: f64, action: SpeedAction, step: f64) -> f64 {
    match action {
        SpeedAction::Increase => rate + step,
        SpeedAction::Decrease => rate - step,
    }
}

/// Readout text: rate with two decimals.
pub fn format_rate(rate: f64) -> String {
    format!("{:.2}", rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert_eq!(format_rate(1.0), "1.00");
        assert_eq!(format_rate(1.0 + RATE_STEP + RATE_STEP), "1.20");
        assert_eq!(format_rate(0.25), "0.25");
        assert_eq!(format_rate(16.0), "16.00");
    }

    #[test]
    fn test_step_is_unclamped() {
        let mut rate = 0.15;
        rate = step_rate(rate, SpeedAction::Decrease, RATE_STEP);
        rate = step_rate(rate, SpeedAction::Decrease, RATE_STEP);
        assert!(rate < 0.0);
        assert_eq!(format_rate(rate), "-0.05");
    }
}
