//! Runtime options handed over by the extension loader.
//!
//! The loader may pass a JSON object; every field is optional and missing
//! fields take their defaults. Nothing is read from or written to disk.

use crate::core::keys::KeyBindings;
use crate::core::rate::RATE_STEP;
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overlay and discovery options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Rate increment per click/shortcut (default 0.10)
    pub step: f64,
    /// Polling interval for the discovery fallback (default 1000ms)
    pub poll_interval_ms: u64,
    pub increase_char: char,
    pub decrease_char: char,
    /// `log` filter: off, error, warn, info, debug, trace
    pub log_level: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        let keys = KeyBindings::default();
        Self {
            step: RATE_STEP,
            poll_interval_ms: 1000,
            increase_char: keys.increase_char(),
            decrease_char: keys.decrease_char(),
            log_level: "warn".to_string(),
        }
    }
}

impl OverlayConfig {
    /// Parse loader JSON. `None`, blank input or invalid JSON yield defaults.
    pub fn from_json(json: Option<&str>) -> Self {
        let Some(raw) = json.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str::<OverlayConfig>(raw) {
            Ok(cfg) => cfg.sanitized(),
            Err(e) => {
                warn!("Invalid overlay config ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Replace values that would break the overlay with defaults.
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !self.step.is_finite() || self.step <= 0.0 {
            warn!("Overlay config: step {} rejected, using {}", self.step, defaults.step);
            self.step = defaults.step;
        }
        if self.poll_interval_ms == 0 {
            warn!("Overlay config: poll_interval_ms 0 rejected, using {}", defaults.poll_interval_ms);
            self.poll_interval_ms = defaults.poll_interval_ms;
        }
        if self.increase_char.eq_ignore_ascii_case(&self.decrease_char) {
            warn!(
                "Overlay config: shortcuts collide ('{}'), using defaults",
                self.increase_char
            );
            self.increase_char = defaults.increase_char;
            self.decrease_char = defaults.decrease_char;
        }
        self
    }

    pub fn key_bindings(&self) -> KeyBindings {
        KeyBindings::new(self.increase_char, self.decrease_char)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Warn)
    }
}
