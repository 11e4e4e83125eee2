//! PLAYRATE - playback-speed overlay for media elements on web pages
//!
//! Injects a small "- 1.00 + close" control in front of every `<video>`
//! element, keeps discovering elements that appear later, and adds
//! keyboard shortcuts that only fire while the media element (or its
//! overlay) has focus and is playing.
//!
//! The core is host-agnostic and runs against any [`dom::Page`]; the wasm32
//! build adds the browser host in `web` and the content-script entry point.

// Core engine (discovery, overlays, routing)
pub mod core;

pub mod config;
pub mod dom;
pub mod logging;

#[cfg(target_arch = "wasm32")]
pub mod web;

/// Crate name and version, for the startup log line
pub const VERSION: &str = const_format::concatcp!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

// Re-export commonly used types
pub use config::OverlayConfig;
pub use crate::core::discovery::Discovery;
pub use crate::core::hosts::{HostHook, HostHooks};
pub use crate::core::keys::{KeyBindings, SpeedAction};
pub use crate::core::overlay::{OverlayController, OverlayState};
pub use dom::{EventOutcome, Page, PageEvent, Playback};
