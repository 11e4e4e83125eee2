//! Core modules - discovery, overlay controllers, listener routing
//!
//! Independent of any browser API: everything goes through `dom::Page`.

pub mod discovery;
pub mod hosts;
pub mod keys;
pub mod overlay;
pub mod rate;
pub mod router;

// Re-exports for convenience
pub use discovery::Discovery;
pub use overlay::{OverlayController, OverlaySettings, OverlayState};
pub use router::{Bindings, Channel, ControllerId, Router, Scope};
