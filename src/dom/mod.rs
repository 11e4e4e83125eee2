//! Host page abstraction.
//!
//! The overlay core never calls a browser API directly. Everything it needs
//! from the hosting document goes through [`Page`]: tree queries, overlay
//! construction, class/text mutation, focus, and the media element's
//! playback state.
//!
//! Two implementations exist:
//! - [`sim::SimPage`] - in-memory document with an emulated event loop
//!   (headless hosting, test-suite)
//! - `web::WebPage` - `web-sys` bindings, wasm32 only
//!
//! All methods take `&self`: the page is shared, single-threaded state and
//! implementations use interior mutability where they need it.

pub mod sim;

use anyhow::Result;
use std::fmt::Debug;
use std::hash::Hash;

/// Tag of the elements that receive an overlay. `<audio>` is left alone:
/// pages use it for hidden notification sounds.
pub const MEDIA_TAG: &str = "video";

/// Class names written into the document.
pub mod classes {
    /// Added to the overlay wrapper inserted before the media element
    pub const ROOT: &str = "playrate-overlay";
    /// Appended to the media element once it is controlled
    pub const MEDIA: &str = "playrate-media";
    pub const BACKGROUND: &str = "playrate-bg";
    pub const READOUT: &str = "speed-readout";
    pub const BUTTON: &str = "playrate-btn";
    pub const DECREASE: &str = "decrease";
    pub const INCREASE: &str = "increase";
    pub const CLOSE: &str = "playrate-close";
}

/// Button labels of the overlay.
pub mod labels {
    pub const DECREASE: &str = "-";
    pub const INCREASE: &str = "+";
    pub const CLOSE: &str = "close";
}

/// Style sheet injected into the overlay's shadow root.
pub const OVERLAY_STYLE: &str = r#"
.playrate-bg {
  position: absolute;
  z-index: 2147483647;
  margin: 8px;
  padding: 2px 6px;
  border-radius: 4px;
  background: rgba(0, 0, 0, 0.55);
  color: #fff;
  font: 12px/1.4 sans-serif;
  opacity: 0.35;
  transition: opacity 0.2s;
}
.playrate-bg:hover { opacity: 1; }
.playrate-btn {
  cursor: pointer;
  margin: 0 2px;
  color: inherit;
  background: transparent;
  border: 1px solid rgba(255, 255, 255, 0.4);
  border-radius: 3px;
}
.playrate-close { text-decoration: none; font-size: 10px; }
.speed-readout { display: inline-block; min-width: 2.5em; text-align: center; }
"#;

/// Handles to the nodes of one injected overlay.
///
/// `root` is the light-DOM wrapper inserted before the media element; the
/// remaining nodes live inside its shadow root, under `background`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayDom<N> {
    pub root: N,
    pub background: N,
    pub readout: N,
    pub decrease: N,
    pub increase: N,
    pub close: N,
}

/// Snapshot of a media element's playback state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Playback {
    pub rate: f64,
    pub current_time: f64,
    pub paused: bool,
    pub ended: bool,
}

impl Playback {
    /// Actively playing: position advanced, not paused, not ended.
    pub fn is_playing(&self) -> bool {
        self.current_time > 0.0 && !self.paused && !self.ended
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            rate: 1.0,
            current_time: 0.0,
            paused: true,
            ended: false,
        }
    }
}

/// Notifications a host delivers to the discovery agent.
#[derive(Clone, Debug, PartialEq)]
pub enum PageEvent<N> {
    /// Single click; `node` is the innermost hit element
    Click { node: N },
    DoubleClick { node: N },
    /// Key-down with its raw key code (navigation channel)
    KeyDown { code: u32 },
    /// Key-press with its raw character code (printable channel)
    KeyPress { code: u32 },
    /// Playback rate of `media` changed
    RateChange { media: N },
    /// `node` was inserted into the document
    NodeInserted { node: N },
    /// Polling timer fired
    Tick,
}

/// What the page should do with an event after routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventOutcome {
    /// Not ours; default handling continues untouched
    Ignored,
    /// Acted on, default handling continues
    Handled,
    /// Focus moved back to the media element, no shortcut applied
    Refocused,
    /// Acted on; prevent default and stop propagation
    Consumed,
}

impl EventOutcome {
    /// Combine outcomes of several listeners on one event (strongest wins).
    pub fn merge(self, other: EventOutcome) -> EventOutcome {
        self.max(other)
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self, EventOutcome::Consumed)
    }
}

/// Document operations consumed by the overlay core.
pub trait Page {
    /// Opaque, non-owning element handle.
    type Node: Clone + Eq + Hash + Debug;

    /// Identity of a node that does not keep the node alive.
    type Key: Copy + Eq + Hash + Debug;

    fn key(node: &Self::Node) -> Self::Key;

    /// All `<video>` elements currently in the document, in document order.
    fn media_elements(&self) -> Vec<Self::Node>;

    /// Whether `node` is a `<video>` element.
    fn is_media(&self, node: &Self::Node) -> bool;

    /// Whether `node` is attached to the document.
    fn is_connected(&self, node: &Self::Node) -> bool;

    /// Parent element, `None` when detached.
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Document body, if any.
    fn body(&self) -> Option<Self::Node>;

    /// Build a detached overlay fragment (wrapper, shadow root, controls).
    fn build_overlay(&self) -> Result<OverlayDom<Self::Node>>;

    fn insert_before(&self, parent: &Self::Node, node: &Self::Node, reference: &Self::Node) -> Result<()>;

    /// Detach `node` from its parent. Already-detached nodes are not an error.
    fn remove(&self, node: &Self::Node) -> Result<()>;

    fn add_class(&self, node: &Self::Node, class: &str) -> Result<()>;

    fn set_text(&self, node: &Self::Node, text: &str) -> Result<()>;

    fn focus(&self, node: &Self::Node) -> Result<()>;

    /// Currently focused element.
    fn active_element(&self) -> Option<Self::Node>;

    /// Inclusive containment: a node contains itself.
    fn contains(&self, ancestor: &Self::Node, node: &Self::Node) -> bool;

    /// Current page location (href).
    fn location(&self) -> String;

    fn query_selector(&self, selector: &str) -> Option<Self::Node>;

    fn playback(&self, media: &Self::Node) -> Playback;

    /// Assign the playback rate. Hosts fire a rate-change notification.
    fn set_playback_rate(&self, media: &Self::Node, rate: f64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_playing() {
        let mut pb = Playback::default();
        assert!(!pb.is_playing());

        pb.paused = false;
        // Position still zero
        assert!(!pb.is_playing());

        pb.current_time = 3.5;
        assert!(pb.is_playing());

        pb.ended = true;
        assert!(!pb.is_playing());
    }

    #[test]
    fn test_outcome_merge() {
        use EventOutcome::*;
        assert_eq!(Ignored.merge(Handled), Handled);
        assert_eq!(Consumed.merge(Ignored), Consumed);
        assert_eq!(Refocused.merge(Handled), Refocused);
        assert!(Ignored.merge(Consumed).is_consumed());
    }
}
