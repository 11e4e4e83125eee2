//! Overlay controller: one speed overlay bound to one media element.
//!
//! **Architecture**: the controller is a plain state object. It does not own
//! the page, the listener table or the media element; callers pass `&P` and
//! `&mut Router` into every operation that needs them. Listener lifetime is
//! explicit: [`Bindings`] records what was subscribed and `dispose` returns it.
//!
//! # Lifecycle
//!
//! `Unattached` - target had no parent at construction; nothing was inserted
//! `Attached`   - overlay inserted before the target, listeners bound
//! `Disposed`   - close activated; overlay removed, listeners unbound
//!
//! # Focus gate
//!
//! Keyboard shortcuts only act when the target is playing (position > 0,
//! not paused, not ended) and focus sits on the target, on an element that
//! contains it, or on an element that contains the overlay. Focus on the
//! document body never counts. Events failing the gate are left alone.
//!
//! # Readout
//!
//! The speed is never cached: every read goes to the media element, and the
//! readout is refreshed from it on each rate-change notification.

use super::hosts::HostHooks;
use super::keys::{KeyBindings, SpeedAction};
use super::rate::{format_rate, step_rate};
use super::router::{Bindings, Channel, ControllerId, Router, Scope};
use crate::dom::{EventOutcome, OverlayDom, Page, classes};
use anyhow::Result;
use log::{debug, info, trace, warn};

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayState {
    Unattached,
    Attached,
    Disposed,
}

/// Per-overlay settings (copied from the discovery agent's config)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlaySettings {
    pub step: f64,
    pub keys: KeyBindings,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            step: super::rate::RATE_STEP,
            keys: KeyBindings::default(),
        }
    }
}

/// Which overlay control a click landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Decrease,
    Increase,
    Close,
}

/// Speed overlay for exactly one media element.
#[derive(Debug)]
pub struct OverlayController<N> {
    id: ControllerId,
    target: N,
    dom: Option<OverlayDom<N>>,
    bindings: Bindings<N>,
    settings: OverlaySettings,
    state: OverlayState,
}

impl<N: Clone + Eq + std::hash::Hash + std::fmt::Debug> OverlayController<N> {
    /// Build the overlay, insert it before `target`, mark the target and bind
    /// listeners.
    ///
    /// Never fails: if `target` has no parent, or the page rejects a
    /// mutation, the controller comes back `Unattached` and nothing is left
    /// behind in the document.
    pub fn attach<P>(
        id: ControllerId,
        page: &P,
        target: N,
        settings: OverlaySettings,
        hooks: &HostHooks<P>,
        router: &mut Router<N>,
    ) -> Self
    where
        P: Page<Node = N>,
    {
        let mut ctrl = Self {
            id,
            target,
            dom: None,
            bindings: Bindings::default(),
            settings,
            state: OverlayState::Unattached,
        };

        match ctrl.insert_dom(page) {
            Ok(Some(dom)) => {
                ctrl.dom = Some(dom);
                ctrl.state = OverlayState::Attached;
            }
            Ok(None) => {
                debug!("{}: target {:?} has no parent, not attaching", id, ctrl.target);
                return ctrl;
            }
            Err(e) => {
                warn!("{}: attach failed: {}", id, e);
                return ctrl;
            }
        }

        ctrl.bind(router);
        ctrl.refresh_readout(page);
        hooks.apply(page);
        info!("{}: attached to {:?}", id, ctrl.target);
        ctrl
    }

    /// Create and insert the fragment. `Ok(None)` when the target is detached.
    fn insert_dom<P: Page<Node = N>>(&self, page: &P) -> Result<Option<OverlayDom<N>>> {
        let Some(parent) = page.parent(&self.target) else {
            return Ok(None);
        };
        let dom = page.build_overlay()?;
        page.add_class(&dom.root, classes::ROOT)?;
        page.insert_before(&parent, &dom.root, &self.target)?;
        if let Err(e) = page.add_class(&self.target, classes::MEDIA) {
            // Do not leave a half-attached overlay behind
            let _ = page.remove(&dom.root);
            return Err(e);
        }
        Ok(Some(dom))
    }

    fn bind(&mut self, router: &mut Router<N>) {
        let Some(dom) = &self.dom else {
            return;
        };
        let background = Scope::Node(dom.background.clone());
        router.subscribe(self.id, Channel::Click, background.clone(), &mut self.bindings);
        router.subscribe(self.id, Channel::DoubleClick, background, &mut self.bindings);
        router.subscribe(self.id, Channel::KeyDown, Scope::Document, &mut self.bindings);
        router.subscribe(self.id, Channel::KeyPress, Scope::Document, &mut self.bindings);
        router.subscribe(
            self.id,
            Channel::RateChange,
            Scope::Node(self.target.clone()),
            &mut self.bindings,
        );
    }

    // === Accessors ===

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn target(&self) -> &N {
        &self.target
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == OverlayState::Attached
    }

    /// Overlay nodes (`None` unless attached).
    pub fn dom(&self) -> Option<&OverlayDom<N>> {
        match self.state {
            OverlayState::Attached => self.dom.as_ref(),
            _ => None,
        }
    }

    pub fn bindings(&self) -> &Bindings<N> {
        &self.bindings
    }

    // === Speed ===

    /// Add one step to the target's playback rate.
    pub fn increase_speed<P: Page<Node = N>>(&self, page: &P) {
        self.adjust(page, SpeedAction::Increase);
    }

    /// Subtract one step from the target's playback rate. Not clamped.
    pub fn decrease_speed<P: Page<Node = N>>(&self, page: &P) {
        self.adjust(page, SpeedAction::Decrease);
    }

    fn adjust<P: Page<Node = N>>(&self, page: &P, action: SpeedAction) {
        let rate = page.playback(&self.target).rate;
        let next = step_rate(rate, action, self.settings.step);
        match page.set_playback_rate(&self.target, next) {
            Ok(()) => trace!("{}: {:?} {:.2} -> {:.2}", self.id, action, rate, next),
            Err(e) => debug!("{}: rate change rejected: {}", self.id, e),
        }
    }

    /// Current rate, two decimals. Read straight from the target.
    pub fn get_speed<P: Page<Node = N>>(&self, page: &P) -> String {
        format_rate(page.playback(&self.target).rate)
    }

    /// Write the current rate into the readout.
    pub fn refresh_readout<P: Page<Node = N>>(&self, page: &P) {
        let Some(dom) = self.dom() else {
            return;
        };
        if let Err(e) = page.set_text(&dom.readout, &self.get_speed(page)) {
            debug!("{}: readout update failed: {}", self.id, e);
        }
    }

    // === Focus gate ===

    fn is_playing<P: Page<Node = N>>(&self, page: &P) -> bool {
        page.playback(&self.target).is_playing()
    }

    /// Focus is on the target, on something containing it, or on something
    /// containing the overlay.
    pub fn has_focus<P: Page<Node = N>>(&self, page: &P) -> bool {
        let Some(active) = page.active_element() else {
            return false;
        };
        if page.body().as_ref() == Some(&active) {
            return false;
        }
        if page.contains(&active, &self.target) {
            return true;
        }
        self.dom()
            .map(|dom| page.contains(&active, &dom.root))
            .unwrap_or(false)
    }

    /// Combined playing + focus check guarding keyboard shortcuts.
    pub fn passes_focus_gate<P: Page<Node = N>>(&self, page: &P) -> bool {
        self.is_attached() && self.is_playing(page) && self.has_focus(page)
    }

    // === Event handlers ===

    /// Key-down channel: arrow keys adjust speed, any other key sends focus
    /// back to the target.
    pub fn handle_key_down<P: Page<Node = N>>(&self, page: &P, code: u32) -> EventOutcome {
        if code == 0 || !self.passes_focus_gate(page) {
            return EventOutcome::Ignored;
        }
        match self.settings.keys.navigation(code) {
            Some(action) => {
                self.adjust(page, action);
                EventOutcome::Handled
            }
            None => {
                if let Err(e) = page.focus(&self.target) {
                    debug!("{}: refocus failed: {}", self.id, e);
                }
                EventOutcome::Refocused
            }
        }
    }

    /// Key-press channel: printable shortcuts, case-insensitive.
    pub fn handle_key_press<P: Page<Node = N>>(&self, page: &P, code: u32) -> EventOutcome {
        if code == 0 || !self.passes_focus_gate(page) {
            return EventOutcome::Ignored;
        }
        match self.settings.keys.character(code) {
            Some(action) => {
                self.adjust(page, action);
                EventOutcome::Handled
            }
            None => EventOutcome::Ignored,
        }
    }

    /// Click or double-click inside the overlay background.
    ///
    /// Only hits on the three controls are consumed; anything else inside
    /// the overlay passes through untouched.
    pub fn handle_click<P: Page<Node = N>>(&mut self, page: &P, router: &mut Router<N>, hit: &N) -> EventOutcome {
        let Some(control) = self.control_at(hit) else {
            return EventOutcome::Ignored;
        };
        match control {
            Control::Decrease => self.decrease_speed(page),
            Control::Increase => self.increase_speed(page),
            Control::Close => self.dispose(page, router),
        }
        self.refresh_readout(page);
        EventOutcome::Consumed
    }

    fn control_at(&self, hit: &N) -> Option<Control> {
        let dom = self.dom()?;
        if *hit == dom.decrease {
            Some(Control::Decrease)
        } else if *hit == dom.increase {
            Some(Control::Increase)
        } else if *hit == dom.close {
            Some(Control::Close)
        } else {
            None
        }
    }

    /// Rate-change notification from the target.
    pub fn handle_rate_change<P: Page<Node = N>>(&self, page: &P) -> EventOutcome {
        self.refresh_readout(page);
        EventOutcome::Handled
    }

    // === Teardown ===

    /// Unbind every listener and remove the overlay from the document.
    ///
    /// The target keeps its rate and its marker class. Calling this again, or
    /// on an unattached controller, does nothing.
    pub fn dispose<P: Page<Node = N>>(&mut self, page: &P, router: &mut Router<N>) {
        if self.state != OverlayState::Attached {
            trace!("{}: dispose on {:?} controller ignored", self.id, self.state);
            return;
        }
        router.unsubscribe(self.id, &mut self.bindings);
        if let Some(dom) = &self.dom {
            if let Err(e) = page.remove(&dom.root) {
                debug!("{}: overlay removal failed: {}", self.id, e);
            }
        }
        self.state = OverlayState::Disposed;
        info!("{}: disposed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::codes;
    use crate::dom::sim::{NodeId, SimPage};

    struct Fixture {
        page: SimPage,
        router: Router<NodeId>,
        hooks: HostHooks<SimPage>,
        video: NodeId,
    }

    impl Fixture {
        fn new() -> Self {
            let page = SimPage::default();
            let wrapper = page.create_element("div");
            page.append_child(page.body_node(), wrapper).unwrap();
            let video = page.add_video(wrapper).unwrap();
            Self {
                page,
                router: Router::new(),
                hooks: HostHooks::builtin(),
                video,
            }
        }

        fn attach(&mut self) -> OverlayController<NodeId> {
            OverlayController::attach(
                ControllerId(1),
                &self.page,
                self.video,
                OverlaySettings::default(),
                &self.hooks,
                &mut self.router,
            )
        }

        /// Deliver queued rate-change notifications to `ctrl`.
        fn settle(&self, ctrl: &OverlayController<NodeId>) {
            self.page.dispatch(|page, ev| match ev {
                crate::dom::PageEvent::RateChange { .. } => ctrl.handle_rate_change(page),
                _ => EventOutcome::Ignored,
            });
        }

        fn playing_and_focused(&self) {
            self.page.play(self.video, 2.0).unwrap();
            self.page.focus(&self.video).unwrap();
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_attach_inserts_before_target() {
        let mut fx = Fixture::new();
        let ctrl = fx.attach();
        assert!(ctrl.is_attached());

        let dom = ctrl.dom().unwrap().clone();
        let parent = fx.page.parent(&fx.video).unwrap();
        assert_eq!(fx.page.children(parent), vec![dom.root, fx.video]);
        assert!(fx.page.classes(dom.root).contains(&classes::ROOT.to_string()));
        assert!(fx.page.classes(fx.video).contains(&classes::MEDIA.to_string()));
        assert_eq!(fx.page.text(dom.readout), "1.00");
        assert_eq!(ctrl.bindings().len(), 5);
        assert_eq!(fx.router.len(), 5);
    }

    #[test]
    fn test_attach_keeps_existing_classes() {
        let mut fx = Fixture::new();
        fx.page.add_class(&fx.video, "host-player").unwrap();
        fx.attach();
        assert_eq!(
            fx.page.classes(fx.video),
            vec!["host-player".to_string(), classes::MEDIA.to_string()]
        );
    }

    #[test]
    fn test_attach_without_parent_is_noop() {
        let mut fx = Fixture::new();
        fx.page.detach(fx.video).unwrap();
        let ctrl = fx.attach();

        assert_eq!(ctrl.state(), OverlayState::Unattached);
        assert!(ctrl.dom().is_none());
        assert!(fx.router.is_empty());
        assert!(fx.page.find_by_class(classes::ROOT).is_empty());
        assert!(fx.page.classes(fx.video).is_empty());

        // Operations on an unattached controller are harmless
        assert_eq!(ctrl.handle_key_down(&fx.page, codes::UP), EventOutcome::Ignored);
    }

    #[test]
    fn test_speed_readout_tracks_rate() {
        let mut fx = Fixture::new();
        let ctrl = fx.attach();

        ctrl.increase_speed(&fx.page);
        fx.settle(&ctrl);
        assert_eq!(ctrl.get_speed(&fx.page), "1.10");
        assert_eq!(fx.page.text(ctrl.dom().unwrap().readout), "1.10");

        for _ in 0..3 {
            ctrl.decrease_speed(&fx.page);
        }
        fx.settle(&ctrl);
        assert!(approx(fx.page.rate(fx.video), 0.8));
        assert_eq!(fx.page.text(ctrl.dom().unwrap().readout), "0.80");
    }

    #[test]
    fn test_readout_follows_external_rate_change() {
        let mut fx = Fixture::new();
        let ctrl = fx.attach();
        // Host page changes the rate itself
        fx.page.set_playback_rate(&fx.video, 2.0).unwrap();
        fx.settle(&ctrl);
        assert_eq!(fx.page.text(ctrl.dom().unwrap().readout), "2.00");
    }

    #[test]
    fn test_key_press_shortcuts() {
        let mut fx = Fixture::new();
        let ctrl = fx.attach();
        fx.playing_and_focused();

        assert_eq!(ctrl.handle_key_press(&fx.page, 's' as u32), EventOutcome::Handled);
        assert_eq!(ctrl.handle_key_press(&fx.page, 'S' as u32), EventOutcome::Handled);
        assert!(approx(fx.page.rate(fx.video), 1.2));
        assert_eq!(ctrl.handle_key_press(&fx.page, 'a' as u32), EventOutcome::Handled);
        assert!(approx(fx.page.rate(fx.video), 1.1));

        assert_eq!(ctrl.handle_key_press(&fx.page, 'z' as u32), EventOutcome::Ignored);
        assert_eq!(ctrl.handle_key_press(&fx.page, 0), EventOutcome::Ignored);
        assert!(approx(fx.page.rate(fx.video), 1.1));
    }

    #[test]
    fn test_key_down_arrows_and_refocus() {
        let mut fx = Fixture::new();
        let ctrl = fx.attach();
        fx.playing_and_focused();

        assert_eq!(ctrl.handle_key_down(&fx.page, codes::UP), EventOutcome::Handled);
        assert_eq!(ctrl.handle_key_down(&fx.page, codes::RIGHT), EventOutcome::Handled);
        assert_eq!(ctrl.handle_key_down(&fx.page, codes::LEFT), EventOutcome::Handled);
        assert!(approx(fx.page.rate(fx.video), 1.1));

        // Focus on the wrapper around the video also passes the gate
        let wrapper = fx.page.parent(&fx.video).unwrap();
        fx.page.set_focus(Some(wrapper));
        assert_eq!(ctrl.handle_key_down(&fx.page, 13), EventOutcome::Refocused);
        assert_eq!(fx.page.active_element(), Some(fx.video));
        assert!(approx(fx.page.rate(fx.video), 1.1));
    }

    #[test]
    fn test_gate_requires_playing() {
        let mut fx = Fixture::new();
        let ctrl = fx.attach();
        fx.playing_and_focused();
        fx.page.pause(fx.video).unwrap();

        assert_eq!(ctrl.handle_key_press(&fx.page, 's' as u32), EventOutcome::Ignored);
        assert_eq!(ctrl.handle_key_down(&fx.page, codes::UP), EventOutcome::Ignored);
        assert!(approx(fx.page.rate(fx.video), 1.0));

        fx.page.play(fx.video, 5.0).unwrap();
        fx.page.end(fx.video).unwrap();
        assert_eq!(ctrl.handle_key_press(&fx.page, 's' as u32), EventOutcome::Ignored);

        // Not started yet: position zero
        fx.page.play(fx.video, 0.0).unwrap();
        assert_eq!(ctrl.handle_key_press(&fx.page, 's' as u32), EventOutcome::Ignored);
        assert!(approx(fx.page.rate(fx.video), 1.0));
    }

    #[test]
    fn test_gate_requires_relevant_focus() {
        let mut fx = Fixture::new();
        let ctrl = fx.attach();
        fx.playing_and_focused();

        let input = fx.page.create_element("input");
        fx.page.append_child(fx.page.body_node(), input).unwrap();
        fx.page.focus(&input).unwrap();
        assert_eq!(ctrl.handle_key_press(&fx.page, 's' as u32), EventOutcome::Ignored);
        assert_eq!(ctrl.handle_key_down(&fx.page, codes::UP), EventOutcome::Ignored);
        // Unrelated key must not steal focus from the input
        assert_eq!(ctrl.handle_key_down(&fx.page, 65), EventOutcome::Ignored);
        assert_eq!(fx.page.active_element(), Some(input));

        // Body focus never counts, even though it contains the video
        fx.page.set_focus(None);
        assert_eq!(ctrl.handle_key_press(&fx.page, 's' as u32), EventOutcome::Ignored);
        assert!(approx(fx.page.rate(fx.video), 1.0));

        // Focus inside the overlay counts
        let root = ctrl.dom().unwrap().root;
        fx.page.set_focus(Some(root));
        assert_eq!(ctrl.handle_key_press(&fx.page, 's' as u32), EventOutcome::Handled);
    }

    #[test]
    fn test_click_routing() {
        let mut fx = Fixture::new();
        let mut ctrl = fx.attach();
        let dom = ctrl.dom().unwrap().clone();

        assert_eq!(
            ctrl.handle_click(&fx.page, &mut fx.router, &dom.increase),
            EventOutcome::Consumed
        );
        assert_eq!(fx.page.text(dom.readout), "1.10");
        assert_eq!(
            ctrl.handle_click(&fx.page, &mut fx.router, &dom.decrease),
            EventOutcome::Consumed
        );
        assert_eq!(fx.page.text(dom.readout), "1.00");

        // Readout and background are inside the overlay but not controls
        assert_eq!(
            ctrl.handle_click(&fx.page, &mut fx.router, &dom.readout),
            EventOutcome::Ignored
        );
        assert_eq!(
            ctrl.handle_click(&fx.page, &mut fx.router, &dom.background),
            EventOutcome::Ignored
        );
        assert!(approx(fx.page.rate(fx.video), 1.0));
    }

    #[test]
    fn test_close_disposes() {
        let mut fx = Fixture::new();
        let mut ctrl = fx.attach();
        let dom = ctrl.dom().unwrap().clone();
        ctrl.increase_speed(&fx.page);

        assert_eq!(
            ctrl.handle_click(&fx.page, &mut fx.router, &dom.close),
            EventOutcome::Consumed
        );
        assert_eq!(ctrl.state(), OverlayState::Disposed);
        assert!(!fx.page.is_connected(dom.root));
        assert!(fx.router.is_empty());
        assert!(ctrl.bindings().is_empty());
        assert!(approx(fx.page.rate(fx.video), 1.1));
        // Target stays marked
        assert!(fx.page.classes(fx.video).contains(&classes::MEDIA.to_string()));

        // Shortcuts are dead after close
        fx.playing_and_focused();
        assert_eq!(ctrl.handle_key_press(&fx.page, 's' as u32), EventOutcome::Ignored);
        assert!(approx(fx.page.rate(fx.video), 1.1));
    }

    #[test]
    fn test_dispose_twice_is_harmless() {
        let mut fx = Fixture::new();
        let mut ctrl = fx.attach();
        ctrl.dispose(&fx.page, &mut fx.router);
        ctrl.dispose(&fx.page, &mut fx.router);
        assert_eq!(ctrl.state(), OverlayState::Disposed);
        assert!(fx.page.is_connected(fx.video));
        assert!(approx(fx.page.rate(fx.video), 1.0));
    }

    #[test]
    fn test_target_removed_by_host() {
        let mut fx = Fixture::new();
        let mut ctrl = fx.attach();
        let parent = fx.page.parent(&fx.video).unwrap();
        fx.page.detach(parent).unwrap();

        // Still usable, disposal tolerates the missing document
        ctrl.increase_speed(&fx.page);
        assert!(approx(fx.page.rate(fx.video), 1.1));
        ctrl.dispose(&fx.page, &mut fx.router);
        assert_eq!(ctrl.state(), OverlayState::Disposed);
    }

    #[test]
    fn test_vimeo_hook_runs_on_attach() {
        let mut fx = Fixture::new();
        fx.page.set_location("https://player.vimeo.com/video/1");
        let player = fx.page.create_element("div");
        fx.page.add_class(&player, "player").unwrap();
        let interceptor = fx.page.create_element("div");
        fx.page.add_class(&interceptor, "target").unwrap();
        fx.page.append_child(fx.page.body_node(), player).unwrap();
        fx.page.append_child(player, interceptor).unwrap();

        fx.attach();
        assert!(!fx.page.is_connected(interceptor));
    }
}
