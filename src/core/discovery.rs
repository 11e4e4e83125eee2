//! Discovery agent - finds media elements and gives each one overlay.
//!
//! Two discovery paths stay active for the whole page lifetime:
//! - insertion notifications: a freshly inserted media element is attached
//!   the moment the host reports it
//! - polling: every `poll_interval` the whole document is rescanned, because
//!   some hosts swap subtrees in ways that never produce a usable insertion
//!   notification (nested media inside an inserted container, replaced
//!   shadow trees, notifications dropped by the host)
//!
//! Both paths funnel into [`Discovery::attach`], which consults the registry
//! of controlled targets, so an element is attached at most once no matter
//! which path sees it first.
//!
//! Each poll also releases controllers whose target has left the document:
//! their listeners are unbound, the overlay is removed and the target is
//! forgotten. The registry stores [`Page::Key`]s, never nodes, so nothing
//! here keeps a removed element alive.
//!
//! The agent also owns the listener [`Router`] and is the single entry point
//! for page events ([`Discovery::handle`]).

use super::hosts::HostHooks;
use super::overlay::{OverlayController, OverlaySettings, OverlayState};
use super::router::{Channel, ControllerId, Router};
use crate::config::OverlayConfig;
use crate::dom::{EventOutcome, Page, PageEvent};
use indexmap::IndexMap;
use log::{debug, trace};
use std::collections::HashSet;
use std::time::Duration;

/// Owns every overlay controller on one page.
pub struct Discovery<P: Page> {
    settings: OverlaySettings,
    poll_interval: Duration,
    hooks: HostHooks<P>,
    /// Targets that received an overlay (kept after close)
    registry: HashSet<P::Key>,
    controllers: IndexMap<ControllerId, OverlayController<P::Node>>,
    router: Router<P::Node>,
    next_id: u64,
}

impl<P: Page> std::fmt::Debug for Discovery<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("controlled", &self.registry.len())
            .field("live", &self.controllers.len())
            .field("routes", &self.router.len())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl<P: Page> Discovery<P> {
    /// Agent with built-in host hooks.
    pub fn new(config: &OverlayConfig) -> Self {
        Self::with_hooks(config, HostHooks::builtin())
    }

    pub fn with_hooks(config: &OverlayConfig, hooks: HostHooks<P>) -> Self {
        Self {
            settings: OverlaySettings {
                step: config.step,
                keys: config.key_bindings(),
            },
            poll_interval: config.poll_interval(),
            hooks,
            registry: HashSet::new(),
            controllers: IndexMap::new(),
            router: Router::new(),
            next_id: 1,
        }
    }

    // === Discovery ===

    /// Attach an overlay to every media element that does not have one yet.
    /// Returns how many overlays were created.
    pub fn scan_and_attach(&mut self, page: &P) -> usize {
        let mut attached = 0;
        for media in page.media_elements() {
            if self.registry.contains(&P::key(&media)) {
                continue;
            }
            if self.attach(page, media).is_some() {
                attached += 1;
            }
        }
        if attached > 0 {
            debug!("Discovery: scan attached {} overlay(s)", attached);
        }
        attached
    }

    /// Insertion notification. Only the inserted node itself is considered;
    /// media nested deeper is left to the next poll.
    pub fn on_node_inserted(&mut self, page: &P, node: &P::Node) -> Option<ControllerId> {
        if !page.is_media(node) {
            return None;
        }
        if self.registry.contains(&P::key(node)) {
            trace!("Discovery: re-inserted {:?} already controlled", node);
            return None;
        }
        self.attach(page, node.clone())
    }

    /// Construct a controller for `target` unless one already exists.
    ///
    /// Returns the new controller id, or `None` when the target is already
    /// controlled (or was, before being closed) or could not be attached.
    /// Unattached targets are not registered, so a later scan retries them.
    pub fn attach(&mut self, page: &P, target: P::Node) -> Option<ControllerId> {
        if self.registry.contains(&P::key(&target)) {
            return None;
        }
        let id = ControllerId(self.next_id);
        self.next_id += 1;

        let ctrl = OverlayController::attach(id, page, target.clone(), self.settings, &self.hooks, &mut self.router);
        if !ctrl.is_attached() {
            return None;
        }
        self.registry.insert(P::key(&target));
        self.controllers.insert(id, ctrl);
        Some(id)
    }

    // === Event routing ===

    /// Route one page event to the controllers listening for it.
    pub fn handle(&mut self, page: &P, event: PageEvent<P::Node>) -> EventOutcome {
        let outcome = match event {
            PageEvent::Click { node } => self.route_click(page, Channel::Click, &node),
            PageEvent::DoubleClick { node } => self.route_click(page, Channel::DoubleClick, &node),
            PageEvent::KeyDown { code } => self.route_keys(page, Channel::KeyDown, code),
            PageEvent::KeyPress { code } => self.route_keys(page, Channel::KeyPress, code),
            PageEvent::RateChange { media } => {
                let mut outcome = EventOutcome::Ignored;
                for id in self.router.targets(page, Channel::RateChange, Some(&media)) {
                    if let Some(ctrl) = self.controllers.get(&id) {
                        outcome = outcome.merge(ctrl.handle_rate_change(page));
                    }
                }
                outcome
            }
            PageEvent::NodeInserted { node } => match self.on_node_inserted(page, &node) {
                Some(_) => EventOutcome::Handled,
                None => EventOutcome::Ignored,
            },
            PageEvent::Tick => {
                let released = self.release_detached(page);
                match released + self.scan_and_attach(page) {
                    0 => EventOutcome::Ignored,
                    _ => EventOutcome::Handled,
                }
            }
        };
        self.reap();
        outcome
    }

    fn route_click(&mut self, page: &P, channel: Channel, node: &P::Node) -> EventOutcome {
        let mut outcome = EventOutcome::Ignored;
        for id in self.router.targets(page, channel, Some(node)) {
            if let Some(ctrl) = self.controllers.get_mut(&id) {
                outcome = outcome.merge(ctrl.handle_click(page, &mut self.router, node));
            }
        }
        outcome
    }

    fn route_keys(&mut self, page: &P, channel: Channel, code: u32) -> EventOutcome {
        let mut outcome = EventOutcome::Ignored;
        for id in self.router.targets(page, channel, None) {
            let Some(ctrl) = self.controllers.get(&id) else {
                continue;
            };
            let result = match channel {
                Channel::KeyDown => ctrl.handle_key_down(page, code),
                _ => ctrl.handle_key_press(page, code),
            };
            outcome = outcome.merge(result);
        }
        outcome
    }

    /// Tear down every controller whose target is no longer in the document
    /// and forget the target, so it gets a fresh overlay if the host puts it
    /// back. Returns how many were released.
    pub fn release_detached(&mut self, page: &P) -> usize {
        let gone: Vec<ControllerId> = self
            .controllers
            .iter()
            .filter(|(_, ctrl)| !page.is_connected(ctrl.target()))
            .map(|(id, _)| *id)
            .collect();
        for id in &gone {
            let Some(mut ctrl) = self.controllers.shift_remove(id) else {
                continue;
            };
            debug!("Discovery: {} target left the document", id);
            ctrl.dispose(page, &mut self.router);
            self.registry.remove(&P::key(ctrl.target()));
        }
        gone.len()
    }

    /// Drop controllers that were closed. Their targets stay registered.
    fn reap(&mut self) {
        let before = self.controllers.len();
        self.controllers
            .retain(|_, ctrl| ctrl.state() != OverlayState::Disposed);
        if self.controllers.len() != before {
            trace!("Discovery: reaped {} controller(s)", before - self.controllers.len());
        }
    }

    // === Accessors ===

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Live (attached, not closed) overlays.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Whether `target` ever received an overlay.
    pub fn is_controlled(&self, target: &P::Node) -> bool {
        self.registry.contains(&P::key(target))
    }

    pub fn controller(&self, id: ControllerId) -> Option<&OverlayController<P::Node>> {
        self.controllers.get(&id)
    }

    /// Live controller for `target`, if any.
    pub fn controller_for(&self, target: &P::Node) -> Option<&OverlayController<P::Node>> {
        self.controllers.values().find(|c| c.target() == target)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &OverlayController<P::Node>> {
        self.controllers.values()
    }

    pub fn router(&self) -> &Router<P::Node> {
        &self.router
    }
}
