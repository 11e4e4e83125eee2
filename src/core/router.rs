//! Listener bindings between page events and overlay controllers.
//!
//! Architecture:
//! - A controller subscribes `(Channel, Scope)` pairs when it attaches
//! - Each subscription is recorded in the controller's [`Bindings`]
//! - Dispose hands the bindings back; every entry is removed
//!
//! Dispatch order: FIFO (first-subscribed, first-returned) within a channel.
//! Cross-channel order is undefined.

use crate::dom::Page;
use indexmap::IndexMap;
use log::{trace, warn};
use std::fmt;

/// Identity of one overlay controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(pub u64);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "overlay#{}", self.0)
    }
}

/// Event channel a controller listens on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Click,
    DoubleClick,
    KeyDown,
    KeyPress,
    RateChange,
}

/// Where a listener is installed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope<N> {
    /// Document-wide (keyboard)
    Document,
    /// A node and its descendants
    Node(N),
}

/// Subscriptions owned by one controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bindings<N> {
    entries: Vec<(Channel, Scope<N>)>,
}

impl<N> Default for Bindings<N> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<N> Bindings<N> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Subscription table: `(channel, scope)` -> controllers.
#[derive(Debug)]
pub struct Router<N: Clone + Eq + std::hash::Hash> {
    routes: IndexMap<(Channel, Scope<N>), Vec<ControllerId>>,
}

impl<N: Clone + Eq + std::hash::Hash + fmt::Debug> Default for Router<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone + Eq + std::hash::Hash + fmt::Debug> Router<N> {
    pub fn new() -> Self {
        Self {
            routes: IndexMap::new(),
        }
    }

    /// Subscribe `id` on `channel` at `scope`, recording it in `bindings`.
    pub fn subscribe(&mut self, id: ControllerId, channel: Channel, scope: Scope<N>, bindings: &mut Bindings<N>) {
        let subs = self.routes.entry((channel, scope.clone())).or_default();
        if subs.contains(&id) {
            warn!("Router: {} already subscribed to {:?}", id, channel);
            return;
        }
        subs.push(id);
        bindings.entries.push((channel, scope));
    }

    /// Remove every subscription listed in `bindings`, leaving them empty.
    pub fn unsubscribe(&mut self, id: ControllerId, bindings: &mut Bindings<N>) {
        for key in bindings.entries.drain(..) {
            if let Some(subs) = self.routes.get_mut(&key) {
                subs.retain(|s| *s != id);
                if subs.is_empty() {
                    self.routes.shift_remove(&key);
                }
            }
        }
        trace!("Router: {} unsubscribed ({} routes left)", id, self.routes.len());
    }

    /// Controllers listening on `channel` for an event at `node`.
    ///
    /// Document scopes always match. Node scopes match when the scope node
    /// contains `node`; events without a node only reach document scopes.
    pub fn targets<P>(&self, page: &P, channel: Channel, node: Option<&N>) -> Vec<ControllerId>
    where
        P: Page<Node = N>,
    {
        let mut out: Vec<ControllerId> = Vec::new();
        for ((ch, scope), subs) in &self.routes {
            if *ch != channel {
                continue;
            }
            let hit = match (scope, node) {
                (Scope::Document, _) => true,
                (Scope::Node(scope_node), Some(n)) => page.contains(scope_node, n),
                (Scope::Node(_), None) => false,
            };
            if hit {
                for id in subs {
                    if !out.contains(id) {
                        out.push(*id);
                    }
                }
            }
        }
        out
    }

    /// Number of live subscriptions on `channel`.
    pub fn count(&self, channel: Channel) -> usize {
        self.routes
            .iter()
            .filter(|((ch, _), _)| *ch == channel)
            .map(|(_, subs)| subs.len())
            .sum()
    }

    /// Total live subscriptions.
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::sim::SimPage;

    #[test]
    fn test_subscribe_and_target() {
        let page = SimPage::default();
        let video = page.add_video(page.body_node()).unwrap();
        let mut router = Router::new();
        let mut bindings = Bindings::default();
        let id = ControllerId(1);

        router.subscribe(id, Channel::KeyDown, Scope::Document, &mut bindings);
        router.subscribe(id, Channel::RateChange, Scope::Node(video), &mut bindings);
        assert_eq!(bindings.len(), 2);

        assert_eq!(router.targets(&page, Channel::KeyDown, None), vec![id]);
        assert_eq!(router.targets(&page, Channel::RateChange, Some(&video)), vec![id]);
        // Node scope needs a node
        assert!(router.targets(&page, Channel::RateChange, None).is_empty());
        assert!(router.targets(&page, Channel::Click, Some(&video)).is_empty());
    }

    #[test]
    fn test_scope_matches_descendants() {
        let page = SimPage::default();
        let dom = page.build_overlay().unwrap();
        let mut router = Router::new();
        let mut bindings = Bindings::default();

        router.subscribe(ControllerId(7), Channel::Click, Scope::Node(dom.background), &mut bindings);
        assert_eq!(
            router.targets(&page, Channel::Click, Some(&dom.increase)),
            vec![ControllerId(7)]
        );
        assert!(router.targets(&page, Channel::Click, Some(&dom.root)).is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let page = SimPage::default();
        let mut router: Router<crate::dom::sim::NodeId> = Router::new();
        let mut b1 = Bindings::default();
        let mut b2 = Bindings::default();

        router.subscribe(ControllerId(2), Channel::KeyPress, Scope::Document, &mut b2);
        router.subscribe(ControllerId(1), Channel::KeyPress, Scope::Document, &mut b1);
        assert_eq!(
            router.targets(&page, Channel::KeyPress, None),
            vec![ControllerId(2), ControllerId(1)]
        );
    }

    #[test]
    fn test_unsubscribe_removes_everything() {
        let page = SimPage::default();
        let video = page.add_video(page.body_node()).unwrap();
        let mut router = Router::new();
        let mut mine = Bindings::default();
        let mut other = Bindings::default();

        router.subscribe(ControllerId(1), Channel::KeyDown, Scope::Document, &mut mine);
        router.subscribe(ControllerId(1), Channel::RateChange, Scope::Node(video), &mut mine);
        router.subscribe(ControllerId(2), Channel::KeyDown, Scope::Document, &mut other);
        assert_eq!(router.len(), 3);

        router.unsubscribe(ControllerId(1), &mut mine);
        assert!(mine.is_empty());
        assert_eq!(router.len(), 1);
        assert_eq!(router.count(Channel::RateChange), 0);
        assert_eq!(router.targets(&page, Channel::KeyDown, None), vec![ControllerId(2)]);

        // Second call is a no-op
        router.unsubscribe(ControllerId(1), &mut mine);
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_duplicate_subscription_ignored() {
        let mut router: Router<crate::dom::sim::NodeId> = Router::new();
        let mut bindings = Bindings::default();
        router.subscribe(ControllerId(1), Channel::KeyDown, Scope::Document, &mut bindings);
        router.subscribe(ControllerId(1), Channel::KeyDown, Scope::Document, &mut bindings);
        assert_eq!(router.len(), 1);
        assert_eq!(bindings.len(), 1);
    }
}
