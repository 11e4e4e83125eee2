//! In-memory page with an emulated single-threaded event loop.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Mutations that a
//! browser would report asynchronously (insertions, rate changes, timer
//! ticks) are queued and delivered by [`SimPage::dispatch`], one event at a
//! time, each handled to completion before the next one is taken.
//!
//! Shadow roots are modelled as a `#shadow-root` child of their host:
//! containment crosses them, selector queries and media enumeration do not.

use super::{EventOutcome, MEDIA_TAG, OverlayDom, Page, PageEvent, Playback, classes, labels};
use anyhow::{Result, anyhow, bail};
use log::trace;
use std::cell::RefCell;
use std::collections::VecDeque;

const SHADOW_ROOT: &str = "#shadow-root";

/// Arena index of a simulated node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct SimNode {
    tag: String,
    classes: Vec<String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    playback: Option<Playback>,
}

impl SimNode {
    fn new(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        let playback = matches!(tag.as_str(), "video" | "audio").then(Playback::default);
        Self {
            tag,
            classes: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            playback,
        }
    }
}

/// Emulated interval timer (fires every `period_ms` of virtual time)
#[derive(Debug, Clone, Copy)]
struct Interval {
    period_ms: u64,
    next_ms: u64,
}

#[derive(Debug)]
struct Inner {
    nodes: Vec<SimNode>,
    document: NodeId,
    body: NodeId,
    active: Option<NodeId>,
    location: String,
    queue: VecDeque<PageEvent<NodeId>>,
    clock_ms: u64,
    interval: Option<Interval>,
}

impl Inner {
    fn node(&self, id: NodeId) -> Result<&SimNode> {
        self.nodes.get(id.0).ok_or_else(|| anyhow!("unknown node {:?}", id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut SimNode> {
        self.nodes.get_mut(id.0).ok_or_else(|| anyhow!("unknown node {:?}", id))
    }

    fn create(&mut self, tag: &str) -> NodeId {
        self.nodes.push(SimNode::new(tag));
        NodeId(self.nodes.len() - 1)
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.nodes.get(id.0).and_then(|n| n.parent);
        }
        false
    }

    fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.document, node)
    }

    fn detach(&mut self, node: NodeId) -> Result<()> {
        let Some(parent) = self.node(node)?.parent else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|c| *c != node);
        self.node_mut(node)?.parent = None;
        // Focus does not survive removal
        if let Some(active) = self.active {
            if self.contains(node, active) {
                self.active = None;
            }
        }
        Ok(())
    }

    fn insert(&mut self, parent: NodeId, node: NodeId, index: usize) -> Result<()> {
        if self.contains(node, parent) {
            bail!("cannot insert {:?} into its own subtree", node);
        }
        self.detach(node)?;
        let children = &mut self.node_mut(parent)?.children;
        let index = index.min(children.len());
        children.insert(index, node);
        self.node_mut(node)?.parent = Some(parent);
        if self.is_connected(node) {
            self.queue.push_back(PageEvent::NodeInserted { node });
        }
        Ok(())
    }

    /// Document-order walk, not descending into shadow roots.
    fn light_tree(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.document];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id.0) else {
                continue;
            };
            if node.tag == SHADOW_ROOT {
                continue;
            }
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    fn matches_simple(&self, id: NodeId, part: &str) -> bool {
        let Some(node) = self.nodes.get(id.0) else {
            return false;
        };
        match part.strip_prefix('.') {
            Some(class) => node.classes.iter().any(|c| c == class),
            None => node.tag.eq_ignore_ascii_case(part),
        }
    }

    /// Descendant-combinator selectors made of `.class` and tag parts.
    fn matches_selector(&self, id: NodeId, parts: &[&str]) -> bool {
        let Some((last, ancestors)) = parts.split_last() else {
            return false;
        };
        if !self.matches_simple(id, last) {
            return false;
        }
        let mut remaining = ancestors;
        let mut cur = self.nodes.get(id.0).and_then(|n| n.parent);
        while let Some((want, rest)) = remaining.split_last() {
            let Some(anc) = cur else {
                return false;
            };
            if self.matches_simple(anc, want) {
                remaining = rest;
            }
            cur = self.nodes.get(anc.0).and_then(|n| n.parent);
        }
        true
    }
}

/// In-memory document implementing [`Page`].
#[derive(Debug)]
pub struct SimPage {
    inner: RefCell<Inner>,
}

impl Default for SimPage {
    fn default() -> Self {
        Self::new("https://example.test/")
    }
}

impl SimPage {
    /// Create an empty document (`html > body`) at `location`.
    pub fn new(location: &str) -> Self {
        let mut inner = Inner {
            nodes: Vec::new(),
            document: NodeId(0),
            body: NodeId(0),
            active: None,
            location: location.to_string(),
            queue: VecDeque::new(),
            clock_ms: 0,
            interval: None,
        };
        let document = inner.create("html");
        let body = inner.create("body");
        inner.nodes[body.0].parent = Some(document);
        inner.nodes[document.0].children.push(body);
        inner.document = document;
        inner.body = body;
        Self {
            inner: RefCell::new(inner),
        }
    }

    // === Document construction ===

    /// Create a detached element.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.inner.borrow_mut().create(tag)
    }

    /// Append `child` to `parent`; queues an insertion notification when the
    /// parent is connected.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let index = inner.node(parent)?.children.len();
        inner.insert(parent, child, index)
    }

    /// Create a `<video>` and append it to `parent`.
    pub fn add_video(&self, parent: NodeId) -> Result<NodeId> {
        let video = self.create_element("video");
        self.append_child(parent, video)?;
        Ok(video)
    }

    /// Detach a node (host page churn). No notification is queued.
    pub fn detach(&self, node: NodeId) -> Result<()> {
        self.inner.borrow_mut().detach(node)
    }

    pub fn set_location(&self, location: &str) {
        self.inner.borrow_mut().location = location.to_string();
    }

    // === Inspection ===

    pub fn document(&self) -> NodeId {
        self.inner.borrow().document
    }

    pub fn body_node(&self) -> NodeId {
        self.inner.borrow().body
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .borrow()
            .node(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn classes(&self, node: NodeId) -> Vec<String> {
        self.inner
            .borrow()
            .node(node)
            .map(|n| n.classes.clone())
            .unwrap_or_default()
    }

    pub fn text(&self, node: NodeId) -> String {
        self.inner
            .borrow()
            .node(node)
            .map(|n| n.text.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: NodeId) -> String {
        self.inner
            .borrow()
            .node(node)
            .map(|n| n.tag.clone())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.inner.borrow().is_connected(node)
    }

    /// Connected nodes carrying `class` (light tree only).
    pub fn find_by_class(&self, class: &str) -> Vec<NodeId> {
        let inner = self.inner.borrow();
        inner
            .light_tree()
            .into_iter()
            .filter(|id| inner.matches_simple(*id, &format!(".{class}")))
            .collect()
    }

    /// Playback rate of `media` (1.0 for non-media nodes).
    pub fn rate(&self, media: NodeId) -> f64 {
        self.playback(&media).rate
    }

    // === Media & focus ===

    /// Start playback at `position` seconds.
    pub fn play(&self, media: NodeId, position: f64) -> Result<()> {
        self.update_playback(media, |pb| {
            pb.paused = false;
            pb.ended = false;
            pb.current_time = position;
        })
    }

    pub fn pause(&self, media: NodeId) -> Result<()> {
        self.update_playback(media, |pb| pb.paused = true)
    }

    pub fn end(&self, media: NodeId) -> Result<()> {
        self.update_playback(media, |pb| {
            pb.ended = true;
            pb.paused = true;
        })
    }

    fn update_playback(&self, media: NodeId, f: impl FnOnce(&mut Playback)) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let pb = inner
            .node_mut(media)?
            .playback
            .as_mut()
            .ok_or_else(|| anyhow!("{:?} is not a media element", media))?;
        f(pb);
        Ok(())
    }

    /// Move focus to `node` (user tabbing or clicking into it).
    pub fn set_focus(&self, node: Option<NodeId>) {
        self.inner.borrow_mut().active = node;
    }

    // === User input ===

    pub fn click(&self, node: NodeId) {
        self.inner.borrow_mut().queue.push_back(PageEvent::Click { node });
    }

    pub fn double_click(&self, node: NodeId) {
        self.inner.borrow_mut().queue.push_back(PageEvent::DoubleClick { node });
    }

    pub fn key_down(&self, code: u32) {
        self.inner.borrow_mut().queue.push_back(PageEvent::KeyDown { code });
    }

    /// Queue a key-press for a printable character.
    pub fn key_press(&self, ch: char) {
        self.inner
            .borrow_mut()
            .queue
            .push_back(PageEvent::KeyPress { code: ch as u32 });
    }

    // === Event loop ===

    /// Install the repeating polling timer (replaces any previous one).
    pub fn set_interval(&self, period_ms: u64) {
        let mut inner = self.inner.borrow_mut();
        let period_ms = period_ms.max(1);
        let next_ms = inner.clock_ms + period_ms;
        inner.interval = Some(Interval { period_ms, next_ms });
    }

    /// Advance virtual time, queueing one `Tick` per elapsed timer period.
    pub fn advance(&self, ms: u64) {
        let mut inner = self.inner.borrow_mut();
        let target = inner.clock_ms + ms;
        while let Some(mut interval) = inner.interval {
            if interval.next_ms > target {
                break;
            }
            inner.clock_ms = interval.next_ms;
            inner.queue.push_back(PageEvent::Tick);
            interval.next_ms += interval.period_ms;
            inner.interval = Some(interval);
        }
        inner.clock_ms = target;
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.borrow().clock_ms
    }

    /// Number of queued, undelivered events.
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Deliver queued events FIFO until the queue is empty, including events
    /// queued by the handler itself. Returns the outcome of each delivery.
    pub fn dispatch<F>(&self, mut handler: F) -> Vec<EventOutcome>
    where
        F: FnMut(&Self, PageEvent<NodeId>) -> EventOutcome,
    {
        let mut outcomes = Vec::new();
        loop {
            // Borrow released before the handler runs
            let next = self.inner.borrow_mut().queue.pop_front();
            let Some(event) = next else {
                break;
            };
            trace!("SimPage: dispatching {:?}", event);
            outcomes.push(handler(self, event));
        }
        outcomes
    }
}

impl Page for SimPage {
    type Node = NodeId;

    type Key = NodeId;

    fn key(node: &NodeId) -> NodeId {
        *node
    }

    fn media_elements(&self) -> Vec<NodeId> {
        let inner = self.inner.borrow();
        inner
            .light_tree()
            .into_iter()
            .filter(|id| inner.nodes[id.0].tag == MEDIA_TAG)
            .collect()
    }

    fn is_media(&self, node: &NodeId) -> bool {
        self.inner
            .borrow()
            .node(*node)
            .map(|n| n.tag == MEDIA_TAG)
            .unwrap_or(false)
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        self.inner.borrow().is_connected(*node)
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.inner.borrow().node(*node).ok().and_then(|n| n.parent)
    }

    fn body(&self) -> Option<NodeId> {
        Some(self.inner.borrow().body)
    }

    fn build_overlay(&self) -> Result<OverlayDom<NodeId>> {
        let mut inner = self.inner.borrow_mut();
        let root = inner.create("div");
        let shadow = inner.create(SHADOW_ROOT);
        let style = inner.create("style");
        let background = inner.create("div");
        let decrease = inner.create("button");
        let readout = inner.create("span");
        let increase = inner.create("button");
        let close = inner.create("a");

        inner.insert(root, shadow, 0)?;
        inner.insert(shadow, style, 0)?;
        inner.insert(shadow, background, 1)?;
        for (i, child) in [decrease, readout, increase, close].into_iter().enumerate() {
            inner.insert(background, child, i)?;
        }

        let parts: [(NodeId, &[&str], &str); 5] = [
            (background, &[classes::BACKGROUND], ""),
            (decrease, &[classes::BUTTON, classes::DECREASE], labels::DECREASE),
            (readout, &[classes::READOUT], ""),
            (increase, &[classes::BUTTON, classes::INCREASE], labels::INCREASE),
            (close, &[classes::BUTTON, classes::CLOSE], labels::CLOSE),
        ];
        for (id, names, text) in parts {
            let node = inner.node_mut(id)?;
            node.classes.extend(names.iter().map(|c| c.to_string()));
            node.text = text.to_string();
        }
        inner.node_mut(style)?.text = super::OVERLAY_STYLE.to_string();

        Ok(OverlayDom {
            root,
            background,
            readout,
            decrease,
            increase,
            close,
        })
    }

    fn insert_before(&self, parent: &NodeId, node: &NodeId, reference: &NodeId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let index = inner
            .node(*parent)?
            .children
            .iter()
            .position(|c| c == reference)
            .ok_or_else(|| anyhow!("{:?} is not a child of {:?}", reference, parent))?;
        inner.insert(*parent, *node, index)
    }

    fn remove(&self, node: &NodeId) -> Result<()> {
        self.inner.borrow_mut().detach(*node)
    }

    fn add_class(&self, node: &NodeId, class: &str) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let classes = &mut inner.node_mut(*node)?.classes;
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
        }
        Ok(())
    }

    fn set_text(&self, node: &NodeId, text: &str) -> Result<()> {
        self.inner.borrow_mut().node_mut(*node)?.text = text.to_string();
        Ok(())
    }

    fn focus(&self, node: &NodeId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.is_connected(*node) {
            bail!("cannot focus detached node {:?}", node);
        }
        inner.active = Some(*node);
        Ok(())
    }

    fn active_element(&self) -> Option<NodeId> {
        let inner = self.inner.borrow();
        Some(inner.active.unwrap_or(inner.body))
    }

    fn contains(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        self.inner.borrow().contains(*ancestor, *node)
    }

    fn location(&self) -> String {
        self.inner.borrow().location.clone()
    }

    fn query_selector(&self, selector: &str) -> Option<NodeId> {
        let parts: Vec<&str> = selector.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }
        let inner = self.inner.borrow();
        inner
            .light_tree()
            .into_iter()
            .find(|id| inner.matches_selector(*id, &parts))
    }

    fn playback(&self, media: &NodeId) -> Playback {
        self.inner
            .borrow()
            .node(*media)
            .ok()
            .and_then(|n| n.playback)
            .unwrap_or_default()
    }

    fn set_playback_rate(&self, media: &NodeId, rate: f64) -> Result<()> {
        self.update_playback(*media, |pb| pb.rate = rate)?;
        self.inner
            .borrow_mut()
            .queue
            .push_back(PageEvent::RateChange { media: *media });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_queues_insertion() {
        let page = SimPage::default();
        let video = page.add_video(page.body_node()).unwrap();
        let audio = page.create_element("audio");
        page.append_child(page.body_node(), audio).unwrap();
        assert!(page.is_connected(video));
        assert_eq!(page.media_elements(), vec![video]);
        assert!(page.is_media(&video));
        assert!(!page.is_media(&audio));
        assert_eq!(page.pending(), 2);

        // Detached parents do not notify
        let div = page.create_element("div");
        page.add_video(div).unwrap();
        assert_eq!(page.pending(), 2);
    }

    #[test]
    fn test_insert_before_and_remove() {
        let page = SimPage::default();
        let body = page.body_node();
        let video = page.add_video(body).unwrap();
        let div = page.create_element("div");

        page.insert_before(&body, &div, &video).unwrap();
        assert_eq!(page.children(body), vec![div, video]);

        page.remove(&div).unwrap();
        assert_eq!(page.children(body), vec![video]);
        // Second removal tolerated
        assert!(page.remove(&div).is_ok());

        // Reference must be a child
        assert!(page.insert_before(&body, &div, &div).is_err());
    }

    #[test]
    fn test_query_selector_descendant() {
        let page = SimPage::default();
        let player = page.create_element("div");
        page.add_class(&player, "player").unwrap();
        let target = page.create_element("div");
        page.add_class(&target, "target").unwrap();
        page.append_child(page.body_node(), player).unwrap();
        page.append_child(player, target).unwrap();

        assert_eq!(page.query_selector(".player .target"), Some(target));
        assert_eq!(page.query_selector(".target"), Some(target));
        assert_eq!(page.query_selector(".missing .target"), None);
        assert_eq!(page.query_selector("body"), Some(page.body_node()));
    }

    #[test]
    fn test_overlay_shadow_is_opaque_to_queries() {
        let page = SimPage::default();
        let dom = page.build_overlay().unwrap();
        page.append_child(page.body_node(), dom.root).unwrap();

        assert!(page.contains(&dom.root, &dom.increase));
        assert_eq!(page.text(dom.close), labels::CLOSE);
        assert_eq!(page.query_selector(".increase"), None);
    }

    #[test]
    fn test_rate_change_notifies() {
        let page = SimPage::default();
        let video = page.add_video(page.body_node()).unwrap();
        page.dispatch(|_, _| EventOutcome::Ignored);

        page.set_playback_rate(&video, 1.5).unwrap();
        assert_eq!(page.rate(video), 1.5);

        let mut seen = Vec::new();
        page.dispatch(|_, ev| {
            seen.push(ev);
            EventOutcome::Handled
        });
        assert_eq!(seen, vec![PageEvent::RateChange { media: video }]);

        let div = page.create_element("div");
        assert!(page.set_playback_rate(&div, 2.0).is_err());
    }

    #[test]
    fn test_interval_ticks() {
        let page = SimPage::default();
        page.set_interval(1000);
        page.advance(999);
        assert_eq!(page.pending(), 0);
        page.advance(1);
        assert_eq!(page.pending(), 1);
        page.advance(2500);
        assert_eq!(page.pending(), 3);
        assert_eq!(page.now_ms(), 3500);
    }

    #[test]
    fn test_focus_defaults_to_body() {
        let page = SimPage::default();
        assert_eq!(page.active_element(), Some(page.body_node()));

        let video = page.add_video(page.body_node()).unwrap();
        page.focus(&video).unwrap();
        assert_eq!(page.active_element(), Some(video));

        page.detach(video).unwrap();
        assert_eq!(page.active_element(), Some(page.body_node()));
    }
}
