//! Browser host: [`Page`] over `web-sys`, plus the content-script entry point.
//!
//! # Wiring
//!
//! `start()` builds one runtime per page and installs, for the page lifetime:
//! - document-level capture listeners: click, dblclick, keydown, keypress,
//!   ratechange (ratechange does not bubble but does pass the capture phase)
//! - a `MutationObserver` on the whole document for insertions
//! - a `setInterval` polling timer
//!
//! Every listener forwards a [`PageEvent`] to the discovery agent, which routes
//! it to the owning overlay. Nothing is torn down explicitly; the browser
//! drops it all on unload.
//!
//! Element identity: JS objects are not hashable from Rust, so each element
//! that crosses into the core gets a numeric id kept in a `WeakMap`. Ids are
//! never reused, and the core remembers elements by id only, so a removed
//! element can still be collected.

use crate::config::OverlayConfig;
use crate::core::discovery::Discovery;
use crate::dom::{EventOutcome, MEDIA_TAG, OverlayDom, Page, PageEvent, Playback, classes, labels};
use anyhow::{Result, anyhow};
use js_sys::{Array, Object, Reflect, WeakMap};
use log::{info, trace, warn};
use std::cell::{Cell, RefCell};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{
    Document, Element, Event, HtmlElement, HtmlMediaElement, KeyboardEvent, MutationObserver,
    MutationObserverInit, MutationRecord, ShadowRootInit, ShadowRootMode, Window,
};

/// `JsValue` errors into `anyhow`.
fn js_err(e: JsValue) -> anyhow::Error {
    anyhow!("{}", e.as_string().unwrap_or_else(|| format!("{:?}", e)))
}

/// Element handle with a stable numeric identity.
#[derive(Clone, Debug)]
pub struct WebNode {
    id: u32,
    el: Element,
}

impl WebNode {
    pub fn element(&self) -> &Element {
        &self.el
    }
}

impl PartialEq for WebNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WebNode {}

impl Hash for WebNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The live document.
pub struct WebPage {
    window: Window,
    document: Document,
    ids: WeakMap,
    next_id: Cell<u32>,
}

impl WebPage {
    pub fn new() -> Result<Self> {
        let window = web_sys::window().ok_or_else(|| anyhow!("no window"))?;
        let document = window.document().ok_or_else(|| anyhow!("no document"))?;
        Ok(Self {
            window,
            document,
            ids: WeakMap::new(),
            next_id: Cell::new(1),
        })
    }

    /// Wrap an element, assigning it an id on first sight.
    pub fn wrap(&self, el: Element) -> WebNode {
        let key: &Object = el.as_ref();
        let id = match self.ids.get(key).as_f64() {
            Some(id) => id as u32,
            None => {
                let id = self.next_id.get();
                self.next_id.set(id + 1);
                self.ids.set(key, &JsValue::from(id));
                id
            }
        };
        WebNode { id, el }
    }

    fn create(&self, tag: &str, class_names: &[&str], text: &str) -> Result<Element> {
        let el = self.document.create_element(tag).map_err(js_err)?;
        for class in class_names {
            el.class_list().add_1(class).map_err(js_err)?;
        }
        if !text.is_empty() {
            el.set_text_content(Some(text));
        }
        Ok(el)
    }

    fn media(node: &WebNode) -> Option<&HtmlMediaElement> {
        node.el.dyn_ref::<HtmlMediaElement>()
    }
}

impl Page for WebPage {
    type Node = WebNode;
    type Key = u32;

    fn key(node: &WebNode) -> u32 {
        node.id
    }

    fn media_elements(&self) -> Vec<WebNode> {
        let Ok(list) = self.document.query_selector_all(MEDIA_TAG) else {
            return Vec::new();
        };
        (0..list.length())
            .filter_map(|i| list.get(i))
            .filter_map(|n| n.dyn_into::<Element>().ok())
            .map(|el| self.wrap(el))
            .collect()
    }

    fn is_media(&self, node: &WebNode) -> bool {
        node.el.tag_name().eq_ignore_ascii_case(MEDIA_TAG)
    }

    fn is_connected(&self, node: &WebNode) -> bool {
        node.el.is_connected()
    }

    fn parent(&self, node: &WebNode) -> Option<WebNode> {
        node.el.parent_element().map(|p| self.wrap(p))
    }

    fn body(&self) -> Option<WebNode> {
        self.document.body().map(|b| self.wrap(b.into()))
    }

    fn build_overlay(&self) -> Result<OverlayDom<WebNode>> {
        let root = self.create("div", &[], "")?;
        let shadow = root
            .attach_shadow(&ShadowRootInit::new(ShadowRootMode::Open))
            .map_err(js_err)?;

        let style = self.create("style", &[], crate::dom::OVERLAY_STYLE)?;
        let background = self.create("div", &[classes::BACKGROUND], "")?;
        let decrease = self.create("button", &[classes::BUTTON, classes::DECREASE], labels::DECREASE)?;
        let readout = self.create("span", &[classes::READOUT], "")?;
        let increase = self.create("button", &[classes::BUTTON, classes::INCREASE], labels::INCREASE)?;
        let close = self.create("a", &[classes::BUTTON, classes::CLOSE], labels::CLOSE)?;

        shadow.append_child(&style).map_err(js_err)?;
        shadow.append_child(&background).map_err(js_err)?;
        for child in [&decrease, &readout, &increase, &close] {
            background.append_child(child).map_err(js_err)?;
        }

        Ok(OverlayDom {
            root: self.wrap(root),
            background: self.wrap(background),
            readout: self.wrap(readout),
            decrease: self.wrap(decrease),
            increase: self.wrap(increase),
            close: self.wrap(close),
        })
    }

    fn insert_before(&self, parent: &WebNode, node: &WebNode, reference: &WebNode) -> Result<()> {
        let reference: &web_sys::Node = reference.el.as_ref();
        parent
            .el
            .insert_before(&node.el, Some(reference))
            .map(|_| ())
            .map_err(js_err)
    }

    fn remove(&self, node: &WebNode) -> Result<()> {
        match node.el.parent_node() {
            Some(parent) => parent.remove_child(&node.el).map(|_| ()).map_err(js_err),
            None => Ok(()),
        }
    }

    fn add_class(&self, node: &WebNode, class: &str) -> Result<()> {
        node.el.class_list().add_1(class).map_err(js_err)
    }

    fn set_text(&self, node: &WebNode, text: &str) -> Result<()> {
        node.el.set_text_content(Some(text));
        Ok(())
    }

    fn focus(&self, node: &WebNode) -> Result<()> {
        node.el
            .dyn_ref::<HtmlElement>()
            .ok_or_else(|| anyhow!("<{}> is not focusable", node.el.tag_name()))?
            .focus()
            .map_err(js_err)
    }

    fn active_element(&self) -> Option<WebNode> {
        self.document.active_element().map(|el| self.wrap(el))
    }

    fn contains(&self, ancestor: &WebNode, node: &WebNode) -> bool {
        let node: &web_sys::Node = node.el.as_ref();
        ancestor.el.contains(Some(node))
    }

    fn location(&self) -> String {
        self.window.location().href().unwrap_or_default()
    }

    fn query_selector(&self, selector: &str) -> Option<WebNode> {
        self.document
            .query_selector(selector)
            .ok()
            .flatten()
            .map(|el| self.wrap(el))
    }

    fn playback(&self, media: &WebNode) -> Playback {
        match Self::media(media) {
            Some(m) => Playback {
                rate: m.playback_rate(),
                current_time: m.current_time(),
                paused: m.paused(),
                ended: m.ended(),
            },
            None => Playback::default(),
        }
    }

    fn set_playback_rate(&self, media: &WebNode, rate: f64) -> Result<()> {
        if Self::media(media).is_none() {
            return Err(anyhow!("<{}> is not a media element", media.el.tag_name()));
        }
        // Through Reflect so a rejected rate surfaces as Err instead of a throw
        Reflect::set(&media.el, &JsValue::from_str("playbackRate"), &JsValue::from_f64(rate))
            .map(|_| ())
            .map_err(js_err)
    }
}

/// Page plus agent, shared by every installed listener.
struct Runtime {
    page: WebPage,
    discovery: RefCell<Discovery<WebPage>>,
}

impl Runtime {
    fn deliver(&self, event: PageEvent<WebNode>) -> EventOutcome {
        match self.discovery.try_borrow_mut() {
            Ok(mut discovery) => discovery.handle(&self.page, event),
            Err(_) => {
                warn!("Re-entrant page event dropped: {:?}", event);
                EventOutcome::Ignored
            }
        }
    }

    /// Innermost element of the event path (inside our shadow root too).
    fn hit_node(&self, event: &Event) -> Option<WebNode> {
        let path: Array = event.composed_path();
        path.get(0)
            .dyn_into::<Element>()
            .ok()
            .or_else(|| event.target().and_then(|t| t.dyn_into::<Element>().ok()))
            .map(|el| self.wrap_el(el))
    }

    fn wrap_el(&self, el: Element) -> WebNode {
        self.page.wrap(el)
    }
}

fn apply_outcome(event: &Event, outcome: EventOutcome) {
    if outcome.is_consumed() {
        event.prevent_default();
        event.stop_propagation();
    }
}

fn listen<F>(document: &Document, kind: &str, handler: F) -> Result<()>
where
    F: FnMut(Event) + 'static,
{
    let cb = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
    document
        .add_event_listener_with_callback_and_bool(kind, cb.as_ref().unchecked_ref(), true)
        .map_err(js_err)?;
    cb.forget();
    Ok(())
}

fn install_listeners(rt: &Rc<Runtime>) -> Result<()> {
    let document = rt.page.document.clone();

    for (kind, double) in [("click", false), ("dblclick", true)] {
        let rt = Rc::clone(rt);
        listen(&document, kind, move |ev: Event| {
            let Some(node) = rt.hit_node(&ev) else {
                return;
            };
            let event = if double {
                PageEvent::DoubleClick { node }
            } else {
                PageEvent::Click { node }
            };
            apply_outcome(&ev, rt.deliver(event));
        })?;
    }

    {
        let rt = Rc::clone(rt);
        listen(&document, "keydown", move |ev: Event| {
            let Some(key) = ev.dyn_ref::<KeyboardEvent>() else {
                return;
            };
            let outcome = rt.deliver(PageEvent::KeyDown { code: key.key_code() });
            apply_outcome(&ev, outcome);
        })?;
    }

    {
        let rt = Rc::clone(rt);
        listen(&document, "keypress", move |ev: Event| {
            let Some(key) = ev.dyn_ref::<KeyboardEvent>() else {
                return;
            };
            let code = match key.char_code() {
                0 => key.key_code(),
                c => c,
            };
            let outcome = rt.deliver(PageEvent::KeyPress { code });
            apply_outcome(&ev, outcome);
        })?;
    }

    {
        let rt = Rc::clone(rt);
        listen(&document, "ratechange", move |ev: Event| {
            let Some(media) = ev.target().and_then(|t| t.dyn_into::<Element>().ok()) else {
                return;
            };
            rt.deliver(PageEvent::RateChange { media: rt.wrap_el(media) });
        })?;
    }

    Ok(())
}

fn install_observer(rt: &Rc<Runtime>) -> Result<()> {
    let observer_rt = Rc::clone(rt);
    let cb = Closure::wrap(Box::new(move |records: Array, _observer: MutationObserver| {
        for record in records.iter() {
            let Ok(record) = record.dyn_into::<MutationRecord>() else {
                continue;
            };
            let added = record.added_nodes();
            for i in 0..added.length() {
                let Some(el) = added.get(i).and_then(|n| n.dyn_into::<Element>().ok()) else {
                    continue;
                };
                let node = observer_rt.wrap_el(el);
                observer_rt.deliver(PageEvent::NodeInserted { node });
            }
        }
    }) as Box<dyn FnMut(Array, MutationObserver)>);

    let observer = MutationObserver::new(cb.as_ref().unchecked_ref()).map_err(js_err)?;
    let init = MutationObserverInit::new();
    init.set_child_list(true);
    init.set_subtree(true);
    let root = rt
        .page
        .document
        .document_element()
        .ok_or_else(|| anyhow!("document has no root element"))?;
    observer
        .observe_with_options(&root, &init)
        .map_err(js_err)?;
    cb.forget();
    Ok(())
}

fn install_polling(rt: &Rc<Runtime>, interval_ms: i32) -> Result<()> {
    let poll_rt = Rc::clone(rt);
    let cb = Closure::wrap(Box::new(move || {
        trace!("Polling for media elements");
        poll_rt.deliver(PageEvent::Tick);
    }) as Box<dyn FnMut()>);
    rt.page
        .window
        .set_interval_with_callback_and_timeout_and_arguments_0(cb.as_ref().unchecked_ref(), interval_ms)
        .map_err(js_err)?;
    cb.forget();
    Ok(())
}

fn boot(config: OverlayConfig) -> Result<()> {
    let page = WebPage::new()?;
    let discovery = Discovery::new(&config);
    let interval_ms = i32::try_from(discovery.poll_interval().as_millis()).unwrap_or(i32::MAX);
    let rt = Rc::new(Runtime {
        page,
        discovery: RefCell::new(discovery),
    });

    let attached = rt.discovery.borrow_mut().scan_and_attach(&rt.page);
    install_listeners(&rt)?;
    install_observer(&rt)?;
    install_polling(&rt, interval_ms)?;

    info!(
        "{} started on {} ({} overlay(s), polling every {}ms)",
        crate::VERSION,
        rt.page.location(),
        attached,
        interval_ms
    );
    Ok(())
}

/// Module init: panic messages to the console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Content-script entry point. `config_json` is an optional
/// [`OverlayConfig`] object; missing or invalid input means defaults.
#[wasm_bindgen]
pub fn start(config_json: Option<String>) -> Result<(), JsValue> {
    let config = OverlayConfig::from_json(config_json.as_deref());
    crate::logging::init(config.level_filter());
    boot(config).map_err(|e| JsValue::from_str(&format!("playrate: {}", e)))
}
