//! Per-host compatibility hooks.
//!
//! Some embed hosts put an invisible element on top of the player that
//! swallows every pointer event before it reaches the overlay. A hook pairs
//! a location pattern with an adjustment that runs once when an overlay is
//! constructed on a matching page.
//!
//! New hosts are added by registering another [`HostHook`]; overlay code
//! only ever calls [`HostHooks::apply`].

use crate::dom::Page;
use anyhow::Result;
use log::{debug, warn};
use regex::Regex;

lazy_static::lazy_static! {
    static ref VIMEO_LOCATION: Regex = Regex::new(r"vimeo").expect("static pattern");
}

/// Pointer-intercepting element on Vimeo embeds
pub const VIMEO_INTERCEPTOR: &str = ".player .target";

/// One `(location pattern -> adjustment)` pair.
pub struct HostHook<P: Page> {
    pub name: &'static str,
    pub pattern: Regex,
    pub adjust: fn(&P) -> Result<()>,
}

impl<P: Page> Clone for HostHook<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            pattern: self.pattern.clone(),
            adjust: self.adjust,
        }
    }
}

impl<P: Page> std::fmt::Debug for HostHook<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHook")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

impl<P: Page> HostHook<P> {
    /// Build a hook from a pattern string.
    pub fn new(name: &'static str, pattern: &str, adjust: fn(&P) -> Result<()>) -> Result<Self> {
        Ok(Self {
            name,
            pattern: Regex::new(pattern)?,
            adjust,
        })
    }

    pub fn matches(&self, location: &str) -> bool {
        self.pattern.is_match(location)
    }
}

/// Remove the first element matching `selector`, if any.
pub fn remove_first<P: Page>(page: &P, selector: &str) -> Result<bool> {
    match page.query_selector(selector) {
        Some(node) => {
            page.remove(&node)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn remove_vimeo_interceptor<P: Page>(page: &P) -> Result<()> {
    if remove_first(page, VIMEO_INTERCEPTOR)? {
        debug!("HostHooks: removed Vimeo click interceptor");
    }
    Ok(())
}

/// Ordered hook registry.
pub struct HostHooks<P: Page> {
    hooks: Vec<HostHook<P>>,
}

impl<P: Page> Clone for HostHooks<P> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<P: Page> std::fmt::Debug for HostHooks<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.hooks).finish()
    }
}

impl<P: Page> Default for HostHooks<P> {
    fn default() -> Self {
        Self::builtin()
    }
}

impl<P: Page> HostHooks<P> {
    /// No hooks at all.
    pub fn empty() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Hooks shipped with the crate.
    pub fn builtin() -> Self {
        Self {
            hooks: vec![HostHook {
                name: "vimeo",
                pattern: VIMEO_LOCATION.clone(),
                adjust: remove_vimeo_interceptor::<P>,
            }],
        }
    }

    pub fn register(&mut self, hook: HostHook<P>) {
        self.hooks.push(hook);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name).collect()
    }

    /// Run every hook matching the page location. Returns how many ran.
    /// Hook failures are logged and skipped.
    pub fn apply(&self, page: &P) -> usize {
        let location = page.location();
        let mut applied = 0;
        for hook in self.hooks.iter().filter(|h| h.matches(&location)) {
            match (hook.adjust)(page) {
                Ok(()) => applied += 1,
                Err(e) => warn!("HostHooks: '{}' failed on {}: {}", hook.name, location, e),
            }
        }
        applied
    }
}
