//! Fragment-based navigation.
//!
//! The location is a fragment string such as `#/reader/2/3`. Every change of
//! logical location goes through [`Router::navigate`], which keeps a
//! browser-style history so back and forward work on the same strings the
//! reader persists and deep-links with.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::catalog::Catalog;

pub const LIBRARY_FRAGMENT: &str = "#/library";
pub const ABOUT_FRAGMENT: &str = "#/about";

/// Oldest entries are dropped once history grows past this.
const MAX_HISTORY: usize = 256;

static READER_ROUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#/reader/(\d+)(?:/(\d+))?$").expect("reader route regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Library,
    About,
    /// `page` is zero-based; the fragment carries it one-based.
    Reader { issue_id: i64, page: usize },
}

impl Route {
    pub fn parse(fragment: &str) -> Option<Self> {
        match fragment {
            LIBRARY_FRAGMENT => return Some(Route::Library),
            ABOUT_FRAGMENT => return Some(Route::About),
            _ => {}
        }
        let caps = READER_ROUTE.captures(fragment)?;
        let issue_id = caps.get(1)?.as_str().parse::<i64>().ok()?;
        let page = match caps.get(2) {
            Some(raw) => raw.as_str().parse::<usize>().unwrap_or(usize::MAX),
            None => 1,
        };
        Some(Route::Reader {
            issue_id,
            page: page.saturating_sub(1),
        })
    }

    pub fn fragment(&self) -> String {
        match self {
            Route::Library => LIBRARY_FRAGMENT.to_string(),
            Route::About => ABOUT_FRAGMENT.to_string(),
            Route::Reader { issue_id, page } => reader_fragment(*issue_id, *page),
        }
    }
}

/// Fragment for a zero-based reader page.
pub fn reader_fragment(issue_id: i64, page: usize) -> String {
    format!("#/reader/{}/{}", issue_id, page.saturating_add(1))
}

/// Accepts `#/x`, `/x` or a bare `x` and returns the `#`-prefixed form.
pub fn normalize_fragment(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        trimmed.to_string()
    } else if trimmed.starts_with('/') {
        format!("#{trimmed}")
    } else {
        format!("#/{trimmed}")
    }
}

/// What the current fragment asks the UI to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Render(Route),
    /// Rewrite the location and resolve again.
    Redirect(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// A new history entry was pushed.
    Pushed,
    /// The fragment already matched; only a re-render is due.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct Router {
    history: Vec<String>,
    index: usize,
}

impl Router {
    pub fn new(initial: &str) -> Self {
        Self {
            history: vec![normalize_fragment(initial)],
            index: 0,
        }
    }

    pub fn current(&self) -> &str {
        &self.history[self.index]
    }

    pub fn navigate(&mut self, fragment: &str) -> Navigation {
        let fragment = normalize_fragment(fragment);
        if fragment == self.current() {
            return Navigation::Unchanged;
        }
        debug!(from = %self.current(), to = %fragment, "router: navigate");
        self.history.truncate(self.index + 1);
        self.history.push(fragment);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.index = self.history.len() - 1;
        Navigation::Pushed
    }

    /// Rewrites the current entry without growing history.
    pub fn replace(&mut self, fragment: &str) {
        self.history[self.index] = normalize_fragment(fragment);
    }

    pub fn back(&mut self) -> bool {
        if self.index == 0 {
            return false;
        }
        self.index -= 1;
        true
    }

    pub fn forward(&mut self) -> bool {
        if self.index + 1 >= self.history.len() {
            return false;
        }
        self.index += 1;
        true
    }

    pub fn can_go_back(&self) -> bool {
        self.index > 0
    }

    pub fn resolve(&self, catalog: &Catalog) -> Resolution {
        let fragment = self.current();
        if fragment.is_empty() || fragment == "#" {
            return Resolution::Redirect(LIBRARY_FRAGMENT.to_string());
        }
        match Route::parse(fragment) {
            Some(Route::Reader { issue_id, page }) => {
                if catalog.issue(issue_id).is_none() {
                    debug!(issue_id, "router: unknown issue, redirecting to library");
                    return Resolution::Redirect(LIBRARY_FRAGMENT.to_string());
                }
                Resolution::Render(Route::Reader { issue_id, page })
            }
            Some(route) => Resolution::Render(route),
            // Grammatical reader route whose id does not fit any issue.
            None if READER_ROUTE.is_match(fragment) => {
                debug!(fragment, "router: issue id out of range, redirecting to library");
                Resolution::Redirect(LIBRARY_FRAGMENT.to_string())
            }
            None => Resolution::Render(Route::Library),
        }
    }

    /// Resolves the current fragment, following redirects through
    /// [`Router::navigate`] until a route renders.
    pub fn settle(&mut self, catalog: &Catalog) -> Route {
        // Redirects always land on the library, so two rounds suffice.
        for _ in 0..2 {
            match self.resolve(catalog) {
                Resolution::Render(route) => return route,
                Resolution::Redirect(target) => {
                    self.navigate(&target);
                }
            }
        }
        Route::Library
    }
}
