//! Page, zoom and pan state for the issue being read.
//!
//! Page 0 is the intro page; pages `1..total` show comic images. The page is
//! always within `[0, total_pages - 1]` for the session's language, and a zoom
//! of 1 always comes with a pan of `(0, 0)`. Every mutation goes through the
//! transition methods below.

use tracing::debug;

use crate::catalog::{AssetPaths, Catalog, Issue, Lang};
use crate::router::Route;

pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 3.0;
pub const ZOOM_STEP: f64 = 0.25;

const STEPS_PER_UNIT: f64 = 1.0 / ZOOM_STEP;
const MIN_ZOOM_STEPS: u8 = (MIN_ZOOM * STEPS_PER_UNIT) as u8;
const MAX_ZOOM_STEPS: u8 = (MAX_ZOOM * STEPS_PER_UNIT) as u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Intro,
    /// One-based comic page.
    Comic(usize),
}

/// What the stage shows for the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContent {
    Intro {
        title: String,
        meta: String,
        url: String,
        description: String,
    },
    Comic {
        image_url: String,
        alt: String,
    },
}

/// Clamps `page` into `[0, total_pages(issue) - 1]` for `lang`.
pub fn clamp_page(issue: &Issue, lang: Lang, page: usize) -> usize {
    page.min(issue.total_pages(lang) - 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSession {
    issue_id: i64,
    lang: Lang,
    total_pages: usize,
    page: usize,
    zoom_steps: u8,
    pan_x: f64,
    pan_y: f64,
}

impl ReaderSession {
    pub fn enter(issue: &Issue, lang: Lang, page: usize) -> Self {
        let mut session = Self {
            issue_id: issue.issue_id,
            lang,
            total_pages: issue.total_pages(lang),
            page: 0,
            zoom_steps: MIN_ZOOM_STEPS,
            pan_x: 0.0,
            pan_y: 0.0,
        };
        session.go_to(page);
        session
    }

    pub fn issue_id(&self) -> i64 {
        self.issue_id
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn zoom(&self) -> f64 {
        f64::from(self.zoom_steps) / STEPS_PER_UNIT
    }

    pub fn pan_offset(&self) -> (f64, f64) {
        (self.pan_x, self.pan_y)
    }

    pub fn state(&self) -> PageState {
        if self.page == 0 {
            PageState::Intro
        } else {
            PageState::Comic(self.page)
        }
    }

    pub fn is_last_page(&self) -> bool {
        self.page + 1 >= self.total_pages
    }

    /// The previous-page control only shows when its target is a valid page.
    pub fn has_previous(&self) -> bool {
        self.page > 0
    }

    pub fn route(&self) -> Route {
        Route::Reader {
            issue_id: self.issue_id,
            page: self.page,
        }
    }

    pub fn go_to(&mut self, page: usize) {
        let target = page.min(self.total_pages - 1);
        self.page = target;
        self.clear_zoom();
        debug!(
            issue_id = self.issue_id,
            page = self.page,
            total = self.total_pages,
            requested = page,
            "reader: go to page"
        );
    }

    /// Moves one page forward. From the last page the returned route is the
    /// intro of the next issue in catalog order, which the caller enters
    /// through the router.
    pub fn advance(&mut self, catalog: &Catalog) -> Route {
        if self.is_last_page() {
            if let Some(next) = catalog.next_issue(self.issue_id) {
                debug!(
                    from = self.issue_id,
                    to = next.issue_id,
                    "reader: advancing to next issue"
                );
                return Route::Reader {
                    issue_id: next.issue_id,
                    page: 0,
                };
            }
            return self.route();
        }
        self.go_to(self.page + 1);
        self.route()
    }

    pub fn retreat(&mut self) -> Route {
        self.go_to(self.page.saturating_sub(1));
        self.route()
    }

    /// Snaps `level` to the nearest quarter step inside `[1, 3]`. The intro
    /// page has no zoom.
    pub fn set_zoom(&mut self, level: f64) {
        if self.state() == PageState::Intro {
            return;
        }
        let steps = (level * STEPS_PER_UNIT).round();
        let steps = if steps.is_nan() {
            MIN_ZOOM_STEPS
        } else {
            steps.clamp(f64::from(MIN_ZOOM_STEPS), f64::from(MAX_ZOOM_STEPS)) as u8
        };
        self.zoom_steps = steps;
        if self.zoom_steps == MIN_ZOOM_STEPS {
            self.pan_x = 0.0;
            self.pan_y = 0.0;
        }
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom() + ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom() - ZOOM_STEP);
    }

    pub fn reset_zoom(&mut self) {
        self.clear_zoom();
    }

    /// Accumulates a drag offset. Ignored unless zoomed in; offsets are not
    /// bounded by the image size.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        if self.zoom_steps <= MIN_ZOOM_STEPS || !dx.is_finite() || !dy.is_finite() {
            return;
        }
        self.pan_x += dx;
        self.pan_y += dy;
    }

    pub fn zoom_label(&self) -> String {
        format!("{}%", (self.zoom() * 100.0).round() as i64)
    }

    pub fn progress_label(&self) -> String {
        format!("{} / {}", self.page + 1, self.total_pages)
    }

    pub fn content(&self, issue: &Issue, paths: &AssetPaths) -> PageContent {
        match self.state() {
            PageState::Intro => PageContent::Intro {
                title: issue.title(self.lang).to_string(),
                meta: format!("{} · {}", issue.author, issue.date),
                url: issue.url.clone(),
                description: issue.description(self.lang).to_string(),
            },
            PageState::Comic(n) => {
                let file = issue
                    .pages(self.lang)
                    .get(n - 1)
                    .map(String::as_str)
                    .unwrap_or_default();
                PageContent::Comic {
                    image_url: paths.page_image(issue.issue_id, file),
                    alt: format!("{} - page {}", issue.title(self.lang), n),
                }
            }
        }
    }

    /// Image URLs worth fetching ahead: the current comic image and its two
    /// neighbours. Empty on the intro page.
    pub fn preload_targets(&self, issue: &Issue, paths: &AssetPaths) -> Vec<String> {
        let PageState::Comic(n) = self.state() else {
            return Vec::new();
        };
        let pages = paths.pages(issue, self.lang);
        let current = n - 1;
        [current.checked_sub(1), Some(current), current.checked_add(1)]
            .into_iter()
            .flatten()
            .filter_map(|idx| pages.get(idx).cloned())
            .collect()
    }

    fn clear_zoom(&mut self) {
        self.zoom_steps = MIN_ZOOM_STEPS;
        self.pan_x = 0.0;
        self.pan_y = 0.0;
    }
}
