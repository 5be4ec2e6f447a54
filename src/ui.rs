use std::collections::HashMap;
use std::io::{self, Stdout};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::{debug, info, warn};
use unicode_width::UnicodeWidthStr;

use crate::catalog::AssetPaths;
use crate::data::{self, Connectivity, SiteData};
use crate::network::Request;
use crate::offline::{self, FetchResult, Lifecycle};
use crate::picture::Picture;
use crate::preferences::{self, ReaderPreferences};
use crate::reader::{PageContent, PageState, ReaderSession};
use crate::router::{self, Route, Router};
use crate::storage::Store;
use crate::view::{self, COLOR_ACCENT, COLOR_TEXT_PRIMARY, COLOR_TEXT_SECONDARY};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const MAX_DECODED_IMAGES: usize = 32;
const KEY_PAN_STEP: f64 = 8.0;

pub struct Options {
    pub worker: offline::Handle,
    pub store: Store,
    pub paths: AssetPaths,
    pub preferences: ReaderPreferences,
    pub initial_fragment: String,
    pub cache_version: String,
    pub tick_rate: Duration,
}

/// Every user intent funnels through [`Model::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Quit,
    ShowLibrary,
    ShowAbout,
    Back,
    Forward,
    ToggleLanguage,
    ToggleSort,
    SelectNext,
    SelectPrevious,
    OpenSelected,
    OpenSource,
    NextPage,
    PreviousPage,
    ZoomIn,
    ZoomOut,
    ZoomReset,
    Pan(f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loading,
    Failed,
    Ready,
}

struct Bootstrap {
    lifecycle: Option<Lifecycle>,
    site: Result<SiteData>,
    connectivity: Connectivity,
}

enum ImageSlot {
    Pending(Receiver<FetchResult>),
    Ready(Picture),
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
struct DragState {
    last: (u16, u16),
    moved: bool,
}

pub struct Model {
    worker: offline::Handle,
    store: Store,
    paths: AssetPaths,
    prefs: ReaderPreferences,
    cache_version: String,
    tick_rate: Duration,
    phase: Phase,
    site: SiteData,
    lifecycle: Option<Lifecycle>,
    connectivity: Option<Connectivity>,
    router: Router,
    route: Route,
    session: Option<ReaderSession>,
    selected: usize,
    images: HashMap<String, ImageSlot>,
    stage_area: Option<Rect>,
    drag: Option<DragState>,
    status_message: String,
    needs_redraw: bool,
    bootstrap_rx: Option<Receiver<Bootstrap>>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let mut model = Self {
            worker: opts.worker,
            store: opts.store,
            paths: opts.paths,
            prefs: opts.preferences,
            cache_version: opts.cache_version,
            tick_rate: opts.tick_rate,
            phase: Phase::Loading,
            site: SiteData::default(),
            lifecycle: None,
            connectivity: None,
            router: Router::new(&opts.initial_fragment),
            route: Route::Library,
            session: None,
            selected: 0,
            images: HashMap::new(),
            stage_area: None,
            drag: None,
            status_message: String::new(),
            needs_redraw: true,
            bootstrap_rx: None,
        };
        model.queue_bootstrap();
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                let outcome = match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, _) => {
                        self.mark_dirty();
                        Ok(false)
                    }
                    _ => Ok(false),
                };
                match outcome {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(err) => {
                        self.status_message = format!("Error: {err:#}");
                        self.mark_dirty();
                    }
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                last_tick = Instant::now();
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn queue_bootstrap(&mut self) {
        let (tx, rx) = bounded(1);
        let worker = self.worker.clone();
        let paths = self.paths.clone();
        let spawned = thread::Builder::new()
            .name("bootstrap".into())
            .spawn(move || {
                let lifecycle = worker.start().recv().ok();
                let site = data::load_site(&worker, &paths);
                let connectivity = data::check_connectivity(&worker, &paths);
                let _ = tx.send(Bootstrap {
                    lifecycle,
                    site,
                    connectivity,
                });
            });
        if let Err(err) = spawned {
            warn!("ui: failed to spawn bootstrap thread: {err}");
            self.phase = Phase::Failed;
            return;
        }
        self.bootstrap_rx = Some(rx);
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;

        if let Some(rx) = &self.bootstrap_rx {
            match rx.try_recv() {
                Ok(bootstrap) => {
                    self.bootstrap_rx = None;
                    self.finish_bootstrap(bootstrap);
                    changed = true;
                }
                Err(TryRecvError::Disconnected) => {
                    self.bootstrap_rx = None;
                    warn!("ui: bootstrap thread exited without a result");
                    self.phase = Phase::Failed;
                    changed = true;
                }
                Err(TryRecvError::Empty) => {}
            }
        }

        for (url, slot) in self.images.iter_mut() {
            let ImageSlot::Pending(rx) = slot else {
                continue;
            };
            let next = match rx.try_recv() {
                Ok(Ok(response)) if response.is_success() => match Picture::decode(&response.body)
                {
                    Ok(picture) => ImageSlot::Ready(picture),
                    Err(err) => ImageSlot::Failed(format!("{err:#}")),
                },
                Ok(Ok(response)) => ImageSlot::Failed(format!("status {}", response.status)),
                Ok(Err(err)) => ImageSlot::Failed(err.to_string()),
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Disconnected) => {
                    ImageSlot::Failed(offline::OfflineError::Disconnected.to_string())
                }
            };
            if let ImageSlot::Failed(reason) = &next {
                debug!(%url, "ui: image unavailable: {reason}");
            }
            *slot = next;
            changed = true;
        }

        changed
    }

    fn finish_bootstrap(&mut self, bootstrap: Bootstrap) {
        match &bootstrap.lifecycle {
            Some(Lifecycle::Activated { install, purged }) => {
                info!(?install, ?purged, "ui: offline cache active")
            }
            Some(Lifecycle::Fallback { error, version }) => {
                warn!(%version, "ui: offline cache fell back: {error}")
            }
            Some(Lifecycle::Uncontrolled { error }) => {
                warn!("ui: running without offline cache: {error}")
            }
            None => warn!("ui: offline worker did not report"),
        }
        self.lifecycle = bootstrap.lifecycle;
        self.connectivity = Some(bootstrap.connectivity);

        match bootstrap.site {
            Ok(site) => {
                self.site = site;
                self.phase = Phase::Ready;
                self.render_route();
            }
            Err(err) => {
                warn!("ui: bootstrap failed: {err:#}");
                self.phase = Phase::Failed;
            }
        }
    }

    /// Resolves the current fragment and rebuilds view state for it. Reader
    /// routes are rewritten to their clamped canonical form and persisted.
    fn render_route(&mut self) {
        if self.phase != Phase::Ready {
            return;
        }
        let route = self.router.settle(&self.site.catalog);
        self.session = None;
        self.stage_area = None;

        match route {
            Route::Reader { issue_id, page } => {
                let Some(issue) = self.site.catalog.issue(issue_id) else {
                    return;
                };
                let session = ReaderSession::enter(issue, self.prefs.lang, page);
                let current = match session.content(issue, &self.paths) {
                    PageContent::Comic { image_url, .. } => Some(image_url),
                    PageContent::Intro { .. } => None,
                };
                let targets = session.preload_targets(issue, &self.paths);

                let canonical = session.route().fragment();
                if canonical != self.router.current() {
                    self.router.replace(&canonical);
                }
                self.prefs.issue_id = Some(issue_id);
                self.prefs.page = Some(u32::try_from(session.page()).unwrap_or(u32::MAX));
                self.persist();

                if let Some(url) = &current {
                    self.request_image(url);
                }
                for url in targets {
                    if Some(&url) != current.as_ref() && !self.images.contains_key(&url) {
                        self.worker.preload(url);
                    }
                }
                self.session = Some(session);
            }
            Route::Library => {
                let count = self.site.catalog.len();
                self.selected = self.selected.min(count.saturating_sub(1));
                self.request_selected_thumbnail();
            }
            Route::About => {
                let url = self.paths.editor_photo();
                self.request_image(&url);
            }
        }

        self.route = route;
        self.mark_dirty();
    }

    fn navigate(&mut self, fragment: &str) {
        self.router.navigate(fragment);
        self.render_route();
    }

    fn persist(&mut self) {
        if let Err(err) = preferences::save(&self.store, &self.prefs) {
            warn!("ui: {err:#}");
            self.status_message = format!("Failed to save preferences: {err}");
        }
    }

    fn request_image(&mut self, url: &str) {
        // A failed slot is retried on the next request.
        if matches!(
            self.images.get(url),
            Some(ImageSlot::Pending(_) | ImageSlot::Ready(_))
        ) {
            return;
        }
        if self.images.len() >= MAX_DECODED_IMAGES {
            self.images
                .retain(|_, slot| matches!(slot, ImageSlot::Pending(_)));
        }
        let rx = self.worker.fetch(Request::get(url));
        self.images.insert(url.to_string(), ImageSlot::Pending(rx));
    }

    fn request_selected_thumbnail(&mut self) {
        let cards = view::library_cards(&self.site.catalog, self.prefs.lang, self.prefs.library_sort);
        let Some(card) = cards.get(self.selected) else {
            return;
        };
        let Some(issue) = self.site.catalog.issue(card.issue_id) else {
            return;
        };
        let file = issue.thumbnail(self.prefs.lang);
        if file.is_empty() {
            return;
        }
        let url = self.paths.thumbnail(file);
        self.request_image(&url);
    }

    fn selected_card(&self) -> Option<view::Card> {
        view::library_cards(&self.site.catalog, self.prefs.lang, self.prefs.library_sort)
            .into_iter()
            .nth(self.selected)
    }

    fn action_for_key(&self, key: KeyEvent) -> Option<Action> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(Action::Quit);
        }
        match key.code {
            KeyCode::Char('q') => return Some(Action::Quit),
            _ if self.phase != Phase::Ready => return None,
            KeyCode::Char('l') => return Some(Action::ToggleLanguage),
            KeyCode::Char('a') => return Some(Action::ShowAbout),
            KeyCode::Char('b') | KeyCode::Backspace => return Some(Action::Back),
            KeyCode::Char('f') => return Some(Action::Forward),
            _ => {}
        }

        match self.route {
            Route::Library => match key.code {
                KeyCode::Down | KeyCode::Char('j') => Some(Action::SelectNext),
                KeyCode::Up | KeyCode::Char('k') => Some(Action::SelectPrevious),
                KeyCode::Enter | KeyCode::Char('r') => Some(Action::OpenSelected),
                KeyCode::Char('s') => Some(Action::ToggleSort),
                KeyCode::Char('o') => Some(Action::OpenSource),
                _ => None,
            },
            Route::About => match key.code {
                KeyCode::Esc => Some(Action::ShowLibrary),
                _ => None,
            },
            Route::Reader { .. } => match key.code {
                KeyCode::Esc => Some(Action::ShowLibrary),
                KeyCode::Left | KeyCode::Char('p') => Some(Action::PreviousPage),
                KeyCode::Right | KeyCode::Char('n') | KeyCode::Char(' ') | KeyCode::Enter => {
                    Some(Action::NextPage)
                }
                KeyCode::Char('+') | KeyCode::Char('=') => Some(Action::ZoomIn),
                KeyCode::Char('-') => Some(Action::ZoomOut),
                KeyCode::Char('0') => Some(Action::ZoomReset),
                KeyCode::Char('H') => Some(Action::Pan(KEY_PAN_STEP, 0.0)),
                KeyCode::Char('L') => Some(Action::Pan(-KEY_PAN_STEP, 0.0)),
                KeyCode::Char('K') => Some(Action::Pan(0.0, KEY_PAN_STEP)),
                KeyCode::Char('J') => Some(Action::Pan(0.0, -KEY_PAN_STEP)),
                _ => None,
            },
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match self.action_for_key(key) {
            Some(action) => self.dispatch(action),
            None => Ok(false),
        }
    }

    fn handle_mouse(&mut self, event: MouseEvent) -> Result<bool> {
        if self.phase != Phase::Ready {
            return Ok(false);
        }
        let position = (event.column, event.row);
        match event.kind {
            MouseEventKind::ScrollDown if self.route == Route::Library => {
                self.dispatch(Action::SelectNext)
            }
            MouseEventKind::ScrollUp if self.route == Route::Library => {
                self.dispatch(Action::SelectPrevious)
            }
            MouseEventKind::Down(MouseButton::Left) => {
                self.drag = Some(DragState {
                    last: position,
                    moved: false,
                });
                Ok(false)
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                let Some(drag) = self.drag.as_mut() else {
                    return Ok(false);
                };
                let dx = f64::from(position.0) - f64::from(drag.last.0);
                // One cell row holds two canvas pixels.
                let dy = (f64::from(position.1) - f64::from(drag.last.1)) * 2.0;
                drag.last = position;
                drag.moved = true;
                self.dispatch(Action::Pan(dx, dy))
            }
            MouseEventKind::Up(MouseButton::Left) => match self.drag.take() {
                Some(drag) if !drag.moved => match self.stage_click(position) {
                    Some(action) => self.dispatch(action),
                    None => Ok(false),
                },
                _ => Ok(false),
            },
            _ => Ok(false),
        }
    }

    /// Clicks on the left or right third of a comic page turn the page.
    /// The intro page only advances through its Start control.
    fn stage_click(&self, (column, row): (u16, u16)) -> Option<Action> {
        let session = self.session.as_ref()?;
        if session.state() == PageState::Intro {
            return None;
        }
        let area = self.stage_area?;
        let inside = column >= area.x
            && column < area.x + area.width
            && row >= area.y
            && row < area.y + area.height;
        if !inside {
            return None;
        }
        let third = area.width / 3;
        if column < area.x + third {
            Some(Action::PreviousPage)
        } else if column >= area.x + area.width - third {
            Some(Action::NextPage)
        } else {
            None
        }
    }

    /// Applies one action. Returns `Ok(true)` when the app should exit.
    pub fn dispatch(&mut self, action: Action) -> Result<bool> {
        if action == Action::Quit {
            return Ok(true);
        }
        if self.phase != Phase::Ready {
            return Ok(false);
        }
        debug!(?action, "ui: dispatch");

        match action {
            Action::Quit => return Ok(true),
            Action::ShowLibrary => self.navigate(router::LIBRARY_FRAGMENT),
            Action::ShowAbout => self.navigate(router::ABOUT_FRAGMENT),
            Action::Back => {
                if self.router.back() {
                    self.render_route();
                }
            }
            Action::Forward => {
                if self.router.forward() {
                    self.render_route();
                }
            }
            Action::ToggleLanguage => {
                self.prefs.lang = self.prefs.lang.toggled();
                self.persist();
                self.render_route();
            }
            Action::ToggleSort => {
                let keep = self.selected_card().map(|card| card.issue_id);
                self.prefs.library_sort = self.prefs.library_sort.toggled();
                self.persist();
                let cards = view::library_cards(
                    &self.site.catalog,
                    self.prefs.lang,
                    self.prefs.library_sort,
                );
                if let Some(index) = keep
                    .and_then(|id| cards.iter().position(|card| card.issue_id == id))
                {
                    self.selected = index;
                }
                self.render_route();
            }
            Action::SelectNext => {
                if self.selected + 1 < self.site.catalog.len() {
                    self.selected += 1;
                    self.request_selected_thumbnail();
                    self.mark_dirty();
                }
            }
            Action::SelectPrevious => {
                if self.selected > 0 {
                    self.selected -= 1;
                    self.request_selected_thumbnail();
                    self.mark_dirty();
                }
            }
            Action::OpenSelected => {
                if let Some(card) = self.selected_card() {
                    self.navigate(&router::reader_fragment(card.issue_id, 0));
                }
            }
            Action::OpenSource => {
                if let Some(card) = self.selected_card() {
                    if !card.url.is_empty() {
                        webbrowser::open(&card.url)
                            .with_context(|| format!("open {}", card.url))?;
                        self.status_message = format!("Opened {}", card.url);
                        self.mark_dirty();
                    }
                }
            }
            Action::NextPage => {
                let target = match self.session.as_mut() {
                    Some(session) => session.advance(&self.site.catalog),
                    None => return Ok(false),
                };
                self.navigate(&target.fragment());
            }
            Action::PreviousPage => {
                let target = match self.session.as_mut() {
                    Some(session) => session.retreat(),
                    None => return Ok(false),
                };
                self.navigate(&target.fragment());
            }
            Action::ZoomIn | Action::ZoomOut | Action::ZoomReset | Action::Pan(_, _) => {
                let Some(session) = self.session.as_mut() else {
                    return Ok(false);
                };
                match action {
                    Action::ZoomIn => session.zoom_in(),
                    Action::ZoomOut => session.zoom_out(),
                    Action::ZoomReset => session.reset_zoom(),
                    Action::Pan(dx, dy) => session.pan(dx, dy),
                    _ => {}
                }
                self.mark_dirty();
            }
        }
        Ok(false)
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);
        let labels = view::labels(self.prefs.lang);

        match self.phase {
            Phase::Loading => {
                draw_centered(frame, full, labels.loading, COLOR_TEXT_SECONDARY);
                return;
            }
            Phase::Failed => {
                draw_centered(frame, full, view::FAILURE_MESSAGE, COLOR_ERROR);
                return;
            }
            Phase::Ready => {}
        }

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        frame.render_widget(self.status_line(layout[0].width), layout[0]);

        match self.route {
            Route::Library => self.draw_library(frame, layout[1]),
            Route::About => self.draw_about(frame, layout[1]),
            Route::Reader { .. } => self.draw_reader(frame, layout[1]),
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[2]);
    }

    fn status_line(&self, width: u16) -> Paragraph<'static> {
        let labels = view::labels(self.prefs.lang);
        let section = match self.route {
            Route::Library => labels.library,
            Route::About => labels.about,
            Route::Reader { .. } => labels.read,
        };
        let left = if self.status_message.is_empty() {
            format!(" {} · {}", labels.brand, section)
        } else {
            format!(" {} · {} · {}", labels.brand, section, self.status_message)
        };
        let connectivity = match self.connectivity {
            Some(Connectivity::Online) => labels.online,
            Some(Connectivity::Offline) => labels.offline,
            Some(Connectivity::Unreachable) | None => labels.unreachable,
        };
        let cache = match &self.lifecycle {
            Some(Lifecycle::Activated { .. }) => self.cache_version.clone(),
            Some(Lifecycle::Fallback { version, .. }) => {
                format!("{version} ({})", labels.fallback)
            }
            Some(Lifecycle::Uncontrolled { .. }) | None => labels.no_cache.to_string(),
        };
        let right = format!("{connectivity} · {cache} · {} ", self.prefs.lang.code());
        let gap = usize::from(width)
            .saturating_sub(left.width())
            .saturating_sub(right.width());
        Paragraph::new(Line::from(vec![
            Span::raw(left),
            Span::raw(" ".repeat(gap)),
            Span::styled(right, Style::default().fg(COLOR_ACCENT)),
        ]))
        .style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        )
    }

    fn footer_text(&self) -> &'static str {
        let labels = view::labels(self.prefs.lang);
        match self.route {
            Route::Library => labels.library_keys,
            Route::About => labels.about_keys,
            Route::Reader { .. } => labels.reader_keys,
        }
    }

    fn draw_library(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let lang = self.prefs.lang;
        let labels = view::labels(lang);
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(area);

        let block = panel(labels.library);
        let inner = block.inner(columns[0]);
        frame.render_widget(block, columns[0]);

        let mut lines = vec![
            Line::from(Span::styled(
                format!("  {}", view::sort_label(lang, self.prefs.library_sort)),
                Style::default().fg(COLOR_ACCENT),
            )),
            Line::default(),
        ];
        let mut selected_span = (0usize, 0usize);
        let cards = view::library_cards(&self.site.catalog, lang, self.prefs.library_sort);
        for (index, card) in cards.iter().enumerate() {
            let text = view::card_text(card, lang, index == self.selected, usize::from(inner.width));
            if index == self.selected {
                selected_span = (lines.len(), text.lines.len());
            }
            lines.extend(text.lines);
        }
        let height = usize::from(inner.height);
        let (start, len) = selected_span;
        let offset = (start + len).saturating_sub(height);
        let offset = u16::try_from(offset).unwrap_or(u16::MAX);
        frame.render_widget(Paragraph::new(Text::from(lines)).scroll((offset, 0)), inner);

        let block = panel(labels.source);
        let inner = block.inner(columns[1]);
        frame.render_widget(block, columns[1]);
        let thumbnail = cards
            .get(self.selected)
            .and_then(|card| self.site.catalog.issue(card.issue_id))
            .map(|issue| issue.thumbnail(lang))
            .filter(|file| !file.is_empty())
            .map(|file| self.paths.thumbnail(file));
        if let Some(url) = thumbnail {
            self.draw_image(frame, inner, &url, 1.0, (0.0, 0.0));
        }
    }

    fn draw_about(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let lang = self.prefs.lang;
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(area);

        let block = panel("");
        let inner = block.inner(columns[0]);
        frame.render_widget(block, columns[0]);
        let photo = self.paths.editor_photo();
        self.draw_image(frame, inner, &photo, 1.0, (0.0, 0.0));

        let block = panel(view::labels(lang).about);
        let inner = block.inner(columns[1]);
        frame.render_widget(block, columns[1]);
        let text = view::about_text(&self.site.about, lang, usize::from(inner.width));
        frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: false }), inner);
    }

    fn draw_reader(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let lang = self.prefs.lang;
        let Some(session) = self.session.clone() else {
            return;
        };
        let Some(issue) = self.site.catalog.issue(session.issue_id()).cloned() else {
            return;
        };
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(area);

        frame.render_widget(
            Paragraph::new(view::reader_header(&session, &issue, lang)),
            rows[0],
        );

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE));
        let stage = block.inner(rows[1]);
        frame.render_widget(block, rows[1]);
        self.stage_area = Some(stage);

        match session.content(&issue, &self.paths) {
            content @ PageContent::Intro { .. } => {
                let text = view::intro_text(&content, lang, usize::from(stage.width));
                frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: false }), stage);
            }
            PageContent::Comic { image_url, alt } => {
                if !self.draw_image(frame, stage, &image_url, session.zoom(), session.pan_offset()) {
                    frame.render_widget(
                        Paragraph::new(alt).style(Style::default().fg(COLOR_TEXT_SECONDARY)),
                        stage,
                    );
                }
            }
        }

        frame.render_widget(
            Paragraph::new(view::reader_controls(&session, lang)).alignment(Alignment::Center),
            rows[2],
        );
    }

    /// Draws the picture for `url` if it has arrived. Returns false when the
    /// caller should show a textual fallback instead.
    fn draw_image(
        &self,
        frame: &mut Frame<'_>,
        area: Rect,
        url: &str,
        zoom: f64,
        pan: (f64, f64),
    ) -> bool {
        let labels = view::labels(self.prefs.lang);
        match self.images.get(url) {
            Some(ImageSlot::Ready(picture)) => {
                let text = picture.render(area.width, area.height, zoom, pan);
                frame.render_widget(Paragraph::new(text), area);
                true
            }
            Some(ImageSlot::Pending(_)) => {
                draw_centered(frame, area, labels.loading, COLOR_TEXT_SECONDARY);
                true
            }
            Some(ImageSlot::Failed(_)) | None => {
                draw_centered(frame, area, labels.image_failed, COLOR_ERROR);
                false
            }
        }
    }
}

fn panel(title: &str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(COLOR_BORDER_IDLE))
        .title(Span::styled(
            format!(" {title} "),
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ))
}

fn draw_centered(frame: &mut Frame<'_>, area: Rect, message: &str, color: Color) {
    if area.height == 0 {
        return;
    }
    let row = Rect {
        x: area.x,
        y: area.y + area.height / 2,
        width: area.width,
        height: 1,
    };
    frame.render_widget(
        Paragraph::new(message.to_string())
            .style(Style::default().fg(color))
            .alignment(Alignment::Center),
        row,
    );
}

/// Draws one frame into any backend; used to inspect the screen in tests.
pub fn render_once<B: Backend>(model: &mut Model, terminal: &mut Terminal<B>) -> Result<()> {
    terminal.draw(|frame| model.draw(frame))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Lang, SortOrder};
    use crate::offline::mock::MockNetwork;
    use crate::offline::{CachePolicy, Settings, Worker};
    use ratatui::backend::TestBackend;

    const BASE: &str = "https://clawmic.example/";

    const CATALOG: &str = r#"[
        {"issue_id": 1, "date": "2025-01-05", "title_en": "First", "title_ch": "第一",
         "comics_en": ["a1.png", "a2.png"], "comics_ch": ["c1.png"], "url": "https://example.org/1"},
        {"issue_id": 2, "date": "2025-02-10", "title_en": "Second", "title_ch": "第二",
         "comics_en": ["b1.png", "b2.png", "b3.png"], "comics_ch": ["d1.png"]}
    ]"#;

    fn network(with_catalog: bool) -> MockNetwork {
        let network = MockNetwork::default();
        if with_catalog {
            network.serve(&format!("{BASE}comic_db.json"), CATALOG.as_bytes());
        }
        network.serve(
            &format!("{BASE}about_the_editor.txt"),
            "中文\n------\nEnglish Version\n------\nHello".as_bytes(),
        );
        network.serve(&format!("{BASE}index.html"), b"<html>");
        network
    }

    fn model(network: MockNetwork, initial: &str) -> (Model, Worker, Store) {
        let policy = CachePolicy::new(
            Store::open_in_memory().unwrap(),
            network,
            Settings {
                version: "v1".into(),
                base_url: BASE.into(),
                shell: vec!["index.html".into()],
                document: "index.html".into(),
            },
        )
        .unwrap();
        let worker = Worker::spawn(policy);
        let store = Store::open_in_memory().unwrap();
        let model = Model::new(Options {
            worker: worker.handle(),
            store: store.clone(),
            paths: AssetPaths::new(BASE).unwrap(),
            preferences: ReaderPreferences::default(),
            initial_fragment: initial.into(),
            cache_version: "v1".into(),
            tick_rate: Duration::from_millis(50),
        });
        (model, worker, store)
    }

    fn settle(model: &mut Model) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while model.phase == Phase::Loading && Instant::now() < deadline {
            model.poll_async();
            thread::sleep(Duration::from_millis(5));
        }
        assert_ne!(model.phase, Phase::Loading, "bootstrap did not finish");
    }

    fn screen(model: &mut Model) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        render_once(model, &mut terminal).unwrap();
        let buffer = terminal.backend().buffer();
        buffer
            .content
            .chunks(usize::from(buffer.area.width))
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn empty_fragment_lands_on_library() {
        let (mut model, _worker, _store) = model(network(true), "");
        settle(&mut model);
        assert_eq!(model.route, Route::Library);
        assert_eq!(model.router.current(), router::LIBRARY_FRAGMENT);
        let screen = screen(&mut model);
        assert!(screen.contains("Date: Descending"));
        assert!(screen.contains("Second"));
    }

    #[test]
    fn bootstrap_failure_shows_only_the_message() {
        let (mut model, _worker, _store) = model(network(false), "");
        settle(&mut model);
        assert_eq!(model.phase, Phase::Failed);
        let screen = screen(&mut model);
        assert!(screen.contains(view::FAILURE_MESSAGE));
        assert!(!screen.contains("Library"));
    }

    #[test]
    fn deep_link_clamps_and_persists() {
        let (mut model, _worker, store) = model(network(true), "#/reader/1/99");
        settle(&mut model);
        assert_eq!(model.router.current(), "#/reader/1/3");
        let prefs = preferences::load(&store);
        assert_eq!(prefs.issue_id, Some(1));
        assert_eq!(prefs.page, Some(2));
    }

    #[test]
    fn next_page_walks_into_the_next_issue() {
        let (mut model, _worker, _store) = model(network(true), "#/reader/1/3");
        settle(&mut model);
        model.dispatch(Action::NextPage).unwrap();
        assert_eq!(model.router.current(), "#/reader/2/1");
        model.dispatch(Action::Back).unwrap();
        assert_eq!(model.router.current(), "#/reader/1/3");
        model.dispatch(Action::Forward).unwrap();
        assert_eq!(model.router.current(), "#/reader/2/1");
    }

    #[test]
    fn language_toggle_reclamps_current_page() {
        let (mut model, _worker, store) = model(network(true), "#/reader/2/4");
        settle(&mut model);
        model.dispatch(Action::ToggleLanguage).unwrap();
        assert_eq!(model.router.current(), "#/reader/2/2");
        let prefs = preferences::load(&store);
        assert_eq!(prefs.lang, Lang::Chinese);
        assert_eq!(prefs.page, Some(1));
    }

    #[test]
    fn zoom_is_ignored_on_intro_and_reset_by_paging() {
        let (mut model, _worker, _store) = model(network(true), "#/reader/2/1");
        settle(&mut model);
        model.dispatch(Action::ZoomIn).unwrap();
        assert_eq!(model.session.as_ref().unwrap().zoom(), 1.0);

        model.dispatch(Action::NextPage).unwrap();
        model.dispatch(Action::ZoomIn).unwrap();
        model.dispatch(Action::ZoomIn).unwrap();
        assert_eq!(model.session.as_ref().unwrap().zoom(), 1.5);

        model.dispatch(Action::NextPage).unwrap();
        assert_eq!(model.session.as_ref().unwrap().zoom(), 1.0);
    }

    #[test]
    fn sort_toggle_keeps_selection_and_persists() {
        let (mut model, _worker, store) = model(network(true), "#/library");
        settle(&mut model);
        assert_eq!(model.selected_card().unwrap().issue_id, 2);
        model.dispatch(Action::ToggleSort).unwrap();
        assert_eq!(model.selected_card().unwrap().issue_id, 2);
        assert_eq!(preferences::load(&store).library_sort, SortOrder::Asc);

        model.dispatch(Action::OpenSelected).unwrap();
        assert_eq!(model.router.current(), "#/reader/2/1");
    }

    #[test]
    fn about_view_shows_contact() {
        let (mut model, _worker, _store) = model(network(true), "");
        settle(&mut model);
        model.dispatch(Action::ShowAbout).unwrap();
        assert_eq!(model.router.current(), router::ABOUT_FRAGMENT);
        let screen = screen(&mut model);
        assert!(screen.contains(view::CONTACT_LINE));
        assert!(screen.contains("Hello"));
    }

    #[test]
    fn stage_thirds_turn_pages() {
        let (mut model, _worker, _store) = model(network(true), "#/reader/1/2");
        settle(&mut model);
        screen(&mut model);
        let stage = model.stage_area.unwrap();
        let left = (stage.x + 1, stage.y + 1);
        let right = (stage.x + stage.width - 2, stage.y + 1);
        let middle = (stage.x + stage.width / 2, stage.y + 1);
        assert_eq!(model.stage_click(left), Some(Action::PreviousPage));
        assert_eq!(model.stage_click(right), Some(Action::NextPage));
        assert_eq!(model.stage_click(middle), None);
    }

    #[test]
    fn stage_clicks_do_nothing_on_the_intro() {
        let (mut model, _worker, _store) = model(network(true), "#/reader/1/1");
        settle(&mut model);
        screen(&mut model);
        let stage = model.stage_area.unwrap();
        let left = (stage.x + 1, stage.y + 1);
        let right = (stage.x + stage.width - 2, stage.y + 1);
        assert_eq!(model.stage_click(left), None);
        assert_eq!(model.stage_click(right), None);
        assert_eq!(model.router.current(), "#/reader/1/1");
    }

    fn wait_for_image(model: &mut Model, url: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while matches!(model.images.get(url), Some(ImageSlot::Pending(_)))
            && Instant::now() < deadline
        {
            model.poll_async();
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn failed_image_is_fetched_again_on_revisit() {
        use image::{ImageFormat, Rgba, RgbaImage};
        use std::io::Cursor;

        let site = network(true);
        let url = format!("{BASE}img/issue1/a1.png");
        let (mut model, _worker, _store) = model(site.clone(), "#/reader/1/2");
        settle(&mut model);
        wait_for_image(&mut model, &url);
        assert!(matches!(model.images.get(&url), Some(ImageSlot::Failed(_))));

        let mut png = Cursor::new(Vec::new());
        RgbaImage::from_pixel(4, 4, Rgba([200, 40, 40, 255]))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        site.serve(&url, &png.into_inner());

        model.dispatch(Action::NextPage).unwrap();
        model.dispatch(Action::PreviousPage).unwrap();
        assert_eq!(model.router.current(), "#/reader/1/2");
        wait_for_image(&mut model, &url);
        assert!(matches!(model.images.get(&url), Some(ImageSlot::Ready(_))));
    }

    #[test]
    fn status_bar_and_footer_follow_language() {
        let (mut model, _worker, _store) = model(network(true), "#/library");
        settle(&mut model);
        let english = screen(&mut model);
        assert!(english.contains("online"));
        assert!(english.contains("q quit"));

        model.dispatch(Action::ToggleLanguage).unwrap();
        // Wide glyphs leave a blank cell behind them.
        let chinese: String = screen(&mut model).chars().filter(|c| *c != ' ').collect();
        let labels = view::labels(Lang::Chinese);
        assert!(chinese.contains(labels.online));
        assert!(!chinese.contains("online"));
        assert!(!chinese.contains("qquit"));
        assert!(chinese.contains("q離開"));
    }
}
