use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use url::Url;

use crate::collection::ItemCollection;
use crate::data::{ChatService, GalleryService};
use crate::feed::{FeedUnit, FeedViewer, Playback};
use crate::filters::{FilterCategory, FilterStore};
use crate::gallery::{ChatRequest, ChatResponse, FilterOptions, GalleryError, Item};
use crate::grid::{GridStatus, GridView};
use crate::input::{FeedCommand, InputNormalizer};
use crate::media::{item_media, MediaKind};
use crate::pager::{LoadOutcome, Pager};
use crate::theme::{
    centered_rect, pad_lines_to_width, wrap_plain, COLOR_ACCENT, COLOR_BG, COLOR_BORDER_FOCUSED,
    COLOR_ERROR, COLOR_PANEL_BG, COLOR_PANEL_FOCUSED_BG, COLOR_PANEL_SELECTED_BG, COLOR_SUCCESS,
    COLOR_TEXT_PRIMARY, COLOR_TEXT_SECONDARY, SPINNER_FRAMES,
};

pub const CHAT_ERROR_MESSAGE: &str = "Error connecting to server.";
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub struct Options {
    pub status_message: String,
    pub gallery_service: Arc<dyn GalleryService>,
    pub chat_service: Arc<dyn ChatService>,
    pub filters: FilterStore,
    pub feed: FeedViewer<Box<dyn Playback>>,
    pub input: InputNormalizer,
    pub page_limit: u32,
    pub preload_threshold: usize,
    pub wheel_step: f32,
    pub base_url: Url,
    pub session_id: String,
    pub config_path: String,
}

enum AsyncResponse {
    FilterOptions {
        result: Result<FilterOptions, GalleryError>,
    },
    Chat {
        request_id: u64,
        result: Result<ChatResponse, GalleryError>,
    },
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

struct FilterPanel {
    entries: Vec<(FilterCategory, String)>,
    cursor: usize,
    dirty: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum ChatFocus {
    #[default]
    Input,
    Results,
}

#[derive(Default)]
struct ChatPanel {
    visible: bool,
    focus: ChatFocus,
    input: String,
    last_query: Option<String>,
    answer: Option<String>,
    recommendations: Vec<Item>,
    selected: usize,
    pending: Option<u64>,
}

pub struct Model {
    status_message: String,
    gallery_service: Arc<dyn GalleryService>,
    chat_service: Arc<dyn ChatService>,
    pager: Pager,
    collection: ItemCollection,
    grid: GridView,
    filters: FilterStore,
    filter_options: FilterOptions,
    filter_options_pending: bool,
    filter_panel: Option<FilterPanel>,
    /// Toggled filters not yet applied to the loaded collection.
    filters_unapplied: bool,
    feed: FeedViewer<Box<dyn Playback>>,
    input: InputNormalizer,
    chat: ChatPanel,
    preload_threshold: usize,
    wheel_step: f32,
    base_url: Url,
    session_id: String,
    config_path: String,
    needs_redraw: bool,
    spinner: Spinner,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let pager = Pager::new(opts.gallery_service.clone(), opts.page_limit);
        let mut model = Self {
            status_message: opts.status_message,
            gallery_service: opts.gallery_service,
            chat_service: opts.chat_service,
            pager,
            collection: ItemCollection::new(),
            grid: GridView::new(),
            filters: opts.filters,
            filter_options: FilterOptions::default(),
            filter_options_pending: false,
            filter_panel: None,
            filters_unapplied: false,
            feed: opts.feed,
            input: opts.input,
            chat: ChatPanel::default(),
            preload_threshold: opts.preload_threshold,
            wheel_step: opts.wheel_step,
            base_url: opts.base_url,
            session_id: opts.session_id,
            config_path: opts.config_path,
            needs_redraw: true,
            spinner: Spinner::new(),
            response_tx,
            response_rx,
            next_request_id: 1,
        };
        model.reload_gallery();
        model.reload_filter_options();
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
        self.feed.close();

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }
            if self.tick_feed(Instant::now()) {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = self.poll_timeout(last_tick, tick_rate);
            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                tracing::warn!(error = %err, "ui: key handler failed");
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Mouse(mouse) => {
                        if let Err(err) = self.handle_mouse(mouse) {
                            self.status_message = format!("Error: {}", err);
                            self.mark_dirty();
                        }
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn poll_timeout(&self, last_tick: Instant, tick_rate: Duration) -> Duration {
        let idle = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(FRAME_INTERVAL);
        if self.feed.is_animating() {
            return FRAME_INTERVAL.min(idle);
        }
        match self.feed.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1))
                .min(idle),
            None => idle,
        }
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.pager.is_loading() || self.chat.pending.is_some() || self.filter_options_pending
    }

    fn tick_feed(&mut self, now: Instant) -> bool {
        if !self.feed.is_open() {
            return false;
        }
        self.input.tick(now);
        self.feed.tick(now)
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        for outcome in self.pager.poll() {
            self.apply_page(outcome);
            changed = true;
        }
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn apply_page(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Replace(items) => {
                self.collection.replace(items);
                self.grid.sync(&self.collection);
                self.status_message = if self.collection.is_empty() {
                    "No items match the current filters.".to_string()
                } else {
                    self.gallery_summary()
                };
            }
            LoadOutcome::Append(items) => {
                let added = items.len();
                let start = self.collection.append(items);
                tracing::debug!(start, added, "ui: appended page");
                self.status_message = self.gallery_summary();
            }
            LoadOutcome::Failed(err) => {
                self.status_message = format!("Could not load gallery: {err}");
                return;
            }
            LoadOutcome::Stale => {}
        }
        self.maybe_request_more();
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::FilterOptions { result } => {
                self.filter_options_pending = false;
                match result {
                    Ok(options) => {
                        self.filter_options = options;
                        if let Some(panel) = self.filter_panel.as_mut() {
                            panel.entries = filter_entries(&self.filter_options, &self.filters);
                            panel.cursor = panel.cursor.min(panel.entries.len().saturating_sub(1));
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "ui: filter options unavailable");
                    }
                }
            }
            AsyncResponse::Chat { request_id, result } => {
                if self.chat.pending != Some(request_id) {
                    return;
                }
                self.chat.pending = None;
                self.chat.selected = 0;
                match result {
                    Ok(reply) => {
                        if let Some(error) = reply.error.clone() {
                            self.chat.answer = Some(error);
                            self.chat.recommendations.clear();
                        } else {
                            self.chat.answer = reply.answer_text.clone();
                            self.chat.recommendations = reply.recommendations();
                            if !self.chat.recommendations.is_empty() {
                                self.chat.focus = ChatFocus::Results;
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "ui: chat request failed");
                        self.chat.answer = Some(CHAT_ERROR_MESSAGE.to_string());
                        self.chat.recommendations.clear();
                    }
                }
            }
        }
    }

    fn gallery_summary(&self) -> String {
        let active = self.filters.active_count();
        let more = if self.pager.has_more() { "+" } else { "" };
        if active == 0 {
            format!("{}{} items", self.collection.len(), more)
        } else {
            format!(
                "{}{} items · {} filter{} active",
                self.collection.len(),
                more,
                active,
                if active == 1 { "" } else { "s" }
            )
        }
    }

    fn reload_gallery(&mut self) {
        self.filters_unapplied = false;
        if self.pager.load(self.filters.active(), true) {
            self.status_message = "Loading gallery…".to_string();
        }
    }

    fn reload_filter_options(&mut self) {
        if self.filter_options_pending {
            return;
        }
        self.filter_options_pending = true;
        let service = self.gallery_service.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.filter_options();
            let _ = tx.send(AsyncResponse::FilterOptions { result });
        });
    }

    fn maybe_request_more(&mut self) {
        if self.collection.is_empty() || self.pager.is_loading() || !self.pager.has_more() {
            return;
        }
        if !self
            .grid
            .near_bottom(self.collection.len(), self.preload_threshold)
        {
            return;
        }
        self.pager.load(self.filters.active(), false);
    }

    fn hard_refresh(&mut self) {
        tracing::info!("ui: hard refresh");
        self.filters.reset();
        self.filter_panel = None;
        self.reload_gallery();
        self.reload_filter_options();
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if self.feed.is_open() {
            return self.handle_feed_key(key);
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(true);
        }
        if self.chat.visible {
            return self.handle_chat_key(key);
        }
        if self.filter_panel.is_some() {
            return self.handle_filter_key(key);
        }

        let len = self.collection.len();
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Left | KeyCode::Char('h') => self.move_selection(-1, 0),
            KeyCode::Right | KeyCode::Char('l') => self.move_selection(1, 0),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(0, 1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(0, -1),
            KeyCode::Home | KeyCode::Char('g') => self.grid.select(0, len),
            KeyCode::End | KeyCode::Char('G') => {
                self.grid.select(len.saturating_sub(1), len);
                self.maybe_request_more();
            }
            KeyCode::Enter => {
                let items = self.collection.items().to_vec();
                self.open_feed(items, self.grid.selected());
            }
            KeyCode::Char('f') => self.open_filter_panel(),
            KeyCode::Char('r') => self.reload_gallery(),
            KeyCode::Char('R') => self.hard_refresh(),
            KeyCode::Char('/') | KeyCode::Char('c') => {
                self.chat.visible = true;
                self.chat.focus = ChatFocus::Input;
            }
            KeyCode::Char('o') => {
                if let Some(item) = self.collection.get(self.grid.selected()).cloned() {
                    self.open_external(&item)?;
                }
            }
            _ => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn move_selection(&mut self, dx: i32, dy: i32) {
        if self
            .grid
            .move_selection(dx, dy, self.collection.len())
        {
            self.maybe_request_more();
        }
    }

    fn open_feed(&mut self, items: Vec<Item>, start: usize) {
        let total = items.len();
        if self.feed.open(items, start, Instant::now()) {
            self.status_message = format!("Viewing {} of {}", start.min(total - 1) + 1, total);
        }
    }

    fn close_feed(&mut self) {
        self.feed.close();
        self.status_message = self.gallery_summary();
    }

    fn handle_feed_key(&mut self, key: KeyEvent) -> Result<bool> {
        let now = Instant::now();
        match self.input.key(key) {
            Some(FeedCommand::Navigate(action)) => {
                self.feed.navigate(action, now);
            }
            Some(FeedCommand::Close) => self.close_feed(),
            Some(FeedCommand::TogglePlayback) => self.feed.toggle_current(),
            Some(FeedCommand::OpenExternal) => {
                let index = self.feed.current_index().or(self.feed.nearest_index());
                let item = index.and_then(|index| {
                    self.feed
                        .session()
                        .and_then(|session| session.units.get(index))
                        .map(|unit| unit.item.clone())
                });
                if let Some(item) = item {
                    self.open_external(&item)?;
                }
            }
            None => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) -> Result<()> {
        let now = Instant::now();
        if self.feed.is_open() {
            let delta = match mouse.kind {
                MouseEventKind::ScrollDown => self.wheel_step,
                MouseEventKind::ScrollUp => -self.wheel_step,
                MouseEventKind::Down(MouseButton::Left) => {
                    self.feed.toggle_current();
                    self.mark_dirty();
                    return Ok(());
                }
                _ => return Ok(()),
            };
            if let Some(action) = self.input.wheel(delta, now) {
                self.feed.navigate(action, now);
                self.mark_dirty();
            }
            return Ok(());
        }
        if self.chat.visible || self.filter_panel.is_some() {
            return Ok(());
        }

        let len = self.collection.len();
        match mouse.kind {
            MouseEventKind::ScrollDown => self.move_selection(0, 1),
            MouseEventKind::ScrollUp => self.move_selection(0, -1),
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(index) = self.grid.card_at(mouse.column, mouse.row, len) {
                    if index == self.grid.selected() {
                        let items = self.collection.items().to_vec();
                        self.open_feed(items, index);
                    } else {
                        self.grid.select(index, len);
                    }
                }
            }
            _ => return Ok(()),
        }
        self.mark_dirty();
        Ok(())
    }

    fn open_filter_panel(&mut self) {
        let entries = filter_entries(&self.filter_options, &self.filters);
        self.filter_panel = Some(FilterPanel {
            entries,
            cursor: 0,
            dirty: self.filters_unapplied,
        });
        if self.filter_options == FilterOptions::default() {
            self.reload_filter_options();
        }
    }

    fn handle_filter_key(&mut self, key: KeyEvent) -> Result<bool> {
        let Some(panel) = self.filter_panel.as_mut() else {
            return Ok(false);
        };
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => {
                if panel.cursor + 1 < panel.entries.len() {
                    panel.cursor += 1;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                panel.cursor = panel.cursor.saturating_sub(1);
            }
            KeyCode::Char(' ') => {
                if let Some((category, value)) = panel.entries.get(panel.cursor).cloned() {
                    panel.dirty = true;
                    self.filters.toggle(category, &value);
                }
            }
            KeyCode::Char('x') => {
                panel.dirty = true;
                self.filters.reset();
            }
            KeyCode::Enter => {
                let dirty = panel.dirty;
                self.filter_panel = None;
                if dirty {
                    self.reload_gallery();
                }
            }
            KeyCode::Esc | KeyCode::Char('f') | KeyCode::Char('q') => {
                self.filters_unapplied = panel.dirty;
                self.filter_panel = None;
            }
            _ => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn handle_chat_key(&mut self, key: KeyEvent) -> Result<bool> {
        match (self.chat.focus, key.code) {
            (_, KeyCode::Esc) => self.chat.visible = false,
            (ChatFocus::Input, KeyCode::Enter) => self.send_chat(),
            (ChatFocus::Input, KeyCode::Backspace) => {
                self.chat.input.pop();
            }
            (ChatFocus::Input, KeyCode::Tab) => {
                if !self.chat.recommendations.is_empty() {
                    self.chat.focus = ChatFocus::Results;
                }
            }
            (ChatFocus::Input, KeyCode::Char(ch)) => self.chat.input.push(ch),
            (ChatFocus::Results, KeyCode::Tab | KeyCode::Char('i') | KeyCode::Char('/')) => {
                self.chat.focus = ChatFocus::Input;
            }
            (ChatFocus::Results, KeyCode::Down | KeyCode::Char('j')) => {
                if self.chat.selected + 1 < self.chat.recommendations.len() {
                    self.chat.selected += 1;
                }
            }
            (ChatFocus::Results, KeyCode::Up | KeyCode::Char('k')) => {
                self.chat.selected = self.chat.selected.saturating_sub(1);
            }
            (ChatFocus::Results, KeyCode::Enter) => {
                let items = self.chat.recommendations.clone();
                self.open_feed(items, self.chat.selected);
            }
            (ChatFocus::Results, KeyCode::Char('o')) => {
                if let Some(item) = self.chat.recommendations.get(self.chat.selected).cloned() {
                    self.open_external(&item)?;
                }
            }
            (ChatFocus::Results, KeyCode::Char('q')) => self.chat.visible = false,
            _ => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn send_chat(&mut self) {
        let query = self.chat.input.trim().to_string();
        if query.is_empty() || self.chat.pending.is_some() {
            return;
        }
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.chat.pending = Some(request_id);
        self.chat.last_query = Some(query.clone());
        self.chat.input.clear();
        self.chat.answer = None;
        self.chat.recommendations.clear();

        let request = ChatRequest {
            query,
            session_id: self.session_id.clone(),
        };
        let service = self.chat_service.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.ask(&request);
            let _ = tx.send(AsyncResponse::Chat { request_id, result });
        });
    }

    fn open_external(&mut self, item: &Item) -> Result<()> {
        let Some(media) = item_media(item) else {
            self.status_message = "This item has no media to open.".to_string();
            return Ok(());
        };
        let url = media
            .absolute_url(&self.base_url)
            .with_context(|| format!("build media URL for {}", media.route()))?;
        match webbrowser::open(url.as_str()) {
            Ok(_) => self.status_message = format!("Opened {} in your browser.", media.route()),
            Err(err) => {
                self.status_message = format!("Failed to open {}: {err}", url);
            }
        }
        Ok(())
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        if self.feed.is_open() {
            self.draw_feed(frame, full);
            return;
        }

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        let status = if self.pager.is_loading() {
            GridStatus::Loading {
                spinner: self.spinner.frame(),
            }
        } else {
            GridStatus::Ready
        };
        self.grid.draw(frame, layout[1], &self.collection, status);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[2]);

        if self.filter_panel.is_some() {
            self.draw_filter_panel(frame, layout[1]);
        }
        if self.chat.visible {
            self.draw_chat(frame, layout[1]);
        }
    }

    fn footer_text(&self) -> String {
        if self.chat.visible {
            return match self.chat.focus {
                ChatFocus::Input => "Type a question · Enter send · Tab results · Esc close".into(),
                ChatFocus::Results => {
                    "j/k move · Enter view in feed · o open media · Tab ask again · Esc close"
                        .into()
                }
            };
        }
        if self.filter_panel.is_some() {
            return "j/k move · Space toggle · x clear all · Enter apply · Esc close".into();
        }
        format!(
            "arrows/hjkl move · Enter feed · f filters · / ask · r reload · R hard refresh · o open · q quit · config {}",
            self.config_path
        )
    }

    fn draw_feed(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);
        let viewport = chunks[0];
        self.feed.set_viewport(viewport.height, Instant::now());

        let total = self.feed.len();
        let current = self.feed.current_index();
        let playing = self.feed.playing_index();
        let height = i32::from(viewport.height);
        for (unit, top) in self.feed.visible_units() {
            let skip = (-top).max(0);
            let y = i32::from(viewport.y) + top.max(0);
            let visible_height = (height - skip).min(i32::from(viewport.bottom()) - y);
            if visible_height <= 0 {
                continue;
            }
            let rect = Rect {
                x: viewport.x,
                y: y as u16,
                width: viewport.width,
                height: visible_height as u16,
            };
            let state = UnitState {
                total,
                current: current == Some(unit.index),
                playing: playing == Some(unit.index),
            };
            let mut lines = unit_lines(unit, state, viewport.width, viewport.height);
            pad_lines_to_width(&mut lines, viewport.width);
            frame.render_widget(Clear, rect);
            frame.render_widget(
                Paragraph::new(lines)
                    .style(Style::default().bg(COLOR_BG))
                    .scroll((skip as u16, 0)),
                rect,
            );
        }

        let position = self
            .feed
            .nearest_index()
            .map(|index| format!("{} / {}", index + 1, total))
            .unwrap_or_default();
        let footer = Paragraph::new(format!(
            "{position} · ↑/↓ or wheel navigate · Space play/pause · o open · Esc close"
        ))
        .style(
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .bg(COLOR_PANEL_BG)
                .add_modifier(Modifier::ITALIC),
        )
        .alignment(Alignment::Center);
        frame.render_widget(footer, chunks[1]);
    }

    fn draw_filter_panel(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(panel) = self.filter_panel.as_ref() else {
            return;
        };
        let popup_area = centered_rect(60, 80, area);
        frame.render_widget(Clear, popup_area);

        let mut items: Vec<ListItem> = Vec::new();
        let mut last_category = None;
        let mut selected_row = None;
        for (idx, (category, value)) in panel.entries.iter().enumerate() {
            if last_category != Some(*category) {
                last_category = Some(*category);
                items.push(ListItem::new(Line::from(Span::styled(
                    category.display_name(),
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                ))));
            }
            let checked = self.filters.active().contains(*category, value);
            let marker = if checked { "[x]" } else { "[ ]" };
            let style = if checked {
                Style::default().fg(COLOR_SUCCESS)
            } else {
                Style::default().fg(COLOR_TEXT_PRIMARY)
            };
            if idx == panel.cursor {
                selected_row = Some(items.len());
            }
            items.push(ListItem::new(Line::from(Span::styled(
                format!("  {marker} {value}"),
                style,
            ))));
        }
        if items.is_empty() {
            let message = if self.filter_options_pending {
                format!("{} Loading filter options…", self.spinner.frame())
            } else {
                "No filter options available.".to_string()
            };
            items.push(ListItem::new(Line::from(Span::styled(
                message,
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            ))));
        }

        let title = format!("Filters ({} active)", self.filters.active_count());
        let list = List::new(items)
            .block(
                Block::default()
                    .title(Span::styled(
                        title,
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .highlight_style(
                Style::default()
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD),
            );
        let mut state = ListState::default();
        state.select(selected_row);
        frame.render_stateful_widget(list, popup_area, &mut state);
    }

    fn draw_chat(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup_area = centered_rect(80, 90, area);
        frame.render_widget(Clear, popup_area);
        let block = Block::default()
            .title(Span::styled(
                "Ask the gallery",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(popup_area);
        frame.render_widget(block, popup_area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage(35),
                Constraint::Min(3),
                Constraint::Length(3),
            ])
            .split(inner);
        let width = usize::from(inner.width.max(1));

        let mut answer_lines: Vec<Line<'static>> = Vec::new();
        if let Some(query) = &self.chat.last_query {
            answer_lines.extend(wrap_plain(
                &format!("> {query}"),
                width,
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ));
        }
        if self.chat.pending.is_some() {
            answer_lines.push(Line::from(Span::styled(
                format!("{} Searching knowledge…", self.spinner.frame()),
                Style::default().fg(COLOR_ACCENT),
            )));
        } else if let Some(answer) = &self.chat.answer {
            let style = if answer == CHAT_ERROR_MESSAGE {
                Style::default().fg(COLOR_ERROR)
            } else {
                Style::default().fg(COLOR_TEXT_PRIMARY)
            };
            for paragraph in answer.split('\n') {
                answer_lines.extend(wrap_plain(paragraph, width, style));
            }
        }
        frame.render_widget(
            Paragraph::new(answer_lines).wrap(Wrap { trim: false }),
            chunks[0],
        );

        let results_focused = self.chat.focus == ChatFocus::Results;
        let items: Vec<ListItem> = self
            .chat
            .recommendations
            .iter()
            .map(|item| {
                let kind = match item_media(item).map(|media| media.kind()) {
                    Some(MediaKind::Video) => "▶",
                    Some(MediaKind::Image) => "▣",
                    None => "≡",
                };
                let mut lines = vec![Line::from(vec![
                    Span::styled(format!("{kind} "), Style::default().fg(COLOR_ACCENT)),
                    Span::styled(
                        item.title_or(crate::feed::TITLE_FALLBACK).to_string(),
                        Style::default()
                            .fg(COLOR_TEXT_PRIMARY)
                            .add_modifier(Modifier::BOLD),
                    ),
                ])];
                if let Some(note) = item.note.as_deref().filter(|note| !note.is_empty()) {
                    lines.push(Line::from(Span::styled(
                        format!("  {note}"),
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    )));
                }
                ListItem::new(lines)
            })
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .title(format!(
                        "Recommendations ({})",
                        self.chat.recommendations.len()
                    ))
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(if results_focused {
                        COLOR_BORDER_FOCUSED
                    } else {
                        COLOR_TEXT_SECONDARY
                    })),
            )
            .highlight_style(
                Style::default()
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");
        let mut state = ListState::default();
        if results_focused && !self.chat.recommendations.is_empty() {
            state.select(Some(self.chat.selected));
        }
        frame.render_stateful_widget(list, chunks[1], &mut state);

        let input_style = if results_focused {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        } else {
            Style::default().fg(COLOR_TEXT_PRIMARY)
        };
        let input = Paragraph::new(format!("{}▏", self.chat.input))
            .style(input_style)
            .block(Block::default().borders(Borders::ALL).title("Question"));
        frame.render_widget(input, chunks[2]);
    }
}

fn filter_entries(options: &FilterOptions, filters: &FilterStore) -> Vec<(FilterCategory, String)> {
    let mut entries = Vec::new();
    for category in FilterCategory::ALL {
        let available = match category {
            FilterCategory::Platform => &options.platform,
            FilterCategory::Category => &options.category,
            FilterCategory::Tags => &options.tags,
            FilterCategory::Types => &options.types,
        };
        let mut values: Vec<String> = available.clone();
        // Keep restored selections visible even when the server stopped
        // offering them.
        for selected in filters.active().values(category) {
            if !values.contains(selected) {
                values.push(selected.clone());
            }
        }
        entries.extend(values.into_iter().map(|value| (category, value)));
    }
    entries
}

#[derive(Clone, Copy)]
struct UnitState {
    total: usize,
    current: bool,
    playing: bool,
}

fn unit_lines(unit: &FeedUnit, state: UnitState, width: u16, height: u16) -> Vec<Line<'static>> {
    let width = usize::from(width.saturating_sub(4).max(1));
    let indent = "  ";
    let mut lines: Vec<Line<'static>> = Vec::new();

    let (badge, badge_style) = match unit.media.as_ref().map(|media| media.kind()) {
        Some(MediaKind::Video) if state.playing => ("▶ Playing", Style::default().fg(COLOR_SUCCESS)),
        Some(MediaKind::Video) => ("❚❚ Paused", Style::default().fg(COLOR_TEXT_SECONDARY)),
        Some(MediaKind::Image) => ("▣ Image", Style::default().fg(COLOR_ACCENT)),
        None => ("≡ Text", Style::default().fg(COLOR_TEXT_SECONDARY)),
    };
    let marker = if state.current { "●" } else { "○" };
    lines.push(Line::from(vec![
        Span::raw(indent),
        Span::styled(
            format!("{marker} {} / {}", unit.index + 1, state.total),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
        Span::raw("  "),
        Span::styled(badge, badge_style.add_modifier(Modifier::BOLD)),
    ]));
    if let Some(media) = &unit.media {
        lines.push(Line::from(vec![
            Span::raw(indent),
            Span::styled(media.route(), Style::default().fg(COLOR_TEXT_SECONDARY)),
        ]));
    }
    lines.push(Line::default());

    lines.push(Line::from(vec![
        Span::raw(indent),
        Span::styled(
            unit.platform().to_uppercase(),
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        ),
    ]));
    for line in wrap_plain(
        unit.title(),
        width,
        Style::default()
            .fg(COLOR_TEXT_PRIMARY)
            .add_modifier(Modifier::BOLD),
    ) {
        lines.push(indented(line, indent));
    }
    lines.push(Line::default());
    let summary = unit.summary();
    if !summary.is_empty() {
        for line in wrap_plain(summary, width, Style::default().fg(COLOR_TEXT_PRIMARY)) {
            lines.push(indented(line, indent));
        }
        lines.push(Line::default());
    }
    let chips = unit.tag_chips();
    if !chips.is_empty() {
        for line in wrap_plain(&chips.join(" "), width, Style::default().fg(COLOR_ACCENT)) {
            lines.push(indented(line, indent));
        }
    }

    lines.truncate(usize::from(height.max(1)));
    lines
}

fn indented(line: Line<'static>, indent: &'static str) -> Line<'static> {
    let mut spans = vec![Span::raw(indent)];
    spans.extend(line.spans);
    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ratatui::backend::TestBackend;

    use crate::data::{MockChatService, MockGalleryService};
    use crate::feed::{FeedTiming, Proximity};
    use crate::filters::{StateStore, FILTERS_KEY};
    use crate::gallery::VideosRequest;
    use crate::storage::MemoryState;
    use crate::video::DisabledPlayback;

    struct CountingGallery {
        inner: MockGalleryService,
        calls: AtomicUsize,
    }

    impl GalleryService for CountingGallery {
        fn filter_options(&self) -> Result<FilterOptions, GalleryError> {
            self.inner.filter_options()
        }

        fn videos(&self, request: &VideosRequest) -> Result<Vec<Item>, GalleryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.videos(request)
        }
    }

    struct FailingChat;

    impl ChatService for FailingChat {
        fn ask(&self, _request: &ChatRequest) -> Result<ChatResponse, GalleryError> {
            Err(GalleryError::Decode(
                serde_json::from_str::<ChatResponse>("<html>").unwrap_err(),
            ))
        }
    }

    fn model_with(
        gallery: Arc<dyn GalleryService>,
        chat: Arc<dyn ChatService>,
        state: Arc<dyn StateStore>,
    ) -> Model {
        let playback: Box<dyn Playback> = Box::new(DisabledPlayback);
        Model::new(Options {
            status_message: String::new(),
            gallery_service: gallery,
            chat_service: chat,
            filters: FilterStore::restore(state, false),
            feed: FeedViewer::new(playback, Box::new(Proximity::default()), FeedTiming::default()),
            input: InputNormalizer::default(),
            page_limit: 50,
            preload_threshold: 1,
            wheel_step: 50.0,
            base_url: Url::parse("http://127.0.0.1:5001").unwrap(),
            session_id: "test-session".into(),
            config_path: "~/.config/gallery-tui/config.yaml".into(),
        })
    }

    fn model() -> Model {
        model_with(
            Arc::new(MockGalleryService::new(120)),
            Arc::new(MockChatService),
            Arc::new(MemoryState::default()),
        )
    }

    fn settle(model: &mut Model) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            model.poll_async();
            if !model.is_loading() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("async work did not finish");
    }

    fn press(model: &mut Model, code: KeyCode) -> bool {
        model
            .handle_key(KeyEvent::new(code, KeyModifiers::NONE))
            .unwrap()
    }

    #[test]
    fn first_page_loads_on_start() {
        let mut model = model();
        settle(&mut model);
        assert_eq!(model.collection.len(), 50);
        assert!(model.pager.has_more());
        assert_eq!(model.filter_options.platform.len(), 3);
    }

    #[test]
    fn reaching_the_end_appends_next_page() {
        let mut model = model();
        settle(&mut model);
        press(&mut model, KeyCode::End);
        settle(&mut model);
        assert!(model.collection.len() > 50);
        let first = model.collection.get(0).unwrap().title.clone();
        assert_eq!(first.as_deref(), Some("Sample entry #1"));
    }

    #[test]
    fn feed_captures_keys_while_open() {
        let mut model = model();
        settle(&mut model);
        press(&mut model, KeyCode::Right);
        assert_eq!(model.grid.selected(), 1);
        press(&mut model, KeyCode::Enter);
        assert!(model.feed.is_open());

        assert!(!press(&mut model, KeyCode::Char('q')));
        assert!(!model.feed.is_open());
        assert_eq!(model.grid.selected(), 1);

        press(&mut model, KeyCode::Enter);
        press(&mut model, KeyCode::Right);
        press(&mut model, KeyCode::Char('f'));
        assert_eq!(model.grid.selected(), 1);
        assert!(model.filter_panel.is_none());

        assert!(!press(&mut model, KeyCode::Esc));
        assert!(!model.feed.is_open());
    }

    #[test]
    fn feed_renders_after_layout_settles() {
        let mut model = model();
        settle(&mut model);
        press(&mut model, KeyCode::Enter);
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|frame| model.draw(frame)).unwrap();
        let later = Instant::now() + Duration::from_secs(1);
        model.tick_feed(later);
        model.tick_feed(later + Duration::from_secs(1));
        assert!(model.feed.is_settled());
        assert_eq!(model.feed.current_index(), Some(0));
        terminal.draw(|frame| model.draw(frame)).unwrap();
    }

    #[test]
    fn filter_toggle_persists_and_reloads() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryState::default());
        let gallery = Arc::new(CountingGallery {
            inner: MockGalleryService::new(10),
            calls: AtomicUsize::new(0),
        });
        let mut model = model_with(gallery.clone(), Arc::new(MockChatService), state.clone());
        settle(&mut model);
        assert_eq!(gallery.calls.load(Ordering::SeqCst), 1);

        press(&mut model, KeyCode::Char('f'));
        press(&mut model, KeyCode::Char(' '));
        press(&mut model, KeyCode::Enter);
        settle(&mut model);

        assert_eq!(gallery.calls.load(Ordering::SeqCst), 2);
        assert_eq!(model.filters.active_count(), 1);
        let saved = state.load_state(FILTERS_KEY).unwrap().unwrap();
        assert!(saved.contains("Instagram"));
    }

    #[test]
    fn closing_filter_panel_keeps_toggles_without_reloading() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryState::default());
        let gallery = Arc::new(CountingGallery {
            inner: MockGalleryService::new(10),
            calls: AtomicUsize::new(0),
        });
        let mut model = model_with(gallery.clone(), Arc::new(MockChatService), state.clone());
        settle(&mut model);

        press(&mut model, KeyCode::Char('f'));
        press(&mut model, KeyCode::Char(' '));
        press(&mut model, KeyCode::Esc);
        settle(&mut model);
        assert!(model.filter_panel.is_none());
        assert_eq!(gallery.calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.filters.active_count(), 1);
        assert!(state.load_state(FILTERS_KEY).unwrap().is_some());

        press(&mut model, KeyCode::Char('f'));
        press(&mut model, KeyCode::Enter);
        settle(&mut model);
        assert_eq!(gallery.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reload_after_scrolling_fetches_only_first_page() {
        let gallery = Arc::new(CountingGallery {
            inner: MockGalleryService::new(200),
            calls: AtomicUsize::new(0),
        });
        let mut model = model_with(
            gallery.clone(),
            Arc::new(MockChatService),
            Arc::new(MemoryState::default()),
        );
        settle(&mut model);
        press(&mut model, KeyCode::End);
        settle(&mut model);
        assert_eq!(model.collection.len(), 100);
        assert_eq!(model.grid.selected(), 49);
        let before = gallery.calls.load(Ordering::SeqCst);

        press(&mut model, KeyCode::Char('r'));
        settle(&mut model);
        assert_eq!(gallery.calls.load(Ordering::SeqCst) - before, 1);
        assert_eq!(model.collection.len(), 50);
        assert_eq!(model.grid.selected(), 0);
    }

    #[test]
    fn hard_refresh_clears_filters() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryState::default());
        let mut model = model_with(
            Arc::new(MockGalleryService::new(10)),
            Arc::new(MockChatService),
            state,
        );
        settle(&mut model);
        model.filters.toggle(FilterCategory::Tags, "quick");
        press(&mut model, KeyCode::Char('R'));
        settle(&mut model);
        assert_eq!(model.filters.active_count(), 0);
        assert_eq!(model.collection.len(), 10);
    }

    #[test]
    fn chat_recommendations_open_in_feed() {
        let mut model = model();
        settle(&mut model);
        press(&mut model, KeyCode::Char('/'));
        for ch in "pasta".chars() {
            press(&mut model, KeyCode::Char(ch));
        }
        press(&mut model, KeyCode::Enter);
        settle(&mut model);
        assert_eq!(model.chat.recommendations.len(), 3);
        assert!(model.chat.focus == ChatFocus::Results);

        press(&mut model, KeyCode::Down);
        press(&mut model, KeyCode::Enter);
        assert!(model.feed.is_open());
        assert_eq!(model.feed.len(), 3);
        assert_eq!(model.feed.session().unwrap().current_index, 1);
    }

    #[test]
    fn chat_transport_error_shows_message() {
        let mut model = model_with(
            Arc::new(MockGalleryService::new(5)),
            Arc::new(FailingChat),
            Arc::new(MemoryState::default()),
        );
        settle(&mut model);
        press(&mut model, KeyCode::Char('c'));
        press(&mut model, KeyCode::Char('x'));
        press(&mut model, KeyCode::Enter);
        settle(&mut model);
        assert_eq!(model.chat.answer.as_deref(), Some(CHAT_ERROR_MESSAGE));
        assert!(model.chat.recommendations.is_empty());
    }

    #[test]
    fn filter_entries_include_restored_values() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryState::default());
        let mut filters = FilterStore::restore(state, false);
        filters.toggle(FilterCategory::Platform, "Vimeo");
        let options = FilterOptions {
            platform: vec!["TikTok".into()],
            ..FilterOptions::default()
        };
        let entries = filter_entries(&options, &filters);
        assert_eq!(
            entries,
            vec![
                (FilterCategory::Platform, "TikTok".to_string()),
                (FilterCategory::Platform, "Vimeo".to_string()),
            ]
        );
    }
}
