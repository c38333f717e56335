use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph};
use ratatui::Frame;

use crate::collection::ItemCollection;
use crate::feed::TITLE_FALLBACK;
use crate::gallery::Item;
use crate::media::{item_media, MediaKind};
use crate::theme::{
    pad_lines_to_width, truncate_to_width, wrap_clamped, COLOR_ACCENT, COLOR_BORDER_FOCUSED,
    COLOR_BORDER_IDLE, COLOR_PANEL_BG, COLOR_PANEL_SELECTED_BG, COLOR_SUCCESS,
    COLOR_TEXT_PRIMARY, COLOR_TEXT_SECONDARY,
};

pub const GRID_PLATFORM_FALLBACK: &str = "Unknown";
pub const EMPTY_MESSAGE: &str = "No items match the current filters.";

const CARD_MIN_WIDTH: u16 = 30;
const CARD_HEIGHT: u16 = 7;
const CARD_BODY_LINES: usize = 5;
const TITLE_LINES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridStatus<'a> {
    Ready,
    Loading { spinner: &'a str },
}

/// Pre-rendered card body for one collection index.
#[derive(Debug, Clone)]
struct Card {
    lines: Vec<Line<'static>>,
}

/// Paged card grid over the item collection.
///
/// Card bodies are rendered once per item: growth of the collection only
/// builds cards for the appended tail, while a replace (new epoch) or a
/// width change rebuilds everything.
#[derive(Debug, Default)]
pub struct GridView {
    cards: Vec<Card>,
    epoch: Option<u64>,
    card_width: usize,
    columns: usize,
    selected: usize,
    offset_row: usize,
    visible_rows: usize,
    area: Option<Rect>,
}

impl GridView {
    pub fn new() -> Self {
        Self {
            card_width: usize::from(CARD_MIN_WIDTH - 2),
            columns: 1,
            ..Self::default()
        }
    }

    /// Brings the card cache up to date and returns how many cards were
    /// built.
    pub fn sync(&mut self, collection: &ItemCollection) -> usize {
        if self.epoch != Some(collection.epoch()) {
            self.epoch = Some(collection.epoch());
            self.cards.clear();
            self.selected = 0;
            self.offset_row = 0;
        }
        if self.cards.len() > collection.len() {
            self.cards.truncate(collection.len());
        }
        let start = self.cards.len();
        let width = self.card_width;
        self.cards.extend(
            collection.items()[start..]
                .iter()
                .map(|item| build_card(item, width)),
        );
        let built = self.cards.len() - start;
        if built > 0 {
            tracing::trace!(built, total = self.cards.len(), "grid: cards rendered");
        }
        built
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn columns(&self) -> usize {
        self.columns.max(1)
    }

    pub fn select(&mut self, index: usize, len: usize) {
        if len == 0 {
            self.selected = 0;
            self.offset_row = 0;
            return;
        }
        self.selected = index.min(len - 1);
        self.ensure_visible();
    }

    /// Moves by `dx` cards within a row and `dy` rows. Returns whether the
    /// selection changed.
    pub fn move_selection(&mut self, dx: i32, dy: i32, len: usize) -> bool {
        if len == 0 {
            return false;
        }
        let columns = self.columns() as i64;
        let target = self.selected as i64 + i64::from(dx) + i64::from(dy) * columns;
        let target = target.clamp(0, len as i64 - 1) as usize;
        let changed = target != self.selected;
        self.select(target, len);
        changed
    }

    /// True when at most `threshold_rows` rows remain below the viewport.
    pub fn near_bottom(&self, len: usize, threshold_rows: usize) -> bool {
        if len == 0 {
            return false;
        }
        let last_visible = self.offset_row + self.visible_rows.max(1);
        self.total_rows(len).saturating_sub(last_visible) <= threshold_rows
    }

    /// Maps a terminal cell to the card drawn there during the last frame.
    pub fn card_at(&self, column: u16, row: u16, len: usize) -> Option<usize> {
        let area = self.area?;
        if column < area.x
            || row < area.y
            || column >= area.x + area.width
            || row >= area.y + area.height
        {
            return None;
        }
        let card_width = (area.width / self.columns() as u16).max(1);
        let col = usize::from((column - area.x) / card_width).min(self.columns() - 1);
        let grid_row = usize::from((row - area.y) / CARD_HEIGHT) + self.offset_row;
        let index = grid_row * self.columns() + col;
        (index < len).then_some(index)
    }

    fn total_rows(&self, len: usize) -> usize {
        len.div_ceil(self.columns())
    }

    fn ensure_visible(&mut self) {
        let row = self.selected / self.columns();
        let visible = self.visible_rows.max(1);
        if row < self.offset_row {
            self.offset_row = row;
        } else if row >= self.offset_row + visible {
            self.offset_row = row + 1 - visible;
        }
    }

    fn relayout(&mut self, area: Rect) {
        let columns = (area.width / CARD_MIN_WIDTH).max(1);
        let card_width = usize::from((area.width / columns).saturating_sub(2).max(1));
        self.columns = usize::from(columns);
        self.visible_rows = usize::from((area.height / CARD_HEIGHT).max(1));
        if card_width != self.card_width {
            self.card_width = card_width;
            self.cards.clear();
        }
        self.area = Some(area);
    }

    pub fn draw(
        &mut self,
        frame: &mut Frame<'_>,
        area: Rect,
        collection: &ItemCollection,
        status: GridStatus<'_>,
    ) {
        self.relayout(area);
        self.sync(collection);
        self.ensure_visible();

        if collection.is_empty() {
            let message = match status {
                GridStatus::Loading { spinner } => format!("{spinner} Loading gallery…"),
                GridStatus::Ready => EMPTY_MESSAGE.to_string(),
            };
            let style = Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .bg(COLOR_PANEL_BG)
                .add_modifier(Modifier::ITALIC);
            frame.render_widget(Paragraph::new(Span::styled(message, style)), area);
            return;
        }

        let columns = self.columns();
        let card_width = area.width / columns as u16;
        for visible_row in 0..self.visible_rows {
            let grid_row = self.offset_row + visible_row;
            for col in 0..columns {
                let index = grid_row * columns + col;
                let Some(card) = self.cards.get(index) else {
                    break;
                };
                let y = area.y + visible_row as u16 * CARD_HEIGHT;
                let rect = Rect {
                    x: area.x + col as u16 * card_width,
                    y,
                    width: card_width,
                    height: CARD_HEIGHT.min(area.bottom().saturating_sub(y)),
                };
                self.draw_card(frame, rect, card, index == self.selected);
            }
        }

        if let GridStatus::Loading { spinner } = status {
            let footer = Rect {
                y: area.y + area.height.saturating_sub(1),
                height: 1,
                ..area
            };
            frame.render_widget(
                Paragraph::new(Span::styled(
                    format!("{spinner} Loading more…"),
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .bg(COLOR_PANEL_BG)
                        .add_modifier(Modifier::BOLD),
                )),
                footer,
            );
        }
    }

    fn draw_card(&self, frame: &mut Frame<'_>, rect: Rect, card: &Card, selected: bool) {
        let (border, background) = if selected {
            (COLOR_BORDER_FOCUSED, COLOR_PANEL_SELECTED_BG)
        } else {
            (COLOR_BORDER_IDLE, COLOR_PANEL_BG)
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(border))
            .style(Style::default().bg(background));
        let inner = block.inner(rect);
        frame.render_widget(block, rect);
        let mut lines = card.lines.clone();
        pad_lines_to_width(&mut lines, inner.width);
        frame.render_widget(
            Paragraph::new(lines).style(Style::default().bg(background)),
            inner,
        );
    }
}

fn media_badge(item: &Item) -> Span<'static> {
    match item_media(item).map(|media| media.kind()) {
        Some(MediaKind::Video) => Span::styled("▶ video", Style::default().fg(COLOR_SUCCESS)),
        Some(MediaKind::Image) => Span::styled("▣ image", Style::default().fg(COLOR_ACCENT)),
        None => Span::styled("≡ text", Style::default().fg(COLOR_TEXT_SECONDARY)),
    }
}

fn build_card(item: &Item, width: usize) -> Card {
    let platform = item.platform_or(GRID_PLATFORM_FALLBACK);
    let badge = media_badge(item);
    let badge_width = badge.content.chars().count() + 1;
    let mut lines = vec![Line::from(vec![
        badge,
        Span::raw(" "),
        Span::styled(
            truncate_to_width(platform, width.saturating_sub(badge_width)),
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .add_modifier(Modifier::ITALIC),
        ),
    ])];

    lines.extend(wrap_clamped(
        item.title_or(TITLE_FALLBACK),
        width,
        TITLE_LINES,
        Style::default()
            .fg(COLOR_TEXT_PRIMARY)
            .add_modifier(Modifier::BOLD),
    ));

    let summary = item.summary_text();
    if !summary.is_empty() {
        lines.push(Line::from(Span::styled(
            truncate_to_width(summary, width),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));
    }

    let tags = item
        .tag_list()
        .into_iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>()
        .join(" ");
    if !tags.is_empty() {
        lines.push(Line::from(Span::styled(
            truncate_to_width(&tags, width),
            Style::default().fg(COLOR_ACCENT),
        )));
    }

    lines.truncate(CARD_BODY_LINES);
    Card { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn item(title: &str, path: Option<&str>) -> Item {
        Item {
            title: Some(title.to_string()),
            file_path: path.map(str::to_string),
            ..Item::default()
        }
    }

    fn batch(count: usize) -> Vec<Item> {
        (0..count)
            .map(|i| item(&format!("item {i}"), Some("/db/All Files/a.mp4")))
            .collect()
    }

    fn line_text(line: &Line<'_>) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    #[test]
    fn append_renders_only_the_delta() {
        let mut grid = GridView::new();
        let mut collection = ItemCollection::new();
        collection.replace(batch(3));
        assert_eq!(grid.sync(&collection), 3);
        collection.append(batch(2));
        assert_eq!(grid.sync(&collection), 2);
        assert_eq!(grid.sync(&collection), 0);
    }

    #[test]
    fn replace_rebuilds_and_resets_selection() {
        let mut grid = GridView::new();
        let mut collection = ItemCollection::new();
        collection.replace(batch(6));
        grid.sync(&collection);
        grid.select(4, collection.len());
        collection.replace(batch(1));
        assert_eq!(grid.sync(&collection), 1);
        assert_eq!(grid.selected(), 0);
    }

    #[test]
    fn card_defaults_and_badges() {
        let card = build_card(&Item::default(), 30);
        assert_eq!(line_text(&card.lines[0]), "≡ text Unknown");
        assert_eq!(line_text(&card.lines[1]), "Untitled");

        let card = build_card(
            &Item {
                platform: Some("TikTok".into()),
                tags: Some("quick, easy".into()),
                ..item("Pasta", Some("/x/All Files/p.MOV"))
            },
            30,
        );
        assert_eq!(line_text(&card.lines[0]), "▶ video TikTok");
        assert_eq!(line_text(card.lines.last().unwrap()), "#quick #easy");

        let card = build_card(&item("Pic", Some("/x/All Files/p.png")), 30);
        assert!(line_text(&card.lines[0]).starts_with("▣ image"));
    }

    #[test]
    fn selection_moves_by_rows_and_clamps() {
        let mut grid = GridView::new();
        grid.relayout(Rect::new(0, 0, 90, 21));
        assert_eq!(grid.columns(), 3);
        assert!(grid.move_selection(0, 1, 10));
        assert_eq!(grid.selected(), 3);
        assert!(grid.move_selection(1, 0, 10));
        assert_eq!(grid.selected(), 4);
        assert!(grid.move_selection(0, 5, 10));
        assert_eq!(grid.selected(), 9);
        assert!(!grid.move_selection(1, 0, 10));
    }

    #[test]
    fn near_bottom_tracks_viewport() {
        let mut grid = GridView::new();
        grid.relayout(Rect::new(0, 0, 30, 14));
        // 1 column, 2 visible rows, 10 rows total.
        assert!(!grid.near_bottom(10, 2));
        grid.select(7, 10);
        assert!(grid.near_bottom(10, 2));
        assert!(!grid.near_bottom(0, 2));
    }

    #[test]
    fn hit_test_maps_cells_to_cards() {
        let mut grid = GridView::new();
        grid.relayout(Rect::new(0, 1, 60, 14));
        assert_eq!(grid.card_at(0, 1, 10), Some(0));
        assert_eq!(grid.card_at(31, 1, 10), Some(1));
        assert_eq!(grid.card_at(5, 9, 10), Some(2));
        assert_eq!(grid.card_at(5, 0, 10), None);
        assert_eq!(grid.card_at(31, 9, 3), None);
    }

    #[test]
    fn empty_collection_shows_empty_state() {
        let backend = TestBackend::new(60, 10);
        let mut terminal = Terminal::new(backend).unwrap();
        let mut grid = GridView::new();
        let collection = ItemCollection::new();
        terminal
            .draw(|frame| {
                let area = frame.size();
                grid.draw(frame, area, &collection, GridStatus::Ready)
            })
            .unwrap();
        let buffer = terminal.backend().buffer().clone();
        let first_row: String = (0..60)
            .map(|x| buffer.get(x, 0).symbol().to_string())
            .collect();
        assert!(first_row.starts_with(EMPTY_MESSAGE));
    }
}
