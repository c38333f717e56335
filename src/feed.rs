use std::collections::HashSet;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::gallery::Item;
use crate::input::{Debounce, NavAction};
use crate::media::{item_media, MediaRef};

pub const FEED_PLATFORM_FALLBACK: &str = "Knowledge";
pub const TITLE_FALLBACK: &str = "Untitled";

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback rejected for {media}: {reason}")]
    Rejected { media: String, reason: String },
    #[error("playback unavailable: {0}")]
    Unavailable(String),
}

/// Media playback backend driven by the feed viewer.
///
/// Every call names the media it concerns. Implementations must treat
/// pause/rewind of media that is not loaded as a no-op.
pub trait Playback {
    fn attach(&mut self, media: &MediaRef) -> Result<(), PlaybackError>;
    fn play(&mut self, media: &MediaRef) -> Result<(), PlaybackError>;
    fn pause(&mut self, media: &MediaRef);
    fn rewind(&mut self, media: &MediaRef);
}

impl<P: Playback + ?Sized> Playback for Box<P> {
    fn attach(&mut self, media: &MediaRef) -> Result<(), PlaybackError> {
        (**self).attach(media)
    }

    fn play(&mut self, media: &MediaRef) -> Result<(), PlaybackError> {
        (**self).play(media)
    }

    fn pause(&mut self, media: &MediaRef) {
        (**self).pause(media)
    }

    fn rewind(&mut self, media: &MediaRef) {
        (**self).rewind(media)
    }
}

/// Decides whether a unit whose top edge sits at `unit_top` counts as the
/// one in view. Both values are in viewport rows.
pub trait CurrentPolicy: Send {
    fn is_current(&self, unit_top: f32, viewport_top: f32) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct Proximity {
    pub tolerance: f32,
}

impl Default for Proximity {
    fn default() -> Self {
        Self { tolerance: 2.0 }
    }
}

impl CurrentPolicy for Proximity {
    fn is_current(&self, unit_top: f32, viewport_top: f32) -> bool {
        (unit_top - viewport_top).abs() < self.tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedTiming {
    pub scroll_duration: Duration,
    pub resync_debounce: Duration,
    pub settle_delay: Duration,
}

impl Default for FeedTiming {
    fn default() -> Self {
        Self {
            scroll_duration: Duration::from_millis(350),
            resync_debounce: Duration::from_millis(100),
            settle_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedUnit {
    pub index: usize,
    pub item: Item,
    pub media: Option<MediaRef>,
}

impl FeedUnit {
    fn new(index: usize, item: Item) -> Self {
        let media = item_media(&item);
        Self { index, item, media }
    }

    pub fn title(&self) -> &str {
        self.item.title_or(TITLE_FALLBACK)
    }

    pub fn platform(&self) -> &str {
        self.item.platform_or(FEED_PLATFORM_FALLBACK)
    }

    pub fn summary(&self) -> &str {
        self.item.summary_text()
    }

    pub fn tag_chips(&self) -> Vec<String> {
        self.item
            .tag_list()
            .into_iter()
            .map(|tag| format!("#{tag}"))
            .collect()
    }

    fn video(&self) -> Option<&MediaRef> {
        self.media.as_ref().filter(|media| media.is_video())
    }
}

#[derive(Debug, Clone)]
pub struct ViewerSession {
    pub units: Vec<FeedUnit>,
    /// Initial scroll target. The unit actually in view is tracked by the
    /// viewer.
    pub current_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScrollAnimation {
    from: f32,
    to: f32,
    started: Instant,
    duration: Duration,
}

impl ScrollAnimation {
    fn position(&self, now: Instant) -> f32 {
        let progress = self.progress(now);
        let eased = if progress < 0.5 {
            4.0 * progress * progress * progress
        } else {
            1.0 - (-2.0 * progress + 2.0).powi(3) / 2.0
        };
        self.from + (self.to - self.from) * eased
    }

    fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    fn finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Closed,
    /// Open, waiting for the first layout pass to report a viewport.
    AwaitLayout,
    /// Layout known, waiting for geometry to stabilize before the jump.
    AwaitGeometry {
        ready_at: Instant,
    },
    Settled,
}

/// Full-screen, one-item-at-a-time viewer with single-video playback.
pub struct FeedViewer<P: Playback> {
    playback: P,
    policy: Box<dyn CurrentPolicy>,
    timing: FeedTiming,
    session: Option<ViewerSession>,
    attached: HashSet<MediaRef>,
    current: Option<usize>,
    playing: Option<usize>,
    viewport_height: u16,
    offset: f32,
    animation: Option<ScrollAnimation>,
    settle: Settle,
    resync: Debounce,
}

impl<P: Playback> FeedViewer<P> {
    pub fn new(playback: P, policy: Box<dyn CurrentPolicy>, timing: FeedTiming) -> Self {
        Self {
            playback,
            policy,
            timing,
            session: None,
            attached: HashSet::new(),
            current: None,
            playing: None,
            viewport_height: 0,
            offset: 0.0,
            animation: None,
            settle: Settle::Closed,
            resync: Debounce::new(timing.resync_debounce),
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.settle == Settle::Settled
    }

    pub fn session(&self) -> Option<&ViewerSession> {
        self.session.as_ref()
    }

    pub fn playback(&self) -> &P {
        &self.playback
    }

    pub fn len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.units.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unit chosen by the last resync.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn playing_index(&self) -> Option<usize> {
        self.playing
    }

    pub fn current_unit(&self) -> Option<&FeedUnit> {
        let index = self.current?;
        self.session.as_ref()?.units.get(index)
    }

    /// Unit nearest the viewport top right now, even mid-scroll.
    pub fn nearest_index(&self) -> Option<usize> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        let height = self.height();
        if height <= 0.0 {
            return self.session.as_ref().map(|s| s.current_index);
        }
        Some(((self.offset / height).round().max(0.0) as usize).min(len - 1))
    }

    pub fn is_attached(&self, media: &MediaRef) -> bool {
        self.attached.contains(media)
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Earliest instant at which `tick` has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let settle = match self.settle {
            Settle::AwaitGeometry { ready_at } => Some(ready_at),
            _ => None,
        };
        [settle, self.resync.deadline()].into_iter().flatten().min()
    }

    /// Returns false, leaving the viewer closed, when there is nothing to show.
    pub fn open(&mut self, items: Vec<Item>, start_index: usize, now: Instant) -> bool {
        if self.is_open() {
            self.close();
        }
        if items.is_empty() {
            tracing::debug!("feed: nothing to open");
            return false;
        }
        let current_index = start_index.min(items.len() - 1);
        let units = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| FeedUnit::new(index, item))
            .collect::<Vec<_>>();
        tracing::debug!(units = units.len(), start = current_index, "feed: open");
        self.session = Some(ViewerSession {
            units,
            current_index,
        });
        self.current = None;
        self.playing = None;
        self.offset = 0.0;
        self.animation = None;
        self.resync.cancel();
        self.settle = Settle::AwaitLayout;
        if self.viewport_height > 0 {
            self.settle = Settle::AwaitGeometry {
                ready_at: now + self.timing.settle_delay,
            };
        }
        true
    }

    /// Pauses playback and drops the session. Attached sources are kept.
    pub fn close(&mut self) {
        if self.session.is_none() {
            return;
        }
        if let Some(media) = self.playing.and_then(|index| self.video_at(index)) {
            self.playback.pause(&media);
        }
        tracing::debug!("feed: close");
        self.session = None;
        self.current = None;
        self.playing = None;
        self.animation = None;
        self.offset = 0.0;
        self.resync.cancel();
        self.settle = Settle::Closed;
    }

    /// Reports the viewport height after a layout pass.
    pub fn set_viewport(&mut self, height: u16, now: Instant) {
        if height == 0 {
            return;
        }
        let previous = self.viewport_height;
        self.viewport_height = height;
        match self.settle {
            Settle::Closed => {}
            Settle::AwaitLayout => {
                self.settle = Settle::AwaitGeometry {
                    ready_at: now + self.timing.settle_delay,
                };
            }
            Settle::AwaitGeometry { .. } => {}
            Settle::Settled if previous != height && previous > 0 => {
                let target = self
                    .animation
                    .map(|anim| anim.to)
                    .unwrap_or(self.offset);
                let unit = (target / f32::from(previous)).round();
                self.animation = None;
                self.offset = unit * f32::from(height);
                self.resync.poke(now);
            }
            Settle::Settled => {}
        }
    }

    /// Advances settle, animation and the resync debounce. Returns true when
    /// the view changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if let Settle::AwaitGeometry { ready_at } = self.settle {
            if now >= ready_at {
                let start = self.session.as_ref().map_or(0, |s| s.current_index);
                self.offset = start as f32 * self.height();
                self.settle = Settle::Settled;
                self.resync.poke(now);
                changed = true;
            }
        }
        if let Some(anim) = self.animation {
            self.offset = anim.position(now);
            if anim.finished(now) {
                self.offset = anim.to;
                self.animation = None;
            }
            self.resync.poke(now);
            changed = true;
        }
        if self.resync.take_ready(now) {
            self.resync();
            changed = true;
        }
        changed
    }

    pub fn navigate(&mut self, action: NavAction, now: Instant) -> bool {
        match action {
            NavAction::Advance => self.advance(now),
            NavAction::Retreat => self.retreat(now),
        }
    }

    pub fn advance(&mut self, now: Instant) -> bool {
        self.scroll_by(1.0, now)
    }

    pub fn retreat(&mut self, now: Instant) -> bool {
        self.scroll_by(-1.0, now)
    }

    fn scroll_by(&mut self, units: f32, now: Instant) -> bool {
        if !self.is_settled() || self.is_empty() {
            return false;
        }
        let height = self.height();
        let max = (self.len() - 1) as f32 * height;
        let base = self.animation.map(|anim| anim.to).unwrap_or(self.offset);
        let target = (base + units * height).clamp(0.0, max);
        if (target - base).abs() < f32::EPSILON {
            return false;
        }
        self.animation = Some(ScrollAnimation {
            from: self.offset,
            to: target,
            started: now,
            duration: self.timing.scroll_duration,
        });
        self.resync.poke(now);
        true
    }

    /// Re-evaluates which unit is current and enforces single playback.
    pub fn resync(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let height = self.height();
        let viewport_top = self.offset;
        let current = session
            .units
            .iter()
            .map(|unit| (unit.index, unit.index as f32 * height))
            .filter(|(_, top)| self.policy.is_current(*top, viewport_top))
            .min_by(|a, b| {
                (a.1 - viewport_top)
                    .abs()
                    .total_cmp(&(b.1 - viewport_top).abs())
            })
            .map(|(index, _)| index);
        let current_media = current.and_then(|index| self.video_at(index));

        if self.playing.is_some() && self.playing != current {
            self.playing = None;
        }
        for unit in &session.units {
            if Some(unit.index) == current {
                continue;
            }
            let Some(media) = unit.video() else {
                continue;
            };
            if !self.attached.contains(media) || current_media.as_ref() == Some(media) {
                continue;
            }
            self.playback.pause(media);
            self.playback.rewind(media);
        }

        self.current = current;
        tracing::trace!(?current, offset = viewport_top, "feed: resync");
        if let Some(index) = current {
            if self.playing != Some(index) {
                self.start(index);
            }
        }
    }

    /// Pauses the current video if it is playing, otherwise plays it.
    pub fn toggle_current(&mut self) {
        let Some(index) = self.current else {
            return;
        };
        if self.playing == Some(index) {
            if let Some(media) = self.video_at(index) {
                self.playback.pause(&media);
            }
            self.playing = None;
        } else {
            self.start(index);
        }
    }

    fn start(&mut self, index: usize) {
        let Some(media) = self.video_at(index) else {
            return;
        };
        if !self.attached.contains(&media) {
            if let Err(err) = self.playback.attach(&media) {
                tracing::warn!(error = %err, media = %media, "feed: attach failed");
                return;
            }
            self.attached.insert(media.clone());
        }
        match self.playback.play(&media) {
            Ok(()) => self.playing = Some(index),
            Err(err) => {
                tracing::warn!(error = %err, media = %media, "feed: auto-play blocked");
            }
        }
    }

    /// Units intersecting the viewport, with their top row relative to it
    /// (negative when partially scrolled off the top).
    pub fn visible_units(&self) -> Vec<(&FeedUnit, i32)> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let height = self.height();
        if height <= 0.0 {
            return Vec::new();
        }
        session
            .units
            .iter()
            .filter_map(|unit| {
                let top = unit.index as f32 * height - self.offset;
                if top + height <= 0.0 || top >= height {
                    return None;
                }
                Some((unit, top.round() as i32))
            })
            .collect()
    }

    fn video_at(&self, index: usize) -> Option<MediaRef> {
        self.session
            .as_ref()?
            .units
            .get(index)?
            .video()
            .cloned()
    }

    fn height(&self) -> f32 {
        f32::from(self.viewport_height)
    }
}
