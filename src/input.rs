use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

pub const DEFAULT_WHEEL_THRESHOLD: f32 = 20.0;
pub const DEFAULT_NAV_COOLDOWN: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    Advance,
    Retreat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    Navigate(NavAction),
    Close,
    TogglePlayback,
    OpenExternal,
}

/// Blocks wheel navigation until the scroll it triggered has finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigationLock {
    held: bool,
    expires_at: Option<Instant>,
}

impl NavigationLock {
    pub fn is_held(&self, now: Instant) -> bool {
        self.held && self.expires_at.map_or(true, |at| now < at)
    }

    pub fn engage(&mut self, now: Instant, cooldown: Duration) {
        self.held = true;
        self.expires_at = Some(now + cooldown);
    }

    /// Releases the lock once its expiry has passed. Returns true on release.
    pub fn release_expired(&mut self, now: Instant) -> bool {
        if self.held && !self.is_held(now) {
            self.held = false;
            self.expires_at = None;
            return true;
        }
        false
    }

    pub fn expires_at(&self) -> Option<Instant> {
        if self.held {
            self.expires_at
        } else {
            None
        }
    }
}

/// Turns raw wheel deltas and key presses into discrete feed commands.
#[derive(Debug, Clone)]
pub struct InputNormalizer {
    threshold: f32,
    cooldown: Duration,
    lock: NavigationLock,
}

impl Default for InputNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_WHEEL_THRESHOLD, DEFAULT_NAV_COOLDOWN)
    }
}

impl InputNormalizer {
    pub fn new(threshold: f32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.abs(),
            cooldown,
            lock: NavigationLock::default(),
        }
    }

    pub fn lock(&self) -> &NavigationLock {
        &self.lock
    }

    /// Positive deltas scroll toward later items. Small deltas (trackpad
    /// jitter) and everything arriving while the lock is held are dropped.
    pub fn wheel(&mut self, delta_y: f32, now: Instant) -> Option<NavAction> {
        self.lock.release_expired(now);
        if self.lock.is_held(now) {
            return None;
        }
        if delta_y.abs() <= self.threshold {
            return None;
        }
        self.lock.engage(now, self.cooldown);
        let action = if delta_y > 0.0 {
            NavAction::Advance
        } else {
            NavAction::Retreat
        };
        tracing::trace!(delta_y, ?action, "input: wheel navigation");
        Some(action)
    }

    pub fn key(&self, key: KeyEvent) -> Option<FeedCommand> {
        if key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) {
            return None;
        }
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => Some(FeedCommand::Navigate(NavAction::Advance)),
            KeyCode::Up | KeyCode::Char('k') => Some(FeedCommand::Navigate(NavAction::Retreat)),
            KeyCode::Esc | KeyCode::Char('q') => Some(FeedCommand::Close),
            KeyCode::Char(' ') => Some(FeedCommand::TogglePlayback),
            KeyCode::Char('o') => Some(FeedCommand::OpenExternal),
            _ => None,
        }
    }

    pub fn tick(&mut self, now: Instant) {
        self.lock.release_expired(now);
    }
}

/// Trailing-edge debounce: only the last poke inside the quiet window fires.
#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    window: Duration,
    pending: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn poke(&mut self, now: Instant) {
        self.pending = Some(now + self.window);
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    pub fn take_ready(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(at) if now >= at => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}
