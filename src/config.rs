use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gallery::DEFAULT_BASE_URL;
use crate::pager::DEFAULT_PAGE_LIMIT;

const DEFAULT_ENV_PREFIX: &str = "GALLERY_TUI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: String::new(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryConfig {
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Rows left below the viewport that trigger the next page.
    #[serde(default = "default_preload_threshold")]
    pub preload_threshold: usize,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            preload_threshold: default_preload_threshold(),
        }
    }
}

fn default_page_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

fn default_preload_threshold() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_wheel_threshold")]
    pub wheel_threshold: f32,
    /// Synthetic delta reported for one terminal wheel notch.
    #[serde(default = "default_wheel_step")]
    pub wheel_step: f32,
    #[serde(default = "default_nav_cooldown", with = "humantime_serde")]
    pub nav_cooldown: Duration,
    #[serde(default = "default_scroll_duration", with = "humantime_serde")]
    pub scroll_duration: Duration,
    #[serde(default = "default_resync_debounce", with = "humantime_serde")]
    pub resync_debounce: Duration,
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Rows of drift still counted as "in view".
    #[serde(default = "default_current_tolerance")]
    pub current_tolerance: f32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            wheel_threshold: default_wheel_threshold(),
            wheel_step: default_wheel_step(),
            nav_cooldown: default_nav_cooldown(),
            scroll_duration: default_scroll_duration(),
            resync_debounce: default_resync_debounce(),
            settle_delay: default_settle_delay(),
            current_tolerance: default_current_tolerance(),
        }
    }
}

fn default_wheel_threshold() -> f32 {
    20.0
}

fn default_wheel_step() -> f32 {
    50.0
}

fn default_nav_cooldown() -> Duration {
    Duration::from_millis(800)
}

fn default_scroll_duration() -> Duration {
    Duration::from_millis(350)
}

fn default_resync_debounce() -> Duration {
    Duration::from_millis(100)
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_current_tolerance() -> f32 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_player_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mpv_path")]
    pub mpv_path: String,
    #[serde(default)]
    pub fullscreen: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            enabled: default_player_enabled(),
            mpv_path: default_mpv_path(),
            fullscreen: false,
        }
    }
}

fn default_player_enabled() -> bool {
    true
}

fn default_mpv_path() -> String {
    "mpv".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let path = options.config_file.or_else(default_config_path);
    let mut cfg = match path {
        Some(path) if path.exists() => read_config_file(&path)?,
        _ => Config::default(),
    };

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);
    clamp_nav_cooldown(&mut cfg.feed);
    Ok(cfg)
}

/// The navigation lock must outlast the scroll it guards.
fn clamp_nav_cooldown(feed: &mut FeedConfig) {
    if feed.nav_cooldown < feed.scroll_duration {
        tracing::warn!(
            nav_cooldown = ?feed.nav_cooldown,
            scroll_duration = ?feed.scroll_duration,
            "config: feed.nav_cooldown shorter than feed.scroll_duration, raising it"
        );
        feed.nav_cooldown = feed.scroll_duration;
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "server.base_url" => cfg.server.base_url = value,
        "server.user_agent" => cfg.server.user_agent = value,
        "server.timeout" => set_duration(&mut cfg.server.timeout, &value),
        "gallery.page_limit" => {
            if let Ok(parsed) = value.trim().parse::<u32>() {
                if parsed > 0 {
                    cfg.gallery.page_limit = parsed;
                }
            }
        }
        "gallery.preload_threshold" => {
            if let Ok(parsed) = value.trim().parse::<usize>() {
                cfg.gallery.preload_threshold = parsed;
            }
        }
        "feed.wheel_threshold" => set_f32(&mut cfg.feed.wheel_threshold, &value),
        "feed.wheel_step" => set_f32(&mut cfg.feed.wheel_step, &value),
        "feed.nav_cooldown" => set_duration(&mut cfg.feed.nav_cooldown, &value),
        "feed.scroll_duration" => set_duration(&mut cfg.feed.scroll_duration, &value),
        "feed.resync_debounce" => set_duration(&mut cfg.feed.resync_debounce, &value),
        "feed.settle_delay" => set_duration(&mut cfg.feed.settle_delay, &value),
        "feed.current_tolerance" => set_f32(&mut cfg.feed.current_tolerance, &value),
        "player.enabled" => cfg.player.enabled = truthy(&value),
        "player.mpv_path" => cfg.player.mpv_path = value,
        "player.fullscreen" => cfg.player.fullscreen = truthy(&value),
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

fn set_duration(slot: &mut Duration, value: &str) {
    if let Ok(duration) = humantime::parse_duration(value.trim()) {
        *slot = duration;
    }
}

fn set_f32(slot: &mut f32, value: &str) {
    if let Ok(parsed) = value.trim().parse::<f32>() {
        if parsed.is_finite() {
            *slot = parsed;
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gallery-tui").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(prefix: &str) -> LoadOptions {
        let dir = tempdir().unwrap();
        LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some(prefix.to_string()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(isolated("GALLERY_TUI_TEST_DEFAULTS")).unwrap();
        assert_eq!(cfg.server.base_url, "http://127.0.0.1:5001");
        assert_eq!(cfg.gallery.page_limit, 50);
        assert_eq!(cfg.feed.nav_cooldown, Duration::from_millis(800));
        assert_eq!(cfg.feed.wheel_threshold, 20.0);
        assert!(cfg.player.enabled);
    }

    #[test]
    fn file_values_keep_unset_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "server:\n  base_url: http://gallery.local:9000\nfeed:\n  nav_cooldown: 1s\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("GALLERY_TUI_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.server.base_url, "http://gallery.local:9000");
        assert_eq!(cfg.feed.nav_cooldown, Duration::from_secs(1));
        assert_eq!(cfg.feed.resync_debounce, Duration::from_millis(100));
        assert_eq!(cfg.server.timeout, Duration::from_secs(20));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "feed: [not, a, map]\n").unwrap();
        let err = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("GALLERY_TUI_TEST_BAD".into()),
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn env_overrides() {
        env::set_var("GALLERY_TUI_TEST_ENV_FEED__NAV_COOLDOWN", "250ms");
        env::set_var("GALLERY_TUI_TEST_ENV_PLAYER__ENABLED", "false");
        env::set_var("GALLERY_TUI_TEST_ENV_GALLERY__PAGE_LIMIT", "0");
        let cfg = load(isolated("GALLERY_TUI_TEST_ENV")).unwrap();
        assert_eq!(cfg.feed.nav_cooldown, Duration::from_millis(250));
        assert!(!cfg.player.enabled);
        assert_eq!(cfg.gallery.page_limit, 50);
        env::remove_var("GALLERY_TUI_TEST_ENV_FEED__NAV_COOLDOWN");
        env::remove_var("GALLERY_TUI_TEST_ENV_PLAYER__ENABLED");
        env::remove_var("GALLERY_TUI_TEST_ENV_GALLERY__PAGE_LIMIT");
    }

    #[test]
    fn nav_cooldown_never_shorter_than_scroll() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "feed:\n  nav_cooldown: 100ms\n  scroll_duration: 500ms\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("GALLERY_TUI_TEST_CLAMP".into()),
        })
        .unwrap();
        assert_eq!(cfg.feed.nav_cooldown, Duration::from_millis(500));

        env::set_var("GALLERY_TUI_TEST_CLAMP_ENV_FEED__NAV_COOLDOWN", "50ms");
        let cfg = load(isolated("GALLERY_TUI_TEST_CLAMP_ENV")).unwrap();
        assert_eq!(cfg.feed.nav_cooldown, Duration::from_millis(350));
        env::remove_var("GALLERY_TUI_TEST_CLAMP_ENV_FEED__NAV_COOLDOWN");
    }
}
