use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, Rng};

use crate::config;
use crate::data::{ChatService, GalleryService, HttpChatService, HttpGalleryService};
use crate::feed::{FeedTiming, FeedViewer, Playback, Proximity};
use crate::filters::{FilterStore, StateStore};
use crate::gallery;
use crate::input::InputNormalizer;
use crate::logging;
use crate::storage;
use crate::ui;
use crate::video::{DisabledPlayback, MpvPlayer, PlayerOptions};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Discard persisted filters before the first load.
    pub fresh: bool,
    /// Overrides `server.base_url` from config.
    pub server: Option<String>,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let mut cfg = config::load(config::LoadOptions::default()).context("load config")?;
    if let Some(server) = opts.server {
        cfg.server.base_url = server;
    }
    let config_path = config::default_path();
    let display_path = friendly_path(config_path.as_ref());

    if let Err(err) = logging::init(None) {
        eprintln!("warning: logging disabled: {err:#}");
    }
    tracing::info!(base_url = %cfg.server.base_url, fresh = opts.fresh, "app: starting");

    let client = Arc::new(
        gallery::Client::new(gallery::ClientConfig {
            base_url: cfg.server.base_url.clone(),
            user_agent: cfg.server.user_agent.clone(),
            timeout: Some(cfg.server.timeout),
            http_client: None,
        })
        .with_context(|| format!("create gallery client for {}", cfg.server.base_url))?,
    );
    let base_url = client.base_url().clone();

    let state: Arc<dyn StateStore> = match storage::Store::open(storage::Options {
        path: cfg.storage.path.clone(),
    }) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(error = %err, "app: storage unavailable, filters will not persist");
            Arc::new(storage::MemoryState::default())
        }
    };
    let filters = FilterStore::restore(state, opts.fresh);

    let playback: Box<dyn Playback> = if cfg.player.enabled {
        Box::new(MpvPlayer::new(PlayerOptions {
            mpv_path: cfg.player.mpv_path.clone(),
            fullscreen: cfg.player.fullscreen,
            base_url: base_url.clone(),
        }))
    } else {
        Box::new(DisabledPlayback)
    };
    let feed = FeedViewer::new(
        playback,
        Box::new(Proximity {
            tolerance: cfg.feed.current_tolerance,
        }),
        FeedTiming {
            scroll_duration: cfg.feed.scroll_duration,
            resync_debounce: cfg.feed.resync_debounce,
            settle_delay: cfg.feed.settle_delay,
        },
    );
    let input = InputNormalizer::new(cfg.feed.wheel_threshold, cfg.feed.nav_cooldown);

    let gallery_service: Arc<dyn GalleryService> =
        Arc::new(HttpGalleryService::new(client.clone()));
    let chat_service: Arc<dyn ChatService> = Arc::new(HttpChatService::new(client));

    let session_id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    let mut model = ui::Model::new(ui::Options {
        status_message: format!("Connecting to {}…", base_url),
        gallery_service,
        chat_service,
        filters,
        feed,
        input,
        page_limit: cfg.gallery.page_limit,
        preload_threshold: cfg.gallery.preload_threshold,
        wheel_step: cfg.feed.wheel_step,
        base_url,
        session_id,
        config_path: display_path,
    });
    let result = model.run();
    tracing::info!("app: exiting");
    result
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/gallery-tui/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_path_falls_back_without_path() {
        assert_eq!(friendly_path(None), "~/.config/gallery-tui/config.yaml");
    }

    #[test]
    fn friendly_path_keeps_paths_outside_home() {
        let path = PathBuf::from("/etc/gallery-tui/config.yaml");
        if dirs::home_dir().map_or(true, |home| !path.starts_with(home)) {
            assert_eq!(friendly_path(Some(&path)), "/etc/gallery-tui/config.yaml");
        }
    }
}
