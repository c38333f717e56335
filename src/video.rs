use std::fs;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use url::Url;

#[cfg(any(unix, target_os = "windows"))]
use rand::{distributions::Alphanumeric, Rng};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::feed::{Playback, PlaybackError};
use crate::media::MediaRef;

const CONNECT_RETRIES: usize = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub mpv_path: String,
    pub fullscreen: bool,
    pub base_url: Url,
}

#[derive(Debug, Clone, PartialEq)]
enum MpvCommand {
    LoadFile(String),
    SetPause(bool),
    Rewind,
    Quit,
}

fn command_payload(command: &MpvCommand) -> serde_json::Value {
    match command {
        MpvCommand::LoadFile(url) => json!(["loadfile", url, "replace"]),
        MpvCommand::SetPause(paused) => json!(["set_property", "pause", paused]),
        MpvCommand::Rewind => json!(["seek", 0, "absolute"]),
        MpvCommand::Quit => json!(["quit"]),
    }
}

/// Plays feed videos in one long-lived mpv window, switching files over IPC.
pub struct MpvPlayer {
    opts: PlayerOptions,
    child: Option<Child>,
    ipc_path: Option<String>,
    loaded: Option<MediaRef>,
}

impl MpvPlayer {
    pub fn new(opts: PlayerOptions) -> Self {
        Self {
            opts,
            child: None,
            ipc_path: None,
            loaded: None,
        }
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                tracing::info!(code = ?status.code(), "mpv: exited");
                self.reset();
                false
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "mpv: poll failed");
                self.reset();
                false
            }
            None => false,
        }
    }

    fn reset(&mut self) {
        self.child = None;
        self.loaded = None;
        if let Some(path) = self.ipc_path.take() {
            cleanup_ipc_path(&path);
        }
    }

    fn ensure_running(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let ipc_path =
            unique_ipc_path().ok_or_else(|| anyhow!("mpv IPC is not supported on this platform"))?;
        cleanup_ipc_path(&ipc_path);

        let mut args = vec![
            "--idle=yes".to_string(),
            "--force-window=yes".to_string(),
            "--keep-open=yes".to_string(),
            "--loop-file=inf".to_string(),
            "--really-quiet".to_string(),
            "--no-config".to_string(),
            "--ytdl=no".to_string(),
            "--pause=yes".to_string(),
            format!("--input-ipc-server={ipc_path}"),
        ];
        if self.opts.fullscreen {
            args.push("--fullscreen".to_string());
        }

        let child = Command::new(&self.opts.mpv_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("launch {}", self.opts.mpv_path))?;
        tracing::info!(pid = child.id(), ipc = %ipc_path, "mpv: started");
        self.child = Some(child);
        self.ipc_path = Some(ipc_path);
        Ok(())
    }

    fn send(&self, command: MpvCommand) -> Result<()> {
        let path = self
            .ipc_path
            .as_deref()
            .ok_or_else(|| anyhow!("mpv is not running"))?;
        let payload = json!({ "command": command_payload(&command) });
        let serialized = serde_json::to_string(&payload).context("serialize mpv command")?;
        tracing::trace!(command = %serialized, "mpv: ipc");
        send_ipc_command(path, &serialized)
    }

    fn load(&mut self, media: &MediaRef) -> Result<()> {
        self.ensure_running()?;
        let url = media
            .absolute_url(&self.opts.base_url)
            .with_context(|| format!("build media URL for {}", media.route()))?;
        self.send(MpvCommand::LoadFile(url.to_string()))?;
        self.send(MpvCommand::SetPause(true))?;
        self.loaded = Some(media.clone());
        Ok(())
    }

    fn is_loaded(&self, media: &MediaRef) -> bool {
        self.loaded.as_ref() == Some(media) && self.ipc_path.is_some()
    }
}

impl Playback for MpvPlayer {
    fn attach(&mut self, media: &MediaRef) -> Result<(), PlaybackError> {
        self.load(media)
            .map_err(|err| PlaybackError::Unavailable(format!("{err:#}")))
    }

    fn play(&mut self, media: &MediaRef) -> Result<(), PlaybackError> {
        let result = if self.is_running() && self.is_loaded(media) {
            Ok(())
        } else {
            self.load(media)
        };
        result
            .and_then(|()| self.send(MpvCommand::SetPause(false)))
            .map_err(|err| PlaybackError::Rejected {
                media: media.route(),
                reason: format!("{err:#}"),
            })
    }

    fn pause(&mut self, media: &MediaRef) {
        if !self.is_loaded(media) {
            return;
        }
        if let Err(err) = self.send(MpvCommand::SetPause(true)) {
            tracing::debug!(error = %err, "mpv: pause failed");
        }
    }

    fn rewind(&mut self, media: &MediaRef) {
        if !self.is_loaded(media) {
            return;
        }
        if let Err(err) = self.send(MpvCommand::Rewind) {
            tracing::debug!(error = %err, "mpv: rewind failed");
        }
    }
}

impl Drop for MpvPlayer {
    fn drop(&mut self) {
        if self.child.is_none() {
            return;
        }
        let _ = self.send(MpvCommand::Quit);
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.reset();
    }
}

/// Stand-in used when video playback is turned off; every video stays
/// paused.
#[derive(Debug, Default)]
pub struct DisabledPlayback;

impl Playback for DisabledPlayback {
    fn attach(&mut self, _media: &MediaRef) -> Result<(), PlaybackError> {
        Ok(())
    }

    fn play(&mut self, media: &MediaRef) -> Result<(), PlaybackError> {
        Err(PlaybackError::Unavailable(format!(
            "video playback disabled ({})",
            media.route()
        )))
    }

    fn pause(&mut self, _media: &MediaRef) {}

    fn rewind(&mut self, _media: &MediaRef) {}
}

#[cfg(unix)]
fn send_ipc_command(path: &str, serialized: &str) -> Result<()> {
    let mut attempt = 0;
    let mut stream = loop {
        match UnixStream::connect(path) {
            Ok(stream) => break stream,
            // The socket appears shortly after mpv starts.
            Err(_) if attempt + 1 < CONNECT_RETRIES => {
                attempt += 1;
                thread::sleep(CONNECT_RETRY_DELAY);
            }
            Err(err) => {
                return Err(anyhow!(err)).context(format!("connect to mpv IPC socket {path}"))
            }
        }
    };
    stream
        .write_all(serialized.as_bytes())
        .context("write mpv IPC command")?;
    stream
        .write_all(b"\n")
        .context("write mpv IPC command terminator")?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn send_ipc_command(path: &str, serialized: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::ErrorKind;

    for attempt in 0..CONNECT_RETRIES {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(mut pipe) => {
                pipe.write_all(serialized.as_bytes())
                    .with_context(|| format!("write mpv IPC command to {path}"))?;
                pipe.write_all(b"\n")
                    .with_context(|| format!("write mpv IPC command terminator to {path}"))?;
                pipe.flush().ok();
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::NotFound && attempt + 1 < CONNECT_RETRIES => {
                thread::sleep(CONNECT_RETRY_DELAY);
            }
            Err(err) => {
                return Err(anyhow!(err)).context(format!("connect to mpv IPC named pipe {path}"));
            }
        }
    }

    Err(anyhow!("connect to mpv IPC named pipe {}", path))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn send_ipc_command(_path: &str, _serialized: &str) -> Result<()> {
    Err(anyhow!("mpv IPC is not supported on this platform"))
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let mut path = std::env::temp_dir();
    path.push(format!("gallery-tui-mpv-{}-{suffix}.sock", std::process::id()));
    Some(path.to_string_lossy().to_string())
}

#[cfg(target_os = "windows")]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    Some(format!(
        r"\\.\pipe\gallery-tui-mpv-{}-{suffix}",
        std::process::id()
    ))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn unique_ipc_path() -> Option<String> {
    None
}

#[cfg(unix)]
fn cleanup_ipc_path(path: &str) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(error = %err, path, "mpv: failed to remove ipc socket");
        }
    }
}

#[cfg(not(unix))]
fn cleanup_ipc_path(_path: &str) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::media_ref;

    fn clip() -> MediaRef {
        media_ref("/db/All Files/clips/a.mp4").unwrap()
    }

    #[test]
    fn payloads_match_mpv_json_ipc() {
        assert_eq!(
            command_payload(&MpvCommand::LoadFile("http://h/media/a.mp4".into())),
            json!(["loadfile", "http://h/media/a.mp4", "replace"])
        );
        assert_eq!(
            command_payload(&MpvCommand::SetPause(false)),
            json!(["set_property", "pause", false])
        );
        assert_eq!(
            command_payload(&MpvCommand::Rewind),
            json!(["seek", 0, "absolute"])
        );
    }

    #[cfg(unix)]
    #[test]
    fn ipc_paths_are_unique() {
        let a = unique_ipc_path().unwrap();
        let b = unique_ipc_path().unwrap();
        assert_ne!(a, b);
        assert!(a.contains("gallery-tui-mpv-"));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let mut player = MpvPlayer::new(PlayerOptions {
            mpv_path: "/nonexistent/gallery-tui-mpv".into(),
            fullscreen: false,
            base_url: Url::parse("http://127.0.0.1:5001").unwrap(),
        });
        assert!(matches!(
            player.attach(&clip()),
            Err(PlaybackError::Unavailable(_))
        ));
        assert!(matches!(
            player.play(&clip()),
            Err(PlaybackError::Rejected { .. })
        ));
        player.pause(&clip());
        player.rewind(&clip());
    }

    #[test]
    fn disabled_playback_never_plays() {
        let mut playback = DisabledPlayback;
        assert!(playback.attach(&clip()).is_ok());
        assert!(playback.play(&clip()).is_err());
    }
}
