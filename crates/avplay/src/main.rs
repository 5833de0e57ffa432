//! avplay: a command-line player driving the `avsync` engine.
//!
//! Symphonia demuxes and decodes, CPAL plays the audio, and the engine's
//! notifications are logged (or printed as JSON lines with `--json`).

mod cli;
mod config;
mod device;
mod media;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use avsync::{Collaborators, Message, OverlayHandle, Picture, PixelFormat, Player, VideoSink};
use clap::Parser;
use crossbeam_channel::{bounded, select};
use tracing_subscriber::EnvFilter;

/// Status line period while playing.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Video output for an audio-only build: overlays are accepted and dropped.
struct NullVideoSink;

impl VideoSink for NullVideoSink {
    fn create_overlay(&self, width: u32, height: u32, _format: PixelFormat) -> Result<OverlayHandle> {
        tracing::debug!(width, height, "video overlay ignored");
        Ok(OverlayHandle(0))
    }

    fn fill_from_frame(&self, _overlay: OverlayHandle, _picture: &Picture) -> Result<()> {
        Ok(())
    }

    fn display(&self, _overlay: OverlayHandle) {}
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,avsync=info")),
        )
        .init();

    if args.list_devices {
        device::list_devices(&cpal::default_host())?;
        return Ok(());
    }

    match args.cmd {
        Some(cli::Command::Play {
            ref path,
            seek,
            accurate_seek,
            loop_count,
            rate,
            volume,
            json,
        }) => {
            let mut engine = config::load(args.config.as_deref())?;
            engine.accurate_seek |= accurate_seek;
            if let Some(ms) = seek {
                engine.seek_at_start_ms = ms;
            }
            if let Some(count) = loop_count {
                engine.loop_count = count;
            }
            if let Some(rate) = rate {
                engine.playback_rate = rate;
            }
            if let Some(volume) = volume {
                engine.volume = volume;
            }
            let uri = path
                .to_str()
                .ok_or_else(|| anyhow!("path is not valid UTF-8: {:?}", path))?;
            play(engine, uri, args.device.clone(), json)
        }
        None => Err(anyhow!("nothing to do; try `avplay play <file>` or `--list-devices`")),
    }
}

fn play(engine: avsync::EngineConfig, uri: &str, device: Option<String>, json: bool) -> Result<()> {
    let backend = media::SymphoniaBackend::default();
    let collab = Collaborators {
        opener: Arc::new(backend.clone()),
        codecs: Arc::new(backend),
        video_sink: Arc::new(NullVideoSink),
        audio_output: Arc::new(output::CpalOutput::new(device)),
        subtitle_sink: None,
    };
    let (mut player, messages) = Player::new(engine, collab);

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    player.prepare(uri)?;
    let mut failed = None;
    loop {
        select! {
            recv(messages.receiver()) -> msg => {
                let Ok(msg) = msg else { break };
                report(&msg, json)?;
                match msg {
                    Message::RequestStart => player.start(),
                    Message::Completed => break,
                    Message::Error { code } => {
                        failed = Some(code);
                        break;
                    }
                    _ => {}
                }
            }
            recv(stop_rx) -> _ => {
                tracing::info!("interrupted");
                break;
            }
            default(STATUS_INTERVAL) => {
                let status = player.status();
                tracing::info!(
                    position_ms = ?status.position_ms,
                    duration_ms = ?status.duration_ms,
                    audio_cached_ms = status.audio_cache.duration_ms,
                    buffering = status.buffering,
                    "status"
                );
            }
        }
    }

    player.stop();
    tracing::info!(end_reason = ?player.status().end_reason, "playback ended");
    match failed {
        Some(code) => Err(anyhow!("playback failed with engine error {code}")),
        None => Ok(()),
    }
}

fn report(msg: &Message, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(msg).context("encode message")?);
    } else {
        match msg {
            Message::BufferingUpdate { .. } => tracing::debug!(?msg, "engine"),
            Message::Error { .. } | Message::StreamFatal { .. } => tracing::warn!(?msg, "engine"),
            _ => tracing::info!(?msg, "engine"),
        }
    }
    Ok(())
}
