//! Presentation pacer: decides when the next picture is due, drops late ones, and
//! hands the current one to the video sink.
//!
//! The loop sleeps a freshly computed interval each iteration, never longer than
//! `refresh_rate`.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use avsync_types::{MediaType, Message, SyncType, warning_code};

use crate::audio_render::consume_audio_buffer;
use crate::clock::wall_time;
use crate::config::EngineConfig;
use crate::frame_queue::FrameMeta;
use crate::state::Shared;
use crate::subtitle_thread;

pub(crate) fn run(shared: Arc<Shared>) {
    tracing::debug!("refresh thread started");
    let mut remaining = 0.0;
    while !shared.is_aborted() {
        if remaining > 0.0 {
            thread::sleep(Duration::from_secs_f64(remaining));
        }
        remaining = shared.config.refresh_rate;
        let due = {
            let st = shared.play();
            !st.paused || st.step_on_seeking || shared.force_refresh.load(Ordering::Acquire)
        };
        if due {
            video_refresh(&shared, &mut remaining);
        }
    }
    tracing::debug!("refresh thread exited");
}

/// Nominal display time of `last`, from the gap to `next` when that gap is sane.
pub fn vp_duration(last: &FrameMeta, next: &FrameMeta, max_frame_duration: f64) -> f64 {
    if last.serial != next.serial {
        return 0.0;
    }
    match (last.pts, next.pts) {
        (Some(a), Some(b)) => {
            let gap = b - a;
            if !gap.is_finite() || gap <= 0.0 || gap > max_frame_duration {
                last.duration
            } else {
                gap
            }
        }
        _ => last.duration,
    }
}

/// Adjusts a frame delay by `diff` (video minus master clock, seconds).
pub fn target_delay(delay: f64, diff: Option<f64>, cfg: &EngineConfig) -> f64 {
    let sync_threshold = delay.min(cfg.sync_threshold_max).max(cfg.sync_threshold_min);
    match diff {
        Some(diff) if diff.is_finite() && diff.abs() < cfg.nosync_threshold => {
            if diff <= -sync_threshold {
                (delay + diff).max(0.0)
            } else if diff >= sync_threshold && delay > cfg.sync_framedup_threshold {
                delay + diff
            } else if diff >= sync_threshold {
                2.0 * delay
            } else {
                delay
            }
        }
        _ => delay,
    }
}

fn compute_target_delay(shared: &Shared, delay: f64) -> f64 {
    let rate = f64::from(shared.playback_rate());
    let rate_scaled = |delay: f64| if rate.abs() > 1e-5 { delay / rate } else { delay };
    let master = shared.master_sync_type();
    let diff = match master {
        SyncType::VideoMaster => return rate_scaled(delay),
        SyncType::AudioMaster
            if shared.eof.load(Ordering::Acquire)
                && shared.auddec.finished() == Some(shared.audioq.serial())
                && shared.sampq.nb_remaining() == 0 =>
        {
            // Audio is done; pace the remaining pictures on their own.
            return rate_scaled(delay);
        }
        master => match (shared.vidclk.get(), shared.clock(master).get()) {
            (Some(v), Some(m)) => Some(v - m),
            _ => None,
        },
    };
    let delay = target_delay(delay, diff, &shared.config);
    tracing::trace!(delay, ?diff, "target delay");
    delay
}

fn video_refresh(shared: &Shared, remaining: &mut f64) {
    let paused = shared.paused_flag.load(Ordering::Acquire);
    if !paused && shared.master_sync_type() == SyncType::External && shared.media().realtime {
        shared.check_external_clock_speed();
    }

    if shared.video_stream.is_open() {
        loop {
            if shared.pictq.nb_remaining() == 0 {
                on_picture_queue_empty(shared);
                break;
            }
            let (Some(last), Some(vp)) = (shared.pictq.peek_last(), shared.pictq.peek()) else {
                break;
            };
            if vp.meta.serial != shared.videoq.serial() {
                shared.pictq.next();
                continue;
            }

            let mut st = shared.play();
            if last.meta.serial != vp.meta.serial {
                st.frame_timer = wall_time();
            }
            if st.paused && !st.step_on_seeking {
                break;
            }

            // Right after a seek video may be decoded before audio has set the master
            // clock; hold the picture briefly instead of racing ahead.
            if !st.step_on_seeking
                && !st.step
                && shared.master_sync_type() == SyncType::AudioMaster
                && !shared.accurate.is_requested(MediaType::Audio)
                && shared.audio_stream.is_open()
                && shared.master_clock().is_none()
                && shared.auddec.finished() != Some(shared.audioq.serial())
                && vp.meta.pts.is_some_and(|p| p > 0.0)
                && shared.audioq.duration() > 1
            {
                drop(st);
                thread::sleep(Duration::from_millis(1));
                break;
            }

            let last_duration = vp_duration(&last.meta, &vp.meta, shared.media().max_frame_duration);
            let delay = compute_target_delay(shared, last_duration);

            let time = wall_time();
            if time < st.frame_timer {
                st.frame_timer = time;
            }
            if time < st.frame_timer + delay {
                *remaining = remaining.min(st.frame_timer + delay - time);
                break;
            }

            st.frame_timer += delay;
            if delay > 0.0 && time - st.frame_timer > shared.config.sync_threshold_max {
                st.frame_timer = time;
            }

            if let Some(pts) = vp.meta.pts {
                shared.vidclk.set(Some(pts), vp.meta.serial);
                shared
                    .extclk
                    .sync_to_slave(&shared.vidclk, shared.config.nosync_threshold);
                record_av_diff(shared);
            }

            if !st.step_on_seeking && shared.pictq.nb_remaining() > 1 {
                if let Some(next) = shared.pictq.peek_next() {
                    check_saltation(shared, vp.meta.pts, next.meta.pts);
                    let duration = vp_duration(&vp.meta, &next.meta, shared.media().max_frame_duration);
                    if !st.step && shared.config.framedrop > 0 && time > st.frame_timer + duration {
                        shared.stats.frame_drops_late.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(pts = ?vp.meta.pts, "video frame dropped late");
                        drop(st);
                        shared.pictq.next();
                        continue;
                    }
                }
            }

            shared.pictq.next();
            shared.force_refresh.store(true, Ordering::Release);

            if st.step {
                if shared.audio_stream.is_open() {
                    consume_audio_buffer(shared);
                }
                st.step = false;
                if !st.paused {
                    shared.stream_update_pause(&mut st);
                }
                shared.publish(&st);
            } else if st.step_on_seeking {
                st.step_on_seeking = false;
            }
            break;
        }

        if shared.force_refresh.load(Ordering::Acquire) && shared.pictq.rindex_shown() {
            video_display(shared);
        }
    }
    shared.force_refresh.store(false, Ordering::Release);
}

fn on_picture_queue_empty(shared: &Shared) {
    let drained = shared.viddec.finished() == Some(shared.videoq.serial());
    if drained
        && shared
            .milestones
            .after_seek_frame
            .swap(false, Ordering::AcqRel)
    {
        let elapsed_ms = shared.milestones.elapsed_since_seek_ms();
        shared.post(Message::AfterSeekFirstFrame { elapsed_ms });
    }
    if drained && shared.eof.load(Ordering::Acquire) {
        let mut st = shared.play();
        if st.step {
            st.step = false;
            if !st.paused {
                shared.stream_update_pause(&mut st);
            }
            shared.publish(&st);
        } else if st.step_on_seeking {
            st.step_on_seeking = false;
        }
    }
}

fn check_saltation(shared: &Shared, cur: Option<f64>, next: Option<f64>) {
    let (Some(cur), Some(next)) = (cur, next) else {
        return;
    };
    if cur <= 0.0 || next <= 0.0 {
        return;
    }
    let ratio = if next > cur { next / cur } else { cur / next };
    if ratio > shared.config.saltation_ratio {
        tracing::warn!(cur, next, "video timestamp jump");
        shared.post(Message::Warning {
            code: warning_code::TIMESTAMP_SALTATION,
            value: ratio as i64,
        });
    }
}

fn record_av_diff(shared: &Shared) {
    let diff = match shared.master_sync_type() {
        SyncType::VideoMaster => None,
        master => match (shared.vidclk.get(), shared.clock(master).get()) {
            (Some(v), Some(m)) => Some(v - m),
            _ => None,
        },
    };
    let us = diff.map_or(i64::MIN, |d| (d * 1_000_000.0) as i64);
    shared.stats.av_diff_us.store(us, Ordering::Relaxed);
}

fn video_display(shared: &Shared) {
    let Some(vp) = shared.pictq.peek_last() else {
        return;
    };
    let Some(overlay) = vp.payload.overlay else {
        return;
    };
    if shared.play().step_on_seeking {
        shared.collab.video_sink.show_subtitle(None);
    } else {
        subtitle_thread::show_at(shared, vp.meta.pts);
    }
    shared.collab.video_sink.display(overlay);
    shared.stats.frame_displayed();
    if !shared
        .milestones
        .first_video_frame_rendered
        .swap(true, Ordering::AcqRel)
    {
        tracing::info!(pts = ?vp.meta.pts, "first video frame rendered");
        shared.post(Message::VideoRenderingStart);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pts: Option<f64>, duration: f64, serial: u64) -> FrameMeta {
        FrameMeta {
            pts,
            duration,
            pos: -1,
            serial,
        }
    }

    #[test]
    fn duration_from_timestamp_gap() {
        let d = vp_duration(&meta(Some(1.0), 0.04, 1), &meta(Some(1.033), 0.04, 1), 10.0);
        assert!((d - 0.033).abs() < 1e-9);
    }

    #[test]
    fn duration_falls_back_on_bad_gap() {
        let cfg_max = 10.0;
        assert_eq!(vp_duration(&meta(Some(1.0), 0.04, 1), &meta(Some(0.5), 0.04, 1), cfg_max), 0.04);
        assert_eq!(vp_duration(&meta(Some(1.0), 0.04, 1), &meta(Some(30.0), 0.04, 1), cfg_max), 0.04);
        assert_eq!(vp_duration(&meta(None, 0.04, 1), &meta(Some(1.0), 0.04, 1), cfg_max), 0.04);
        assert_eq!(vp_duration(&meta(Some(1.0), 0.04, 1), &meta(Some(1.04), 0.04, 2), cfg_max), 0.0);
    }

    #[test]
    fn video_behind_catches_up() {
        let cfg = EngineConfig::default();
        assert_eq!(target_delay(0.04, Some(-0.5), &cfg), 0.0);
        assert!((target_delay(0.2, Some(-0.15), &cfg) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn video_ahead_waits() {
        let cfg = EngineConfig::default();
        // Short frames are doubled.
        assert!((target_delay(0.04, Some(0.2), &cfg) - 0.08).abs() < 1e-9);
        // Long frames are stretched by the full difference.
        assert!((target_delay(0.2, Some(0.3), &cfg) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn small_or_unrelated_differences_are_ignored() {
        let cfg = EngineConfig::default();
        assert_eq!(target_delay(0.04, Some(0.02), &cfg), 0.04);
        assert_eq!(target_delay(0.04, Some(500.0), &cfg), 0.04);
        assert_eq!(target_delay(0.04, None, &cfg), 0.04);
        assert_eq!(target_delay(0.04, Some(f64::NAN), &cfg), 0.04);
    }
}
