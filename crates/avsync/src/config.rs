use serde::Deserialize;

use avsync_types::SyncType;

/// Which timestamp a video frame takes its presentation time from.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReorderPolicy {
    /// Prefer the codec's best-effort estimate.
    #[default]
    Auto,
    /// Use the frame's own pts.
    Pts,
    /// Use the packet decode timestamp (reordering disabled).
    Dts,
}

/// Engine tuning parameters shared by the demux, decode, and presentation stages.
///
/// Every field has a default; a TOML file may override any subset of them.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Preferred master clock.
    pub sync: SyncType,
    /// Clock differences above this are treated as unrelated timelines (seconds).
    pub nosync_threshold: f64,
    /// Lower bound of the A/V correction threshold (seconds).
    pub sync_threshold_min: f64,
    /// Upper bound of the A/V correction threshold (seconds).
    pub sync_threshold_max: f64,
    /// Frames longer than this are doubled instead of stretched (seconds).
    pub sync_framedup_threshold: f64,
    /// Longest sleep of one refresh iteration (seconds).
    pub refresh_rate: f64,
    /// Longest plausible gap between two video frames (seconds).
    pub max_frame_duration: f64,
    /// Packet count above which a stream has enough queued.
    pub min_frames: usize,
    /// Packet count a stream must hold before buffering may end.
    pub min_min_frames: usize,
    /// Demux backpressure threshold in bytes, 0 to derive it from the bit rate.
    pub max_buffer_size: usize,
    /// Upper cap of the derived backpressure threshold in bytes.
    pub max_queue_size: usize,
    /// Cached bytes counting as a full buffer.
    pub high_water_mark_bytes: usize,
    /// Buffering target in milliseconds right after open or seek.
    pub first_high_water_mark_ms: i64,
    /// First escalation step of the buffering target.
    pub next_high_water_mark_ms: i64,
    /// Ceiling of the buffering target.
    pub last_high_water_mark_ms: i64,
    /// Stall playback on empty queues and report buffering progress.
    pub packet_buffering: bool,
    /// Ignore backpressure (live sources). `None` enables it for realtime sources.
    pub infinite_buffer: Option<bool>,
    /// Decode and discard up to the exact seek target.
    pub accurate_seek: bool,
    /// Largest distance from the target still counted as landed (milliseconds).
    pub max_deviation_ms: i64,
    /// Upper bound on the accurate seek protocol (milliseconds).
    pub accurate_seek_timeout_ms: i64,
    /// Hardware decode failures tolerated before the stream is closed.
    pub hw_retry_budget: u32,
    /// Copy hardware frames to system memory before queueing.
    pub copy_hw_frame: bool,
    pub picture_queue_size: usize,
    pub sample_queue_size: usize,
    pub subtitle_queue_size: usize,
    /// Queue packet count at or below which the external clock slows down.
    pub external_clock_min_frames: usize,
    /// Queue packet count above which the external clock speeds up.
    pub external_clock_max_frames: usize,
    pub external_clock_speed_min: f64,
    pub external_clock_speed_max: f64,
    pub external_clock_speed_step: f64,
    /// Period of buffering progress checks (milliseconds).
    pub buffering_check_ms: u64,
    /// Period of buffering checks before the first frame and after a seek (milliseconds).
    pub fast_buffering_check_ms: u64,
    /// Successive timestamp ratio that triggers a warning.
    pub saltation_ratio: f64,
    /// Drop late frames; also the limit of consecutive early drops. 0 disables.
    pub framedrop: u32,
    pub reorder: ReorderPolicy,
    /// Start playing as soon as the source is prepared.
    pub start_on_prepared: bool,
    /// Initial seek position in milliseconds, 0 to start at the beginning.
    pub seek_at_start_ms: i64,
    /// Play only this many milliseconds from the start position.
    pub play_duration_ms: Option<i64>,
    /// Times to play the source; 0 loops forever.
    pub loop_count: u32,
    /// Hold audio until the first video frame is decoded.
    pub sync_av_start: bool,
    pub audio_disable: bool,
    pub video_disable: bool,
    pub subtitle_disable: bool,
    /// Initial output gain in `0.0..=1.0`.
    pub volume: f32,
    /// Initial playback rate.
    pub playback_rate: f32,
}

impl Default for EngineConfig {
    /// Defaults tuned for local and network playback alike.
    fn default() -> Self {
        Self {
            sync: SyncType::AudioMaster,
            nosync_threshold: 100.0,
            sync_threshold_min: 0.04,
            sync_threshold_max: 0.1,
            sync_framedup_threshold: 0.15,
            refresh_rate: 0.01,
            max_frame_duration: 10.0,
            min_frames: 50_000,
            min_min_frames: 2,
            max_buffer_size: 0,
            max_queue_size: 50 * 1024 * 1024,
            high_water_mark_bytes: 256 * 1024,
            first_high_water_mark_ms: 100,
            next_high_water_mark_ms: 1000,
            last_high_water_mark_ms: 5000,
            packet_buffering: true,
            infinite_buffer: None,
            accurate_seek: false,
            max_deviation_ms: 1200,
            accurate_seek_timeout_ms: 5000,
            hw_retry_budget: 2,
            copy_hw_frame: false,
            picture_queue_size: 3,
            sample_queue_size: 9,
            subtitle_queue_size: 16,
            external_clock_min_frames: 2,
            external_clock_max_frames: 10,
            external_clock_speed_min: 0.900,
            external_clock_speed_max: 1.010,
            external_clock_speed_step: 0.001,
            buffering_check_ms: 500,
            fast_buffering_check_ms: 50,
            saltation_ratio: 1000.0,
            framedrop: 1,
            reorder: ReorderPolicy::Auto,
            start_on_prepared: true,
            seek_at_start_ms: 0,
            play_duration_ms: None,
            loop_count: 1,
            sync_av_start: true,
            audio_disable: false,
            video_disable: false,
            subtitle_disable: false,
            volume: 1.0,
            playback_rate: 1.0,
        }
    }
}

impl EngineConfig {
    /// Backpressure threshold for a source of `bit_rate` bits per second.
    pub fn effective_max_buffer_size(&self, bit_rate: u64) -> usize {
        if self.max_buffer_size > 0 {
            return self.max_buffer_size;
        }
        const MIB: usize = 1024 * 1024;
        let mbps = (bit_rate / 1_000_000) as usize;
        if bit_rate == 0 {
            return (15 * MIB).min(self.max_queue_size);
        }
        let derived = if mbps < 10 {
            15 * MIB + mbps * MIB
        } else {
            25 * MIB + (mbps / 10) * MIB
        };
        derived.min(self.max_queue_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            accurate_seek = true
            max_deviation_ms = 20
            sync = "video_master"
            reorder = "dts"
            "#,
        )
        .unwrap();
        assert!(cfg.accurate_seek);
        assert_eq!(cfg.max_deviation_ms, 20);
        assert_eq!(cfg.sync, SyncType::VideoMaster);
        assert_eq!(cfg.reorder, ReorderPolicy::Dts);
        assert_eq!(cfg.picture_queue_size, 3);
        assert_eq!(cfg.last_high_water_mark_ms, 5000);
    }

    #[test]
    fn explicit_max_buffer_size_wins() {
        let cfg = EngineConfig {
            max_buffer_size: 2 * 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(cfg.effective_max_buffer_size(50_000_000), 2 * 1024 * 1024);
    }

    #[test]
    fn derived_max_buffer_size_is_capped() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.effective_max_buffer_size(0), 15 * 1024 * 1024);
        assert_eq!(cfg.effective_max_buffer_size(4_000_000), 19 * 1024 * 1024);
        assert_eq!(cfg.effective_max_buffer_size(200_000_000), 45 * 1024 * 1024);
        assert_eq!(cfg.effective_max_buffer_size(1_000_000_000), 50 * 1024 * 1024);
    }
}
