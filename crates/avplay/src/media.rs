//! Symphonia-backed demuxer and audio codecs.
//!
//! [`SymphoniaBackend`] is both the source opener and the codec factory: opening a
//! file records each track's codec parameters so the engine can later open a codec
//! from nothing but a [`StreamInfo`].

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use avsync::{
    AudioBuffer, Codec, CodecError, CodecFactory, Frame, FramePayload, Interrupt, MediaSource,
    MediaType, Packet, PacketFlags, Rational, ReadError, ReceiveStatus, SeekTarget, SendStatus,
    SourceOpener, StreamInfo,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

#[derive(Clone)]
struct TrackParams {
    track_id: u32,
    params: CodecParameters,
}

/// Opens local files with Symphonia and decodes their audio tracks.
#[derive(Clone, Default)]
pub struct SymphoniaBackend {
    tracks: Arc<Mutex<Vec<TrackParams>>>,
}

impl SourceOpener for SymphoniaBackend {
    fn open(&self, uri: &str, interrupt: Interrupt) -> Result<Box<dyn MediaSource>> {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .with_context(|| format!("probe {:?}", path))?;

        let format_name = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("unknown")
            .to_lowercase();
        let source = SymphoniaSource::new(probed.format, format_name, interrupt);
        *self.tracks.lock().unwrap_or_else(|e| e.into_inner()) = source.track_params.clone();
        Ok(Box::new(source))
    }
}

impl CodecFactory for SymphoniaBackend {
    fn open(&self, stream: &StreamInfo) -> Result<Box<dyn Codec>> {
        let track = self
            .tracks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(stream.index)
            .cloned()
            .ok_or_else(|| anyhow!("no codec parameters for stream {}", stream.index))?;
        let decoder = symphonia::default::get_codecs()
            .make(&track.params, &DecoderOptions::default())
            .with_context(|| format!("open {} decoder", stream.codec_name))?;
        Ok(Box::new(SymphoniaCodec {
            track_id: track.track_id,
            decoder,
            pending: VecDeque::new(),
            draining: false,
        }))
    }
}

struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    format_name: String,
    interrupt: Interrupt,
    streams: Vec<StreamInfo>,
    track_params: Vec<TrackParams>,
    duration_us: Option<i64>,
}

impl SymphoniaSource {
    fn new(format: Box<dyn FormatReader>, format_name: String, interrupt: Interrupt) -> Self {
        let mut streams = Vec::new();
        let mut track_params = Vec::new();
        let mut duration_us = None;
        for track in format.tracks() {
            let params = &track.codec_params;
            let index = streams.len();
            let playable = params.codec != CODEC_TYPE_NULL && params.sample_rate.is_some();
            let sample_rate = params.sample_rate.unwrap_or(0);
            let time_base = time_base_of(params);
            if let (Some(frames), true) = (params.n_frames, sample_rate > 0) {
                let us = (frames as i64).saturating_mul(1_000_000) / i64::from(sample_rate);
                duration_us = Some(duration_us.map_or(us, |d: i64| d.max(us)));
            }
            streams.push(StreamInfo {
                index,
                media_type: playable.then_some(MediaType::Audio),
                time_base,
                start_time: Some(params.start_ts as i64),
                avg_frame_rate: Rational::new(0, 1),
                codec_name: codec_name_from_params(params).unwrap_or("unknown").to_string(),
                width: 0,
                height: 0,
                sample_rate,
                channels: params.channels.map_or(0, |c| c.count() as u16),
                attached_pic: None,
            });
            track_params.push(TrackParams {
                track_id: track.id,
                params: params.clone(),
            });
        }
        Self {
            format,
            format_name,
            interrupt,
            streams,
            track_params,
            duration_us,
        }
    }

    fn stream_of_track(&self, track_id: u32) -> Option<usize> {
        self.track_params.iter().position(|t| t.track_id == track_id)
    }
}

impl MediaSource for SymphoniaSource {
    fn format_name(&self) -> &str {
        &self.format_name
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Packet, ReadError> {
        loop {
            if self.interrupt.is_set() {
                return Err(ReadError::Exit);
            }
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(ReadError::Eof);
                }
                Err(e) => return Err(ReadError::Io(e.into())),
            };
            let Some(stream_index) = self.stream_of_track(packet.track_id()) else {
                continue;
            };
            let ts = packet.ts() as i64;
            return Ok(Packet {
                stream_index,
                pts: Some(ts),
                dts: Some(ts),
                duration: packet.dur() as i64,
                pos: -1,
                flags: PacketFlags {
                    key: true,
                    discontinuity: false,
                },
                data: Arc::from(packet.buf()),
            });
        }
    }

    fn seek(&mut self, target: SeekTarget) -> Result<()> {
        if target.by_bytes {
            bail!("byte seeking is not supported");
        }
        let us = target.target.max(0) as u64;
        let time = Time::new(us / 1_000_000, (us % 1_000_000) as f64 / 1_000_000.0);
        let seeked = self
            .format
            .seek(SeekMode::Coarse, SeekTo::Time { time, track_id: None })
            .context("seek")?;
        tracing::debug!(target_us = target.target, actual_ts = seeked.actual_ts, "source seeked");
        Ok(())
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }
}

/// One decoded frame per packet; a null packet switches to draining.
struct SymphoniaCodec {
    track_id: u32,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    pending: VecDeque<Frame>,
    draining: bool,
}

impl Codec for SymphoniaCodec {
    fn send(&mut self, packet: &Packet) -> SendStatus {
        if packet.is_null() {
            self.draining = true;
            return SendStatus::Accepted;
        }
        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let sym = symphonia::core::formats::Packet::new_from_slice(
            self.track_id,
            ts,
            packet.duration.max(0) as u64,
            &packet.data,
        );
        let decoded = match self.decoder.decode(&sym) {
            Ok(d) => d,
            Err(e) => return SendStatus::Error(codec_error(&e)),
        };
        let spec = *decoded.spec();
        let mut samples = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        samples.copy_interleaved_ref(decoded);
        self.pending.push_back(Frame {
            pts: packet.pts,
            pkt_dts: packet.dts,
            best_effort_timestamp: packet.pts,
            duration: packet.duration,
            pos: packet.pos,
            payload: FramePayload::Audio(AudioBuffer {
                sample_rate: spec.rate,
                channels: spec.channels.count() as u16,
                samples: Arc::from(samples.samples()),
            }),
        });
        SendStatus::Accepted
    }

    fn receive(&mut self) -> ReceiveStatus {
        match self.pending.pop_front() {
            Some(frame) => ReceiveStatus::Frame(frame),
            None if self.draining => {
                self.draining = false;
                ReceiveStatus::Eof
            }
            None => ReceiveStatus::Again,
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
        self.decoder.reset();
    }
}

fn codec_error(e: &SymphoniaError) -> CodecError {
    match e {
        SymphoniaError::DecodeError(_) => CodecError::InvalidData,
        SymphoniaError::Unsupported(_) => CodecError::Unsupported,
        _ => CodecError::Other(-1),
    }
}

fn time_base_of(params: &CodecParameters) -> Rational {
    match (params.time_base, params.sample_rate) {
        (Some(tb), _) => Rational::new(tb.numer as i32, tb.denom as i32),
        (None, Some(rate)) => Rational::new(1, rate as i32),
        (None, None) => Rational::new(1, 1_000_000),
    }
}

/// Best-effort codec label for logs and stream info.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "flac",
        CODEC_TYPE_MP3 => "mp3",
        CODEC_TYPE_AAC => "aac",
        CODEC_TYPE_ALAC => "alac",
        CODEC_TYPE_VORBIS => "vorbis",
        CODEC_TYPE_OPUS => "opus",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "pcm_s16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "pcm_s24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "pcm_s32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "pcm_f32",
        _ => return None,
    };
    Some(name)
}
