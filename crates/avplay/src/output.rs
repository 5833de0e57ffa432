//! CPAL audio output.
//!
//! CPAL streams are not `Send` on every host, so each opened stream lives on its own
//! thread and is driven through a command channel. The callback pulls `f32` from the
//! engine's [`AudioRenderer`] and converts to the device sample format.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use avsync::{AudioOutput, AudioParams, AudioRenderer};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::device;

enum Command {
    Pause(bool),
    Close,
}

struct Running {
    tx: Sender<Command>,
    handle: JoinHandle<()>,
}

pub struct CpalOutput {
    device_name: Option<String>,
    running: Mutex<Option<Running>>,
    /// Device buffer latency in microseconds.
    latency_us: AtomicU32,
}

impl CpalOutput {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            running: Mutex::new(None),
            latency_us: AtomicU32::new(0),
        }
    }
}

impl AudioOutput for CpalOutput {
    fn open(&self, wanted: AudioParams, renderer: AudioRenderer) -> Result<AudioParams> {
        self.close();
        let (tx, rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let device_name = self.device_name.clone();
        let handle = thread::Builder::new()
            .name("cpal-output".into())
            .spawn(move || run_stream(device_name, wanted, renderer, rx, ready_tx))
            .context("spawn audio output thread")?;

        let opened = ready_rx
            .recv()
            .map_err(|_| anyhow!("audio output thread exited"))
            .and_then(|r| r);
        match opened {
            Ok((obtained, latency_us)) => {
                self.latency_us.store(latency_us, Ordering::Relaxed);
                *self.running.lock().unwrap_or_else(|e| e.into_inner()) = Some(Running { tx, handle });
                Ok(obtained)
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn pause(&self, paused: bool) {
        if let Some(r) = self.running.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = r.tx.send(Command::Pause(paused));
        }
    }

    fn close(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(r) = running {
            let _ = r.tx.send(Command::Close);
            if r.handle.join().is_err() {
                tracing::warn!("audio output thread panicked");
            }
        }
    }

    fn latency(&self) -> f64 {
        f64::from(self.latency_us.load(Ordering::Relaxed)) / 1_000_000.0
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

type Ready = Result<(AudioParams, u32)>;

fn run_stream(
    device_name: Option<String>,
    wanted: AudioParams,
    renderer: AudioRenderer,
    rx: Receiver<Command>,
    ready: Sender<Ready>,
) {
    let stream = match build(device_name.as_deref(), wanted, renderer) {
        Ok((stream, obtained, latency_us)) => {
            let _ = ready.send(Ok((obtained, latency_us)));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Pause(true) => {
                if let Err(e) = stream.pause() {
                    tracing::warn!("pause output stream: {e}");
                }
            }
            Command::Pause(false) => {
                if let Err(e) = stream.play() {
                    tracing::warn!("resume output stream: {e}");
                }
            }
            Command::Close => break,
        }
    }
    tracing::debug!("audio output closed");
}

fn build(
    device_name: Option<&str>,
    wanted: AudioParams,
    renderer: AudioRenderer,
) -> Result<(cpal::Stream, AudioParams, u32)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let supported = device::pick_output_config(&device, wanted.sample_rate, wanted.channels)?;
    let mut config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        config.buffer_size = buf;
    }
    let obtained = AudioParams {
        sample_rate: config.sample_rate,
        channels: config.channels,
    };
    let latency_us = match config.buffer_size {
        cpal::BufferSize::Fixed(frames) if obtained.sample_rate > 0 => {
            (u64::from(frames) * 1_000_000 / u64::from(obtained.sample_rate)) as u32
        }
        _ => 0,
    };
    tracing::info!(
        device = %device.description()?,
        rate_hz = obtained.sample_rate,
        channels = obtained.channels,
        buffer_size = ?config.buffer_size,
        "audio output opened"
    );

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, renderer),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, renderer),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, renderer),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, renderer),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;
    Ok((stream, obtained, latency_us))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: AudioRenderer,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let err_fn = |err| tracing::warn!("stream error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let buf = &mut scratch[..data.len()];
            renderer.render(buf);
            for (out, s) in data.iter_mut().zip(buf.iter()) {
                *out = <T as cpal::Sample>::from_sample::<f32>(*s);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
