//! Speaker output through cpal.
//!
//! A cpal `Stream` is not `Send`, so each render builds its stream on a
//! blocking worker thread and keeps it there until the buffer has drained.
//! `open` only verifies that an output device exists; `release` stops any
//! stream that is still running.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use diktant_core::error::DiktantError;
use tracing::{debug, info, warn};

use crate::decoder::PcmBuffer;
use crate::AudioOutput;

/// Extra time allowed past a buffer's duration before a render gives up.
const DRAIN_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Plays buffers on the host's default output device.
#[derive(Debug, Default)]
pub struct CpalAudioOutput {
    open: AtomicBool,
    stop: Arc<AtomicBool>,
}

impl CpalAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for CpalAudioOutput {
    fn open(&self) -> Result<(), DiktantError> {
        if self.open.load(Ordering::SeqCst) {
            return Ok(());
        }
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DiktantError::Audio("No default output device found".into()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!(device = %device_name, "Audio output opened");

        self.stop.store(false, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn render(&self, buffer: PcmBuffer) -> Result<(), DiktantError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DiktantError::Audio("Output context is not open".into()));
        }
        let stop = Arc::clone(&self.stop);
        tokio::task::spawn_blocking(move || play_blocking(buffer, stop))
            .await
            .map_err(|e| DiktantError::Audio(format!("Playback thread failed: {}", e)))?
    }

    fn release(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.stop.store(true, Ordering::SeqCst);
            info!("Audio output released");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

fn play_blocking(buffer: PcmBuffer, stop: Arc<AtomicBool>) -> Result<(), DiktantError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| DiktantError::Audio("No default output device found".into()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| DiktantError::Audio(format!("Failed to query output config: {}", e)))?;
    let config: cpal::StreamConfig = supported.config();
    let device_rate = config.sample_rate.0;
    let device_channels = config.channels as usize;

    let mono = resample_linear(buffer.samples(), buffer.sample_rate(), device_rate);
    let frames = mono.len();
    debug!(
        device_rate,
        device_channels,
        frames,
        "Rendering buffer on output device"
    );

    let samples = Arc::new(mono);
    let position = Arc::new(AtomicUsize::new(0));
    let callback_samples = Arc::clone(&samples);
    let callback_position = Arc::clone(&position);
    let error_flag = Arc::new(AtomicBool::new(false));
    let callback_error = Arc::clone(&error_flag);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = callback_position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(device_channels.max(1)) {
                    let sample = callback_samples.get(pos).copied().unwrap_or(0.0);
                    frame.iter_mut().for_each(|out| *out = sample);
                    pos += 1;
                }
                callback_position.store(pos, Ordering::Relaxed);
            },
            move |err| {
                tracing::error!("Audio output stream error: {}", err);
                callback_error.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| DiktantError::Audio(format!("Failed to build output stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| DiktantError::Audio(format!("Failed to start output stream: {}", e)))?;

    let deadline = Instant::now() + buffer.duration() + DRAIN_GRACE;
    loop {
        if position.load(Ordering::Relaxed) >= frames {
            break;
        }
        if stop.load(Ordering::SeqCst) {
            debug!("Output released mid-playback");
            break;
        }
        if error_flag.load(Ordering::Relaxed) {
            return Err(DiktantError::Audio("Output stream reported an error".into()));
        }
        if Instant::now() >= deadline {
            warn!(frames, "Output did not drain before deadline");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    Ok(())
}

/// Resample mono audio by linear interpolation.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / ratio).ceil() as usize;
    let last = input.len() - 1;
    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx0 = (src.floor() as usize).min(last);
            let idx1 = (idx0 + 1).min(last);
            let frac = (src - idx0 as f64) as f32;
            input[idx0] * (1.0 - frac) + input[idx1] * frac
        })
        .collect()
}
