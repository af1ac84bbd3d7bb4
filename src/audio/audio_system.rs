//! The AudioSystem that owns the microphone capture thread.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks. Playback lives in
//! [`AlsaSink`](super::alsa_sink::AlsaSink), driven by the playback queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use anyhow::Result;

use super::alsa_device::PcmDevice;
use super::pcm_reader::PcmFormat;

/// Audio system configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// PCM layout used for both the microphone uplink and TTS playback
    pub format: PcmFormat,
    /// Duration of one uplink frame in ms (e.g. 60)
    pub capture_frame_ms: u32,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub playback_period_size: usize,
    /// Sleep between polls when a playing relay stream is momentarily empty
    pub underrun_backoff_ms: u64,
}

impl AudioConfig {
    /// Interleaved samples in one uplink frame.
    pub fn capture_frame_samples(&self) -> usize {
        (self.format.sample_rate * self.capture_frame_ms / 1000) as usize
            * self.format.channels as usize
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            format: PcmFormat::SPEECH_16K_MONO,
            capture_frame_ms: 60,
            playback_period_size: 1024,
            underrun_backoff_ms: 5,
        }
    }
}

/// Runs microphone capture on a dedicated OS thread.
///
/// Recording thread: ALSA capture → fixed-duration S16LE frames → `pcm_tx`
pub struct AudioSystem {
    running: Arc<AtomicBool>,
    record_handle: Option<JoinHandle<()>>,
}

impl AudioSystem {
    /// Start capturing. Frames are delivered on `pcm_tx` as little-endian bytes.
    pub fn start(config: AudioConfig, pcm_tx: mpsc::Sender<Vec<u8>>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));

        log::info!(
            "AudioSystem starting, capture: \"{}\", playback: \"{}\", format: {}",
            config.capture_device,
            config.playback_device,
            config.format,
        );

        let record_handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || {
                    if let Err(e) = record_thread(&config, pcm_tx, &running) {
                        log::error!("Recording thread error: {}", e);
                    }
                })?
        };

        Ok(Self {
            running,
            record_handle: Some(record_handle),
        })
    }

    /// Signal the capture thread to stop and wait for it to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.record_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_thread(
    config: &AudioConfig,
    pcm_tx: mpsc::Sender<Vec<u8>>,
    running: &AtomicBool,
) -> Result<()> {
    let device = PcmDevice::open_capture(
        &config.capture_device,
        config.format.sample_rate,
        config.format.channels as u32,
    )?;
    let channels = device.params().channels as usize;
    let period_size = device.params().period_size;

    let frame_samples = config.capture_frame_samples().max(channels);
    let mut accum_buf: Vec<i16> = Vec::with_capacity(frame_samples * 2);
    let mut read_buf = vec![0i16; period_size * channels];

    log::info!(
        "Recording started: period={}, frame_samples={}",
        period_size,
        frame_samples,
    );

    while running.load(Ordering::Relaxed) {
        let frames = device.read_interleaved(&mut read_buf)?;
        accum_buf.extend_from_slice(&read_buf[..frames * channels]);

        while accum_buf.len() >= frame_samples {
            let frame = encode_frame(&accum_buf[..frame_samples]);
            accum_buf.drain(..frame_samples);
            if pcm_tx.blocking_send(frame).is_err() {
                log::warn!("Failed to send capture frame, receiver dropped");
                return Ok(());
            }
        }
    }

    log::info!("Recording stopped");
    Ok(())
}

/// Serialize interleaved samples as S16LE bytes for the uplink.
fn encode_frame(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_frame_samples_follow_format() {
        let config = AudioConfig::default();
        // 16 kHz mono, 60 ms
        assert_eq!(config.capture_frame_samples(), 960);

        let stereo = AudioConfig {
            format: PcmFormat {
                channels: 2,
                ..PcmFormat::SPEECH_16K_MONO
            },
            capture_frame_ms: 20,
            ..AudioConfig::default()
        };
        assert_eq!(stereo.capture_frame_samples(), 640);
    }

    #[test]
    fn encode_frame_is_little_endian() {
        assert_eq!(encode_frame(&[0x0102, -1]), vec![0x02, 0x01, 0xff, 0xff]);
    }
}
