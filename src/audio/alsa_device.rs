//! ALSA PCM device wrappers for microphone capture and speech playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Consecutive failed writes tolerated before the rest of a buffer is dropped.
const MAX_WRITE_RECOVERIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// An opened S16LE interleaved PCM device.
pub struct PcmDevice {
    pcm: PCM,
    params: AlsaParams,
    name: String,
}

impl PcmDevice {
    /// Open a PCM device for capture (recording).
    pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<Self> {
        Self::open(device, Direction::Capture, sample_rate, channels, None)
    }

    /// Open a PCM device for playback. `period_size` of `None` lets ALSA decide.
    pub fn open_playback(
        device: &str,
        sample_rate: u32,
        channels: u32,
        period_size: Option<usize>,
    ) -> Result<Self> {
        Self::open(device, Direction::Playback, sample_rate, channels, period_size)
    }

    fn open(
        device: &str,
        direction: Direction,
        sample_rate: u32,
        channels: u32,
        period_size: Option<usize>,
    ) -> Result<Self> {
        let dir_name = match direction {
            Direction::Capture => "Capture",
            Direction::Playback => "Playback",
        };
        let pcm = PCM::new(device, direction, false)
            .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

        {
            let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
            hwp.set_access(Access::RWInterleaved)?;
            hwp.set_format(Format::S16LE)?;
            hwp.set_channels(channels)?;
            hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
            if let Some(ps) = period_size {
                hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
            }
            pcm.hw_params(&hwp)?;
        }

        let params = {
            let hwp = pcm.hw_params_current()?;
            AlsaParams {
                sample_rate: hwp.get_rate()?,
                channels: hwp.get_channels()?,
                period_size: hwp.get_period_size()? as usize,
            }
        };

        log::info!(
            "ALSA {}: device={}, rate={}, channels={}, period_size={}",
            dir_name,
            device,
            params.sample_rate,
            params.channels,
            params.period_size,
        );

        Ok(Self {
            pcm,
            params,
            name: device.to_string(),
        })
    }

    pub fn params(&self) -> &AlsaParams {
        &self.params
    }

    /// Read one period of interleaved samples, recovering from overruns.
    ///
    /// Returns the number of frames read (0 after a recovered overrun).
    pub fn read_interleaved(&self, buf: &mut [i16]) -> Result<usize> {
        let io = self.pcm.io_i16()?;
        match io.readi(buf) {
            Ok(frames) => Ok(frames),
            Err(e) => {
                log::warn!("ALSA capture error on {}: {}, recovering...", self.name, e);
                self.pcm
                    .prepare()
                    .with_context(|| format!("Failed to recover PCM capture on {}", self.name))?;
                Ok(0)
            }
        }
    }

    /// Write interleaved samples, retrying short writes and XRUNs.
    ///
    /// After [`MAX_WRITE_RECOVERIES`] consecutive failures the remaining frames
    /// are dropped. Returns the number of frames actually written.
    pub fn write_interleaved(&self, samples: &[i16]) -> Result<usize> {
        let channels = self.params.channels.max(1) as usize;
        let total_frames = samples.len() / channels;
        let io = self.pcm.io_i16()?;

        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&samples[offset..total_frames * channels]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error on {}: {}, recovering...", self.name, e);
                    retry_count += 1;
                    self.pcm
                        .prepare()
                        .with_context(|| format!("Failed to recover PCM playback on {}", self.name))?;

                    if retry_count >= MAX_WRITE_RECOVERIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(frames_written)
    }

    /// Let queued frames play out, then ready the device for the next source.
    pub fn drain(&self) -> Result<()> {
        if let Err(e) = self.pcm.drain() {
            log::warn!("ALSA drain on {} failed: {}", self.name, e);
        }
        self.pcm.prepare()?;
        Ok(())
    }

    /// Discard queued frames immediately and ready the device again.
    pub fn abort(&self) -> Result<()> {
        if let Err(e) = self.pcm.drop() {
            log::warn!("ALSA drop on {} failed: {}", self.name, e);
        }
        self.pcm.prepare()?;
        Ok(())
    }
}
