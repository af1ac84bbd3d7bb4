//! [`AudioSink`] backed by an ALSA playback device.
//!
//! Rendering happens on a dedicated `audio-play` OS thread, not a tokio task,
//! so the device clock never waits on the async runtime. The thread pulls
//! frames from the bound [`PcmReader`], backs off briefly when the relay is
//! momentarily empty, and reports completion once the reader is finished and
//! the device has drained.

use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

use super::alsa_device::PcmDevice;
use super::audio_system::AudioConfig;
use super::pcm_reader::{PcmFormat, PcmRead, PcmReader};
use super::sink::{AudioSink, CompletionNotifier, SinkError, Ticket};

enum RenderCommand {
    Play(Ticket, PcmReader),
    Stop,
    Shutdown,
}

pub struct AlsaSink {
    format: PcmFormat,
    cmd_tx: std_mpsc::Sender<RenderCommand>,
    bound: Option<(Ticket, PcmReader)>,
    attached: Option<Ticket>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaSink {
    /// Spawn the render thread. The device is opened on that thread.
    pub fn start(config: &AudioConfig, completions: CompletionNotifier) -> Result<Self> {
        config
            .format
            .validate()
            .map_err(|reason| anyhow::anyhow!("Invalid playback format: {}", reason))?;

        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let handle = {
            let config = config.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = render_thread(&config, cmd_rx, completions) {
                        log::error!("Playback thread error: {}", e);
                    }
                })?
        };

        Ok(Self {
            format: config.format,
            cmd_tx,
            bound: None,
            attached: None,
            handle: Some(handle),
        })
    }

    fn send(&self, cmd: RenderCommand) -> Result<(), SinkError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| SinkError::Device("playback thread has exited".to_string()))
    }
}

impl AudioSink for AlsaSink {
    fn bind(&mut self, ticket: Ticket, reader: PcmReader) -> Result<(), SinkError> {
        if let Some(current) = self.attached {
            return Err(SinkError::Busy(current));
        }
        let format = reader.format();
        if let Err(reason) = format.validate() {
            return Err(SinkError::UnsupportedFormat { format, reason });
        }
        // No resampling: the source must match what the device was opened with.
        if format != self.format {
            return Err(SinkError::UnsupportedFormat {
                format,
                reason: format!("device renders {}", self.format),
            });
        }
        self.attached = Some(ticket);
        self.bound = Some((ticket, reader));
        Ok(())
    }

    fn start(&mut self) -> Result<(), SinkError> {
        let (ticket, reader) = self.bound.take().ok_or(SinkError::NotBound)?;
        self.send(RenderCommand::Play(ticket, reader))
    }

    fn stop(&mut self) {
        self.bound = None;
        if self.attached.take().is_some() && self.send(RenderCommand::Stop).is_err() {
            log::warn!("Stop requested but the playback thread has exited");
        }
    }
}

impl Drop for AlsaSink {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(RenderCommand::Shutdown);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Output side of the render loop.
trait RenderDevice {
    fn channels(&self) -> usize;
    fn period_size(&self) -> usize;
    /// Returns the number of frames written.
    fn write(&mut self, samples: &[i16]) -> Result<usize>;
    /// Play out what is queued, then get ready for the next source.
    fn drain(&mut self) -> Result<()>;
    /// Discard what is queued.
    fn abort(&mut self) -> Result<()>;
}

impl RenderDevice for PcmDevice {
    fn channels(&self) -> usize {
        self.params().channels.max(1) as usize
    }

    fn period_size(&self) -> usize {
        self.params().period_size
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        self.write_interleaved(samples)
    }

    fn drain(&mut self) -> Result<()> {
        PcmDevice::drain(self)
    }

    fn abort(&mut self) -> Result<()> {
        PcmDevice::abort(self)
    }
}

fn render_thread(
    config: &AudioConfig,
    cmd_rx: std_mpsc::Receiver<RenderCommand>,
    completions: CompletionNotifier,
) -> Result<()> {
    let period_size = (config.playback_period_size > 0).then_some(config.playback_period_size);
    let mut device = PcmDevice::open_playback(
        &config.playback_device,
        config.format.sample_rate,
        config.format.channels as u32,
        period_size,
    )?;
    log::info!(
        "Playback started: format={}, period={}",
        config.format,
        device.params().period_size,
    );

    let backoff = Duration::from_millis(config.underrun_backoff_ms.max(1));
    render_loop(&mut device, &cmd_rx, &completions, backoff);

    log::info!("Playback stopped");
    Ok(())
}

/// Pull frames from the bound source into `device` until shutdown.
///
/// Completion is reported once per source, after it has drained. A source
/// removed by `Stop` is never reported.
fn render_loop<D: RenderDevice>(
    device: &mut D,
    cmd_rx: &std_mpsc::Receiver<RenderCommand>,
    completions: &CompletionNotifier,
    backoff: Duration,
) {
    let channels = device.channels();
    let mut buf = vec![0i16; device.period_size().max(1) * channels];
    let mut current: Option<(Ticket, PcmReader)> = None;

    loop {
        // Block while idle; only poll for commands while a source is playing.
        let cmd = if current.is_some() {
            match cmd_rx.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(std_mpsc::TryRecvError::Empty) => None,
                Err(std_mpsc::TryRecvError::Disconnected) => break,
            }
        } else {
            match cmd_rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        };

        match cmd {
            Some(RenderCommand::Play(ticket, reader)) => {
                log::debug!("Rendering source {}", ticket);
                current = Some((ticket, reader));
                continue;
            }
            Some(RenderCommand::Stop) => {
                if let Some((ticket, _)) = current.take() {
                    log::debug!("Stopped source {}", ticket);
                }
                if let Err(e) = device.abort() {
                    log::error!("Failed to reset playback device: {}", e);
                }
                continue;
            }
            Some(RenderCommand::Shutdown) => break,
            None => {}
        }

        let Some((ticket, reader)) = current.as_mut() else {
            continue;
        };
        match reader.read_frames(&mut buf) {
            PcmRead::Frames(frames) => {
                if let Err(e) = device.write(&buf[..frames * channels]) {
                    // Give up on this source; the queue moves on to the next one.
                    let ticket = *ticket;
                    current = None;
                    log::error!("Playback of source {} failed: {}", ticket, e);
                    if let Err(e) = device.abort() {
                        log::error!("Failed to reset playback device: {}", e);
                    }
                    completions.notify(ticket);
                }
            }
            PcmRead::Pending => thread::sleep(backoff),
            PcmRead::Finished => {
                let ticket = *ticket;
                let played = reader.stream().position();
                current = None;
                if let Err(e) = device.drain() {
                    log::error!("Failed to drain playback device: {}", e);
                }
                log::debug!("Source {} drained after {} bytes", ticket, played);
                completions.notify(ticket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RelayStream;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Records written samples and device calls.
    #[derive(Default, Clone)]
    struct FakeDevice {
        written: Arc<Mutex<Vec<i16>>>,
        drains: Arc<Mutex<u32>>,
        aborts: Arc<Mutex<u32>>,
        fail_writes: bool,
    }

    impl RenderDevice for FakeDevice {
        fn channels(&self) -> usize {
            1
        }

        fn period_size(&self) -> usize {
            4
        }

        fn write(&mut self, samples: &[i16]) -> Result<usize> {
            if self.fail_writes {
                anyhow::bail!("device unplugged");
            }
            self.written.lock().unwrap().extend_from_slice(samples);
            Ok(samples.len())
        }

        fn drain(&mut self) -> Result<()> {
            *self.drains.lock().unwrap() += 1;
            Ok(())
        }

        fn abort(&mut self) -> Result<()> {
            *self.aborts.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct Renderer {
        cmd_tx: std_mpsc::Sender<RenderCommand>,
        completions: UnboundedReceiver<Ticket>,
        handle: JoinHandle<()>,
    }

    fn spawn_renderer(device: FakeDevice) -> Renderer {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (notifier, completions) = CompletionNotifier::channel();
        let handle = thread::spawn(move || {
            let mut device = device;
            render_loop(&mut device, &cmd_rx, &notifier, Duration::from_millis(1));
        });
        Renderer {
            cmd_tx,
            completions,
            handle,
        }
    }

    impl Renderer {
        fn play(&self, ticket: Ticket, stream: &Arc<RelayStream>) {
            let reader = PcmReader::new(stream.clone(), PcmFormat::SPEECH_16K_MONO);
            self.cmd_tx.send(RenderCommand::Play(ticket, reader)).unwrap();
        }

        fn next_completion(&mut self) -> Ticket {
            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                if let Ok(ticket) = self.completions.try_recv() {
                    return ticket;
                }
                assert!(Instant::now() < deadline, "timed out waiting for completion");
                thread::sleep(Duration::from_millis(1));
            }
        }

        /// Stop the loop and return whatever completions were still queued.
        fn shutdown(mut self) -> Vec<Ticket> {
            self.cmd_tx.send(RenderCommand::Shutdown).unwrap();
            self.handle.join().unwrap();
            let mut rest = Vec::new();
            while let Ok(ticket) = self.completions.try_recv() {
                rest.push(ticket);
            }
            rest
        }
    }

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn finished_source_drains_then_notifies_once() {
        let device = FakeDevice::default();
        let mut renderer = spawn_renderer(device.clone());
        let stream = Arc::new(RelayStream::new());
        renderer.play(Ticket(7), &stream);

        // Nothing written yet: the loop keeps polling instead of finishing.
        thread::sleep(Duration::from_millis(20));
        assert!(renderer.completions.try_recv().is_err());

        stream.write(&le_bytes(&[1, 2, 3, 4, 5, 6]));
        stream.finish();

        assert_eq!(renderer.next_completion(), Ticket(7));
        assert_eq!(*device.written.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(*device.drains.lock().unwrap(), 1);
        assert!(renderer.shutdown().is_empty());
    }

    #[test]
    fn stop_discards_source_without_notifying() {
        let device = FakeDevice::default();
        let mut renderer = spawn_renderer(device.clone());

        let first = Arc::new(RelayStream::new());
        first.write(&le_bytes(&[10, 11]));
        renderer.play(Ticket(1), &first);
        wait_until(|| device.written.lock().unwrap().len() == 2);

        // The first source never finishes; only the stop can end it.
        renderer.cmd_tx.send(RenderCommand::Stop).unwrap();

        let second = Arc::new(RelayStream::new());
        second.write(&le_bytes(&[20]));
        second.finish();
        renderer.play(Ticket(2), &second);

        assert_eq!(renderer.next_completion(), Ticket(2));
        assert_eq!(*device.written.lock().unwrap(), vec![10, 11, 20]);
        assert_eq!(*device.aborts.lock().unwrap(), 1);
        assert!(renderer.shutdown().is_empty());
    }

    #[test]
    fn write_failure_abandons_source_and_notifies() {
        let device = FakeDevice {
            fail_writes: true,
            ..FakeDevice::default()
        };
        let mut renderer = spawn_renderer(device.clone());
        let stream = Arc::new(RelayStream::new());
        stream.write(&le_bytes(&[1, 2]));
        renderer.play(Ticket(3), &stream);

        assert_eq!(renderer.next_completion(), Ticket(3));
        assert_eq!(*device.aborts.lock().unwrap(), 1);
        assert_eq!(*device.drains.lock().unwrap(), 0);
        assert!(renderer.shutdown().is_empty());
    }
}
