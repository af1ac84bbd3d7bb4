//! Copy loop from a channel audio source into a relay stream.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::audio::RelayStream;

/// Pull-style audio delivered by the dialog channel for one utterance.
///
/// `read` may block until data arrives and returns `Ok(0)` once the source is
/// exhausted.
pub trait ChannelAudioSource: Send + 'static {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Pushes binary frames received from the net link into a [`FrameAudioSource`].
///
/// Dropping the feeder ends the source.
#[derive(Debug)]
pub struct FrameFeeder {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl FrameFeeder {
    /// Returns false once the reading side has gone away.
    pub fn push(&self, frame: Bytes) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Channel audio source fed frame-by-frame from the network.
#[derive(Debug)]
pub struct FrameAudioSource {
    rx: mpsc::UnboundedReceiver<Bytes>,
    pending: Bytes,
}

/// Create a connected feeder/source pair for one audio-bearing event.
pub fn frame_channel() -> (FrameFeeder, FrameAudioSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        FrameFeeder { tx },
        FrameAudioSource {
            rx,
            pending: Bytes::new(),
        },
    )
}

impl ChannelAudioSource for FrameAudioSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.rx.blocking_recv() {
                Some(frame) => self.pending = frame,
                None => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending = self.pending.slice(n..);
        Ok(n)
    }
}

/// Spawn the producer thread that copies `source` into `stream`.
///
/// The stream is always `finish`ed when the loop ends, including after a
/// source error, so whatever was copied can still be played out. The thread
/// returns the number of bytes relayed.
pub fn spawn_relay_producer<S: ChannelAudioSource>(
    mut source: S,
    stream: Arc<RelayStream>,
    chunk_size: usize,
    label: String,
) -> io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("relay-producer".into())
        .spawn(move || {
            let mut buf = vec![0u8; chunk_size.max(1)];
            let mut copied = 0u64;
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if stream.write(&buf[..n]) == 0 {
                            log::debug!("Relay for {} closed, stopping producer", label);
                            break;
                        }
                        copied += n as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!(
                            "Channel audio for {} failed after {} bytes: {}",
                            label,
                            copied,
                            e
                        );
                        break;
                    }
                }
            }
            stream.finish();
            log::debug!("Relayed {} bytes for {}", copied, label);
            copied
        })
}
