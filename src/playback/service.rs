//! Task that owns the [`PlaybackQueue`].
//!
//! Enqueue and stop requests arrive on the command channel, sink completions
//! on the completion channel; the single `run` loop applies them one at a
//! time, so no transition ever races another.

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::producer::{spawn_relay_producer, ChannelAudioSource};
use super::queue::{PlaybackEntry, PlaybackError, PlaybackQueue, Transition};
use crate::audio::{AudioSink, CompletionNotifier, PcmFormat, RelayStream, Ticket};

pub enum PlaybackCommand {
    Enqueue(PlaybackEntry),
    StopAll,
}

/// Notifications for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { ticket: Ticket, id: Option<String> },
    Rejected(PlaybackError),
    /// Nothing left to play.
    Idle,
}

/// Cheap cloneable front-end to the playback service.
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
    format: PcmFormat,
    chunk_size: usize,
}

impl PlaybackHandle {
    /// Queue an entry. Returns false if the service has shut down.
    pub fn enqueue(&self, entry: PlaybackEntry) -> bool {
        self.tx.send(PlaybackCommand::Enqueue(entry)).is_ok()
    }

    /// Discard all queued and playing audio.
    pub fn stop_all(&self) {
        if self.tx.send(PlaybackCommand::StopAll).is_err() {
            log::warn!("Stop requested but the playback service is gone");
        }
    }

    /// Relay one audio-bearing event: open a stream, start copying `source`
    /// into it on a producer thread, and queue it for playback.
    pub fn play_from<S: ChannelAudioSource>(
        &self,
        id: Option<String>,
        source: S,
    ) -> io::Result<Arc<RelayStream>> {
        let stream = Arc::new(RelayStream::new());
        let label = id.clone().unwrap_or_else(|| "<unknown>".to_string());
        spawn_relay_producer(source, stream.clone(), self.chunk_size, label)?;

        if !self.enqueue(PlaybackEntry::new(id, stream.clone(), self.format)) {
            stream.close();
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "playback service is gone",
            ));
        }
        Ok(stream)
    }
}

pub struct PlaybackService<S> {
    queue: PlaybackQueue<S>,
    cmd_rx: mpsc::UnboundedReceiver<PlaybackCommand>,
    completion_rx: mpsc::UnboundedReceiver<Ticket>,
    events_tx: mpsc::Sender<PlaybackEvent>,
}

impl<S: AudioSink + 'static> PlaybackService<S> {
    /// Build the sink with a completion notifier wired to this service and
    /// spawn the service loop on the current tokio runtime.
    pub fn spawn<F>(
        make_sink: F,
        format: PcmFormat,
        chunk_size: usize,
        events_tx: mpsc::Sender<PlaybackEvent>,
    ) -> anyhow::Result<(PlaybackHandle, JoinHandle<()>)>
    where
        F: FnOnce(CompletionNotifier) -> anyhow::Result<S>,
    {
        let (notifier, completion_rx) = CompletionNotifier::channel();
        let sink = make_sink(notifier)?;
        let (tx, cmd_rx) = mpsc::unbounded_channel();

        let service = Self {
            queue: PlaybackQueue::new(sink),
            cmd_rx,
            completion_rx,
            events_tx,
        };
        let task = tokio::spawn(service.run());

        Ok((
            PlaybackHandle {
                tx,
                format,
                chunk_size,
            },
            task,
        ))
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let transition = match cmd {
                        Some(PlaybackCommand::Enqueue(entry)) => self.queue.enqueue(entry),
                        Some(PlaybackCommand::StopAll) => self.queue.stop_all(),
                        None => break,
                    };
                    Self::publish(&self.events_tx, transition).await;
                }
                Some(ticket) = self.completion_rx.recv() => {
                    let transition = self.queue.on_sink_completed(ticket);
                    Self::publish(&self.events_tx, transition).await;
                }
            }
        }

        // Every handle is gone: release whatever is still queued.
        self.queue.stop_all();
        log::info!("Playback service stopped");
    }

    async fn publish(events_tx: &mpsc::Sender<PlaybackEvent>, transition: Transition) {
        let Transition {
            started,
            rejected,
            became_idle,
        } = transition;

        // 全部被拒绝时队列同样处于空闲，需要通知控制器
        let any_rejected = !rejected.is_empty();
        let mut events: Vec<PlaybackEvent> =
            rejected.into_iter().map(PlaybackEvent::Rejected).collect();
        if let Some((ticket, id)) = started {
            events.push(PlaybackEvent::Started { ticket, id });
        } else if became_idle || any_rejected {
            events.push(PlaybackEvent::Idle);
        }

        for event in events {
            if events_tx.send(event).await.is_err() {
                log::debug!("Playback event dropped, controller is gone");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::producer::frame_channel;
    use crate::playback::queue::tests::FakeSink;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        handle: PlaybackHandle,
        events: mpsc::Receiver<PlaybackEvent>,
        notifier: CompletionNotifier,
        task: JoinHandle<()>,
    }

    fn harness(sink: FakeSink) -> Harness {
        let (events_tx, events) = mpsc::channel(16);
        let mut slot = None;
        let (handle, task) = PlaybackService::spawn(
            |notifier| {
                slot = Some(notifier);
                Ok(sink)
            },
            PcmFormat::SPEECH_16K_MONO,
            800,
            events_tx,
        )
        .unwrap();
        Harness {
            handle,
            events,
            notifier: slot.unwrap(),
            task,
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<PlaybackEvent>) -> PlaybackEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for playback event")
            .expect("event channel closed")
    }

    fn entry(id: &str) -> (PlaybackEntry, Arc<RelayStream>) {
        let stream = Arc::new(RelayStream::new());
        let entry = PlaybackEntry::new(
            Some(id.to_string()),
            stream.clone(),
            PcmFormat::SPEECH_16K_MONO,
        );
        (entry, stream)
    }

    fn started(event: PlaybackEvent) -> (Ticket, String) {
        match event {
            PlaybackEvent::Started { ticket, id } => (ticket, id.unwrap_or_default()),
            other => panic!("expected Started, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn plays_entries_in_order_then_idles() {
        let mut h = harness(FakeSink::default());
        let (a, _) = entry("a");
        let (b, _) = entry("b");
        let (c, _) = entry("c");
        assert!(h.handle.enqueue(a));
        assert!(h.handle.enqueue(b));
        assert!(h.handle.enqueue(c));

        let (ta, id) = started(next_event(&mut h.events).await);
        assert_eq!(id, "a");
        h.notifier.notify(ta);
        let (tb, id) = started(next_event(&mut h.events).await);
        assert_eq!(id, "b");
        h.notifier.notify(tb);
        let (tc, id) = started(next_event(&mut h.events).await);
        assert_eq!(id, "c");
        h.notifier.notify(tc);
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::Idle);
    }

    #[tokio::test]
    async fn stop_all_wins_over_late_completion() {
        let mut h = harness(FakeSink::default());
        let (a, sa) = entry("a");
        let (b, sb) = entry("b");
        h.handle.enqueue(a);
        h.handle.enqueue(b);
        let (ta, _) = started(next_event(&mut h.events).await);

        h.handle.stop_all();
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::Idle);
        assert!(sa.is_closed() && sb.is_closed());

        // A completion already in flight for the stopped entry changes nothing.
        h.notifier.notify(ta);
        let (c, _) = entry("c");
        h.handle.enqueue(c);
        let (tc, id) = started(next_event(&mut h.events).await);
        assert_eq!(id, "c");
        assert_ne!(tc, ta);
    }

    #[tokio::test]
    async fn rejected_entry_is_reported_and_skipped() {
        let bad_format = PcmFormat {
            bits_per_sample: 24,
            ..PcmFormat::SPEECH_16K_MONO
        };
        let mut h = harness(FakeSink {
            reject: vec![bad_format],
            ..FakeSink::default()
        });

        let bad = PlaybackEntry::new(
            Some("bad".to_string()),
            Arc::new(RelayStream::new()),
            bad_format,
        );
        h.handle.enqueue(bad);
        match next_event(&mut h.events).await {
            PlaybackEvent::Rejected(PlaybackError::Bind { id, .. }) => assert_eq!(id, "bad"),
            other => panic!("expected Rejected, got {:?}", other),
        }
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::Idle);

        let (good, _) = entry("good");
        h.handle.enqueue(good);
        let (_, id) = started(next_event(&mut h.events).await);
        assert_eq!(id, "good");
    }

    #[tokio::test]
    async fn play_from_relays_channel_frames() {
        let mut h = harness(FakeSink::default());
        let (feeder, source) = frame_channel();
        let stream = h.handle.play_from(Some("tts-1".to_string()), source).unwrap();

        let (ticket, id) = started(next_event(&mut h.events).await);
        assert_eq!(id, "tts-1");

        feeder.push(Bytes::from_static(&[0, 1, 2, 3, 4, 5]));
        feeder.push(Bytes::from_static(&[6, 7, 8, 9]));
        drop(feeder);

        timeout(Duration::from_secs(2), async {
            while !stream.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let mut out = [0u8; 5];
        assert_eq!(stream.read(&mut out), 5);
        assert_eq!(stream.read(&mut out), 5);
        assert_eq!(stream.read(&mut out), 0);
        assert!(stream.is_drained());

        h.notifier.notify(ticket);
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::Idle);
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn service_exits_when_handles_are_dropped() {
        let Harness {
            handle,
            events: _events,
            notifier: _notifier,
            task,
        } = harness(FakeSink::default());
        drop(handle);
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
