//! Ordered playback of relayed speech streams.
//!
//! [`PlaybackQueue`] is an explicit two-state machine (`Idle` / `Playing`)
//! over a FIFO of [`PlaybackEntry`]. Only the head is ever bound to the sink,
//! and the queue advances only when the sink reports the head's ticket as
//! completed. The queue itself is not synchronized: its owner (the playback
//! service task) is the single place every transition runs.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::audio::{AudioSink, PcmFormat, PcmReader, RelayStream, SinkError, Ticket};

const UNKNOWN_ID: &str = "<unknown>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// The sink refused the entry's audio; the entry was discarded.
    #[error("failed to start playback of {id}: {source}")]
    Bind {
        id: String,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing(Ticket),
}

/// One queued unit of speech audio.
pub struct PlaybackEntry {
    id: Option<String>,
    ticket: Ticket,
    stream: Arc<RelayStream>,
    reader: Option<PcmReader>,
}

impl PlaybackEntry {
    /// Wrap `stream` with a reader for `format`. `id` is only used in logs.
    pub fn new(id: Option<String>, stream: Arc<RelayStream>, format: PcmFormat) -> Self {
        let reader = PcmReader::new(stream.clone(), format);
        Self {
            id,
            ticket: Ticket(0),
            stream,
            reader: Some(reader),
        }
    }

    fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(UNKNOWN_ID)
    }

    fn close(&self) {
        let unplayed = self.stream.available();
        if unplayed > 0 || !self.stream.is_finished() {
            log::debug!(
                "Discarding {} with {} of {} bytes unplayed (producer finished: {})",
                self.label(),
                unplayed,
                self.stream.len(),
                self.stream.is_finished()
            );
        }
        self.stream.close();
    }
}

/// What changed as a result of one queue operation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Transition {
    /// Entry that began rendering, as `(ticket, id)`.
    pub started: Option<(Ticket, Option<String>)>,
    /// Entries discarded because the sink rejected them.
    pub rejected: Vec<PlaybackError>,
    /// The queue went from Playing to Idle.
    pub became_idle: bool,
}

pub struct PlaybackQueue<S> {
    entries: VecDeque<PlaybackEntry>,
    sink: S,
    state: PlaybackState,
    next_ticket: u64,
}

impl<S: AudioSink> PlaybackQueue<S> {
    pub fn new(sink: S) -> Self {
        Self {
            entries: VecDeque::new(),
            sink,
            state: PlaybackState::Idle,
            next_ticket: 1,
        }
    }

    fn is_idle(&self) -> bool {
        self.state == PlaybackState::Idle
    }

    /// Append `entry` at the tail; start it right away if nothing is playing.
    pub fn enqueue(&mut self, mut entry: PlaybackEntry) -> Transition {
        entry.ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        log::debug!(
            "Enqueued speech {} as {} ({} ahead)",
            entry.label(),
            entry.ticket,
            self.entries.len()
        );
        self.entries.push_back(entry);

        match self.state {
            PlaybackState::Idle => self.start_head(),
            PlaybackState::Playing(_) => Transition::default(),
        }
    }

    /// The sink finished rendering the source bound with `ticket`.
    ///
    /// Ignored unless `ticket` is the entry currently playing, so a completion
    /// that raced a [`stop_all`](Self::stop_all) or was delivered twice is a no-op.
    pub fn on_sink_completed(&mut self, ticket: Ticket) -> Transition {
        if self.state != PlaybackState::Playing(ticket) {
            log::debug!("Ignoring stale completion for {}", ticket);
            return Transition::default();
        }

        self.sink.stop();
        if let Some(done) = self.entries.pop_front() {
            log::info!("Finished speech {} ({})", done.label(), done.ticket);
            done.close();
        }
        self.start_head()
    }

    /// Stop the sink and discard every queued and playing entry.
    pub fn stop_all(&mut self) -> Transition {
        let was_playing = !self.is_idle();
        self.sink.stop();
        let dropped = self.entries.len();
        for entry in self.entries.drain(..) {
            entry.close();
        }
        self.state = PlaybackState::Idle;
        if dropped > 0 {
            log::info!("Stopped playback, discarded {} entries", dropped);
        }
        Transition {
            became_idle: was_playing,
            ..Transition::default()
        }
    }

    /// Bind and start the head, discarding entries the sink rejects.
    fn start_head(&mut self) -> Transition {
        let was_playing = !self.is_idle();
        let mut transition = Transition::default();

        while let Some(head) = self.entries.front_mut() {
            match Self::bind_and_start(&mut self.sink, head) {
                Ok(()) => {
                    self.state = PlaybackState::Playing(head.ticket);
                    log::info!("Playing speech {} ({})", head.label(), head.ticket);
                    transition.started = Some((head.ticket, head.id.clone()));
                    return transition;
                }
                Err(source) => {
                    self.sink.stop();
                    if let Some(bad) = self.entries.pop_front() {
                        bad.close();
                        log::warn!("Discarding speech {}: {}", bad.label(), source);
                        transition.rejected.push(PlaybackError::Bind {
                            id: bad.label().to_string(),
                            source,
                        });
                    }
                }
            }
        }

        self.state = PlaybackState::Idle;
        transition.became_idle = was_playing;
        transition
    }

    fn bind_and_start(sink: &mut S, entry: &mut PlaybackEntry) -> Result<(), SinkError> {
        let reader = entry.reader.take().ok_or(SinkError::NotBound)?;
        sink.bind(entry.ticket, reader)?;
        sink.start()
    }
}
