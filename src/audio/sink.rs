//! Audio sink abstraction used by the playback queue.
//!
//! A sink renders one [`PcmReader`] at a time. Completion is reported as a
//! message carrying the [`Ticket`] the source was bound with, so the owner of
//! the queue decides what to do with it on its own task.

use std::fmt;

use tokio::sync::mpsc;

use super::pcm_reader::{PcmFormat, PcmReader};

/// Identifies one bound source for completion matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("unsupported audio format {format}: {reason}")]
    UnsupportedFormat { format: PcmFormat, reason: String },

    #[error("sink already has source {0} attached")]
    Busy(Ticket),

    #[error("no source bound")]
    NotBound,

    #[error("audio device error: {0}")]
    Device(String),
}

/// Output device that renders one PCM source at a time.
pub trait AudioSink: Send {
    /// Attach `reader` as the next source to render.
    fn bind(&mut self, ticket: Ticket, reader: PcmReader) -> Result<(), SinkError>;

    /// Begin rendering the bound source.
    fn start(&mut self) -> Result<(), SinkError>;

    /// Stop rendering immediately and detach whatever is bound. Never fails.
    fn stop(&mut self);
}

/// Sending half handed to a sink so it can report a drained source.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    tx: mpsc::UnboundedSender<Ticket>,
}

impl CompletionNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Ticket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report that the source bound with `ticket` has been fully rendered.
    pub fn notify(&self, ticket: Ticket) {
        if self.tx.send(ticket).is_err() {
            log::debug!("Completion for {} dropped, playback service is gone", ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notifier_delivers_tickets_in_order() {
        let (notifier, mut rx) = CompletionNotifier::channel();
        let clone = notifier.clone();
        notifier.notify(Ticket(1));
        clone.notify(Ticket(2));
        assert_eq!(rx.recv().await, Some(Ticket(1)));
        assert_eq!(rx.recv().await, Some(Ticket(2)));
    }

    #[test]
    fn notify_after_receiver_dropped_is_silent() {
        let (notifier, rx) = CompletionNotifier::channel();
        drop(rx);
        notifier.notify(Ticket(7));
    }
}
