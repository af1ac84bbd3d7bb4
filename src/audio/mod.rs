//! audio - ALSA capture/playback and the relay buffer for streamed speech
//!
//! Microphone capture runs on its own OS thread inside [`AudioSystem`].
//! Synthesized speech is relayed through [`RelayStream`], decoded by
//! [`PcmReader`] and rendered by an [`AudioSink`] such as [`AlsaSink`].

mod alsa_device;
mod alsa_sink;
mod audio_system;
mod pcm_reader;
mod relay_stream;
mod sink;

pub use alsa_sink::AlsaSink;
pub use audio_system::{AudioConfig, AudioSystem};
pub use pcm_reader::{PcmFormat, PcmReader};
pub use relay_stream::RelayStream;
pub use sink::{AudioSink, CompletionNotifier, SinkError, Ticket};
