//! Fixed-format PCM view over a [`RelayStream`].
//!
//! The channel delivers raw little-endian 16-bit PCM. The reader turns the
//! relay's bytes into interleaved i16 frames for the sink, carrying partial
//! frames across reads so a chunk boundary never splits a sample.

use std::fmt;
use std::sync::Arc;

use super::relay_stream::RelayStream;

/// Raw PCM layout of a relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// Mono, 16-bit, 16 kHz: the channel's default speech format.
    pub const SPEECH_16K_MONO: PcmFormat = PcmFormat {
        sample_rate: 16_000,
        channels: 1,
        bits_per_sample: 16,
    };

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Check that the layout is something [`PcmReader`] can decode.
    pub fn validate(&self) -> Result<(), String> {
        if self.bits_per_sample != 16 {
            return Err(format!(
                "unsupported sample width: {} bits",
                self.bits_per_sample
            ));
        }
        if self.channels == 0 {
            return Err("channel count must be non-zero".to_string());
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be non-zero".to_string());
        }
        Ok(())
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::SPEECH_16K_MONO
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// Result of one [`PcmReader::read_frames`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmRead {
    /// This many whole frames were written to the output buffer.
    Frames(usize),
    /// No complete frame is buffered yet; the producer is still writing.
    Pending,
    /// The producer finished and every byte was consumed.
    Finished,
}

/// Sequential i16 frame reader bound to one relay stream.
pub struct PcmReader {
    stream: Arc<RelayStream>,
    format: PcmFormat,
    scratch: Vec<u8>,
    partial: Vec<u8>,
}

impl PcmReader {
    pub fn new(stream: Arc<RelayStream>, format: PcmFormat) -> Self {
        Self {
            stream,
            format,
            scratch: Vec::new(),
            partial: Vec::with_capacity(format.bytes_per_frame()),
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn stream(&self) -> &Arc<RelayStream> {
        &self.stream
    }

    /// Fill `out` with as many whole interleaved frames as are buffered.
    ///
    /// `out.len()` should be a multiple of the channel count; trailing slots
    /// that cannot hold a whole frame are left untouched.
    pub fn read_frames(&mut self, out: &mut [i16]) -> PcmRead {
        let channels = self.format.channels.max(1) as usize;
        let frame_bytes = self.format.bytes_per_frame().max(2);
        let max_frames = out.len() / channels;
        if max_frames == 0 {
            return PcmRead::Frames(0);
        }

        let want = max_frames * frame_bytes;
        self.scratch.resize(want, 0);
        let carried = self.partial.len();
        self.scratch[..carried].copy_from_slice(&self.partial);

        let got = self.stream.read(&mut self.scratch[carried..want]);
        let total = carried + got;
        let whole = total - total % frame_bytes;

        for (dst, bytes) in out.iter_mut().zip(self.scratch[..whole].chunks_exact(2)) {
            *dst = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        self.partial.clear();
        self.partial.extend_from_slice(&self.scratch[whole..total]);

        let frames = whole / frame_bytes;
        if frames > 0 {
            PcmRead::Frames(frames)
        } else if self.stream.is_drained() {
            if !self.partial.is_empty() {
                log::debug!(
                    "Dropping {} trailing bytes that do not form a whole frame",
                    self.partial.len()
                );
                self.partial.clear();
            }
            PcmRead::Finished
        } else {
            PcmRead::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_little_endian_samples() {
        let stream = Arc::new(RelayStream::new());
        stream.write(&le_bytes(&[1, -2, 300, i16::MIN]));
        let mut reader = PcmReader::new(stream.clone(), PcmFormat::SPEECH_16K_MONO);

        let mut out = [0i16; 8];
        assert_eq!(reader.read_frames(&mut out), PcmRead::Frames(4));
        assert_eq!(&out[..4], &[1, -2, 300, i16::MIN]);
        assert_eq!(reader.read_frames(&mut out), PcmRead::Pending);

        stream.finish();
        assert_eq!(reader.read_frames(&mut out), PcmRead::Finished);
    }

    #[test]
    fn odd_byte_is_carried_to_next_read() {
        let stream = Arc::new(RelayStream::new());
        let bytes = le_bytes(&[0x1234, 0x5678]);
        stream.write(&bytes[..3]);
        let mut reader = PcmReader::new(stream.clone(), PcmFormat::SPEECH_16K_MONO);

        let mut out = [0i16; 4];
        assert_eq!(reader.read_frames(&mut out), PcmRead::Frames(1));
        assert_eq!(out[0], 0x1234);

        stream.write(&bytes[3..]);
        assert_eq!(reader.read_frames(&mut out), PcmRead::Frames(1));
        assert_eq!(out[0], 0x5678);
    }

    #[test]
    fn stereo_reads_whole_frames_only() {
        let format = PcmFormat {
            channels: 2,
            ..PcmFormat::SPEECH_16K_MONO
        };
        let stream = Arc::new(RelayStream::new());
        stream.write(&le_bytes(&[10, 11, 20, 21, 30]));
        let mut reader = PcmReader::new(stream.clone(), format);

        let mut out = [0i16; 6];
        assert_eq!(reader.read_frames(&mut out), PcmRead::Frames(2));
        assert_eq!(&out[..4], &[10, 11, 20, 21]);

        // Half a frame is buffered: still waiting on the producer.
        assert_eq!(reader.read_frames(&mut out), PcmRead::Pending);
        stream.write(&le_bytes(&[31]));
        assert_eq!(reader.read_frames(&mut out), PcmRead::Frames(1));
        assert_eq!(&out[..2], &[30, 31]);
    }

    #[test]
    fn truncated_tail_finishes_cleanly() {
        let stream = Arc::new(RelayStream::new());
        stream.write(&[0x01, 0x00, 0x7f]);
        stream.finish();
        let mut reader = PcmReader::new(stream, PcmFormat::SPEECH_16K_MONO);

        let mut out = [0i16; 4];
        assert_eq!(reader.read_frames(&mut out), PcmRead::Frames(1));
        assert_eq!(reader.read_frames(&mut out), PcmRead::Finished);
    }

    #[test]
    fn closed_stream_reads_as_finished() {
        let stream = Arc::new(RelayStream::new());
        stream.write(&le_bytes(&[5, 6]));
        let mut reader = PcmReader::new(stream.clone(), PcmFormat::SPEECH_16K_MONO);
        stream.close();

        let mut out = [0i16; 4];
        assert_eq!(reader.read_frames(&mut out), PcmRead::Finished);
    }

    #[test]
    fn validate_rejects_unsupported_layouts() {
        assert!(PcmFormat::SPEECH_16K_MONO.validate().is_ok());
        let eight_bit = PcmFormat {
            bits_per_sample: 8,
            ..PcmFormat::SPEECH_16K_MONO
        };
        assert!(eight_bit.validate().is_err());
        let silent = PcmFormat {
            channels: 0,
            ..PcmFormat::SPEECH_16K_MONO
        };
        assert!(silent.validate().is_err());
    }
}
