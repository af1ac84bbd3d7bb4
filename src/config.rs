use serde::Serialize;

use crate::audio::{AudioConfig, PcmFormat};

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    // 网络配置（静态部分）
    pub ws_url: &'static str,
    pub ws_token: &'static str,

    // 设备标识（动态部分，可在运行时修改）
    pub device_id: String,
    pub client_id: String,

    // 音频设备配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub capture_frame_ms: u32,
    pub playback_period_size: usize,
    pub relay_chunk_size: usize,
    pub underrun_backoff_ms: u64,

    // Hello消息参数
    pub hello_format: &'static str,
    pub hello_sample_rate: u32,
    pub hello_channels: u8,
    pub hello_frame_duration: u32,

    // 会话行为
    pub auto_listen: bool,
    pub listen_mode: &'static str,
    pub client_id_file: &'static str,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            ws_url: env!("WS_URL"),
            ws_token: env!("WS_TOKEN"),

            device_id: env!("DEVICE_ID").to_string(),
            client_id: env!("CLIENT_ID").to_string(),

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            channels: env!("AUDIO_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
            bits_per_sample: env!("AUDIO_BITS_PER_SAMPLE").parse()
                .map_err(|_| "Failed to parse AUDIO_BITS_PER_SAMPLE")?,
            capture_frame_ms: env!("AUDIO_CAPTURE_FRAME_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_CAPTURE_FRAME_MS")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,
            relay_chunk_size: env!("AUDIO_RELAY_CHUNK_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_RELAY_CHUNK_SIZE")?,
            underrun_backoff_ms: env!("AUDIO_UNDERRUN_BACKOFF_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_UNDERRUN_BACKOFF_MS")?,

            hello_format: env!("HELLO_FORMAT"),
            hello_sample_rate: env!("HELLO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse HELLO_SAMPLE_RATE")?,
            hello_channels: env!("HELLO_CHANNELS").parse()
                .map_err(|_| "Failed to parse HELLO_CHANNELS")?,
            hello_frame_duration: env!("HELLO_FRAME_DURATION").parse()
                .map_err(|_| "Failed to parse HELLO_FRAME_DURATION")?,

            auto_listen: env!("SESSION_AUTO_LISTEN").parse()
                .map_err(|_| "Failed to parse SESSION_AUTO_LISTEN")?,
            listen_mode: env!("SESSION_LISTEN_MODE"),
            client_id_file: env!("SESSION_CLIENT_ID_FILE"),
        })
    }

    /// PCM format of the synthesized speech delivered by the channel.
    pub fn tts_format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }

    /// Derive the device-level settings for the audio system.
    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            capture_device: self.capture_device.to_string(),
            playback_device: self.playback_device.to_string(),
            format: self.tts_format(),
            capture_frame_ms: self.capture_frame_ms,
            playback_period_size: self.playback_period_size,
            underrun_backoff_ms: self.underrun_backoff_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(config.sample_rate > 0);
        assert!(config.relay_chunk_size > 0);
        assert!(!config.ws_url.is_empty());
    }

    #[test]
    fn audio_config_carries_tts_format() {
        let config = Config::new().unwrap();
        let audio = config.audio_config();
        assert_eq!(audio.format, config.tts_format());
        assert_eq!(audio.format.channels, config.channels);
    }
}
