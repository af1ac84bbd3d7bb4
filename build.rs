use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    network: Network,
    audio: Audio,
    hello_message: HelloMessage,
    session: Session,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    ws_token: String,
    device_id: String,
    client_id: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    capture_frame_ms: u32,
    playback_period_size: usize,
    relay_chunk_size: usize,
    underrun_backoff_ms: u64,
}

#[derive(Deserialize)]
struct HelloMessage {
    format: String,
    sample_rate: u32,
    channels: u8,
    frame_duration: u32,
}

#[derive(Deserialize)]
struct Session {
    auto_listen: bool,
    listen_mode: String,
    client_id_file: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=WS_TOKEN={}", config.network.ws_token);
    println!("cargo:rustc-env=DEVICE_ID={}", config.network.device_id);
    println!("cargo:rustc-env=CLIENT_ID={}", config.network.client_id);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_BITS_PER_SAMPLE={}", config.audio.bits_per_sample);
    println!("cargo:rustc-env=AUDIO_CAPTURE_FRAME_MS={}", config.audio.capture_frame_ms);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);
    println!("cargo:rustc-env=AUDIO_RELAY_CHUNK_SIZE={}", config.audio.relay_chunk_size);
    println!("cargo:rustc-env=AUDIO_UNDERRUN_BACKOFF_MS={}", config.audio.underrun_backoff_ms);

    // Hello 消息配置
    println!("cargo:rustc-env=HELLO_FORMAT={}", config.hello_message.format);
    println!("cargo:rustc-env=HELLO_SAMPLE_RATE={}", config.hello_message.sample_rate);
    println!("cargo:rustc-env=HELLO_CHANNELS={}", config.hello_message.channels);
    println!("cargo:rustc-env=HELLO_FRAME_DURATION={}", config.hello_message.frame_duration);

    // 会话行为
    println!("cargo:rustc-env=SESSION_AUTO_LISTEN={}", config.session.auto_listen);
    println!("cargo:rustc-env=SESSION_LISTEN_MODE={}", config.session.listen_mode);
    println!("cargo:rustc-env=SESSION_CLIENT_ID_FILE={}", config.session.client_id_file);
}
