mod audio;
mod config;
mod controller;
mod net_link;
mod playback;
mod protocol;
mod state_machine;

use audio::{AlsaSink, AudioSystem};
use config::Config;
use controller::CoreController;
use mac_address::get_mac_address;
use net_link::{NetCommand, NetEvent, NetLink};
use playback::{PlaybackEvent, PlaybackService};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let mut config = Config::new().map_err(anyhow::Error::msg)?;

    // 设备id和客户端id的处理
    if config.device_id == "unknown-device" {
        config.device_id = match get_mac_address() {
            Ok(Some(mac)) => mac.to_string().to_lowercase(),
            _ => Uuid::new_v4().to_string(),
        };
    }
    if config.client_id == "unknown-client" {
        config.client_id = load_or_create_client_id(config.client_id_file);
    }
    log::info!(
        "{} {} device={} client={}",
        env!("APP_NAME"),
        env!("APP_VERSION"),
        config.device_id,
        config.client_id
    );

    // 创建通道，用于组件间通信
    let (tx_net_event, mut rx_net_event) = mpsc::channel::<NetEvent>(100);
    let (tx_net_cmd, rx_net_cmd) = mpsc::channel::<NetCommand>(100);
    let (tx_mic, mut rx_mic) = mpsc::channel::<Vec<u8>>(100);
    let (tx_playback, mut rx_playback) = mpsc::channel::<PlaybackEvent>(100);

    // 启动网络链接
    let net_link = NetLink::new(config.clone(), tx_net_event, rx_net_cmd);
    tokio::spawn(async move {
        net_link.run().await;
    });

    // 启动播放服务，ALSA播放线程通过 CompletionNotifier 回报播放结束
    let audio_config = config.audio_config();
    let (playback, _playback_task) = PlaybackService::spawn(
        |notifier| AlsaSink::start(&audio_config, notifier),
        config.tts_format(),
        config.relay_chunk_size,
        tx_playback,
    )?;

    // 启动录音
    let mut audio_system = AudioSystem::start(audio_config.clone(), tx_mic)?;

    let mut controller = CoreController::new(config, tx_net_cmd, playback);
    log::info!("Dialog client started. State: {:?}", controller.state());
    log::info!("Press Enter to talk, or type a message to send it as text");

    // 键盘输入：回车开始聆听，输入文字直接发送，同时打断当前播放
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_net_event.recv() => {
                controller.handle_net_event(event).await;
            }

            Some(data) = rx_mic.recv() => {
                controller.handle_mic_audio(data).await;
            }

            Some(event) = rx_playback.recv() => {
                controller.handle_playback_event(event).await;
            }

            line = stdin_lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => controller.handle_user_input(line).await,
                    Ok(None) => {
                        log::debug!("stdin closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        log::warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    controller.shutdown();
    audio_system.stop();
    Ok(())
}

// 设备端UUID，先从本地文件读取以保持重启间身份一致，如果不存在则生成新的并保存
fn load_or_create_client_id(path: &str) -> String {
    if let Ok(content) = std::fs::read_to_string(path) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            log::info!("Loaded Client ID from {}", path);
            return trimmed.to_string();
        }
    }

    let client_id = Uuid::new_v4().to_string();
    log::info!("Generated new Client ID: {}", client_id);
    match std::fs::write(path, &client_id) {
        Ok(()) => log::info!("Saved Client ID to {}", path),
        Err(e) => log::error!("Failed to save Client ID to {}: {}", path, e),
    }
    client_id
}
