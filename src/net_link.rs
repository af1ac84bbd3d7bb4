use crate::config::Config;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

/// 重连退避上限（秒）
const MAX_RETRY_DELAY_SECS: u64 = 60;

#[derive(Debug)]
pub enum NetEvent {
    Text(String),
    Binary(Bytes),
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub enum NetCommand {
    SendText(String),
    SendBinary(Vec<u8>),
}

// 音频参数结构体
#[derive(Serialize)]
struct AudioParams {
    format: String,
    sample_rate: u32,
    channels: u8,
    frame_duration: u32,
}

// Hello Message，用于初始化连接
#[derive(Serialize)]
struct HelloMessage {
    #[serde(rename = "type")]
    msg_type: String,
    version: u8,
    transport: String,
    audio_params: AudioParams,
}

impl HelloMessage {
    fn from_config(config: &Config) -> Self {
        Self {
            msg_type: "hello".to_string(),
            version: 1,
            transport: "websocket".to_string(),
            audio_params: AudioParams {
                format: config.hello_format.to_string(),
                sample_rate: config.hello_sample_rate,
                channels: config.hello_channels,
                frame_duration: config.hello_frame_duration,
            },
        }
    }
}

pub struct NetLink {
    config: Config,
    tx: mpsc::Sender<NetEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    pub fn new(
        config: Config,
        tx: mpsc::Sender<NetEvent>,
        rx_cmd: mpsc::Receiver<NetCommand>,
    ) -> Self {
        Self { config, tx, rx_cmd }
    }

    // 如果发生错误断开连接，指数退避后重连
    pub async fn run(mut self) {
        let mut retry_delay = 1;
        loop {
            match self.connect_and_loop().await {
                Err(e) => {
                    log::warn!("Connection error: {}. Retrying in {}s...", e, retry_delay);
                    let _ = self.tx.send(NetEvent::Disconnected).await;
                    tokio::time::sleep(tokio::time::Duration::from_secs(retry_delay)).await;
                    retry_delay = next_retry_delay(retry_delay);
                }
                // Ok 表示命令通道已关闭，正在退出
                Ok(()) => break,
            }
        }
        log::info!("NetLink stopped");
    }

    // 进入连接和主循环，处理WebSocket消息和发送命令
    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        let url = Url::parse(self.config.ws_url)?;
        let host = url.host_str().unwrap_or("localhost");

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.config.ws_url)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Authorization", format!("Bearer {}", self.config.ws_token))
            .header("Device-Id", &self.config.device_id)
            .header("Client-Id", &self.config.client_id)
            .header("Protocol-Version", "1")
            .body(())?;

        log::info!("Connecting to {}...", self.config.ws_url);
        let (ws_stream, _) = connect_async(request).await?;
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();

        self.tx.send(NetEvent::Connected).await?;

        // 发送Hello消息进行初始化链接
        let hello_json = serde_json::to_string(&HelloMessage::from_config(&self.config))?;
        log::debug!("Sending Hello: {}", hello_json);
        write.send(Message::Text(hello_json.into())).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.tx.send(NetEvent::Text(text.to_string())).await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.tx.send(NetEvent::Binary(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            return Err(anyhow::anyhow!("Connection closed"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(anyhow::anyhow!("Connection closed")),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendText(text)) => {
                            write.send(Message::Text(text.into())).await?;
                        }
                        Some(NetCommand::SendBinary(data)) => {
                            write.send(Message::Binary(data.into())).await?;
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
}

fn next_retry_delay(current: u64) -> u64 {
    std::cmp::min(current * 2, MAX_RETRY_DELAY_SECS)
}
