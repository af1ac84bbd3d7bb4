use crate::config::Config;
use crate::net_link::{NetCommand, NetEvent};
use crate::playback::{frame_channel, FrameFeeder, PlaybackEvent, PlaybackHandle};
use crate::protocol::{self, ServerMessage, TtsState};
use crate::state_machine::SystemState;
use bytes::Bytes;
use tokio::sync::mpsc;

pub struct CoreController {
    state: SystemState,
    current_session_id: Option<String>,
    config: Config,
    net_tx: mpsc::Sender<NetCommand>,
    playback: PlaybackHandle,
    // 当前正在接收的TTS语音流
    speech_feed: Option<FrameFeeder>,
    // 播放队列是否正在播放
    playing: bool,
    // 打断或断线后，丢弃旧回复残留的音频帧，直到下一个 tts/start
    discard_audio: bool,
}

impl CoreController {
    pub fn new(config: Config, net_tx: mpsc::Sender<NetCommand>, playback: PlaybackHandle) -> Self {
        Self {
            state: SystemState::Idle,
            current_session_id: None,
            config,
            net_tx,
            playback,
            speech_feed: None,
            playing: false,
            discard_audio: false,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub async fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Text(text) => self.process_server_text(&text).await,
            NetEvent::Binary(data) => self.process_server_audio(data),
            NetEvent::Connected => {
                log::info!("WebSocket Connected");
                self.state = SystemState::Idle;
            }
            NetEvent::Disconnected => {
                log::warn!("WebSocket Disconnected");
                self.state = SystemState::NetworkError;
                // 断线后清理未播放完的语音
                self.speech_feed = None;
                self.discard_audio = true;
                self.playback.stop_all();
            }
        }
    }

    async fn process_server_text(&mut self, text: &str) {
        log::debug!("Received Text from Server: {}", text);

        let Some(msg) = ServerMessage::parse(text) else {
            // 可能不是JSON，忽略
            return;
        };

        if let Some(sid) = &msg.session_id {
            if self.current_session_id.as_deref() != Some(sid) {
                log::info!("New Session ID: {}", sid);
                self.current_session_id = Some(sid.clone());
            }
        }

        match msg.msg_type.as_str() {
            "hello" => {
                log::info!("Server Hello received. Starting listen mode...");
                self.start_listening().await;
            }
            "tts" => match msg.tts_state() {
                Some(TtsState::Start) => {
                    self.discard_audio = false;
                    self.state = SystemState::Speaking;
                    self.open_speech(msg.interaction_id.clone());
                }
                Some(TtsState::SentenceStart) => {
                    if let Some(t) = &msg.text {
                        log::info!("Bot: {}", t);
                    }
                }
                Some(TtsState::Stop) => {
                    // 丢弃 feeder 即表示该语音流结束
                    if self.speech_feed.take().is_some() {
                        log::debug!("TTS stream complete");
                    }
                }
                _ => {}
            },
            "stt" => {
                if let Some(t) = &msg.text {
                    log::info!("You: {}", t);
                }
            }
            "llm" => {
                if let Some(t) = &msg.text {
                    log::info!("Bot: {}", t);
                }
            }
            other => {
                log::debug!("Unhandled message type: {}", other);
            }
        }
    }

    /// Binary frames carry PCM for the utterance opened by the last `tts/start`.
    fn process_server_audio(&mut self, data: Bytes) {
        if self.speech_feed.is_none() {
            if self.discard_audio {
                log::debug!("Dropping {} bytes left over from a stopped reply", data.len());
                return;
            }
            log::debug!("Audio without tts/start, opening a stream implicitly");
            self.state = SystemState::Speaking;
            self.open_speech(None);
        }
        if let Some(feed) = &self.speech_feed {
            if !feed.push(data) {
                log::warn!("Speech relay is gone, dropping the rest of this utterance");
                self.speech_feed = None;
                self.discard_audio = true;
            }
        }
    }

    fn open_speech(&mut self, interaction_id: Option<String>) {
        if let Some(id) = &interaction_id {
            log::info!("Expecting TTS stream {}", id);
        }
        // 新语音开始时，上一段若未收到 stop 也视为结束
        self.speech_feed = None;

        let (feeder, source) = frame_channel();
        match self.playback.play_from(interaction_id, source) {
            Ok(_) => self.speech_feed = Some(feeder),
            Err(e) => log::error!("Failed to start speech relay: {}", e),
        }
    }

    pub async fn handle_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started { ticket, id } => {
                log::info!(
                    "START playing {} ({})",
                    id.as_deref().unwrap_or("<unknown>"),
                    ticket
                );
                self.playing = true;
            }
            PlaybackEvent::Rejected(e) => {
                // 所有语音流格式相同，被拒绝后继续接收没有意义
                log::warn!("Speech dropped: {}", e);
                self.speech_feed = None;
                self.discard_audio = true;
            }
            PlaybackEvent::Idle => {
                self.playing = false;
                // 播放完毕且没有新的语音流，自动重新开始监听，实现连续对话
                if self.state == SystemState::Speaking && self.speech_feed.is_none() {
                    if self.config.auto_listen {
                        self.start_listening().await;
                    } else {
                        self.state = SystemState::Idle;
                    }
                }
            }
        }
    }

    pub async fn handle_mic_audio(&mut self, data: Vec<u8>) {
        // 播放期间不转发麦克风数据，防止回声
        if self.playing || !self.state.accepts_mic_audio() {
            return;
        }
        if let Err(e) = self.net_tx.send(NetCommand::SendBinary(data)).await {
            log::error!("Failed to send audio to NetLink: {}", e);
        }
    }

    /// One line of keyboard input. An empty line starts listening, anything
    /// else is sent as a typed utterance. Either way current speech stops.
    pub async fn handle_user_input(&mut self, line: String) {
        self.interrupt_speech().await;

        let text = line.trim();
        if text.is_empty() {
            self.start_listening().await;
        } else {
            let session_id = self.session_id().to_string();
            if self.state == SystemState::Listening {
                self.send_text(protocol::listen_stop(&session_id)).await;
            }
            self.send_text(protocol::listen_detect(&session_id, text)).await;
            self.state = SystemState::Idle;
        }
    }

    /// Stop local playback and tell the server to abandon the reply.
    async fn interrupt_speech(&mut self) {
        let active = self.playing || self.speech_feed.is_some();
        self.speech_feed = None;
        if active {
            self.discard_audio = true;
        }
        self.playback.stop_all();
        if active {
            log::info!("User interrupted speech playback");
            let session_id = self.session_id().to_string();
            self.send_text(protocol::abort(&session_id)).await;
        }
    }

    pub fn shutdown(&mut self) {
        self.speech_feed = None;
        self.playback.stop_all();
    }

    async fn start_listening(&mut self) {
        let listen_cmd = protocol::listen_start(self.session_id(), self.config.listen_mode);
        self.send_text(listen_cmd).await;
        self.state = SystemState::Listening;
    }

    fn session_id(&self) -> &str {
        self.current_session_id.as_deref().unwrap_or("")
    }

    async fn send_text(&self, text: String) {
        if let Err(e) = self.net_tx.send(NetCommand::SendText(text)).await {
            log::error!("Failed to send text to NetLink: {}", e);
        }
    }
}
