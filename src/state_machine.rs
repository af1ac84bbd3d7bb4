/// 客户端整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    Listening,
    Speaking,
    NetworkError,
}

impl SystemState {
    /// Microphone audio is only forwarded while the server is listening.
    pub fn accepts_mic_audio(&self) -> bool {
        matches!(self, SystemState::Listening)
    }
}
