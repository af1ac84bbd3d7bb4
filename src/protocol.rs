use serde::{Deserialize, Serialize};

/// JSON control message received from the dialog server.
#[derive(Deserialize, Debug, Clone)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: Option<String>,
    pub state: Option<String>,
    pub session_id: Option<String>,
    /// 对话轮次ID，仅用于日志关联
    pub interaction_id: Option<String>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Speech synthesis phase for `tts` messages.
    pub fn tts_state(&self) -> Option<TtsState> {
        if self.msg_type != "tts" {
            return None;
        }
        Some(match self.state.as_deref() {
            Some("start") => TtsState::Start,
            Some("sentence_start") => TtsState::SentenceStart,
            Some("stop") => TtsState::Stop,
            _ => TtsState::Other,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsState {
    /// A new utterance begins; binary frames follow.
    Start,
    SentenceStart,
    /// The utterance's audio is complete.
    Stop,
    Other,
}

// 客户端发往服务器的消息
#[derive(Serialize)]
struct ClientMessage<'a> {
    session_id: &'a str,
    #[serde(rename = "type")]
    msg_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl<'a> ClientMessage<'a> {
    fn new(session_id: &'a str, msg_type: &'a str) -> Self {
        Self {
            session_id,
            msg_type,
            state: None,
            mode: None,
            text: None,
            reason: None,
        }
    }

    fn to_json(&self) -> String {
        // Only string fields: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub fn listen_start(session_id: &str, mode: &str) -> String {
    ClientMessage {
        state: Some("start"),
        mode: Some(mode),
        ..ClientMessage::new(session_id, "listen")
    }
    .to_json()
}

pub fn listen_stop(session_id: &str) -> String {
    ClientMessage {
        state: Some("stop"),
        ..ClientMessage::new(session_id, "listen")
    }
    .to_json()
}

/// Typed input sent in place of recognized speech.
pub fn listen_detect(session_id: &str, text: &str) -> String {
    ClientMessage {
        state: Some("detect"),
        text: Some(text),
        ..ClientMessage::new(session_id, "listen")
    }
    .to_json()
}

/// Ask the server to stop the current reply because the user interrupted it.
pub fn abort(session_id: &str) -> String {
    ClientMessage {
        reason: Some("user_interrupt"),
        ..ClientMessage::new(session_id, "abort")
    }
    .to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn as_value(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn parses_tts_messages() {
        let msg = ServerMessage::parse(
            r#"{"type":"tts","state":"start","session_id":"s1","interaction_id":"turn-3"}"#,
        )
        .unwrap();
        assert_eq!(msg.tts_state(), Some(TtsState::Start));
        assert_eq!(msg.session_id.as_deref(), Some("s1"));
        assert_eq!(msg.interaction_id.as_deref(), Some("turn-3"));

        let msg = ServerMessage::parse(r#"{"type":"tts","state":"stop"}"#).unwrap();
        assert_eq!(msg.tts_state(), Some(TtsState::Stop));

        let msg = ServerMessage::parse(r#"{"type":"stt","text":"hi"}"#).unwrap();
        assert_eq!(msg.tts_state(), None);
    }

    #[test]
    fn rejects_non_json() {
        assert!(ServerMessage::parse("not json").is_none());
        assert!(ServerMessage::parse(r#"{"state":"start"}"#).is_none());
    }

    #[test]
    fn builds_listen_messages() {
        assert_eq!(
            as_value(&listen_start("s1", "auto")),
            json!({"session_id":"s1","type":"listen","state":"start","mode":"auto"})
        );
        assert_eq!(
            as_value(&listen_stop("")),
            json!({"session_id":"","type":"listen","state":"stop"})
        );
        assert_eq!(
            as_value(&listen_detect("s1", "what's the weather")),
            json!({"session_id":"s1","type":"listen","state":"detect","text":"what's the weather"})
        );
    }

    #[test]
    fn builds_abort_message() {
        assert_eq!(
            as_value(&abort("s2")),
            json!({"session_id":"s2","type":"abort","reason":"user_interrupt"})
        );
    }
}
