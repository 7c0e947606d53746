//! Strongly-typed view over the fixed set of control-plane methods.
//!
//! [`Message`] is a lenient wire-level codec; [`ControlMessage`] is the
//! typed surface every control client and the coordinator actually build
//! and match against, so a missing or malformed parameter is caught at the
//! point of conversion rather than scattered across call sites as string
//! lookups.

use crate::Message;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("unknown control method: {0}")]
    UnknownMethod(String),
    #[error("message {method} is missing required parameter {param}")]
    MissingParam { method: &'static str, param: &'static str },
    #[error("message {method} has an invalid value for {param}: {value}")]
    InvalidValue {
        method: &'static str,
        param: &'static str,
        value: String,
    },
}

/// One of the fixed set of messages exchanged on a control-plane WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Heartbeat,
    Error {
        error_code: String,
        error_message: String,
    },
    Register {
        capacity: i64,
    },
    PublishRequest {
        request_id: String,
        channel: String,
        key: String,
        user_ip: String,
    },
    PublishAccept {
        request_id: String,
        channel: String,
        stream_id: String,
    },
    PublishDeny {
        request_id: String,
        channel: String,
    },
    PublishEnd {
        channel: String,
        stream_id: String,
    },
    StreamKill {
        channel: String,
        stream_id: String,
    },
    EncodeStart {
        channel: String,
        stream_id: String,
        source_type: String,
        source_uri: String,
        resolutions: String,
        record: bool,
        previews: String,
    },
    EncodeStop {
        channel: String,
        stream_id: String,
    },
    StreamAvailable {
        channel: String,
        stream_id: String,
        stream_type: String,
        resolution: String,
        index_file: String,
        start_time: Option<String>,
    },
    StreamClosed {
        channel: String,
        stream_id: String,
    },
}

fn require<'a>(msg: &'a Message, method: &'static str, param: &'static str) -> Result<&'a str, MessageError> {
    msg.param(param).ok_or(MessageError::MissingParam { method, param })
}

impl From<&ControlMessage> for Message {
    fn from(cm: &ControlMessage) -> Message {
        match cm {
            ControlMessage::Heartbeat => Message::new("HEARTBEAT"),
            ControlMessage::Error { error_code, error_message } => Message::new("ERROR")
                .with_param("Error-Code", error_code.clone())
                .with_param("Error-Message", error_message.clone()),
            ControlMessage::Register { capacity } => {
                Message::new("REGISTER").with_param("Capacity", capacity.to_string())
            }
            ControlMessage::PublishRequest { request_id, channel, key, user_ip } => Message::new("PUBLISH-REQUEST")
                .with_param("Request-ID", request_id.clone())
                .with_param("Stream-Channel", channel.clone())
                .with_param("Stream-Key", key.clone())
                .with_param("User-IP", user_ip.clone()),
            ControlMessage::PublishAccept { request_id, channel, stream_id } => Message::new("PUBLISH-ACCEPT")
                .with_param("Request-ID", request_id.clone())
                .with_param("Stream-Channel", channel.clone())
                .with_param("Stream-ID", stream_id.clone()),
            ControlMessage::PublishDeny { request_id, channel } => Message::new("PUBLISH-DENY")
                .with_param("Request-ID", request_id.clone())
                .with_param("Stream-Channel", channel.clone()),
            ControlMessage::PublishEnd { channel, stream_id } => Message::new("PUBLISH-END")
                .with_param("Stream-Channel", channel.clone())
                .with_param("Stream-ID", stream_id.clone()),
            ControlMessage::StreamKill { channel, stream_id } => Message::new("STREAM-KILL")
                .with_param("Stream-Channel", channel.clone())
                .with_param("Stream-ID", stream_id.clone()),
            ControlMessage::EncodeStart {
                channel,
                stream_id,
                source_type,
                source_uri,
                resolutions,
                record,
                previews,
            } => Message::new("ENCODE-START")
                .with_param("Stream-Channel", channel.clone())
                .with_param("Stream-ID", stream_id.clone())
                .with_param("Stream-Source-Type", source_type.clone())
                .with_param("Stream-Source-URI", source_uri.clone())
                .with_param("Resolutions", resolutions.clone())
                .with_param("Record", if *record { "True" } else { "False" })
                .with_param("Previews", previews.clone()),
            ControlMessage::EncodeStop { channel, stream_id } => Message::new("ENCODE-STOP")
                .with_param("Stream-Channel", channel.clone())
                .with_param("Stream-ID", stream_id.clone()),
            ControlMessage::StreamAvailable {
                channel,
                stream_id,
                stream_type,
                resolution,
                index_file,
                start_time,
            } => {
                let mut m = Message::new("STREAM-AVAILABLE")
                    .with_param("Stream-Channel", channel.clone())
                    .with_param("Stream-ID", stream_id.clone())
                    .with_param("Stream-Type", stream_type.clone())
                    .with_param("Resolution", resolution.clone())
                    .with_param("Index-file", index_file.clone());
                if let Some(st) = start_time {
                    m = m.with_param("Start-Time", st.clone());
                }
                m
            }
            ControlMessage::StreamClosed { channel, stream_id } => Message::new("STREAM-CLOSED")
                .with_param("Stream-Channel", channel.clone())
                .with_param("Stream-ID", stream_id.clone()),
        }
    }
}

impl TryFrom<&Message> for ControlMessage {
    type Error = MessageError;

    fn try_from(msg: &Message) -> Result<Self, Self::Error> {
        match msg.method() {
            "HEARTBEAT" => Ok(ControlMessage::Heartbeat),
            "ERROR" => Ok(ControlMessage::Error {
                error_code: require(msg, "ERROR", "error-code")?.to_string(),
                error_message: require(msg, "ERROR", "error-message")?.to_string(),
            }),
            "REGISTER" => {
                let raw = require(msg, "REGISTER", "capacity")?;
                let capacity = raw.parse::<i64>().map_err(|_| MessageError::InvalidValue {
                    method: "REGISTER",
                    param: "capacity",
                    value: raw.to_string(),
                })?;
                Ok(ControlMessage::Register { capacity })
            }
            "PUBLISH-REQUEST" => Ok(ControlMessage::PublishRequest {
                request_id: require(msg, "PUBLISH-REQUEST", "request-id")?.to_string(),
                channel: require(msg, "PUBLISH-REQUEST", "stream-channel")?.to_string(),
                key: require(msg, "PUBLISH-REQUEST", "stream-key")?.to_string(),
                user_ip: require(msg, "PUBLISH-REQUEST", "user-ip")?.to_string(),
            }),
            "PUBLISH-ACCEPT" => Ok(ControlMessage::PublishAccept {
                request_id: require(msg, "PUBLISH-ACCEPT", "request-id")?.to_string(),
                channel: require(msg, "PUBLISH-ACCEPT", "stream-channel")?.to_string(),
                stream_id: require(msg, "PUBLISH-ACCEPT", "stream-id")?.to_string(),
            }),
            "PUBLISH-DENY" => Ok(ControlMessage::PublishDeny {
                request_id: require(msg, "PUBLISH-DENY", "request-id")?.to_string(),
                channel: require(msg, "PUBLISH-DENY", "stream-channel")?.to_string(),
            }),
            "PUBLISH-END" => Ok(ControlMessage::PublishEnd {
                channel: require(msg, "PUBLISH-END", "stream-channel")?.to_string(),
                stream_id: require(msg, "PUBLISH-END", "stream-id")?.to_string(),
            }),
            "STREAM-KILL" => Ok(ControlMessage::StreamKill {
                channel: require(msg, "STREAM-KILL", "stream-channel")?.to_string(),
                stream_id: require(msg, "STREAM-KILL", "stream-id")?.to_string(),
            }),
            "ENCODE-START" => Ok(ControlMessage::EncodeStart {
                channel: require(msg, "ENCODE-START", "stream-channel")?.to_string(),
                stream_id: require(msg, "ENCODE-START", "stream-id")?.to_string(),
                source_type: require(msg, "ENCODE-START", "stream-source-type")?.to_string(),
                source_uri: require(msg, "ENCODE-START", "stream-source-uri")?.to_string(),
                resolutions: require(msg, "ENCODE-START", "resolutions")?.to_string(),
                record: require(msg, "ENCODE-START", "record")?.eq_ignore_ascii_case("true"),
                previews: require(msg, "ENCODE-START", "previews")?.to_string(),
            }),
            "ENCODE-STOP" => Ok(ControlMessage::EncodeStop {
                channel: require(msg, "ENCODE-STOP", "stream-channel")?.to_string(),
                stream_id: require(msg, "ENCODE-STOP", "stream-id")?.to_string(),
            }),
            "STREAM-AVAILABLE" => Ok(ControlMessage::StreamAvailable {
                channel: require(msg, "STREAM-AVAILABLE", "stream-channel")?.to_string(),
                stream_id: require(msg, "STREAM-AVAILABLE", "stream-id")?.to_string(),
                stream_type: require(msg, "STREAM-AVAILABLE", "stream-type")?.to_string(),
                resolution: require(msg, "STREAM-AVAILABLE", "resolution")?.to_string(),
                index_file: require(msg, "STREAM-AVAILABLE", "index-file")?.to_string(),
                start_time: msg.param("start-time").map(str::to_string),
            }),
            "STREAM-CLOSED" => Ok(ControlMessage::StreamClosed {
                channel: require(msg, "STREAM-CLOSED", "stream-channel")?.to_string(),
                stream_id: require(msg, "STREAM-CLOSED", "stream-id")?.to_string(),
            }),
            other => Err(MessageError::UnknownMethod(other.to_string())),
        }
    }
}

impl ControlMessage {
    pub fn to_wire(&self) -> String {
        Message::from(self).serialize()
    }

    pub fn from_wire(raw: &str) -> Result<ControlMessage, MessageError> {
        ControlMessage::try_from(&Message::parse(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_start_round_trips_through_the_wire() {
        let cm = ControlMessage::EncodeStart {
            channel: "ch1".into(),
            stream_id: "s1".into(),
            source_type: "RTMP".into(),
            source_uri: "rtmp://1.2.3.4:1935/ch1/key".into(),
            resolutions: "ORIGINAL,720x480-30".into(),
            record: true,
            previews: "256x144-10".into(),
        };
        let wire = cm.to_wire();
        assert_eq!(ControlMessage::from_wire(&wire).unwrap(), cm);
    }

    #[test]
    fn record_flag_is_capitalized_on_the_wire() {
        let cm = ControlMessage::EncodeStart {
            channel: "ch1".into(),
            stream_id: "s1".into(),
            source_type: "WS".into(),
            source_uri: "ws://1.2.3.4:8080/ch1/key".into(),
            resolutions: "ORIGINAL".into(),
            record: false,
            previews: "False".into(),
        };
        assert!(cm.to_wire().contains("record: False"));
    }

    #[test]
    fn missing_required_param_is_rejected() {
        let msg = Message::new("REGISTER");
        let err = ControlMessage::try_from(&msg).unwrap_err();
        assert_eq!(
            err,
            MessageError::MissingParam { method: "REGISTER", param: "capacity" }
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        let msg = Message::new("NOT-A-REAL-METHOD");
        assert!(matches!(ControlMessage::try_from(&msg), Err(MessageError::UnknownMethod(_))));
    }

    #[test]
    fn stream_available_start_time_is_optional() {
        let cm = ControlMessage::StreamAvailable {
            channel: "ch1".into(),
            stream_id: "s1".into(),
            stream_type: "HLS-LIVE".into(),
            resolution: "720x480-30".into(),
            index_file: "hls/ch1/s1/720x480-30/live.m3u8".into(),
            start_time: None,
        };
        let wire = cm.to_wire();
        assert!(!wire.contains("start-time"));
        assert_eq!(ControlMessage::from_wire(&wire).unwrap(), cm);
    }
}
