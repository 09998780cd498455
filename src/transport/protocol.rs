// Line-delimited JSON messages of the mpv IPC protocol

use crate::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"command": [verb, args...]}`
#[derive(Debug, Clone, Serialize)]
pub struct IpcRequest {
    pub command: Vec<Value>,
}

impl IpcRequest {
    pub fn new(verb: &str, args: impl IntoIterator<Item = Value>) -> Self {
        let mut command = vec![Value::from(verb)];
        command.extend(args);
        Self { command }
    }

    /// Command without arguments
    pub fn bare(verb: &str) -> Self {
        Self {
            command: vec![Value::from(verb)],
        }
    }

    pub fn get_property(name: &str) -> Self {
        Self::new("get_property", [Value::from(name)])
    }

    pub fn set_property(name: &str, value: impl Into<Value>) -> Self {
        Self::new("set_property", [Value::from(name), value.into()])
    }

    pub fn verb(&self) -> &str {
        self.command.first().and_then(Value::as_str).unwrap_or("")
    }

    /// Serialized request including the trailing newline
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// One line received from the media process: either a reply or an
/// unsolicited event broadcast. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpcResponse {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
}

impl IpcResponse {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn is_event(&self) -> bool {
        self.event.is_some()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.error.as_deref(), None | Some("success"))
    }

    /// Payload of a successful reply, or `TransportIo` naming the failed verb
    pub fn into_data(self, verb: &str) -> Result<Value> {
        if self.is_success() {
            return Ok(self.data);
        }
        Err(PlayerError::TransportIo(format!(
            "{} rejected: {}",
            verb,
            self.error.unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_line_shape() {
        let request = IpcRequest::new("loadfile", [json!("/music/a.wav"), json!("replace")]);
        assert_eq!(request.verb(), "loadfile");
        assert_eq!(
            request.to_line().unwrap(),
            "{\"command\":[\"loadfile\",\"/music/a.wav\",\"replace\"]}\n"
        );

        let pause = IpcRequest::set_property("pause", false);
        assert_eq!(pause.command, vec![json!("set_property"), json!("pause"), json!(false)]);
    }

    #[test]
    fn test_reply_tolerates_extra_fields() {
        let reply = IpcResponse::parse(r#"{"data":12.5,"error":"success","request_id":7}"#).unwrap();
        assert!(!reply.is_event());
        assert_eq!(reply.into_data("get_property").unwrap(), json!(12.5));
    }

    #[test]
    fn test_null_error_is_success() {
        let reply = IpcResponse::parse(r#"{"data":true,"error":null}"#).unwrap();
        assert!(reply.is_success());
    }

    #[test]
    fn test_event_lines_are_recognized() {
        let event = IpcResponse::parse(r#"{"event":"playback-restart"}"#).unwrap();
        assert!(event.is_event());
    }

    #[test]
    fn test_error_reply_names_verb() {
        let reply = IpcResponse::parse(r#"{"data":null,"error":"property unavailable"}"#).unwrap();
        let err = reply.into_data("get_property").unwrap_err();
        assert!(matches!(err, PlayerError::TransportIo(ref msg) if msg.contains("get_property")));
    }

    #[test]
    fn test_malformed_line_is_transport_error() {
        let err = IpcResponse::parse("{\"data\":").unwrap_err();
        assert!(matches!(err, PlayerError::TransportIo(_)));
    }
}
