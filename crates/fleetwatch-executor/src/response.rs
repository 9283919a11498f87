//! Command response document sent back to the hub.
//!
//! `response_payload` keeps the legacy asymmetric encoding: base64 of the
//! output for completed and timed-out commands, plain `Error: <message>` for
//! failures. `status` names the case explicitly; documents without it are
//! still decoded by trying base64 first.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use fleetwatch_core::{AgentEnvelope, ConnectionId, DIRECT_SOURCE};
use serde::{Deserialize, Serialize};

use crate::command::{CommandOutcome, ExecFailure};

/// Prefix of an un-encoded error payload.
pub const ERROR_PREFIX: &str = "Error: ";

/// Explicit outcome tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    TimedOut,
    Error,
}

/// Decoded view of a response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Command output (a timeout notice, if any, is part of the text).
    Output(String),
    /// Literal error text, including the `Error: ` prefix.
    Error(String),
}

/// Body of a `direct` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub connection_id: ConnectionId,
    pub response_payload: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
}

impl CommandResponse {
    /// Encode an execution result for `connection_id`.
    #[must_use]
    pub fn from_result(
        connection_id: ConnectionId,
        result: &Result<CommandOutcome, ExecFailure>,
    ) -> Self {
        let (response_payload, status) = encode_payload(result);
        Self {
            connection_id,
            response_payload,
            source: DIRECT_SOURCE.to_string(),
            status: Some(status),
        }
    }

    /// Wrap this response in a `direct` envelope.
    ///
    /// # Errors
    /// Returns error if the document cannot be serialized.
    pub fn into_envelope(self) -> Result<AgentEnvelope, serde_json::Error> {
        let payload = serde_json::to_string(&self)?;
        Ok(AgentEnvelope::direct(self.connection_id, payload))
    }

    /// Parse the response carried by a `direct` envelope.
    ///
    /// # Errors
    /// Returns error if the payload is not a response document.
    pub fn from_envelope(envelope: &AgentEnvelope) -> Result<Self, serde_json::Error> {
        serde_json::from_str(&envelope.payload)
    }

    /// Decode `response_payload`.
    ///
    /// Uses `status` when present; otherwise a payload that is valid base64
    /// of UTF-8 text is output and anything else is literal error text.
    #[must_use]
    pub fn body(&self) -> ResponseBody {
        match self.status {
            Some(ResponseStatus::Error) => ResponseBody::Error(self.response_payload.clone()),
            Some(ResponseStatus::Ok | ResponseStatus::TimedOut) | None => {
                match decode_base64_text(&self.response_payload) {
                    Some(text) => ResponseBody::Output(text),
                    None => ResponseBody::Error(self.response_payload.clone()),
                }
            }
        }
    }
}

/// Render a result as `(response_payload, status)`.
#[must_use]
pub fn encode_payload(result: &Result<CommandOutcome, ExecFailure>) -> (String, ResponseStatus) {
    match result {
        Ok(outcome) => {
            let status = if outcome.timed_out {
                ResponseStatus::TimedOut
            } else {
                ResponseStatus::Ok
            };
            (BASE64.encode(outcome.output.as_bytes()), status)
        }
        Err(failure) => (format!("{ERROR_PREFIX}{}", failure.error), ResponseStatus::Error),
    }
}

fn decode_base64_text(payload: &str) -> Option<String> {
    let bytes = BASE64.decode(payload).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ExecError;

    fn ok(output: &str, timed_out: bool) -> Result<CommandOutcome, ExecFailure> {
        Ok(CommandOutcome {
            output: output.to_string(),
            timed_out,
        })
    }

    #[test]
    fn test_success_is_base64() {
        let (payload, status) = encode_payload(&ok("hello\n", false));
        assert_eq!(payload, "aGVsbG8K");
        assert_eq!(status, ResponseStatus::Ok);
    }

    #[test]
    fn test_timeout_is_base64_not_error() {
        let (payload, status) = encode_payload(&ok("x\n\nCommand timed out after 1 seconds", true));
        assert_eq!(status, ResponseStatus::TimedOut);
        let decoded = String::from_utf8(BASE64.decode(payload).unwrap()).unwrap();
        assert!(decoded.ends_with("Command timed out after 1 seconds"));
    }

    #[test]
    fn test_failure_is_plain_text() {
        let failure: Result<CommandOutcome, ExecFailure> = Err(ExecFailure {
            output: "ignored\n".to_string(),
            error: ExecError::NonZeroExit {
                code: 2,
                stderr: String::new(),
            },
        });
        let (payload, status) = encode_payload(&failure);
        assert_eq!(payload, "Error: exit status 2");
        assert_eq!(status, ResponseStatus::Error);
    }

    #[test]
    fn test_envelope_roundtrip_and_body() {
        let response = CommandResponse::from_result("agent-1".into(), &ok("up 3 days\n", false));
        let envelope = response.clone().into_envelope().unwrap();
        assert!(envelope.is_direct());
        assert_eq!(envelope.connection_id.as_str(), "agent-1");

        let parsed = CommandResponse::from_envelope(&envelope).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.body(), ResponseBody::Output("up 3 days\n".to_string()));
    }

    #[test]
    fn test_untagged_documents_fall_back_to_literal() {
        let legacy = r#"{"connection_id":"a","response_payload":"Error: exit status 1","source":"direct"}"#;
        let parsed: CommandResponse = serde_json::from_str(legacy).unwrap();
        assert_eq!(parsed.status, None);
        assert_eq!(
            parsed.body(),
            ResponseBody::Error("Error: exit status 1".to_string())
        );

        let legacy = r#"{"connection_id":"a","response_payload":"aGk=","source":"direct"}"#;
        let parsed: CommandResponse = serde_json::from_str(legacy).unwrap();
        assert_eq!(parsed.body(), ResponseBody::Output("hi".to_string()));
    }
}
