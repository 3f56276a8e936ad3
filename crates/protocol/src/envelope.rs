//! Request/response envelope.
//!
//! Every exchange is one request frame answered by one response frame that
//! echoes the request id. A response either carries a typed payload or a
//! [`WireError`], never both.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::{
    ERROR_INVALID_ARGUMENT, ERROR_IO, ERROR_NOT_IMPLEMENTED, ERROR_NOT_READY, ERROR_NOT_SUPPORTED,
    ERROR_OK, ERROR_OP_FAILED, ERROR_TIMEOUT, MessageType,
};

/// Result code of a device operation. Travels as a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorCode {
    Ok,
    OperationFailed,
    InvalidArgument,
    NotSupported,
    NotImplemented,
    Timeout,
    Io,
    NotReady,
    /// A code this client does not know.
    Other(i32),
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            ERROR_OK => ErrorCode::Ok,
            ERROR_OP_FAILED => ErrorCode::OperationFailed,
            ERROR_INVALID_ARGUMENT => ErrorCode::InvalidArgument,
            ERROR_NOT_SUPPORTED => ErrorCode::NotSupported,
            ERROR_NOT_IMPLEMENTED => ErrorCode::NotImplemented,
            ERROR_TIMEOUT => ErrorCode::Timeout,
            ERROR_IO => ErrorCode::Io,
            ERROR_NOT_READY => ErrorCode::NotReady,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Ok => ERROR_OK,
            ErrorCode::OperationFailed => ERROR_OP_FAILED,
            ErrorCode::InvalidArgument => ERROR_INVALID_ARGUMENT,
            ErrorCode::NotSupported => ERROR_NOT_SUPPORTED,
            ErrorCode::NotImplemented => ERROR_NOT_IMPLEMENTED,
            ErrorCode::Timeout => ERROR_TIMEOUT,
            ErrorCode::Io => ERROR_IO,
            ErrorCode::NotReady => ERROR_NOT_READY,
            ErrorCode::Other(code) => code,
        }
    }
}

/// Failure reported by the device in place of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
}

/// A response whose id does not answer the request it was read for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMismatch {
    pub expected: String,
    pub got: String,
}

impl std::fmt::Display for IdMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "response id {} does not match request {}", self.got, self.expected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Message {
    /// Builds a request from an already-serialized payload.
    pub fn request(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: payload.map(serde_json::value::to_raw_value).transpose()?,
            error: None,
        })
    }

    /// Answers this request with `msg_type` and an optional payload.
    pub fn reply<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: self.id.clone(),
            msg_type,
            payload: payload.map(serde_json::value::to_raw_value).transpose()?,
            error: None,
        })
    }

    /// Answers this request with a failure.
    pub fn reply_error(&self, code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(WireError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Checks that this response answers the request with id `request_id`.
    pub fn answers(&self, request_id: &str) -> Result<(), IdMismatch> {
        if self.id == request_id {
            Ok(())
        } else {
            Err(IdMismatch {
                expected: request_id.to_string(),
                got: self.id.clone(),
            })
        }
    }

    /// Splits a response into success or the device-reported failure.
    ///
    /// An error field carrying [`ErrorCode::Ok`] counts as success.
    pub fn into_result(self) -> Result<Self, WireError> {
        match &self.error {
            Some(err) if err.code != ErrorCode::Ok => Err(err.clone()),
            _ => Ok(self),
        }
    }

    /// Decodes the payload; `None` when the message has none.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.payload
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PeekRequest;
    use crate::types::{StorageState, StorageStatus};

    fn request(id: &str, msg_type: MessageType) -> Message {
        Message::request(id, msg_type, None).unwrap()
    }

    #[test]
    fn error_codes_travel_as_integers() {
        let err = WireError {
            code: ErrorCode::NotReady,
            message: "no imu".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"code":-7,"message":"no imu"}"#);

        let parsed: WireError = serde_json::from_str(r#"{"code":-99}"#).unwrap();
        assert_eq!(parsed.code, ErrorCode::Other(-99));
        assert!(parsed.message.is_empty());
    }

    #[test]
    fn every_known_code_roundtrips() {
        for code in -7..=0 {
            assert_eq!(i32::from(ErrorCode::from(code)), code);
            assert!(!matches!(ErrorCode::from(code), ErrorCode::Other(_)));
        }
    }

    #[test]
    fn request_payload_decodes() {
        let payload = serde_json::to_value(PeekRequest { max_count: 4 }).unwrap();
        let msg = Message::request("m1", MessageType::PeekImu, Some(&payload)).unwrap();
        let req: PeekRequest = msg.decode_payload().unwrap().unwrap();
        assert_eq!(req.max_count, 4);
    }

    #[test]
    fn reply_carries_request_id_and_payload() {
        let req = request("req-3", MessageType::QueryStorageStatus);
        let status = StorageStatus {
            progress: 42.5,
            state: StorageState::Working,
            message: "receiving".into(),
        };
        let resp = req.reply(MessageType::StorageStatus, Some(&status)).unwrap();
        assert!(resp.answers("req-3").is_ok());
        let parsed: Option<StorageStatus> = resp.decode_payload().unwrap();
        assert_eq!(parsed.unwrap(), status);
    }

    #[test]
    fn mismatched_id_is_reported() {
        let resp = request("other", MessageType::Ack);
        let err = resp.answers("mine").unwrap_err();
        assert_eq!(err.to_string(), "response id other does not match request mine");
    }

    #[test]
    fn error_reply_becomes_err() {
        let req = request("req-7", MessageType::PeekImu);
        let reply = req.reply_error(ERROR_NOT_READY, "no imu data yet");
        assert_eq!(reply.id, "req-7");
        assert_eq!(reply.msg_type, MessageType::Error);
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.code, ErrorCode::NotReady);
    }

    #[test]
    fn ok_code_in_error_field_is_success() {
        let mut resp = request("r", MessageType::Ack);
        resp.error = Some(WireError {
            code: ErrorCode::Ok,
            message: String::new(),
        });
        assert!(resp.into_result().is_ok());
    }

    #[test]
    fn omits_absent_fields() {
        let json = serde_json::to_string(&request("m1", MessageType::ListMaps)).unwrap();
        assert!(!json.contains("payload"));
        assert!(!json.contains("error"));
        assert!(json.contains("\"type\":\"list_maps\""));
    }
}
