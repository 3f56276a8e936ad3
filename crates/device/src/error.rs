//! Device error types.

use aurora_protocol::envelope::{ErrorCode, WireError};

/// Errors produced while talking to a device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Transport unreachable or dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// Device rejected the request or answered inconsistently.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The requested data has not been produced yet.
    #[error("data not ready: {0}")]
    NotReady(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeviceError {
    /// Maps a device error code to an error kind.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::NotReady => DeviceError::NotReady(message),
            ErrorCode::Timeout => DeviceError::Timeout,
            ErrorCode::InvalidArgument => DeviceError::InvalidArgument(message),
            ErrorCode::NotSupported | ErrorCode::NotImplemented => {
                DeviceError::NotSupported(message)
            }
            ErrorCode::Io => DeviceError::Protocol(format!("device I/O error: {message}")),
            ErrorCode::OperationFailed => DeviceError::Protocol(message),
            ErrorCode::Ok => DeviceError::Protocol(format!("error reply with OK code: {message}")),
            ErrorCode::Other(other) => DeviceError::Protocol(format!("code {other}: {message}")),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::NotReady(_) | DeviceError::Timeout | DeviceError::Protocol(_)
        )
    }
}

impl From<WireError> for DeviceError {
    fn from(e: WireError) -> Self {
        DeviceError::from_code(e.code, e.message)
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        DeviceError::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_kinds() {
        assert!(matches!(
            DeviceError::from_code(ErrorCode::NotReady, "imu"),
            DeviceError::NotReady(m) if m == "imu"
        ));
        assert!(matches!(
            DeviceError::from_code(ErrorCode::Timeout, ""),
            DeviceError::Timeout
        ));
        assert!(matches!(
            DeviceError::from_code(ErrorCode::NotImplemented, "x"),
            DeviceError::NotSupported(_)
        ));
        assert!(matches!(
            DeviceError::from_code(ErrorCode::Other(-42), "weird"),
            DeviceError::Protocol(m) if m.contains("-42")
        ));
    }

    #[test]
    fn wire_error_converts() {
        let err = DeviceError::from(WireError {
            code: ErrorCode::from(-2),
            message: "bad path".into(),
        });
        assert!(matches!(err, DeviceError::InvalidArgument(m) if m == "bad path"));
    }

    #[test]
    fn transient_kinds() {
        assert!(DeviceError::NotReady(String::new()).is_transient());
        assert!(DeviceError::Timeout.is_transient());
        assert!(!DeviceError::Connection("reset".into()).is_transient());
        assert!(!DeviceError::InvalidArgument("path".into()).is_transient());
    }
}
