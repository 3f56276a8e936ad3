//! Device connection locators.
//!
//! A locator is either a bare address (`192.168.1.212`) or the full
//! `protocol://address:port` form. Missing parts fall back to
//! [`DEFAULT_PROTOCOL`] and [`DEFAULT_PORT`].

use std::fmt;
use std::str::FromStr;

use aurora_protocol::constants::{DEFAULT_PORT, DEFAULT_PROTOCOL};

use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceLocator {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl DeviceLocator {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            host: host.into(),
            port,
        }
    }

    pub fn parse(input: &str) -> Result<Self, DeviceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DeviceError::InvalidArgument("empty device locator".into()));
        }

        let (protocol, rest) = match input.split_once("://") {
            Some((proto, rest)) => (proto.to_ascii_lowercase(), rest),
            None => (DEFAULT_PROTOCOL.to_string(), input),
        };
        if protocol != DEFAULT_PROTOCOL {
            return Err(DeviceError::NotSupported(format!(
                "protocol {protocol:?} (only {DEFAULT_PROTOCOL} is supported)"
            )));
        }

        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    DeviceError::InvalidArgument(format!("invalid port in locator {input:?}"))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        if host.is_empty() || host.contains('/') || host.contains(char::is_whitespace) {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid address in locator {input:?}"
            )));
        }

        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
        })
    }

    /// `host:port` suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for DeviceLocator {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}
