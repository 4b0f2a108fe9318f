// ABOUTME: Server address parsing for the inference client factory
// ABOUTME: Recognizes the two transport schemes and applies the default server port

use crate::client::error::{ClientError, Result};
use std::fmt;

/// Default port an inference server listens on when the address omits one.
pub const DEFAULT_PORT: u16 = 8778;

/// Which wire protocol a parsed address selects.
///
/// The transport is fixed at parse time and drives the client factory:
/// `http://` addresses speak the HTTP control surface plus a WebSocket
/// stream channel, everything else speaks the proprietary length-prefixed
/// TCP protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Proprietary length-prefixed TCP framing (`asio://` or no scheme).
    TcpProprietary,
    /// HTTP control surface with a WebSocket data channel (`http://`).
    HttpWebsocket,
}

/// A parsed inference-server address: `[scheme://]host[:port]`.
///
/// Constructed once per client and immutable afterwards. The host is
/// resolved via DNS at connect time, not at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
    port: u16,
    transport: TransportKind,
}

impl ServerAddress {
    /// Parse a server address string.
    ///
    /// Recognized forms:
    /// - `host`, `host:port`: proprietary TCP transport
    /// - `asio://host`, `asio://host:port`: proprietary TCP transport
    /// - `http://host`, `http://host:port`: HTTP/WebSocket transport
    ///
    /// The port defaults to [`DEFAULT_PORT`] when omitted. An empty string,
    /// a bare scheme, or an out-of-range port fails with
    /// [`ClientError::BadParameter`].
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ClientError::BadParameter(
                "server address is empty".into(),
            ));
        }

        let (transport, rest) = if let Some(rest) = s.strip_prefix("http://") {
            (TransportKind::HttpWebsocket, rest)
        } else if let Some(rest) = s.strip_prefix("asio://") {
            (TransportKind::TcpProprietary, rest)
        } else {
            (TransportKind::TcpProprietary, s)
        };

        if rest.is_empty() {
            return Err(ClientError::BadParameter(format!(
                "server address '{s}' has no host"
            )));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port: u16 = port_str.parse().map_err(|_| {
                    ClientError::BadParameter(format!(
                        "invalid port '{port_str}' in server address '{s}'"
                    ))
                })?;
                if port == 0 {
                    return Err(ClientError::BadParameter(format!(
                        "port 0 is not usable in server address '{s}'"
                    )));
                }
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(ClientError::BadParameter(format!(
                "server address '{s}' has no host"
            )));
        }

        Ok(ServerAddress {
            host: host.to_string(),
            port,
            transport,
        })
    }

    /// Host name or literal address, without port.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port (explicit or defaulted).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Transport selected by the address scheme.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// `host:port` form used for socket connects and DNS resolution.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL of the HTTP control surface (`HttpWebsocket` only).
    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// URL of the WebSocket stream endpoint (`HttpWebsocket` only).
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}/v1/stream", self.host, self.port)
    }
}

impl fmt::Display for ServerAddress {
    /// Normalized form: the default port is made explicit, the scheme is
    /// kept for HTTP addresses and elided for TCP ones.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            TransportKind::HttpWebsocket => {
                write!(f, "http://{}:{}", self.host, self.port)
            }
            TransportKind::TcpProprietary => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
