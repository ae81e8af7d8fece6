//! Transport enum and the parameters that only apply to some variants

use serde::{Deserialize, Serialize};

/// Wire transport a tunnel is configured to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Tcp,
    Udp,
    Ws,
    Wss,
    TcpMux,
    WsMux,
    WssMux,
}

impl Transport {
    /// Whether this variant layers a multiplexer over the raw transport.
    pub fn is_mux(&self) -> bool {
        matches!(self, Transport::TcpMux | Transport::WsMux | Transport::WssMux)
    }

    /// Whether this variant requires TLS parameters (I2).
    pub fn requires_tls(&self) -> bool {
        matches!(self, Transport::Wss | Transport::WssMux)
    }

    /// Whether this variant is WebSocket-based (as opposed to raw TCP/UDP).
    pub fn is_websocket(&self) -> bool {
        matches!(self, Transport::Ws | Transport::Wss | Transport::WsMux | Transport::WssMux)
    }
}

/// Multiplexing parameters, meaningful only when `transport.is_mux()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxParams {
    pub streams: u16,
    pub frame_size: u32,
    pub receive_buffer: u32,
    pub keepalive_period_secs: u32,
}

impl Default for MuxParams {
    fn default() -> Self {
        Self {
            streams: 8,
            frame_size: 16 * 1024,
            receive_buffer: 256 * 1024,
            keepalive_period_secs: 30,
        }
    }
}

impl MuxParams {
    pub const MIN_STREAMS: u16 = 1;
    pub const MAX_STREAMS: u16 = 64;
    pub const MIN_FRAME_SIZE: u32 = 1024;
    pub const MAX_FRAME_SIZE: u32 = 65536;
    pub const MIN_RECEIVE_BUFFER: u32 = 65536;
    pub const MIN_KEEPALIVE_SECS: u32 = 5;
    pub const MAX_KEEPALIVE_SECS: u32 = 300;

    pub fn validate(&self) -> Result<(), String> {
        if !(Self::MIN_STREAMS..=Self::MAX_STREAMS).contains(&self.streams) {
            return Err(format!(
                "streams must be in {}..={}, got {}",
                Self::MIN_STREAMS,
                Self::MAX_STREAMS,
                self.streams
            ));
        }
        if !(Self::MIN_FRAME_SIZE..=Self::MAX_FRAME_SIZE).contains(&self.frame_size) {
            return Err(format!(
                "frame-size must be in {}..={}, got {}",
                Self::MIN_FRAME_SIZE,
                Self::MAX_FRAME_SIZE,
                self.frame_size
            ));
        }
        if self.receive_buffer < Self::MIN_RECEIVE_BUFFER {
            return Err(format!(
                "receive-buffer must be >= {}, got {}",
                Self::MIN_RECEIVE_BUFFER,
                self.receive_buffer
            ));
        }
        if !(Self::MIN_KEEPALIVE_SECS..=Self::MAX_KEEPALIVE_SECS).contains(&self.keepalive_period_secs) {
            return Err(format!(
                "keepalive-period must be in {}..={}, got {}",
                Self::MIN_KEEPALIVE_SECS,
                Self::MAX_KEEPALIVE_SECS,
                self.keepalive_period_secs
            ));
        }
        Ok(())
    }
}

/// TLS parameters, meaningful only when `transport.requires_tls()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsParams {
    pub cert_path: String,
    pub key_path: String,
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}
