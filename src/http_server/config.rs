//! HTTP Server Configuration
//!
//! Where the server listens and which path upgrades to the live-query
//! WebSocket.

use std::io;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket upgrade path (default: "/parse")
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,
}

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_websocket_path() -> String {
    "/parse".to_string()
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            websocket_path: default_websocket_path(),
        }
    }
}

impl HttpServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// `host:port` as configured
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parsed bind address. `host` must be an IP literal.
    pub fn bind_addr(&self) -> io::Result<SocketAddr> {
        self.socket_addr().parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid bind address '{}': {}", self.socket_addr(), e),
            )
        })
    }

    /// Checks the settings axum would otherwise reject at router build time
    /// or at bind time.
    pub fn validate(&self) -> Result<(), String> {
        if !self.websocket_path.starts_with('/') {
            return Err(format!(
                "Invalid websocket_path: '{}'. It must start with '/'.",
                self.websocket_path
            ));
        }
        if self.websocket_path.contains(':') || self.websocket_path.contains('*') {
            return Err(format!(
                "Invalid websocket_path: '{}'. Route parameters are not allowed.",
                self.websocket_path
            ));
        }
        self.bind_addr().map(|_| ()).map_err(|e| e.to_string())
    }
}
