//! Remote shell connection configuration.

use std::time::Duration;

/// Telnet connection configuration.
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// Target host (hostname or IP address of the console server).
    pub host: String,

    /// Telnet port of the device line.
    pub port: u16,

    /// Bound on TCP connect plus initial negotiation.
    pub connect_timeout: Duration,

    /// Pause after each write so the device can start processing.
    pub write_grace: Duration,

    /// Upper bound on a single socket read.
    pub chunk_size: usize,

    /// `read_available` returns once the device has been silent this long.
    pub quiet_period: Duration,

    /// Sub-deadline for each read inside `wait_for_pattern`.
    pub poll_interval: Duration,

    /// Appended by `write_line`.
    pub line_terminator: String,

    /// How many trailing bytes prompt searches look at.
    pub search_depth: usize,
}

impl TelnetConfig {
    /// Create a configuration with default timings for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(30),
            write_grace: Duration::from_millis(300),
            chunk_size: 8192,
            quiet_period: Duration::from_millis(500),
            poll_interval: Duration::from_millis(500),
            line_terminator: "\n".to_string(),
            search_depth: 1000,
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_grace(mut self, grace: Duration) -> Self {
        self.write_grace = grace;
        self
    }
}
