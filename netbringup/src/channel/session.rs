//! Deadline-bounded text session over a [`Transport`].

use std::time::Duration;

use log::{debug, trace};
use tokio::time::Instant;

use super::buffer::PatternBuffer;
use super::patterns::Pattern;
use crate::error::{ChannelError, Result, TransportError};
use crate::transport::{TelnetConfig, TelnetTransport, Transport};

/// Interactive session with one device's remote shell.
///
/// Output is accumulated in a [`PatternBuffer`] and only discarded when a
/// match is consumed. Every read is bounded by a deadline, so callers can
/// always bound their total wait.
pub struct Session<T> {
    transport: T,
    config: TelnetConfig,
    buffer: PatternBuffer,
    is_open: bool,
}

impl Session<TelnetTransport> {
    /// Connect to the device's telnet line.
    pub async fn connect(config: TelnetConfig) -> Result<Self> {
        let transport = TelnetTransport::connect(&config).await?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> Session<T> {
    /// Wrap an already-open transport.
    pub fn new(transport: T, config: TelnetConfig) -> Self {
        Self {
            buffer: PatternBuffer::new(config.search_depth),
            transport,
            config,
            is_open: true,
        }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn config(&self) -> &TelnetConfig {
        &self.config
    }

    pub fn buffer(&self) -> &PatternBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PatternBuffer {
        &mut self.buffer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `text` followed by the line terminator, then give the device the
    /// configured grace period to start processing.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        self.write_line_inner(text).await?;
        trace!("{}: >> {:?}", self.config.host, text);
        Ok(())
    }

    /// Like [`write_line`](Self::write_line) but never logs the text.
    pub async fn write_hidden(&mut self, text: &str) -> Result<()> {
        self.write_line_inner(text).await?;
        trace!("{}: >> ********", self.config.host);
        Ok(())
    }

    async fn write_line_inner(&mut self, text: &str) -> Result<()> {
        if !self.is_open {
            return Err(TransportError::NotOpen.into());
        }
        let mut line = String::with_capacity(text.len() + self.config.line_terminator.len());
        line.push_str(text);
        line.push_str(&self.config.line_terminator);
        self.transport.write_all(line.as_bytes()).await?;
        tokio::time::sleep(self.config.write_grace).await;
        Ok(())
    }

    /// Collect whatever the device sends within `timeout`.
    ///
    /// Returns early once data has arrived and the device has gone quiet for
    /// the configured quiet period. May return an empty string.
    pub async fn read_available(&mut self, timeout: Duration) -> Result<String> {
        if !self.is_open {
            return Err(TransportError::NotOpen.into());
        }
        let deadline = Instant::now() + timeout;
        let mut collected = String::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let slice = if collected.is_empty() {
                remaining
            } else {
                remaining.min(self.config.quiet_period)
            };

            let chunk = self.transport.read_chunk(slice).await?;
            if chunk.is_empty() {
                if !collected.is_empty() {
                    break;
                }
                continue;
            }
            collected.push_str(&self.buffer.extend(&chunk));
        }

        if !collected.is_empty() {
            trace!("{}: << {:?}", self.config.host, collected);
        }
        Ok(collected)
    }

    /// Wait until `pattern` matches the accumulated buffer.
    ///
    /// On success the buffer is consumed through the end of the match and the
    /// consumed text is returned. A match already in the buffer returns
    /// without reading. On timeout the buffer is left intact and the error
    /// carries a copy of it.
    pub async fn wait_for_pattern(&mut self, pattern: &Pattern, timeout: Duration) -> Result<String> {
        if let Some(end) = self.buffer.find(pattern) {
            return Ok(self.buffer.consume_through(end));
        }
        if !self.is_open {
            return Err(TransportError::NotOpen.into());
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(
                    "{}: pattern {:?} not seen within {:?}, tail {:?}",
                    self.config.host,
                    pattern.as_str(),
                    timeout,
                    self.buffer.tail(80)
                );
                return Err(ChannelError::PatternTimeout {
                    pattern: pattern.as_str().to_string(),
                    timeout,
                    buffer: self.buffer.as_str().to_string(),
                }
                .into());
            }

            let chunk = self
                .transport
                .read_chunk(remaining.min(self.config.poll_interval))
                .await?;
            if chunk.is_empty() {
                continue;
            }
            self.buffer.extend(&chunk);

            if let Some(end) = self.buffer.find(pattern) {
                return Ok(self.buffer.consume_through(end));
            }
        }
    }

    /// Send a line and wait for the pattern that should follow it.
    pub async fn send_and_wait(
        &mut self,
        text: &str,
        pattern: &Pattern,
        timeout: Duration,
    ) -> Result<String> {
        self.write_line(text).await?;
        self.wait_for_pattern(pattern, timeout).await
    }

    /// Close the session. Safe to call more than once and after failures.
    pub async fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        self.transport.close().await
    }
}
