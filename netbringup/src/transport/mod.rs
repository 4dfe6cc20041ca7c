//! Byte transport to a device's remote shell.
//!
//! The [`Transport`] trait is the seam between the session layer and the
//! wire: the telnet implementation talks TCP, tests plug in scripted devices.

pub mod config;
mod telnet;

pub use config::TelnetConfig;
pub use telnet::TelnetTransport;

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// A duplex byte channel with no framing.
pub trait Transport: Send {
    /// Write all bytes and flush.
    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Read whatever arrives within `timeout`.
    ///
    /// Returns an empty vector when nothing arrived. A peer that closed the
    /// connection is an error, not an empty read.
    fn read_chunk(&mut self, timeout: Duration) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Release the channel. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
