//! Telnet transport over tokio TCP.
//!
//! Only as much of RFC 854 as console servers need: option negotiation is
//! answered (ECHO and SUPPRESS-GO-AHEAD accepted, everything else refused),
//! subnegotiations are skipped and data bytes are unescaped. Negotiation never
//! reaches the caller.

use std::time::Duration;

use bytes::BytesMut;
use log::{debug, trace};
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::Transport;
use super::config::TelnetConfig;
use crate::error::{Result, TransportError};

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;

/// Parser state carried across reads; a command may straddle two chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Telnet client transport.
pub struct TelnetTransport<S = TcpStream> {
    stream: S,
    read_buf: BytesMut,
    chunk_size: usize,
    state: ParseState,
    closed: bool,
}

impl TelnetTransport<TcpStream> {
    /// Open a TCP connection to the configured endpoint.
    pub async fn connect(config: &TelnetConfig) -> Result<Self> {
        debug!("connecting to {}", config.socket_addr());

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            host: config.host.clone(),
            port: config.port,
            timeout: config.connect_timeout,
        })?
        .map_err(|source| TransportError::ConnectionFailed {
            host: config.host.clone(),
            port: config.port,
            source,
        })?;

        stream.set_nodelay(true).map_err(TransportError::Io)?;

        Ok(Self::from_stream(stream, config.chunk_size))
    }
}

impl<S> TelnetTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-connected stream.
    pub fn from_stream(stream: S, chunk_size: usize) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
            state: ParseState::Data,
            closed: false,
        }
    }

    /// Split raw bytes into data and the negotiation replies they require.
    fn filter(&mut self, raw: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::with_capacity(raw.len());
        let mut replies = Vec::new();

        if self.state == ParseState::Data && memchr(IAC, raw).is_none() {
            data.extend(raw.iter().copied().filter(|&b| b != 0));
            return (data, replies);
        }

        for &byte in raw {
            self.state = match (self.state, byte) {
                (ParseState::Data, IAC) => ParseState::Iac,
                (ParseState::Data, 0) => ParseState::Data,
                (ParseState::Data, b) => {
                    data.push(b);
                    ParseState::Data
                }
                (ParseState::Iac, IAC) => {
                    data.push(IAC);
                    ParseState::Data
                }
                (ParseState::Iac, cmd @ (DO | DONT | WILL | WONT)) => ParseState::Negotiate(cmd),
                (ParseState::Iac, SB) => ParseState::Sub,
                (ParseState::Iac, _) => ParseState::Data,
                (ParseState::Negotiate(cmd), option) => {
                    if let Some(reply) = negotiation_reply(cmd, option) {
                        trace!("telnet: cmd {cmd} option {option} -> {reply}");
                        replies.extend_from_slice(&[IAC, reply, option]);
                    }
                    ParseState::Data
                }
                (ParseState::Sub, IAC) => ParseState::SubIac,
                (ParseState::Sub, _) => ParseState::Sub,
                (ParseState::SubIac, SE) => ParseState::Data,
                (ParseState::SubIac, _) => ParseState::Sub,
            };
        }

        (data, replies)
    }
}

/// Our answer to a peer's option command, if one is owed.
fn negotiation_reply(cmd: u8, option: u8) -> Option<u8> {
    match cmd {
        WILL if option == OPT_ECHO || option == OPT_SGA => Some(DO),
        WILL => Some(DONT),
        DO => Some(WONT),
        _ => None,
    }
}

/// Double every IAC byte in outgoing data.
fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

impl<S> Transport for TelnetTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::NotOpen.into());
        }
        if memchr(IAC, data).is_some() {
            self.stream.write_all(&escape(data)).await.map_err(TransportError::Io)?;
        } else {
            self.stream.write_all(data).await.map_err(TransportError::Io)?;
        }
        self.stream.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if self.closed {
            return Err(TransportError::NotOpen.into());
        }

        self.read_buf.reserve(self.chunk_size);
        let read = match tokio::time::timeout(timeout, self.stream.read_buf(&mut self.read_buf)).await {
            Err(_) => return Ok(Vec::new()),
            Ok(result) => result.map_err(TransportError::Io)?,
        };
        if read == 0 {
            return Err(TransportError::Closed.into());
        }

        let raw = self.read_buf.split();
        let (data, replies) = self.filter(&raw);
        if !replies.is_empty() {
            self.stream.write_all(&replies).await.map_err(TransportError::Io)?;
            self.stream.flush().await.map_err(TransportError::Io)?;
        }

        Ok(data)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The peer may already be gone; closing must still succeed.
        if let Err(e) = self.stream.shutdown().await {
            debug!("telnet: shutdown: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_negotiation_is_answered_and_stripped() {
        // DO TERMINAL-TYPE, WILL ECHO, then data.
        let mock = Builder::new()
            .read(b"\xff\xfd\x18\xff\xfb\x01login: ")
            .write(b"\xff\xfc\x18\xff\xfd\x01")
            .build();
        let mut transport = TelnetTransport::from_stream(mock, 1024);

        let data = transport.read_chunk(Duration::from_secs(1)).await.unwrap();
        assert_eq!(data, b"login: ");
    }

    #[tokio::test]
    async fn test_command_split_across_reads() {
        let mock = Builder::new()
            .read(b"abc\xff")
            .read(b"\xfd\x18def")
            .write(b"\xff\xfc\x18")
            .build();
        let mut transport = TelnetTransport::from_stream(mock, 1024);

        assert_eq!(transport.read_chunk(Duration::from_secs(1)).await.unwrap(), b"abc");
        assert_eq!(transport.read_chunk(Duration::from_secs(1)).await.unwrap(), b"def");
    }

    #[tokio::test]
    async fn test_subnegotiation_skipped_and_nul_dropped() {
        let mock = Builder::new()
            .read(b"\xff\xfa\x18\x01\xff\xf0Router>\r\0")
            .build();
        let mut transport = TelnetTransport::from_stream(mock, 1024);

        let data = transport.read_chunk(Duration::from_secs(1)).await.unwrap();
        assert_eq!(data, b"Router>\r");
    }

    #[tokio::test]
    async fn test_write_escapes_iac() {
        let mock = Builder::new().write(b"a\xff\xffb").build();
        let mut transport = TelnetTransport::from_stream(mock, 1024);
        transport.write_all(b"a\xffb").await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_is_closed_error() {
        let mock = Builder::new().build();
        let mut transport = TelnetTransport::from_stream(mock, 1024);

        let err = transport.read_chunk(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Transport(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = Builder::new().build();
        let mut transport = TelnetTransport::from_stream(mock, 1024);
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.write_all(b"x").await.is_err());
    }
}
