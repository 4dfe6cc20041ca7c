//! Scripted in-memory device for unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::transport::Transport;

/// A device that answers written lines with canned output.
///
/// Each rule maps an exact line (terminator stripped) to a sequence of
/// replies; the last reply repeats once the sequence is exhausted.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    pending: VecDeque<Vec<u8>>,
    rules: Vec<(String, VecDeque<String>)>,
    partial: String,
    pub written: Vec<String>,
    pub reads: usize,
    pub closed: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output available before anything is written.
    pub fn initial(mut self, output: &str) -> Self {
        self.pending.push_back(output.as_bytes().to_vec());
        self
    }

    pub fn on_line(self, line: &str, reply: &str) -> Self {
        self.on_line_seq(line, &[reply])
    }

    pub fn on_line_seq(mut self, line: &str, replies: &[&str]) -> Self {
        self.rules.push((
            line.to_string(),
            replies.iter().map(|r| r.to_string()).collect(),
        ));
        self
    }

    pub fn count_written(&self, line: &str) -> usize {
        self.written.iter().filter(|l| *l == line).count()
    }

    fn respond(&mut self, line: &str) {
        if let Some((_, replies)) = self.rules.iter_mut().find(|(l, _)| l == line) {
            let reply = if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            };
            if let Some(reply) = reply {
                if !reply.is_empty() {
                    self.pending.push_back(reply.into_bytes());
                }
            }
        }
    }
}

impl Transport for ScriptedTransport {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::NotOpen.into());
        }
        self.partial.push_str(&String::from_utf8_lossy(data));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            self.respond(&line);
            self.written.push(line);
        }
        Ok(())
    }

    async fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if self.closed {
            return Err(TransportError::NotOpen.into());
        }
        self.reads += 1;
        match self.pending.pop_front() {
            Some(chunk) => Ok(chunk),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
