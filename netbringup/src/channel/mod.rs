//! Session layer: output accumulation and prompt matching.
//!
//! This module turns a raw byte [`Transport`](crate::transport::Transport)
//! into a line-oriented session that can wait for prompts under deadlines.

mod buffer;
mod patterns;
mod session;

pub use buffer::PatternBuffer;
pub use patterns::{Pattern, SHELL_PROMPT};
pub use session::Session;
