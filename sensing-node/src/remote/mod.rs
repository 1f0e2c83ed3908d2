/// Remote control (Remote Control System)
///
/// Operators talk to the node through a chat bot. The remote loop long-polls
/// for commands, answers from SharedState and RuntimeSettings, and keeps its
/// own connection state machine so sensing never depends on the network.
/// - backoff:    capped exponential reconnect schedule
/// - rate_limit: per caller and command throttle
/// - commands:   parsing and text replies
/// - encode:     snapshot JPEG worker pool
/// - channel:    the blocking inbound-command loop
/// - telegram:   Bot HTTP API client
pub mod backoff;
pub mod channel;
pub mod commands;
pub mod encode;
pub mod rate_limit;
pub mod telegram;

pub use backoff::{BackoffPolicy, ConnectionManager, ConnectionState};
pub use channel::{spawn_remote, RemoteChannel};
pub use commands::{Command, CommandHandler, Reply};
pub use encode::{encode_jpeg, EncodeOutcome, EncodePool};
pub use rate_limit::RateLimiter;
pub use telegram::TelegramClient;

use std::time::Duration;

use crate::error::Result;

/// One slash command received from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub caller: i64,
    pub chat: i64,
    pub name: String,
    pub args: Vec<String>,
}

impl InboundCommand {
    /// Parses `/name@bot arg1 arg2`. Plain text yields `None`.
    pub fn from_text(caller: i64, chat: i64, text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            caller,
            chat,
            name,
            args: parts.map(str::to_string).collect(),
        })
    }
}

/// Blocking messaging platform client. Every call may fail on network errors.
pub trait MessagingClient: Send {
    fn connect(&mut self) -> Result<()>;
    /// Waits at most `timeout` for new commands.
    fn long_poll(&mut self, timeout: Duration) -> Result<Vec<InboundCommand>>;
    fn send_text(&mut self, chat: i64, text: &str) -> Result<()>;
    fn send_payload(&mut self, chat: i64, bytes: Vec<u8>, caption: &str) -> Result<()>;
}
