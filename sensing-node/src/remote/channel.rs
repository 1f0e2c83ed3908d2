//! The remote-control loop.
//!
//! A blocking loop around the messaging client: long-poll for commands,
//! answer them, and ship finished snapshots. Network failures go through the
//! connection manager's backoff; once it disables, the loop returns and the
//! node keeps sensing without remote control.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::backoff::{BackoffPolicy, ConnectionManager, ConnectionState};
use super::commands::{Command, CommandHandler, Reply};
use super::encode::EncodePool;
use super::rate_limit::RateLimiter;
use super::telegram::TelegramClient;
use super::{InboundCommand, MessagingClient};
use crate::clock::Clock;
use crate::config::RemoteConfig;
use crate::error::Result;
use crate::settings::RuntimeSettings;
use crate::state::SharedState;
use crate::worker::Worker;
use crate::Shutdown;

/// Backoff sleeps are sliced so shutdown is noticed within this bound.
const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Starts the Telegram remote loop on its own `remote` thread.
///
/// The HTTP client is built and dropped on that thread: reqwest's blocking
/// client must never live on an async runtime thread. Setup failures are
/// logged and leave the node running without remote control.
pub fn spawn_remote(
    config: RemoteConfig,
    shared: Arc<SharedState>,
    settings: Arc<RuntimeSettings>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
) -> Result<Worker> {
    Worker::spawn("remote", move || {
        let client = match TelegramClient::new(&config) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build Telegram client: {}", e);
                return;
            }
        };
        let encoder = match EncodePool::new(config.encode_workers, config.jpeg_quality) {
            Ok(encoder) => encoder,
            Err(e) => {
                error!("Failed to start snapshot encoders: {}", e);
                return;
            }
        };
        RemoteChannel::new(
            Box::new(client),
            shared,
            settings,
            encoder,
            config.authorized_user_id,
            config.poll_timeout(),
            clock,
        )
        .run(shutdown);
    })
}

pub struct RemoteChannel {
    client: Box<dyn MessagingClient>,
    handler: CommandHandler,
    shared: Arc<SharedState>,
    settings: Arc<RuntimeSettings>,
    encoder: EncodePool,
    connection: ConnectionManager,
    limiter: RateLimiter,
    authorized_user: Option<i64>,
    poll_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RemoteChannel {
    pub fn new(
        client: Box<dyn MessagingClient>,
        shared: Arc<SharedState>,
        settings: Arc<RuntimeSettings>,
        encoder: EncodePool,
        authorized_user: Option<i64>,
        poll_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let snapshot = settings.snapshot();
        if authorized_user.is_none() {
            warn!("No authorized user configured; every caller is accepted");
        }
        Self {
            client,
            handler: CommandHandler::new(Arc::clone(&shared), Arc::clone(&settings)),
            shared,
            connection: ConnectionManager::new(BackoffPolicy::from_snapshot(&snapshot)),
            limiter: RateLimiter::new(snapshot.rate_limit_window()),
            settings,
            encoder,
            authorized_user,
            poll_timeout,
            clock,
        }
    }

    pub fn run(mut self, shutdown: Shutdown) {
        info!("Remote control loop started");
        while !shutdown.is_triggered() {
            if !self.turn() {
                break;
            }
        }
        self.flush_payloads();
        info!("Remote control loop stopped");
    }

    /// One pass of the connection state machine. Returns `false` once the
    /// channel is disabled.
    pub fn turn(&mut self) -> bool {
        self.apply_settings();
        self.flush_payloads();

        let now = self.clock.now();
        match self.connection.poll(now) {
            ConnectionState::Disabled => {
                error!("Remote channel disabled; remote control is unavailable");
                return false;
            }
            ConnectionState::BackingOff { .. } => {
                let pause = self.connection.remaining(now).min(SLEEP_SLICE);
                self.clock.sleep(pause);
                self.connection.poll(self.clock.now());
            }
            ConnectionState::Connecting => match self.client.connect() {
                Ok(()) => self.connection.on_connected(),
                Err(e) => {
                    warn!("Remote connect failed: {}", e);
                    self.connection.on_failure(self.clock.now());
                }
            },
            ConnectionState::Connected => match self.client.long_poll(self.poll_timeout) {
                Ok(commands) => {
                    self.connection.on_poll_ok();
                    for command in commands {
                        self.dispatch(command);
                    }
                }
                Err(e) => {
                    warn!("Remote poll failed: {}", e);
                    self.connection.on_failure(self.clock.now());
                }
            },
        }
        !self.connection.is_disabled()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    fn apply_settings(&mut self) {
        let snapshot = self.settings.snapshot();
        self.connection
            .set_policy(BackoffPolicy::from_snapshot(&snapshot));
        self.limiter.set_window(snapshot.rate_limit_window());
    }

    #[instrument(skip(self, command), level = "debug", fields(name = %command.name))]
    fn dispatch(&mut self, command: InboundCommand) {
        if let Some(allowed) = self.authorized_user {
            if command.caller != allowed {
                warn!("Unauthorized access attempt from ID: {}", command.caller);
                return;
            }
        }

        if !self
            .limiter
            .check(command.caller, &command.name, self.clock.now())
        {
            warn!("Rate limited /{} from {}", command.name, command.caller);
            self.reply(command.chat, "Slow down, try again in a moment.");
            return;
        }

        info!("Command /{} from {}", command.name, command.caller);
        match self.handler.handle(&Command::parse(&command)) {
            Reply::Text(text) => self.reply(command.chat, &text),
            Reply::Snapshot => self.request_snapshot(command.chat),
        }
    }

    fn request_snapshot(&mut self, chat: i64) {
        let Some((frame, detections)) = self.shared.latest_frame_with_detections() else {
            self.reply(chat, "No frame available (camera offline?)");
            return;
        };

        let caption = if detections.is_empty() {
            format!("Snapshot #{}", frame.sequence)
        } else {
            format!(
                "Snapshot #{}: {}",
                frame.sequence,
                detections.labels().collect::<Vec<_>>().join(", ")
            )
        };
        self.encoder.submit(chat, frame, caption);
    }

    fn flush_payloads(&mut self) {
        for outcome in self.encoder.drain() {
            match outcome.result {
                Ok(bytes) => {
                    if let Err(e) = self.client.send_payload(outcome.chat, bytes, &outcome.caption) {
                        warn!("Failed to send snapshot: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Snapshot encoding failed: {}", e);
                    self.reply(outcome.chat, "Snapshot failed to encode.");
                }
            }
        }
    }

    fn reply(&mut self, chat: i64, text: &str) {
        if let Err(e) = self.client.send_text(chat, text) {
            warn!("Failed to send reply: {}", e);
        }
    }
}
