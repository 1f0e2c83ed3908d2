use std::sync::Arc;
use tracing::info;

use super::InboundCommand;
use crate::camera::SourceState;
use crate::settings::{RuntimeSettings, SettingKey};
use crate::state::SharedState;
use crate::stats::StatsReport;

const DEFAULT_SUMMARY_HOURS: u32 = 24;
const MAX_SUMMARY_HOURS: u32 = 24 * 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Summary { hours: u32 },
    Scan,
    Reset,
    Settings,
    Set { key: String, value: String },
    Unknown(String),
}

impl Command {
    /// Malformed arguments map to the closest sensible command; `/set`
    /// without both arguments becomes `Unknown` so the caller gets usage help.
    pub fn parse(inbound: &InboundCommand) -> Self {
        match inbound.name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "status" => Command::Status,
            "summary" => {
                let hours = inbound
                    .args
                    .first()
                    .and_then(|h| h.parse::<u32>().ok())
                    .unwrap_or(DEFAULT_SUMMARY_HOURS)
                    .clamp(1, MAX_SUMMARY_HOURS);
                Command::Summary { hours }
            }
            "scan" | "snapshot" => Command::Scan,
            "reset" => Command::Reset,
            "settings" => Command::Settings,
            "set" if inbound.args.len() >= 2 => Command::Set {
                key: inbound.args[0].clone(),
                value: inbound.args[1..].join(" "),
            },
            other => Command::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Encode the latest frame and send it back.
    Snapshot,
}

/// Answers commands from shared state. Snapshot delivery is left to the channel.
pub struct CommandHandler {
    shared: Arc<SharedState>,
    settings: Arc<RuntimeSettings>,
}

impl CommandHandler {
    pub fn new(shared: Arc<SharedState>, settings: Arc<RuntimeSettings>) -> Self {
        Self { shared, settings }
    }

    pub fn handle(&self, command: &Command) -> Reply {
        let text = match command {
            Command::Start => "Watchpost sensing node\n\
                               System is online and monitoring.\n\n\
                               Use /help to see available commands."
                .to_string(),
            Command::Help => help_text(),
            Command::Status => StatsReport::new(&self.shared).status_short(),
            Command::Summary { hours } => StatsReport::new(&self.shared).summary(*hours),
            Command::Scan => return Reply::Snapshot,
            Command::Reset => self.reset(),
            Command::Settings => self.settings.summary().to_string(),
            Command::Set { key, value } => match self.settings.set_from_str(key, value) {
                Ok(applied) => {
                    info!("Setting changed remotely: {}", applied);
                    format!("Updated: {}", applied)
                }
                Err(e) => format!("{}\nKeys: {}", e, setting_names()),
            },
            Command::Unknown(name) if name == "set" => {
                format!("Usage: /set <key> <value>\nKeys: {}", setting_names())
            }
            Command::Unknown(name) => format!("Unknown command /{}. Try /help", name),
        };
        Reply::Text(text)
    }

    fn reset(&self) -> String {
        self.shared.reset_history();
        info!("Detection history cleared by operator");
        if self.shared.source_state() == SourceState::Disabled {
            self.shared.request_source_reset();
            "Detection history and stats cleared. Camera re-enable requested.".to_string()
        } else {
            "Detection history and stats cleared.".to_string()
        }
    }
}

fn help_text() -> String {
    "Commands:\n\
     /scan - Get current snapshot\n\
     /status - System status overview\n\
     /summary [hours] - Detection stats (default 24h)\n\
     /settings - Show runtime settings\n\
     /set <key> <value> - Change a runtime setting\n\
     /reset - Clear detection history\n\
     /help - Show this menu"
        .to_string()
}

fn setting_names() -> String {
    SettingKey::ALL
        .iter()
        .map(|key| key.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn inbound(text: &str) -> InboundCommand {
        InboundCommand::from_text(1, 1, text).unwrap()
    }

    fn handler() -> CommandHandler {
        CommandHandler::new(
            Arc::new(SharedState::new(10)),
            Arc::new(RuntimeSettings::from_config(&AgentConfig::default())),
        )
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&inbound("/snapshot")), Command::Scan);
        assert_eq!(Command::parse(&inbound("/summary")), Command::Summary { hours: 24 });
        assert_eq!(Command::parse(&inbound("/summary 6")), Command::Summary { hours: 6 });
        assert_eq!(Command::parse(&inbound("/summary 0")), Command::Summary { hours: 1 });
        assert_eq!(Command::parse(&inbound("/summary x")), Command::Summary { hours: 24 });
        assert_eq!(
            Command::parse(&inbound("/set classes person, car")),
            Command::Set {
                key: "classes".to_string(),
                value: "person, car".to_string()
            }
        );
        assert_eq!(Command::parse(&inbound("/set confidence")), Command::Unknown("set".to_string()));
    }

    #[test]
    fn test_set_updates_settings() {
        let handler = handler();
        let reply = handler.handle(&Command::parse(&inbound("/set stability_frames 4")));
        assert_eq!(reply, Reply::Text("Updated: stability_frames = 4".to_string()));
        assert_eq!(handler.settings.stability_frames(), 4);

        let Reply::Text(text) = handler.handle(&Command::parse(&inbound("/set nope 1"))) else {
            panic!("expected text reply");
        };
        assert!(text.contains("unknown setting"));
        assert!(text.contains("stability_frames"));
    }

    #[test]
    fn test_settings_reply_uses_cached_summary() {
        let handler = handler();
        let Reply::Text(text) = handler.handle(&Command::Settings) else {
            panic!("expected text reply");
        };
        assert!(text.starts_with("Runtime Settings (v0)"));
    }

    #[test]
    fn test_reset_requests_rearm_only_when_disabled() {
        let handler = handler();
        handler.handle(&Command::Reset);
        assert!(!handler.shared.take_source_reset_request());

        handler.shared.set_source_state(SourceState::Disabled);
        let Reply::Text(text) = handler.handle(&Command::Reset) else {
            panic!("expected text reply");
        };
        assert!(text.contains("re-enable"));
        assert!(handler.shared.take_source_reset_request());
    }

    #[test]
    fn test_scan_defers_to_channel() {
        assert_eq!(handler().handle(&Command::Scan), Reply::Snapshot);
    }
}
