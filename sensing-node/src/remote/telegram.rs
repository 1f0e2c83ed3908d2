//! Telegram Bot HTTP API client over blocking reqwest.

use reqwest::blocking::{multipart, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::{InboundCommand, MessagingClient};
use crate::config::RemoteConfig;
use crate::error::{AgentError, Result};

/// Slack added to the HTTP timeout on top of the server-side long-poll wait.
const POLL_GRACE: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

pub struct TelegramClient {
    http: Client,
    endpoint: String,
    offset: i64,
}

impl TelegramClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.bot_token),
            offset: 0,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    fn check<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<Option<T>> {
        let body: ApiResponse<T> = response.json()?;
        if body.ok {
            Ok(body.result)
        } else {
            Err(AgentError::MessagingError(
                body.description.unwrap_or_else(|| "request rejected".to_string()),
            ))
        }
    }
}

/// Converts a getUpdates result into commands, returning the next offset.
fn parse_updates(updates: Vec<Update>, offset: i64) -> (Vec<InboundCommand>, i64) {
    let mut next = offset;
    let mut commands = Vec::new();
    for update in updates {
        next = next.max(update.update_id + 1);
        let Some(message) = update.message else { continue };
        let (Some(from), Some(text)) = (message.from, message.text) else {
            continue;
        };
        if let Some(command) = InboundCommand::from_text(from.id, message.chat.id, &text) {
            commands.push(command);
        }
    }
    (commands, next)
}

impl MessagingClient for TelegramClient {
    fn connect(&mut self) -> Result<()> {
        let response = self.http.get(self.url("getMe")).send()?;
        let me: Option<User> = Self::check(response)?;
        let name = me
            .and_then(|u| u.username)
            .unwrap_or_else(|| "unknown".to_string());
        info!("Telegram bot @{} connected", name);
        Ok(())
    }

    fn long_poll(&mut self, timeout: Duration) -> Result<Vec<InboundCommand>> {
        let response = self
            .http
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", self.offset.to_string()),
                ("timeout", timeout.as_secs().to_string()),
            ])
            .timeout(timeout + POLL_GRACE)
            .send()?;
        let updates: Vec<Update> = Self::check(response)?.unwrap_or_default();
        let (commands, next) = parse_updates(updates, self.offset);
        self.offset = next;
        if !commands.is_empty() {
            debug!("Received {} commands", commands.len());
        }
        Ok(commands)
    }

    fn send_text(&mut self, chat: i64, text: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("sendMessage"))
            .json(&json!({ "chat_id": chat, "text": text }))
            .send()?;
        Self::check::<serde_json::Value>(response).map(|_| ())
    }

    fn send_payload(&mut self, chat: i64, bytes: Vec<u8>, caption: &str) -> Result<()> {
        let photo = multipart::Part::bytes(bytes)
            .file_name("snapshot.jpg")
            .mime_str("image/jpeg")?;
        let form = multipart::Form::new()
            .text("chat_id", chat.to_string())
            .text("caption", caption.to_string())
            .part("photo", photo);
        let response = self.http.post(self.url("sendPhoto")).multipart(form).send()?;
        Self::check::<serde_json::Value>(response).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_updates_advances_offset() {
        let body = r#"{"ok": true, "result": [
            {"update_id": 10, "message": {"chat": {"id": 5}, "from": {"id": 77}, "text": "/status"}},
            {"update_id": 11, "message": {"chat": {"id": 5}, "from": {"id": 77}, "text": "hi"}},
            {"update_id": 12},
            {"update_id": 13, "message": {"chat": {"id": 6}, "from": {"id": 78, "username": "op"}, "text": "/set confidence 0.4"}}
        ]}"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        assert!(response.ok);

        let (commands, next) = parse_updates(response.result.unwrap(), 0);
        assert_eq!(next, 14);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].name, "status");
        assert_eq!(commands[0].caller, 77);
        assert_eq!(commands[1].chat, 6);
        assert_eq!(commands[1].args, vec!["confidence".to_string(), "0.4".to_string()]);
    }

    #[test]
    fn test_empty_poll_keeps_offset() {
        let (commands, next) = parse_updates(vec![], 42);
        assert!(commands.is_empty());
        assert_eq!(next, 42);
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let config = RemoteConfig {
            api_base: "http://localhost:8081/".to_string(),
            bot_token: "123:abc".to_string(),
            ..RemoteConfig::default()
        };
        let client = TelegramClient::new(&config).unwrap();
        assert_eq!(client.url("getMe"), "http://localhost:8081/bot123:abc/getMe");
    }
}
