//! Telegram Bot API client: long-poll source, reactions and replies
//!
//! Every Bot API response is wrapped in `{ok, result, description}`;
//! `ok=false` becomes `RelayError::Telegram` carrying the description.

use crate::domain::error::RelayError;
use crate::domain::types::{timestamp_from_unix, ChatId, DeliveryKey, InboundMessage, MessageId, UpdateId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::secrets::Secret;
use crate::services::bot::Replier;
use crate::services::coordinator::Acknowledger;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Delay before retrying after a failed poll
const POLL_BACKOFF: Duration = Duration::from_secs(2);

/// Headroom on top of the long-poll timeout for the HTTP client
const POLL_TIMEOUT_HEADROOM_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Update {
    /// Text messages only; stickers, photos and edits are dropped
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let message = self.message?;
        let text = message.text?;
        Some(InboundMessage {
            update_id: UpdateId(self.update_id),
            chat_id: ChatId(message.chat.id),
            message_id: MessageId(message.message_id),
            text,
            sent_at: timestamp_from_unix(message.date),
        })
    }
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct ReactionType<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    emoji: &'a str,
}

#[derive(Debug, Serialize)]
struct SetReactionRequest<'a> {
    chat_id: i64,
    message_id: i64,
    reaction: [ReactionType<'a>; 1],
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

pub struct TelegramClient {
    client: Client,
    poll_client: Client,
    /// `{api_base}/bot{token}`
    bot_url: String,
    poll_timeout_secs: u64,
    reaction: String,
}

impl TelegramClient {
    pub fn new(config: &Config, token: &Secret) -> Result<Self, RelayError> {
        let build = |timeout: Duration| {
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| RelayError::Config(format!("failed to build telegram client: {}", e)))
        };

        Ok(Self {
            client: build(Duration::from_millis(config.telegram_timeout_ms()))?,
            poll_client: build(Duration::from_secs(config.poll_timeout_secs() + POLL_TIMEOUT_HEADROOM_SECS))?,
            bot_url: format!("{}/bot{}", config.telegram_api_base(), token.expose()),
            poll_timeout_secs: config.poll_timeout_secs(),
            reaction: config.reaction().to_string(),
        })
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        client: &Client,
        method: &str,
        body: &B,
    ) -> Result<T, RelayError> {
        let url = format!("{}/{}", self.bot_url, method);
        let response = client
            .post(&url)
            .json(body)
            .send()
            .await
            // without_url keeps the bot token out of the error text
            .map_err(|e| RelayError::Telegram(format!("{} failed: {}", method, e.without_url())))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RelayError::Telegram(format!("{} body unreadable: {}", method, e.without_url())))?;

        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| {
            RelayError::Telegram(format!("{} returned HTTP {} with unexpected body: {}", method, status.as_u16(), e))
        })?;

        if !envelope.ok {
            let description = envelope.description.unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(RelayError::Telegram(format!("{}: {}", method, description)));
        }
        envelope
            .result
            .ok_or_else(|| RelayError::Telegram(format!("{}: ok without result", method)))
    }

    /// One long-poll round. `offset` is the first update id still wanted.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, RelayError> {
        let body = GetUpdatesRequest { offset, timeout: self.poll_timeout_secs, allowed_updates: &["message"] };
        self.call(&self.poll_client, "getUpdates", &body).await
    }

    pub async fn react(&self, chat_id: ChatId, message_id: MessageId, emoji: &str) -> Result<(), RelayError> {
        let body = SetReactionRequest {
            chat_id: chat_id.0,
            message_id: message_id.0,
            reaction: [ReactionType { kind: "emoji", emoji }],
        };
        let _: bool = self.call(&self.client, "setMessageReaction", &body).await?;
        Ok(())
    }

    pub async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), RelayError> {
        let body = SendMessageRequest { chat_id: chat_id.0, text };
        let _: serde_json::Value = self.call(&self.client, "sendMessage", &body).await?;
        Ok(())
    }

    /// Long-poll until shutdown, forwarding text messages into `tx`.
    ///
    /// Errors back off and retry. Returns when shutdown is signalled or the
    /// receiving side is gone.
    pub async fn poll(
        &self,
        tx: mpsc::Sender<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) {
        let mut offset: Option<i64> = None;
        info!(poll_timeout_secs = %self.poll_timeout_secs, "telegram_poller_started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = tokio::select! {
                result = self.get_updates(offset) => result,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let updates = match result {
                Ok(updates) => updates,
                Err(e) => {
                    metrics.record_poll_error();
                    warn!(error = %e, "telegram_poll_failed");
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_BACKOFF) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);
                let Some(message) = update.into_inbound() else {
                    continue;
                };
                debug!(
                    update_id = %message.update_id,
                    chat_id = %message.chat_id,
                    message_id = %message.message_id,
                    "telegram_message_received"
                );
                if tx.send(message).await.is_err() {
                    info!("telegram_poller_receiver_closed");
                    return;
                }
            }
        }

        info!("telegram_poller_shutdown");
    }
}

#[async_trait]
impl Acknowledger for TelegramClient {
    async fn acknowledge(&self, key: DeliveryKey) -> Result<(), RelayError> {
        self.react(key.chat_id, key.message_id, &self.reaction).await
    }
}

#[async_trait]
impl Replier for TelegramClient {
    async fn reply(&self, chat_id: ChatId, text: &str) -> Result<(), RelayError> {
        self.send_text(chat_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:ABC";

    fn client(server: &MockServer) -> TelegramClient {
        let config = Config::default().with_api_bases(&server.uri());
        TelegramClient::new(&config, &Secret::new(TOKEN)).unwrap()
    }

    fn updates_body() -> serde_json::Value {
        serde_json::json!({
            "ok": true,
            "result": [
                {
                    "update_id": 500,
                    "message": {
                        "message_id": 7,
                        "date": 1_700_000_000,
                        "chat": {"id": 42, "type": "private"},
                        "from": {"id": 42, "is_bot": false, "first_name": "A"},
                        "text": "100₽ coffee"
                    }
                },
                {
                    "update_id": 501,
                    "message": {
                        "message_id": 8,
                        "date": 1_700_000_010,
                        "chat": {"id": 42, "type": "private"},
                        "sticker": {"file_id": "x"}
                    }
                }
            ]
        })
    }

    #[tokio::test]
    async fn test_get_updates_parses_text_messages() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/bot{}/getUpdates", TOKEN)))
            .and(body_partial_json(serde_json::json!({"allowed_updates": ["message"], "timeout": 30})))
            .respond_with(ResponseTemplate::new(200).set_body_json(updates_body()))
            .mount(&server)
            .await;

        let updates = client(&server).get_updates(None).await.unwrap();
        assert_eq!(updates.len(), 2);

        let messages: Vec<_> = updates.into_iter().filter_map(Update::into_inbound).collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].update_id, UpdateId(500));
        assert_eq!(messages[0].chat_id, ChatId(42));
        assert_eq!(messages[0].message_id, MessageId(7));
        assert_eq!(messages[0].text, "100₽ coffee");
        assert_eq!(messages[0].sent_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_ok_envelope_without_result_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/bot{}/sendMessage", TOKEN)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let err = client(&server).send_text(ChatId(42), "hi").await.unwrap_err();
        match err {
            RelayError::Telegram(msg) => assert!(msg.contains("ok without result"), "{msg}"),
            other => panic!("Expected Telegram error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_ok_envelope_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/bot{}/getUpdates", TOKEN)))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 401,
                "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_updates(None).await.unwrap_err();
        match err {
            RelayError::Telegram(msg) => {
                assert!(msg.contains("Unauthorized"), "{msg}");
                assert!(!msg.contains(TOKEN), "token leaked: {msg}");
            }
            other => panic!("Expected Telegram error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_acknowledge_sends_reaction() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/bot{}/setMessageReaction", TOKEN)))
            .and(body_json(serde_json::json!({
                "chat_id": 42,
                "message_id": 7,
                "reaction": [{"type": "emoji", "emoji": "👍"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let key = DeliveryKey { chat_id: ChatId(42), message_id: MessageId(7) };
        client(&server).acknowledge(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/bot{}/sendMessage", TOKEN)))
            .and(body_json(serde_json::json!({"chat_id": 42, "text": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"message_id": 9, "date": 1_700_000_000, "chat": {"id": 42}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send_text(ChatId(42), "hi").await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_forwards_and_advances_offset() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/bot{}/getUpdates", TOKEN)))
            .and(body_partial_json(serde_json::json!({"offset": 502})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "result": []}))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/getUpdates", TOKEN)))
            .respond_with(ResponseTemplate::new(200).set_body_json(updates_body()))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let telegram = Arc::new(client(&server));
        let (tx, mut rx) = mpsc::channel(10);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = {
            let telegram = telegram.clone();
            tokio::spawn(async move { telegram.poll(tx, shutdown_rx, Arc::new(Metrics::new())).await })
        };

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message_id, MessageId(7));

        // Wait until the poller has asked for updates past 501
        let mut asked_past = false;
        for _ in 0..50 {
            let requests = server.received_requests().await.unwrap_or_default();
            asked_past = requests.iter().any(|r| {
                serde_json::from_slice::<serde_json::Value>(&r.body)
                    .map(|b| b["offset"] == 502)
                    .unwrap_or(false)
            });
            if asked_past {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(asked_past);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), poller).await.unwrap().unwrap();
    }
}
