//! Telegram Bot API client.
//!
//! A thin `reqwest` wrapper around the handful of methods the bot uses.
//! Every call goes through the standard `{ok, result, description}`
//! envelope; a non-ok envelope becomes a [`TransportError::Api`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::update::Update;

/// Errors raised by the Bot API client.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request itself failed (network, TLS, timeout).
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Telegram answered with `ok: false`.
    #[error("telegram api error: {description}")]
    Api {
        /// The `description` field from the error envelope.
        description: String,
    },
}

/// Standard Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Slack in addition to the long-poll wait before the HTTP layer gives up.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

/// Telegram Bot API client.
#[derive(Clone)]
pub struct BotApi {
    http: reqwest::Client,
    base_url: String,
}

impl BotApi {
    /// Build a client for the public Bot API.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self::with_base_url(format!("https://api.telegram.org/bot{token}"))
    }

    /// Build a client against an explicit base URL (used by tests).
    #[must_use]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, TransportError> {
        let envelope: ApiResponse<T> = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if envelope.ok {
            if let Some(result) = envelope.result {
                return Ok(result);
            }
        }
        Err(TransportError::Api {
            description: envelope
                .description
                .unwrap_or_else(|| "malformed response".to_string()),
        })
    }

    /// Long-poll for the next batch of updates at `offset`.
    ///
    /// The server holds the request up to `wait`; the HTTP timeout is
    /// padded accordingly.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on network failure or an error
    /// envelope.
    pub async fn get_updates(
        &self,
        offset: i64,
        wait: Duration,
    ) -> Result<Vec<Update>, TransportError> {
        self.call(
            "getUpdates",
            serde_json::json!({
                "offset": offset,
                "timeout": wait.as_secs(),
                "allowed_updates": ["message", "callback_query"],
            }),
            wait + REQUEST_SLACK,
        )
        .await
    }

    /// Send a plain text message.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on network failure or an error
    /// envelope.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                serde_json::json!({"chat_id": chat_id, "text": text}),
                REQUEST_SLACK,
            )
            .await?;
        Ok(())
    }

    /// Send a message with an inline keyboard.
    ///
    /// `buttons` is rows of `(label, callback_data)` pairs.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on network failure or an error
    /// envelope.
    pub async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[Vec<(String, String)>],
    ) -> Result<(), TransportError> {
        let rows: Vec<Vec<serde_json::Value>> = buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(label, data)| {
                        serde_json::json!({"text": label, "callback_data": data})
                    })
                    .collect()
            })
            .collect();

        let _: serde_json::Value = self
            .call(
                "sendMessage",
                serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "reply_markup": {"inline_keyboard": rows},
                }),
                REQUEST_SLACK,
            )
            .await?;
        Ok(())
    }

    /// Acknowledge a callback query, optionally with a toast text.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on network failure or an error
    /// envelope.
    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = serde_json::json!({"callback_query_id": callback_id});
        if let Some(t) = text {
            body["text"] = serde_json::Value::String(t.to_string());
        }
        let _: serde_json::Value = self
            .call("answerCallbackQuery", body, REQUEST_SLACK)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_updates_parses_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getUpdates"))
            .and(body_partial_json(serde_json::json!({"offset": 10})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": [
                    {"update_id": 10, "message": {
                        "message_id": 1, "chat": {"id": 555}, "text": "hi"
                    }},
                    {"update_id": 11, "callback_query": {
                        "id": "cb", "from": {"id": 555}, "data": "feedback"
                    }}
                ]
            })))
            .mount(&server)
            .await;

        let api = BotApi::with_base_url(server.uri());
        let updates = api
            .get_updates(10, Duration::from_secs(0))
            .await
            .unwrap();

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 10);
        assert!(updates[1].callback_query.is_some());
    }

    #[tokio::test]
    async fn error_envelope_becomes_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let api = BotApi::with_base_url(server.uri());
        let err = api.send_message(1, "hello").await.unwrap_err();
        assert!(matches!(err, TransportError::Api { .. }));
    }
}
