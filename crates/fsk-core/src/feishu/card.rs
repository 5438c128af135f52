//! Interactive card messages.

use serde_json::{Value, json};

use crate::Result;
use crate::config::CardConfig;
use crate::feishu::client::FeishuClient;

const MESSAGES_PATH: &str = "/im/v1/messages";

/// Build a schema 2.0 card with a plain-text header and one markdown body
/// element. `config` becomes the card's `config` object when given.
#[must_use]
pub fn build_card(title: &str, markdown: &str, template: &str, config: Option<Value>) -> Value {
    let mut card = json!({
        "schema": "2.0",
        "header": {
            "title": { "tag": "plain_text", "content": title },
            "template": template,
        },
        "body": {
            "elements": [{ "tag": "markdown", "content": markdown }]
        }
    });
    if let Some(config) = config {
        card["config"] = config;
    }
    card
}

/// Card config for wide-screen layout.
#[must_use]
pub fn wide_screen_config() -> Value {
    json!({ "wide_screen_mode": true })
}

/// Turn literal `\n` sequences typed on a command line into newlines.
#[must_use]
pub fn unescape_newlines(text: &str) -> String {
    text.replace("\\n", "\n")
}

/// Message API wrapper for cards.
#[derive(Debug, Clone)]
pub struct CardClient {
    client: FeishuClient,
    config: CardConfig,
}

impl CardClient {
    /// Wrap an authorized client.
    #[must_use]
    pub const fn new(client: FeishuClient, config: CardConfig) -> Self {
        Self { client, config }
    }

    /// Header color from configuration.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.config.template
    }

    /// Send `card` and return the message id.
    ///
    /// The receiver defaults to the credential's `open_id`, and
    /// `receive_id_type` to the configured one.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` when no receiver is known, or token,
    /// transport and platform errors.
    pub async fn send_card(
        &self,
        card: &Value,
        receive_id: Option<&str>,
        receive_id_type: Option<&str>,
    ) -> Result<String> {
        let (receive_id, receive_id_type) = match receive_id {
            Some(id) => (
                id.to_string(),
                receive_id_type.unwrap_or(&self.config.receive_id_type),
            ),
            None => (
                self.client.credentials()?.require_open_id()?.to_string(),
                "open_id",
            ),
        };

        let body = json!({
            "receive_id": receive_id,
            "msg_type": "interactive",
            "content": serde_json::to_string(card)?,
        });
        let data = self
            .client
            .post(
                MESSAGES_PATH,
                &[("receive_id_type", receive_id_type.to_string())],
                &body,
            )
            .await?;

        let message_id = data["message_id"].as_str().unwrap_or_default().to_string();
        log::info!("sent card {message_id} to {receive_id}");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_v2_card() {
        let card = build_card("Deploy", "**done**", "green", None);
        assert_eq!(card["schema"], "2.0");
        assert_eq!(card["header"]["title"]["content"], "Deploy");
        assert_eq!(card["header"]["template"], "green");
        assert_eq!(card["body"]["elements"][0]["tag"], "markdown");
        assert_eq!(card["body"]["elements"][0]["content"], "**done**");
        assert!(card.get("config").is_none());
    }

    #[test]
    fn attaches_config() {
        let card = build_card("t", "c", "blue", Some(wide_screen_config()));
        assert_eq!(card["config"]["wide_screen_mode"], true);
    }

    #[test]
    fn unescapes_newlines() {
        assert_eq!(unescape_newlines("a\\nb"), "a\nb");
    }
}
