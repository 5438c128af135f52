//! Image analysis through an OpenAI-style chat completions endpoint.
//!
//! Uses a static API key, so there is no token session here.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::{AppConfig, VisionConfig};
use crate::credentials::{ApiKeyCredentials, CredentialChain};
use crate::feishu::client::build_http_client;
use crate::{CoreError, Result};

/// Vision model client.
#[derive(Debug, Clone)]
pub struct VisionClient {
    http: Client,
    config: VisionConfig,
    credentials: Option<ApiKeyCredentials>,
}

impl VisionClient {
    /// Create a client from its parts.
    #[must_use]
    pub const fn new(
        http: Client,
        config: VisionConfig,
        credentials: Option<ApiKeyCredentials>,
    ) -> Self {
        Self {
            http,
            config,
            credentials,
        }
    }

    /// Create a client, loading the key through `chain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_chain(chain: &CredentialChain, config: &AppConfig) -> Result<Self> {
        let credentials = chain.load();
        let http = build_http_client(config.request_timeout())?;
        Ok(Self::new(http, config.vision.clone(), credentials))
    }

    /// Ask the model about the image at `image_url`. `prompt` and `model`
    /// fall back to the configured ones.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` without an API key, and `CoreError::Api`
    /// for transport failures, non-2xx responses or an empty answer.
    pub async fn analyze_image(
        &self,
        image_url: &str,
        prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<String> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            CoreError::Config("no vision API key configured - run 'fsk init vision'".to_string())
        })?;
        let model = model.unwrap_or(&self.config.model);
        let prompt = prompt.unwrap_or(&self.config.prompt);
        log::debug!("analyzing {image_url} with {model}");

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&credentials.api_key)
            .json(&request_body(model, image_url, prompt))
            .send()
            .await
            .map_err(|e| CoreError::Api(format!("vision request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::Api(format!("reading vision response: {e}")))?;
        parse_completion(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

fn request_body(model: &str, image_url: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "image_url", "image_url": { "url": image_url } },
                { "type": "text", "text": prompt }
            ]
        }]
    })
}

fn parse_completion(status: u16, body: &str) -> Result<String> {
    if !(200..300).contains(&status) {
        return Err(CoreError::Api(format!("vision endpoint returned HTTP {status}: {body}")));
    }
    let completion: Completion = serde_json::from_str(body)?;
    completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| CoreError::Api("vision response has no choices".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"A cat."}},{"message":{"content":"B"}}]}"#;
        assert_eq!(parse_completion(200, body).expect("content"), "A cat.");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_completion(200, r#"{"choices":[]}"#).expect_err("no choices");
        assert!(matches!(err, CoreError::Api(_)));
    }

    #[test]
    fn http_errors_are_api_errors() {
        let err = parse_completion(401, r#"{"error":"bad key"}"#).expect_err("http");
        assert!(matches!(err, CoreError::Api(_)));
    }

    #[test]
    fn request_puts_image_before_prompt() {
        let body = request_body("m", "https://x/img.png", "what?");
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["image_url"]["url"], "https://x/img.png");
        assert_eq!(content[1]["text"], "what?");
    }

    #[tokio::test]
    async fn missing_key_is_configuration_error() {
        let client = VisionClient::new(Client::new(), VisionConfig::default(), None);
        let err = client
            .analyze_image("https://x/img.png", None, None)
            .await
            .expect_err("no key");
        assert!(err.is_configuration());
    }
}
