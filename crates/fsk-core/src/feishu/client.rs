//! Authorized open platform client.
//!
//! Every call goes through [`TokenSession::authorized`], so a rejected token
//! is refreshed and the request replayed once. Responses use the platform's
//! `{code, msg, data}` envelope:
//!
//! 1. HTTP 401 or a token-invalid `code` becomes `CoreError::DownstreamAuth`
//! 2. any other non-zero `code` becomes `CoreError::Api`
//! 3. otherwise `data` is returned

use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::Form;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::AppConfig;
use crate::credentials::{CredentialChain, Credentials};
use crate::feishu::auth::{HttpTokenExchanger, TokenSession};
use crate::{CoreError, Result};

/// Platform codes meaning the bearer token is missing, invalid or expired.
pub const AUTH_FAILURE_CODES: [i64; 4] = [99_991_661, 99_991_663, 99_991_664, 99_991_668];

/// Build the shared HTTP client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CoreError::Other(format!("creating HTTP client: {e}")))
}

/// Open platform client bound to one token session.
#[derive(Debug, Clone)]
pub struct FeishuClient {
    http: Client,
    base_url: String,
    session: Arc<TokenSession>,
}

impl FeishuClient {
    /// Create a client from its parts.
    #[must_use]
    pub fn new(http: Client, base_url: &str, session: Arc<TokenSession>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    /// Create a client using platform settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_config(config: &AppConfig, credentials: Option<Credentials>) -> Result<Self> {
        let http = build_http_client(config.request_timeout())?;
        let platform = &config.platform;
        let exchanger = HttpTokenExchanger::new(http.clone(), &platform.base_url)
            .with_default_ttl(Duration::from_secs(platform.default_token_ttl));
        let session = TokenSession::new(credentials, Arc::new(exchanger))
            .with_safety_margin(Duration::from_secs(platform.token_safety_margin));

        Ok(Self::new(http, &platform.base_url, Arc::new(session)))
    }

    /// Create a client with credentials loaded through `chain`. Missing
    /// credentials surface on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_chain(chain: &CredentialChain, config: &AppConfig) -> Result<Self> {
        let credentials = chain.load();
        if credentials.is_none() {
            log::debug!("no credentials found for {}", chain.service());
        }
        Self::from_config(config, credentials)
    }

    /// The underlying token session.
    #[must_use]
    pub fn session(&self) -> &TokenSession {
        &self.session
    }

    /// The session's credentials.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` when none were loaded.
    pub fn credentials(&self) -> Result<&Credentials> {
        self.session.credentials()
    }

    /// Absolute URL for an API path such as `/calendar/v4/calendars`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `GET` and return the envelope's `data`.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.send(Method::GET, path, query, None).await
    }

    /// `POST` a JSON body.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn post(&self, path: &str, query: &[(&str, String)], body: &Value) -> Result<Value> {
        self.send(Method::POST, path, query, Some(body)).await
    }

    /// `PATCH` a JSON body.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn patch(&self, path: &str, query: &[(&str, String)], body: &Value) -> Result<Value> {
        self.send(Method::PATCH, path, query, Some(body)).await
    }

    /// `DELETE` a resource.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.send(Method::DELETE, path, query, None).await
    }

    /// `POST` a multipart form. `make_form` runs once per attempt because
    /// forms cannot be replayed.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn post_multipart<F>(&self, path: &str, make_form: F) -> Result<Value>
    where
        F: Fn() -> Form,
    {
        let url = self.url(path);
        self.session
            .authorized(|token| {
                let request = self
                    .http
                    .post(&url)
                    .bearer_auth(token)
                    .multipart(make_form());
                execute(request)
            })
            .await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.url(path);
        log::debug!("{method} {url}");
        self.session
            .authorized(|token| {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .bearer_auth(token)
                    .query(query);
                if let Some(body) = body {
                    request = request.json(body);
                }
                execute(request)
            })
            .await
    }
}

async fn execute(request: RequestBuilder) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| CoreError::Api(format!("request failed: {e}")))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| CoreError::Api(format!("reading response: {e}")))?;
    parse_envelope(status, &text)
}

/// Interpret a `{code, msg, data}` response.
///
/// # Errors
///
/// Returns `CoreError::DownstreamAuth` for rejected tokens and
/// `CoreError::Api` for other failures.
pub fn parse_envelope(status: u16, body: &str) -> Result<Value> {
    let success = (200..300).contains(&status);
    if status == 401 {
        return Err(CoreError::DownstreamAuth(format!(
            "HTTP 401: {}",
            truncate(body, 200)
        )));
    }

    let json: Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(_) if !success => {
            return Err(CoreError::Api(format!(
                "HTTP {status}: {}",
                truncate(body, 200)
            )));
        }
        Err(e) => {
            return Err(CoreError::Serialization(format!("parsing response: {e}")));
        }
    };

    let code = json["code"].as_i64().unwrap_or(if success { 0 } else { -1 });
    let msg = json["msg"].as_str().unwrap_or_default();

    if AUTH_FAILURE_CODES.contains(&code) {
        return Err(CoreError::DownstreamAuth(format!("code {code}: {msg}")));
    }
    if code != 0 {
        return Err(CoreError::Api(format!("code {code}: {msg}")));
    }
    if !success {
        return Err(CoreError::Api(format!("HTTP {status}: {msg}")));
    }

    Ok(json.get("data").cloned().unwrap_or(Value::Null))
}

/// Deserialize the list stored under `key`; a missing or null list is empty.
///
/// # Errors
///
/// Returns `CoreError::Serialization` when the items do not match `T`.
pub fn list_field<T: DeserializeOwned>(data: &Value, key: &str) -> Result<Vec<T>> {
    match data.get(key) {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(list) => Ok(serde_json::from_value(list.clone())?),
    }
}

/// Encode an id for use as a single path segment.
#[must_use]
pub fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn returns_data_on_success() {
        let data = parse_envelope(200, r#"{"code":0,"msg":"success","data":{"event":{"event_id":"e1"}}}"#)
            .expect("ok");
        assert_eq!(data["event"]["event_id"], "e1");
    }

    #[test]
    fn empty_data_is_null() {
        assert_eq!(parse_envelope(200, r#"{"code":0,"msg":"success"}"#).expect("ok"), Value::Null);
    }

    #[test]
    fn token_failures_are_downstream_auth() {
        let err = parse_envelope(400, r#"{"code":99991663,"msg":"Invalid access token"}"#)
            .expect_err("rejected");
        assert!(err.is_auth_rejection());

        let err = parse_envelope(401, "Unauthorized").expect_err("rejected");
        assert!(err.is_auth_rejection());
    }

    #[test]
    fn other_codes_are_api_errors() {
        let err = parse_envelope(200, r#"{"code":190002,"msg":"invalid parameters"}"#)
            .expect_err("api error");
        assert_eq!(err.to_string(), "API error: code 190002: invalid parameters");

        let err = parse_envelope(404, "404 page not found").expect_err("not found");
        assert!(matches!(err, CoreError::Api(_)));
    }

    #[test]
    fn builds_urls_and_segments() {
        let session = TokenSession::new(
            None,
            Arc::new(HttpTokenExchanger::new(Client::new(), "http://localhost")),
        );
        let client = FeishuClient::new(Client::new(), "https://open.feishu.cn/open-apis/", Arc::new(session));
        assert_eq!(
            client.url("/calendar/v4/calendars"),
            "https://open.feishu.cn/open-apis/calendar/v4/calendars"
        );
        assert_eq!(segment("feishu.cn_abc@group.calendar"), "feishu.cn_abc%40group.calendar");
        assert!(client.credentials().is_err());
    }

    /// Serves one request per connection. Token requests get `t-1`, `t-2`,
    /// ...; the first upload is rejected with an invalid-token code.
    async fn serve(listener: TcpListener, seen: Arc<StdMutex<Vec<String>>>) {
        let mut tokens = 0;
        let mut uploads = 0;
        while let Ok((mut stream, _)) = listener.accept().await {
            let request = read_request(&mut stream).await;
            let body = if request.contains(HttpTokenExchanger::TOKEN_PATH) {
                tokens += 1;
                format!(r#"{{"code":0,"msg":"ok","tenant_access_token":"t-{tokens}","expire":7200}}"#)
            } else {
                uploads += 1;
                if uploads == 1 {
                    r#"{"code":99991663,"msg":"Invalid access token"}"#.to_string()
                } else {
                    r#"{"code":0,"msg":"success","data":{"file_token":"box1"}}"#.to_string()
                }
            };
            seen.lock().expect("lock").push(request);
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.expect("write response");
            stream.shutdown().await.ok();
        }
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.expect("read request");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let head = text[..head_end].to_ascii_lowercase();
            let body_len = buf.len() - (head_end + 4);
            let content_length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());
            match content_length {
                Some(expected) if body_len >= expected => break,
                Some(_) => {}
                None if head.contains("transfer-encoding: chunked") => {
                    if text.ends_with("0\r\n\r\n") {
                        break;
                    }
                }
                None => break,
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_and_multipart_rebuilt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base_url = format!("http://{}/open-apis", listener.local_addr().expect("addr"));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let server = tokio::spawn(serve(listener, seen.clone()));

        let http = Client::builder().no_proxy().build().expect("http client");
        let session = TokenSession::new(
            Some(Credentials::new("X", "Y")),
            Arc::new(HttpTokenExchanger::new(http.clone(), &base_url)),
        );
        let client = FeishuClient::new(http, &base_url, Arc::new(session));

        let forms = AtomicUsize::new(0);
        let data = client
            .post_multipart("/drive/v1/files/upload_all", || {
                forms.fetch_add(1, Ordering::SeqCst);
                Form::new()
                    .text("file_name", "report.txt")
                    .text("parent_type", "explorer")
            })
            .await
            .expect("upload after refresh");
        server.abort();

        assert_eq!(data["file_token"], "box1");
        assert_eq!(forms.load(Ordering::SeqCst), 2);

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 4);
        assert!(seen[0].contains(HttpTokenExchanger::TOKEN_PATH));
        assert!(seen[1].contains("upload_all"));
        assert!(seen[1].to_ascii_lowercase().contains("authorization: bearer t-1"));
        assert!(seen[2].contains(HttpTokenExchanger::TOKEN_PATH));
        assert!(seen[3].to_ascii_lowercase().contains("authorization: bearer t-2"));
        assert!(seen[1].contains("report.txt") && seen[3].contains("report.txt"));
    }
}
