//! Minimal W3C WebDriver client

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::{BrowserError, BrowserLauncher, BrowserSession};
use crate::config::BrowserConfig;

/// Launches sessions against a WebDriver endpoint
pub struct WebDriverLauncher {
    client: Client,
    base_url: String,
    config: BrowserConfig,
}

impl WebDriverLauncher {
    pub fn new(config: BrowserConfig) -> Result<Self, BrowserError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Navigation blocks the request until the page loads
            .timeout(config.page_load_timeout.get() + Duration::from_secs(15))
            .build()
            .map_err(|e| BrowserError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.webdriver_url.trim_end_matches('/').to_string(),
            config,
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, proxy: Option<&str>) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let capabilities = build_capabilities(&self.config, proxy)?;
        let url = format!("{}/session", self.base_url);

        let value = send(&self.client, Method::POST, &url, Some(capabilities)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol("new session response without sessionId".into()))?
            .to_string();

        debug!(session_id = %session_id, proxied = proxy.is_some(), "WebDriver session created");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
            session_id,
        }))
    }
}

pub struct WebDriverSession {
    client: Client,
    session_id: String,
    session_url: String,
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    fn id(&self) -> &str {
        &self.session_id
    }

    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let endpoint = format!("{}/url", self.session_url);
        send(&self.client, Method::POST, &endpoint, Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn execute(&mut self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError> {
        let endpoint = format!("{}/execute/sync", self.session_url);
        let body = json!({ "script": script, "args": args });
        send(&self.client, Method::POST, &endpoint, Some(body)).await
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        send(&self.client, Method::DELETE, &self.session_url, None).await?;
        debug!(session_id = %self.session_id, "WebDriver session closed");
        Ok(())
    }
}

/// Issue one WebDriver command and unwrap its `value` envelope
async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| BrowserError::Http(e.to_string()))?;
    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| BrowserError::Protocol(format!("HTTP {}: {}", status.as_u16(), e)))?;

    decode_response(payload)
}

/// Every WebDriver response wraps its payload in `{"value": ...}`; errors
/// carry `error` and `message` inside that value.
pub(crate) fn decode_response(payload: Value) -> Result<Value, BrowserError> {
    let Value::Object(mut envelope) = payload else {
        return Err(BrowserError::Protocol("response is not a JSON object".into()));
    };
    let value = envelope.remove("value").unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        warn!(error, %message, "WebDriver command failed");
        return Err(BrowserError::WebDriver {
            error: error.to_string(),
            message,
        });
    }

    Ok(value)
}

/// Build the `capabilities` object for a new session
pub(crate) fn build_capabilities(config: &BrowserConfig, proxy: Option<&str>) -> Result<Value, BrowserError> {
    let mut always_match = json!({
        "browserName": config.browser_name,
        "pageLoadStrategy": "eager",
        "timeouts": {
            "pageLoad": config.page_load_timeout.get().as_millis() as u64,
            "script": 10_000,
        },
    });

    match config.browser_name.as_str() {
        "chrome" | "chromium" | "MicrosoftEdge" => {
            let mut args = Vec::new();
            if config.headless {
                args.push("--headless=new".to_string());
            }
            if let Some(ua) = &config.user_agent {
                args.push(format!("--user-agent={ua}"));
            }
            always_match["goog:chromeOptions"] = json!({ "args": args });
        }
        _ => {
            let mut options = json!({ "args": [] });
            if config.headless {
                options["args"] = json!(["-headless"]);
            }
            if let Some(ua) = &config.user_agent {
                options["prefs"] = json!({ "general.useragent.override": ua });
            }
            always_match["moz:firefoxOptions"] = options;
        }
    }

    if let Some(proxy) = proxy {
        always_match["proxy"] = proxy_capability(proxy)?;
    }

    Ok(json!({ "capabilities": { "alwaysMatch": always_match } }))
}

/// Translate a proxy URL into the WebDriver `proxy` capability.
/// WebDriver manual proxies carry no credentials, so only anonymous
/// proxies are accepted.
pub(crate) fn proxy_capability(proxy: &str) -> Result<Value, BrowserError> {
    let url = Url::parse(proxy).map_err(|e| BrowserError::InvalidProxy(format!("{proxy}: {e}")))?;

    if !url.username().is_empty() || url.password().is_some() {
        return Err(BrowserError::InvalidProxy(
            "authenticated proxies are not supported".to_string(),
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| BrowserError::InvalidProxy(format!("{proxy}: missing host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| BrowserError::InvalidProxy(format!("{proxy}: missing port")))?;
    let address = format!("{host}:{port}");

    match url.scheme() {
        "http" | "https" => Ok(json!({
            "proxyType": "manual",
            "httpProxy": address,
            "sslProxy": address,
        })),
        "socks5" | "socks5h" => Ok(json!({
            "proxyType": "manual",
            "socksProxy": address,
            "socksVersion": 5,
        })),
        "socks4" => Ok(json!({
            "proxyType": "manual",
            "socksProxy": address,
            "socksVersion": 4,
        })),
        other => Err(BrowserError::InvalidProxy(format!("unsupported scheme '{other}'"))),
    }
}
