//! Turnstile: load the page in a browser session and wait for the widget
//! to publish its response token.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{SolveError, SolveStrategy};
use crate::browser::webdriver::proxy_capability;
use crate::browser::{BrowserError, BrowserSession};
use crate::config::SolverConfig;
use crate::pool::Worker;
use crate::tasks::{ChallengeInput, ChallengeKind, Solution, TurnstileInput};

/// Shorter values are placeholders, not tokens
const MIN_TOKEN_LEN: usize = 10;

/// Renders a widget explicitly when the page has none of its own.
/// Arguments: sitekey, action, cdata, pagedata.
const RENDER_SCRIPT: &str = r#"
const [sitekey, action, cdata, pagedata] = arguments;
if (document.querySelector('input[name="cf-turnstile-response"], iframe[src*="challenges.cloudflare.com"]')) {
    return 'present';
}
let host = document.getElementById('solvebox-turnstile');
if (!host) {
    host = document.createElement('div');
    host.id = 'solvebox-turnstile';
    (document.body || document.documentElement).appendChild(host);
}
const render = () => window.turnstile.render(host, {
    sitekey: sitekey,
    action: action || undefined,
    cData: cdata || undefined,
    chlPageData: pagedata || undefined,
});
if (window.turnstile) {
    render();
    return 'rendered';
}
window.__solveboxTurnstileReady = render;
const script = document.createElement('script');
script.src = 'https://challenges.cloudflare.com/turnstile/v0/api.js?onload=__solveboxTurnstileReady&render=explicit';
script.async = true;
document.head.appendChild(script);
return 'loading';
"#;

const TOKEN_SCRIPT: &str = r#"
const input = document.querySelector('input[name="cf-turnstile-response"]');
if (input && input.value) {
    return input.value;
}
const tagged = document.querySelector('[data-cf-turnstile-response]');
if (tagged) {
    return tagged.getAttribute('data-cf-turnstile-response');
}
if (window.turnstile && typeof window.turnstile.getResponse === 'function') {
    try {
        return window.turnstile.getResponse() || null;
    } catch (e) {}
}
return null;
"#;

fn sitekey_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]x[0-9A-Za-z_-]+$").expect("valid regex"))
}

#[derive(Debug, Clone)]
pub struct TurnstileSettings {
    pub token_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TurnstileSettings {
    fn default() -> Self {
        Self {
            token_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl From<&SolverConfig> for TurnstileSettings {
    fn from(config: &SolverConfig) -> Self {
        Self {
            token_timeout: config.token_timeout.get(),
            poll_interval: config.poll_interval.get(),
        }
    }
}

pub struct TurnstileStrategy {
    settings: TurnstileSettings,
}

impl TurnstileStrategy {
    pub fn new(settings: TurnstileSettings) -> Self {
        Self { settings }
    }
}

fn turnstile_input(input: &ChallengeInput) -> Result<&TurnstileInput, SolveError> {
    match input {
        ChallengeInput::Turnstile(turnstile) => Ok(turnstile),
        other => Err(SolveError::InvalidInput(format!(
            "expected a turnstile challenge, got {}",
            other.kind()
        ))),
    }
}

/// Check URL, site key and proxy syntax
pub fn validate_input(input: &TurnstileInput) -> Result<(), SolveError> {
    let url = Url::parse(&input.url)
        .map_err(|e| SolveError::InvalidInput(format!("invalid url '{}': {}", input.url, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SolveError::InvalidInput(format!(
            "url must be an absolute http(s) URL, got '{}'",
            input.url
        )));
    }

    if !sitekey_pattern().is_match(&input.sitekey) {
        return Err(SolveError::InvalidInput(format!(
            "invalid sitekey '{}'",
            input.sitekey
        )));
    }

    if let Some(proxy) = &input.proxy {
        proxy_capability(proxy).map_err(|e| SolveError::InvalidInput(e.to_string()))?;
    }

    Ok(())
}

/// Drivers report unreachable pages as `unknown error`, the same code they
/// use for dead sessions. The session is blamed only if it also stops
/// answering scripts.
async fn navigation_error(session: &mut Box<dyn BrowserSession>, err: BrowserError) -> SolveError {
    if !matches!(err, BrowserError::WebDriver { .. }) {
        return err.into();
    }
    match session.execute("return true;", Vec::new()).await {
        Ok(_) => SolveError::Navigation(err.to_string()),
        Err(ping) => {
            warn!(error = %ping, "Session unresponsive after failed navigation");
            err.into()
        }
    }
}

#[async_trait]
impl SolveStrategy for TurnstileStrategy {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Turnstile
    }

    fn validate(&self, input: &ChallengeInput) -> Result<(), SolveError> {
        validate_input(turnstile_input(input)?)
    }

    async fn solve(&self, input: &ChallengeInput, worker: &mut Worker) -> Result<Solution, SolveError> {
        let input = turnstile_input(input)?;
        let worker_id = worker.id();
        let session = worker.browser(input.proxy.as_deref()).await?;

        debug!(worker_id, url = %input.url, "Navigating to challenge page");
        if let Err(e) = session.navigate(&input.url).await {
            return Err(navigation_error(session, e).await);
        }

        let args = vec![
            Value::from(input.sitekey.as_str()),
            input.action.clone().map_or(Value::Null, Value::from),
            input.cdata.clone().map_or(Value::Null, Value::from),
            input.pagedata.clone().map_or(Value::Null, Value::from),
        ];
        let widget = session.execute(RENDER_SCRIPT, args).await?;
        debug!(worker_id, widget = %widget, "Turnstile widget prepared");

        let started = Instant::now();
        let deadline = started + self.settings.token_timeout;

        loop {
            match session.execute(TOKEN_SCRIPT, Vec::new()).await {
                Ok(Value::String(token)) if token.len() >= MIN_TOKEN_LEN => {
                    info!(worker_id, waited = ?started.elapsed(), "Turnstile token received");
                    return Ok(Solution::Token(token));
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                // The page may be mid-navigation; keep polling
                Err(e) => debug!(worker_id, error = %e, "Token check failed"),
            }

            if Instant::now() >= deadline {
                return Err(SolveError::Timeout(self.settings.token_timeout));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}
