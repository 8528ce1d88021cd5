//! Browser automation seam used by Turnstile workers
//!
//! Workers hold a [`BrowserSession`] launched through a
//! [`BrowserLauncher`]. The production launcher speaks the W3C WebDriver
//! protocol to a driver or grid (geckodriver, chromedriver, Selenium).

pub mod webdriver;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use webdriver::{WebDriverLauncher, WebDriverSession};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("WebDriver request failed: {0}")]
    Http(String),

    #[error("WebDriver error '{error}': {message}")]
    WebDriver { error: String, message: String },

    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),

    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),
}

impl BrowserError {
    /// Whether the session can no longer be trusted and must be discarded.
    ///
    /// Script and navigation errors leave the session usable; transport
    /// failures and dead sessions do not.
    pub fn is_fatal(&self) -> bool {
        match self {
            BrowserError::Http(_) | BrowserError::Protocol(_) => true,
            BrowserError::WebDriver { error, .. } => matches!(
                error.as_str(),
                "invalid session id" | "session not created" | "unknown error" | "no such window"
            ),
            BrowserError::InvalidProxy(_) => false,
        }
    }
}

/// Starts browser sessions, optionally routed through a proxy
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, proxy: Option<&str>) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// One live browser session, exclusively owned by a worker
#[async_trait]
pub trait BrowserSession: Send {
    fn id(&self) -> &str;

    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Run a synchronous script in the page and return its JSON result
    async fn execute(&mut self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}
