use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    /// Vision providers in fallback order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Upper bound for POST bodies (nine 600KB images base64-encoded fit in 8MB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_max_body_bytes() -> ByteSize {
    ByteSize::mib(8)
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Number of concurrent solves (one worker per slot)
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// How long a task may wait for a worker before failing; unset waits forever
    #[serde(default)]
    pub acquire_timeout: Option<HumanDuration>,
    /// Relaunch a worker's browser after this many solves (0 disables)
    #[serde(default = "default_recycle_after")]
    pub recycle_after: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            acquire_timeout: None,
            recycle_after: default_recycle_after(),
        }
    }
}

fn default_threads() -> usize {
    2
}

fn default_recycle_after() -> u32 {
    50
}

/// WebDriver endpoint used by Turnstile workers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_browser_name")]
    pub browser_name: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    pub user_agent: Option<String>,
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout: HumanDuration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            browser_name: default_browser_name(),
            headless: default_headless(),
            user_agent: None,
            page_load_timeout: default_page_load_timeout(),
        }
    }
}

fn default_webdriver_url() -> String {
    "http://127.0.0.1:4444".to_string()
}

fn default_browser_name() -> String {
    "firefox".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_page_load_timeout() -> HumanDuration {
    HumanDuration::secs(30)
}

/// Solve limits shared by all strategies
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverConfig {
    /// Hard bound for one solve attempt, including worker time
    #[serde(default = "default_solve_timeout")]
    pub solve_timeout: HumanDuration,
    /// How long the Turnstile strategy waits for the widget token
    #[serde(default = "default_token_timeout")]
    pub token_timeout: HumanDuration,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: ByteSize,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solve_timeout: default_solve_timeout(),
            token_timeout: default_token_timeout(),
            poll_interval: default_poll_interval(),
            max_image_bytes: default_max_image_bytes(),
            max_image_dimension: default_max_image_dimension(),
        }
    }
}

fn default_solve_timeout() -> HumanDuration {
    HumanDuration::secs(120)
}

fn default_token_timeout() -> HumanDuration {
    HumanDuration::secs(60)
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::millis(500)
}

fn default_max_image_bytes() -> ByteSize {
    ByteSize::kib(600)
}

fn default_max_image_dimension() -> u32 {
    1000
}

/// Wire protocol spoken by a vision provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Chat Completions API (OpenAI, Together and compatible gateways)
    Openai,
    /// Google `generateContent` API
    Gemini,
}

/// One entry of the ordered provider chain
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Resolved from `api_key_env` at load time, never read from files
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_provider_max_images")]
    pub max_images: usize,
    #[serde(default = "default_provider_max_request_bytes")]
    pub max_request_bytes: ByteSize,
    #[serde(default = "default_provider_timeout")]
    pub timeout: HumanDuration,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider_max_images() -> usize {
    10
}

fn default_provider_max_request_bytes() -> ByteSize {
    ByteSize::mib(20)
}

fn default_provider_timeout() -> HumanDuration {
    HumanDuration::secs(60)
}

fn default_max_tokens() -> u32 {
    1024
}

/// Task store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Fjall,
}

/// Task store and retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Terminal tasks are evicted this long after completion
    #[serde(default = "default_retention")]
    pub retention: HumanDuration,
    #[serde(default = "default_prune_interval")]
    pub prune_interval: HumanDuration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            retention: default_retention(),
            prune_interval: default_prune_interval(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/tasks")
}

fn default_retention() -> HumanDuration {
    HumanDuration::secs(600)
}

fn default_prune_interval() -> HumanDuration {
    HumanDuration::secs(30)
}
