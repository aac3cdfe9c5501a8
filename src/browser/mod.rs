//! Browser automation seam.
//!
//! The pipeline only needs a handful of page capabilities (navigate, query,
//! read attributes, click, evaluate, wait). They are expressed as traits so
//! the extraction and session logic stay independent of the CDP driver, and
//! so tests can drive them with an in-memory page.

mod chrome;
mod config;

pub use chrome::ChromeLauncher;
pub use config::{BrowserEngineConfig, DEFAULT_USER_AGENT};

use std::time::Duration;

use async_trait::async_trait;

pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by a browser driver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    Unavailable,
}

/// Per-session launch options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Proxy server URI for this session, if any.
    pub proxy: Option<String>,
    /// User agent presented by the page.
    pub user_agent: String,
    pub headless: bool,
    /// Navigation timeout.
    pub timeout: Duration,
    /// Additional Chrome arguments.
    pub extra_args: Vec<String>,
}

/// One browser context scoped to a single item.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Handle to a DOM element on the current page.
    type Element: Send + Sync;

    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// First element matching `selector`, if any.
    async fn query_one(&self, selector: &str) -> DriverResult<Option<Self::Element>>;

    /// All elements matching `selector`, in document order.
    async fn query_all(&self, selector: &str) -> DriverResult<Vec<Self::Element>>;

    /// Raw attribute value as written in the markup.
    async fn attribute(&self, element: &Self::Element, name: &str)
        -> DriverResult<Option<String>>;

    /// DOM property value (e.g. the resolved absolute `href`).
    async fn property(&self, element: &Self::Element, name: &str) -> DriverResult<Option<String>>;

    async fn click(&self, element: &Self::Element) -> DriverResult<()>;

    /// Evaluate a script expression in the page and return its JSON value.
    async fn evaluate(&self, expression: &str) -> DriverResult<serde_json::Value>;

    /// Wait until at least one element matches `selector`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<()>;

    /// Tear the session down. Called exactly once per session.
    async fn close(self) -> DriverResult<()>;
}

/// Opens fresh sessions.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: PageSession + 'static;

    async fn launch(&self, options: &SessionOptions) -> DriverResult<Self::Session>;
}
