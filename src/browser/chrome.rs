//! Chrome session launcher backed by chromiumoxide (CDP).

#[cfg(feature = "browser")]
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::element::Element;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tempfile::TempDir;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;

use super::{DriverError, DriverResult, PageSession, SessionLauncher, SessionOptions};

/// Interval between selector polls while waiting for a page to render.
#[cfg(feature = "browser")]
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Launch flags applied to every session. Sandboxing and certificate checks
/// are off so listings behind odd hosting or intercepting proxies still load.
#[cfg(feature = "browser")]
const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--ignore-certificate-errors",
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-gpu",
];

/// Launches one Chrome process per session.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    executable: Option<std::path::PathBuf>,
}

impl ChromeLauncher {
    pub fn new(executable: Option<std::path::PathBuf>) -> Self {
        Self { executable }
    }
}

#[cfg(feature = "browser")]
impl ChromeLauncher {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    /// Find a Chrome executable on this machine.
    fn find_chrome() -> DriverResult<PathBuf> {
        if let Some(path) = Self::CHROME_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            debug!("Found Chrome at: {}", path.display());
            return Ok(path.to_path_buf());
        }

        for cmd in [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(path) = which::which(cmd) {
                debug!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(DriverError::Launch(
            "Chrome/Chromium not found. Install it or set SWPICS_CHROME to its path".to_string(),
        ))
    }

    /// Throwaway profile directory so no cookies or cache leak between items.
    fn profile_dir() -> DriverResult<TempDir> {
        tempfile::Builder::new()
            .prefix("swpics-chrome-")
            .tempdir()
            .map_err(|e| DriverError::Launch(format!("Failed to create profile dir: {}", e)))
    }

    fn build_config(&self, options: &SessionOptions, profile: &Path) -> DriverResult<BrowserConfig> {
        let chrome_path = match &self.executable {
            Some(path) => path.clone(),
            None => Self::find_chrome()?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(profile);

        // with_head means NOT headless
        if !options.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = options.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        for arg in LAUNCH_ARGS {
            builder = builder.arg(*arg);
        }
        builder = builder.arg(format!("--user-agent={}", options.user_agent));

        for arg in &options.extra_args {
            builder = builder.arg(arg.as_str());
        }

        builder
            .build()
            .map_err(|e| DriverError::Launch(format!("Failed to build browser config: {}", e)))
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    async fn launch(&self, options: &SessionOptions) -> DriverResult<ChromeSession> {
        info!(
            "Launching browser (headless={}, proxy={})",
            options.headless,
            options.proxy.as_deref().unwrap_or("none")
        );

        let profile = Self::profile_dir()?;
        debug!("Using profile {}", profile.path().display());
        let config = self.build_config(options, profile.path())?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(DriverError::Launch(format!("Failed to open page: {}", e)));
            }
        };

        // Headless Chrome advertises itself in the UA unless overridden on the page too.
        if let Err(e) = page
            .execute(SetUserAgentOverrideParams::new(options.user_agent.clone()))
            .await
        {
            warn!("User agent override failed: {}", e);
        }

        Ok(ChromeSession {
            browser: Mutex::new(browser),
            page,
            handler,
            timeout: options.timeout,
            profile,
        })
    }
}

/// A running Chrome process with a single page.
#[cfg(feature = "browser")]
pub struct ChromeSession {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    timeout: Duration,
    profile: TempDir,
}

#[cfg(feature = "browser")]
fn protocol(e: chromiumoxide::error::CdpError) -> DriverError {
    DriverError::Protocol(e.to_string())
}

#[cfg(feature = "browser")]
#[async_trait]
impl PageSession for ChromeSession {
    type Element = Element;

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        info!("Navigating to {}", url);
        tokio::time::timeout(self.timeout, self.page.goto(url))
            .await
            .map_err(|_| DriverError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn query_one(&self, selector: &str) -> DriverResult<Option<Element>> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> DriverResult<Vec<Element>> {
        self.page.find_elements(selector).await.map_err(protocol)
    }

    async fn attribute(&self, element: &Element, name: &str) -> DriverResult<Option<String>> {
        element.attribute(name).await.map_err(protocol)
    }

    async fn property(&self, element: &Element, name: &str) -> DriverResult<Option<String>> {
        let value = element.property(name).await.map_err(protocol)?;
        Ok(value.and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }))
    }

    async fn click(&self, element: &Element) -> DriverResult<()> {
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> DriverResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(expression.to_string())
            .await
            .map_err(protocol)?;
        result
            .into_value::<serde_json::Value>()
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<()> {
        debug!("Waiting for selector: {}", selector);
        tokio::time::timeout(timeout, async {
            loop {
                match self.page.find_elements(selector).await {
                    Ok(found) if !found.is_empty() => return,
                    Ok(_) => {}
                    Err(e) => debug!("Selector poll failed: {}", e),
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| DriverError::Timeout(timeout))
    }

    async fn close(self) -> DriverResult<()> {
        let mut browser = self.browser.into_inner();
        let closed = browser.close().await.map_err(protocol);
        if let Err(e) = browser.wait().await {
            warn!("Browser process did not exit cleanly: {}", e);
        }
        self.handler.abort();
        if let Err(e) = self.profile.close() {
            debug!("Profile cleanup failed: {}", e);
        }
        closed.map(|_| ())
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub enum ChromeSession {}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    async fn launch(&self, _options: &SessionOptions) -> DriverResult<ChromeSession> {
        Err(DriverError::Unavailable)
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl PageSession for ChromeSession {
    type Element = ();

    async fn navigate(&self, _url: &str) -> DriverResult<()> {
        match *self {}
    }

    async fn query_one(&self, _selector: &str) -> DriverResult<Option<()>> {
        match *self {}
    }

    async fn query_all(&self, _selector: &str) -> DriverResult<Vec<()>> {
        match *self {}
    }

    async fn attribute(&self, _element: &(), _name: &str) -> DriverResult<Option<String>> {
        match *self {}
    }

    async fn property(&self, _element: &(), _name: &str) -> DriverResult<Option<String>> {
        match *self {}
    }

    async fn click(&self, _element: &()) -> DriverResult<()> {
        match *self {}
    }

    async fn evaluate(&self, _expression: &str) -> DriverResult<serde_json::Value> {
        match *self {}
    }

    async fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> DriverResult<()> {
        match *self {}
    }

    async fn close(self) -> DriverResult<()> {
        match self {}
    }
}

#[cfg(all(test, feature = "browser"))]
mod tests {
    use super::*;

    #[test]
    fn test_each_session_gets_its_own_profile() {
        let launcher = ChromeLauncher::new(Some(PathBuf::from("/bin/true")));
        let options = SessionOptions::default();

        let first = ChromeLauncher::profile_dir().unwrap();
        let second = ChromeLauncher::profile_dir().unwrap();
        assert_ne!(first.path(), second.path());

        let config = launcher.build_config(&options, first.path()).unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains(&first.path().display().to_string()));
        assert!(!rendered.contains(&second.path().display().to_string()));
    }

    #[test]
    fn test_profile_removed_on_drop() {
        let profile = ChromeLauncher::profile_dir().unwrap();
        let path = profile.path().to_path_buf();
        assert!(path.is_dir());
        drop(profile);
        assert!(!path.exists());
    }
}
