//! Configuration management.
//!
//! Settings come from built-in defaults, then an optional TOML file, then
//! `SWPICS_*` environment variables (a `.env` file is loaded by `main`),
//! then CLI flags applied by the commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::browser::{BrowserEngineConfig, DEFAULT_USER_AGENT};
use crate::driver::BatchConfig;
use crate::extract::{ExtractOptions, DEFAULT_INTERSTITIAL_SELECTOR};
use crate::rotation::{parse_proxy_list, SelectionStrategyType};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "swpics.toml";

const DEFAULT_LEDGER_PATH: &str = "Ebay/EBay_links_output.csv";
const DEFAULT_IMAGE_ROOT: &str = "Ebay/Ebaydata/images";

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Ledger CSV file.
    pub ledger_path: PathBuf,
    /// Root folder for per-item image folders.
    pub image_root: PathBuf,
    /// Downloaded items per run before stopping (0 = unlimited).
    pub max_items_per_run: usize,
    /// Proxy URIs rotated across sessions. Empty means direct.
    pub proxies: Vec<String>,
    pub proxy_strategy: SelectionStrategyType,
    pub user_agent: String,
    /// Per-image request timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Wait for the first image element, in seconds.
    pub ready_timeout_secs: u64,
    /// Pause after dismissing the interstitial, in milliseconds.
    pub interstitial_settle_ms: u64,
    /// Interstitial button selector; None disables the step.
    pub interstitial_selector: Option<String>,
    pub browser: BrowserEngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            image_root: PathBuf::from(DEFAULT_IMAGE_ROOT),
            max_items_per_run: 1,
            proxies: Vec::new(),
            proxy_strategy: SelectionStrategyType::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout_secs: 30,
            ready_timeout_secs: 30,
            interstitial_settle_ms: 2000,
            interstitial_selector: Some(DEFAULT_INTERSTITIAL_SELECTOR.to_string()),
            browser: BrowserEngineConfig::default(),
        }
    }
}

impl Settings {
    /// Apply `SWPICS_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(val) = get("SWPICS_LEDGER") {
            self.ledger_path = expand_path(&val);
        }
        if let Some(val) = get("SWPICS_IMAGE_ROOT") {
            self.image_root = expand_path(&val);
        }
        if let Some(val) = get("SWPICS_MAX_ITEMS") {
            match val.trim().parse() {
                Ok(n) => self.max_items_per_run = n,
                Err(_) => tracing::warn!("Ignoring invalid SWPICS_MAX_ITEMS '{}'", val),
            }
        }
        if let Some(val) = get("SWPICS_PROXIES") {
            self.proxies = parse_proxy_list(&val);
        }
        if let Some(val) = get("SWPICS_PROXY_STRATEGY") {
            match val.parse() {
                Ok(strategy) => self.proxy_strategy = strategy,
                Err(e) => tracing::warn!("{}", e),
            }
        }
        if let Some(val) = get("SWPICS_USER_AGENT") {
            self.user_agent = val;
        }
        if let Some(val) = get("SWPICS_CHROME") {
            self.browser.chrome_executable = Some(expand_path(&val));
        }
    }

    /// Batch runner settings.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            image_root: self.image_root.clone(),
            max_items: self.max_items_per_run,
            user_agent: self.user_agent.clone(),
            headless: self.browser.headless,
            navigation_timeout: Duration::from_secs(self.browser.timeout),
            chrome_args: self.browser.chrome_args.clone(),
        }
    }

    /// Extraction preconditions.
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            interstitial_selector: self.interstitial_selector.clone(),
            settle_delay: Duration::from_millis(self.interstitial_settle_ms),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Contents of a config file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_strategy: Option<SelectionStrategyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Per-image request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout: Option<u64>,
    /// Page readiness timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,
    /// Empty string disables the interstitial step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interstitial_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserEngineConfig>,
}

impl Config {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let path = expand_path(path_str);
        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref ledger) = self.ledger {
            settings.ledger_path = self.resolve_path(ledger, base_dir);
        }
        if let Some(ref root) = self.image_root {
            settings.image_root = self.resolve_path(root, base_dir);
        }
        if let Some(max) = self.max_items {
            settings.max_items_per_run = max;
        }
        if !self.proxies.is_empty() {
            settings.proxies = self.proxies.clone();
        }
        if let Some(strategy) = self.proxy_strategy {
            settings.proxy_strategy = strategy;
        }
        if let Some(ref ua) = self.user_agent {
            settings.user_agent = ua.clone();
        }
        if let Some(timeout) = self.fetch_timeout {
            settings.fetch_timeout_secs = timeout;
        }
        if let Some(timeout) = self.ready_timeout {
            settings.ready_timeout_secs = timeout;
        }
        if let Some(ms) = self.settle_ms {
            settings.interstitial_settle_ms = ms;
        }
        if let Some(ref selector) = self.interstitial_selector {
            settings.interstitial_selector = (!selector.trim().is_empty()).then(|| selector.clone());
        }
        if let Some(ref browser) = self.browser {
            let mut browser = browser.clone();
            if let Some(ref exe) = browser.chrome_executable {
                browser.chrome_executable =
                    Some(self.resolve_path(&exe.to_string_lossy(), base_dir));
            }
            settings.browser = browser;
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
}

/// Load settings from defaults, config file and environment.
pub fn load_settings(options: &LoadOptions) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let config_path = match options.config_path {
        Some(ref path) => Some(path.clone()),
        None => {
            let candidate = PathBuf::from(DEFAULT_CONFIG_FILENAME);
            candidate.exists().then_some(candidate)
        }
    };

    if let Some(path) = config_path {
        let config = Config::load(&path)?;
        let base_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tracing::debug!("Using config file {}", path.display());
        config.apply_to_settings(&mut settings, &base_dir);
    }

    settings.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(settings)
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw.trim()).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_throttle_to_one_item() {
        let settings = Settings::default();
        assert_eq!(settings.max_items_per_run, 1);
        assert!(settings.proxies.is_empty());
        assert_eq!(settings.extract_options().settle_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_config_file_paths_resolve_against_base_dir() {
        let config: Config = toml::from_str(
            r#"
            ledger = "links.csv"
            image_root = "/srv/images"
            max_items = 0
            proxies = ["http://10.0.0.1:3128"]
            proxy_strategy = "random"
            interstitial_selector = ""

            [browser]
            headless = false
            "#,
        )
        .unwrap();

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/data"));

        assert_eq!(settings.ledger_path, PathBuf::from("/data/links.csv"));
        assert_eq!(settings.image_root, PathBuf::from("/srv/images"));
        assert_eq!(settings.max_items_per_run, 0);
        assert_eq!(settings.proxies, vec!["http://10.0.0.1:3128".to_string()]);
        assert_eq!(settings.proxy_strategy, SelectionStrategyType::Random);
        assert_eq!(settings.interstitial_selector, None);
        assert!(!settings.browser.headless);
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SWPICS_PROXIES", "http://a:1,http://b:2"),
            ("SWPICS_MAX_ITEMS", "5"),
            ("SWPICS_LEDGER", "/tmp/ledger.csv"),
            ("SWPICS_USER_AGENT", "   "),
        ]);

        let mut settings = Settings::default();
        settings.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.proxies, vec!["http://a:1", "http://b:2"]);
        assert_eq!(settings.max_items_per_run, 5);
        assert_eq!(settings.ledger_path, PathBuf::from("/tmp/ledger.csv"));
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_invalid_max_items_is_ignored() {
        let mut settings = Settings::default();
        settings.apply_env_overrides(|key| (key == "SWPICS_MAX_ITEMS").then(|| "many".to_string()));
        assert_eq!(settings.max_items_per_run, 1);
    }

    #[test]
    fn test_load_explicit_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "ledger = \"items.csv\"\nfetch_timeout = 5\n").unwrap();

        let settings = load_settings(&LoadOptions {
            config_path: Some(path),
        })
        .unwrap();

        assert_eq!(settings.ledger_path, dir.path().join("items.csv"));
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "max_items = \"lots\"").unwrap();

        assert!(load_settings(&LoadOptions {
            config_path: Some(path)
        })
        .is_err());
    }
}
