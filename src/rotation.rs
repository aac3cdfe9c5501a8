//! Proxy selection strategies.
//!
//! Each item gets a fresh browser session; the selector decides which proxy
//! (if any) that session is routed through. The selector is owned by the
//! batch runner and advanced once per item.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Picks the proxy for the next session.
pub trait ProxySelector: Send {
    /// Proxy URI for the next session, or None for a direct connection.
    fn next_proxy(&mut self) -> Option<String>;
}

/// Round-robin selection - rotates through the pool consecutively.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinSelector {
    pool: Vec<String>,
    cursor: usize,
}

impl RoundRobinSelector {
    pub fn new(pool: Vec<String>) -> Self {
        Self { pool, cursor: 0 }
    }
}

impl ProxySelector for RoundRobinSelector {
    fn next_proxy(&mut self) -> Option<String> {
        if self.pool.is_empty() {
            return None;
        }
        let proxy = self.pool[self.cursor % self.pool.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Some(proxy)
    }
}

/// Random selection - picks a random proxy for every session.
#[derive(Debug, Clone, Default)]
pub struct RandomSelector {
    pool: Vec<String>,
}

impl RandomSelector {
    pub fn new(pool: Vec<String>) -> Self {
        Self { pool }
    }
}

impl ProxySelector for RandomSelector {
    fn next_proxy(&mut self) -> Option<String> {
        if self.pool.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..self.pool.len());
        Some(self.pool[idx].clone())
    }
}

/// Selection strategy type enum for config/CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategyType {
    /// Rotate through proxies consecutively
    #[default]
    RoundRobin,
    /// Random proxy each session
    Random,
}

impl SelectionStrategyType {
    /// Create a boxed selector over `pool`.
    pub fn create_selector(&self, pool: Vec<String>) -> Box<dyn ProxySelector> {
        match self {
            Self::RoundRobin => Box::new(RoundRobinSelector::new(pool)),
            Self::Random => Box::new(RandomSelector::new(pool)),
        }
    }
}

impl std::fmt::Display for SelectionStrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round-robin"),
            Self::Random => write!(f, "random"),
        }
    }
}

impl std::str::FromStr for SelectionStrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "").as_str() {
            "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            _ => Err(format!(
                "Invalid proxy strategy '{}'. Valid options: round-robin, random",
                s
            )),
        }
    }
}

/// Split a proxy list from an environment variable or CLI value.
/// Accepts commas, semicolons and whitespace as separators.
pub fn parse_proxy_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<String> {
        vec![
            "http://10.0.0.1:8080".to_string(),
            "http://10.0.0.2:8080".to_string(),
            "socks5://10.0.0.3:1080".to_string(),
        ]
    }

    #[test]
    fn round_robin_cycles_through_pool() {
        let mut selector = RoundRobinSelector::new(pool());

        let picks: Vec<_> = (0..4).filter_map(|_| selector.next_proxy()).collect();

        assert_eq!(picks[0], "http://10.0.0.1:8080");
        assert_eq!(picks[1], "http://10.0.0.2:8080");
        assert_eq!(picks[2], "socks5://10.0.0.3:1080");
        assert_eq!(picks[3], "http://10.0.0.1:8080"); // Wraps around
    }

    #[test]
    fn empty_pool_means_direct() {
        assert_eq!(RoundRobinSelector::new(Vec::new()).next_proxy(), None);
        assert_eq!(RandomSelector::new(Vec::new()).next_proxy(), None);
    }

    #[test]
    fn random_stays_within_pool() {
        let mut selector = RandomSelector::new(pool());
        for _ in 0..50 {
            let pick = selector.next_proxy().unwrap();
            assert!(pool().contains(&pick));
        }
    }

    #[test]
    fn strategy_type_from_str() {
        assert_eq!(
            "round-robin".parse::<SelectionStrategyType>(),
            Ok(SelectionStrategyType::RoundRobin)
        );
        assert_eq!(
            "RoundRobin".parse::<SelectionStrategyType>(),
            Ok(SelectionStrategyType::RoundRobin)
        );
        assert_eq!(
            "random".parse::<SelectionStrategyType>(),
            Ok(SelectionStrategyType::Random)
        );
        assert!("sticky".parse::<SelectionStrategyType>().is_err());
    }

    #[test]
    fn proxy_list_separators() {
        assert_eq!(
            parse_proxy_list("http://a:1, http://b:2;socks5://c:3\n"),
            vec!["http://a:1", "http://b:2", "socks5://c:3"]
        );
        assert!(parse_proxy_list("  ").is_empty());
    }
}
