//! Candidate image extraction from a rendered listing page.
//!
//! Extraction runs an ordered list of heuristics and unions their output.
//! A heuristic that errors contributes nothing and leaves a diagnostic; it
//! never aborts the others. The only hard failure is a page that never
//! renders an image.

mod heuristics;

pub use heuristics::{
    image_tag_matches, upscale_listing_image, CanonicalImage, Heuristic, HeroVariable, ImageTags,
    PreloadLinks, HIGH_RES_SUFFIX, IMG_SELECTOR,
};

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::browser::{DriverError, PageSession};

/// Button that reveals the original listing when a page shows a newer offer.
pub const DEFAULT_INTERSTITIAL_SELECTOR: &str = "button[aria-label='Originalangebot ansehen']";

/// Which heuristic produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    CanonicalMeta,
    PreloadLink,
    InlineHeroVariable,
    InlineImgTag,
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CanonicalMeta => write!(f, "canonical-meta"),
            Self::PreloadLink => write!(f, "preload-link"),
            Self::InlineHeroVariable => write!(f, "inline-hero-variable"),
            Self::InlineImgTag => write!(f, "inline-img-tag"),
        }
    }
}

/// A URL that may be the item's full-resolution image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub source: CandidateSource,
}

/// Candidates for one item, deduplicated by exact URL.
///
/// Iteration follows first discovery, so candidates are tried in heuristic
/// order.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
    seen: HashSet<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a URL. Returns false if it was already present.
    pub fn insert(&mut self, url: String, source: CandidateSource) -> bool {
        if !self.seen.insert(url.clone()) {
            return false;
        }
        self.candidates.push(Candidate { url, source });
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }
}

impl IntoIterator for CandidateSet {
    type Item = Candidate;
    type IntoIter = std::vec::IntoIter<Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

/// A heuristic that failed without affecting the others.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub source: CandidateSource,
    pub error: DriverError,
}

/// Outcome of extraction: whatever was found plus the failures along the way.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub candidates: CandidateSet,
    pub diagnostics: Vec<Diagnostic>,
}

/// Extraction failures that skip the item for this run.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Page never rendered '{selector}': {source}")]
    PageNotReady {
        selector: String,
        #[source]
        source: DriverError,
    },
}

/// Timing and selectors for the extraction preconditions.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Optional button dismissed before extraction.
    pub interstitial_selector: Option<String>,
    /// Pause after clicking the interstitial.
    pub settle_delay: Duration,
    /// How long to wait for the first image element.
    pub ready_timeout: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            interstitial_selector: Some(DEFAULT_INTERSTITIAL_SELECTOR.to_string()),
            settle_delay: Duration::from_millis(2000),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// The standard heuristic order.
pub fn default_heuristics<S: PageSession + 'static>() -> Vec<Box<dyn Heuristic<S>>> {
    vec![
        Box::new(CanonicalImage),
        Box::new(PreloadLinks),
        Box::new(HeroVariable),
        Box::new(ImageTags),
    ]
}

/// Runs the heuristics against a page.
pub struct Extractor<S> {
    heuristics: Vec<Box<dyn Heuristic<S>>>,
    options: ExtractOptions,
}

impl<S: PageSession + 'static> Extractor<S> {
    pub fn new(options: ExtractOptions) -> Self {
        Self::with_heuristics(options, default_heuristics())
    }

    pub fn with_heuristics(options: ExtractOptions, heuristics: Vec<Box<dyn Heuristic<S>>>) -> Self {
        Self {
            heuristics,
            options,
        }
    }

    /// Extract candidates for `code` from a page already navigated to its listing.
    pub async fn extract(&self, page: &S, code: &str) -> Result<Extraction, ExtractError> {
        self.dismiss_interstitial(page).await;

        page.wait_for_selector(IMG_SELECTOR, self.options.ready_timeout)
            .await
            .map_err(|source| ExtractError::PageNotReady {
                selector: IMG_SELECTOR.to_string(),
                source,
            })?;

        let mut extraction = Extraction::default();
        for heuristic in &self.heuristics {
            let source = heuristic.source();
            match heuristic.discover(page, code).await {
                Ok(urls) => {
                    let found = urls.len();
                    let mut added = 0;
                    for url in urls {
                        if extraction.candidates.insert(url, source) {
                            added += 1;
                        }
                    }
                    debug!("{} [{}]: {} found, {} new", code, source, found, added);
                }
                Err(error) => {
                    warn!("{} [{}] contributed nothing: {}", code, source, error);
                    extraction.diagnostics.push(Diagnostic { source, error });
                }
            }
        }

        Ok(extraction)
    }

    /// Click the interstitial button if the page shows one. Never fails.
    async fn dismiss_interstitial(&self, page: &S) {
        let Some(selector) = self.options.interstitial_selector.as_deref() else {
            return;
        };

        let button = match page.query_one(selector).await {
            Ok(Some(button)) => button,
            Ok(None) => return,
            Err(e) => {
                debug!("Interstitial lookup failed: {}", e);
                return;
            }
        };

        match page.click(&button).await {
            Ok(()) => {
                debug!("Dismissed interstitial, settling for {:?}", self.options.settle_delay);
                tokio::time::sleep(self.options.settle_delay).await;
            }
            Err(e) => debug!("Interstitial click failed: {}", e),
        }
    }
}
