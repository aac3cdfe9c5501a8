//! Candidate discovery heuristics.
//!
//! Each heuristic looks at the rendered listing page from a different angle.
//! They are independent: one failing says nothing about the others.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::CandidateSource;
use crate::browser::{DriverResult, PageSession};

/// Preview image meta tag.
pub const OG_IMAGE_SELECTOR: &str = "meta[property='og:image']";
/// Image preload hints in the document head.
pub const PRELOAD_SELECTOR: &str = "link[rel='preload'][as='image']";
/// Every rendered image.
pub const IMG_SELECTOR: &str = "img";
/// Page-global hero image variable.
pub const HERO_EXPRESSION: &str = "window.heroImg || \"\"";

/// Size suffix the listing CDN uses for its largest rendition.
pub const HIGH_RES_SUFFIX: &str = "/s-l1600.webp";

static SIZE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/s-l\d+\.(?:jpe?g|webp)$").expect("valid size suffix regex"));

/// One best-effort strategy for finding candidate URLs on a page.
#[async_trait]
pub trait Heuristic<S: PageSession>: Send + Sync {
    fn source(&self) -> CandidateSource;

    /// URLs found on the page, in discovery order. May be empty.
    async fn discover(&self, page: &S, code: &str) -> DriverResult<Vec<String>>;
}

/// Rewrite a CDN size suffix (`/s-l500.jpg`) to the high resolution one.
pub fn upscale_listing_image(url: &str) -> String {
    SIZE_SUFFIX.replace(url, HIGH_RES_SUFFIX).into_owned()
}

/// Whether an `<img>` URL plausibly belongs to the item.
///
/// Listing pages carry plenty of unrelated imagery; requiring the item code
/// and rejecting thumbnail paths is the only precision filter.
pub fn image_tag_matches(url: &str, code: &str) -> bool {
    !url.is_empty()
        && url.to_lowercase().contains(&code.to_lowercase())
        && !url.contains("thumbs")
}

/// `og:image` meta tag, upscaled to the largest rendition.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalImage;

#[async_trait]
impl<S: PageSession> Heuristic<S> for CanonicalImage {
    fn source(&self) -> CandidateSource {
        CandidateSource::CanonicalMeta
    }

    async fn discover(&self, page: &S, _code: &str) -> DriverResult<Vec<String>> {
        let Some(meta) = page.query_one(OG_IMAGE_SELECTOR).await? else {
            return Ok(Vec::new());
        };
        let content = page.attribute(&meta, "content").await?.unwrap_or_default();
        let content = content.trim();
        if content.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![upscale_listing_image(content)])
    }
}

/// `<link rel=preload as=image>` hints, taken verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloadLinks;

#[async_trait]
impl<S: PageSession> Heuristic<S> for PreloadLinks {
    fn source(&self) -> CandidateSource {
        CandidateSource::PreloadLink
    }

    async fn discover(&self, page: &S, _code: &str) -> DriverResult<Vec<String>> {
        let mut urls = Vec::new();
        for link in page.query_all(PRELOAD_SELECTOR).await? {
            // The property is the resolved absolute URL.
            if let Some(href) = page.property(&link, "href").await? {
                if !href.is_empty() {
                    urls.push(href);
                }
            }
        }
        Ok(urls)
    }
}

/// The `heroImg` page variable, when it holds an http(s) URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeroVariable;

#[async_trait]
impl<S: PageSession> Heuristic<S> for HeroVariable {
    fn source(&self) -> CandidateSource {
        CandidateSource::InlineHeroVariable
    }

    async fn discover(&self, page: &S, _code: &str) -> DriverResult<Vec<String>> {
        let value = page.evaluate(HERO_EXPRESSION).await?;
        let hero = value.as_str().unwrap_or_default().trim();
        let lower = hero.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(vec![hero.to_string()])
        } else {
            Ok(Vec::new())
        }
    }
}

/// `<img>` zoom and normal sources that mention the item code.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTags;

#[async_trait]
impl<S: PageSession> Heuristic<S> for ImageTags {
    fn source(&self) -> CandidateSource {
        CandidateSource::InlineImgTag
    }

    async fn discover(&self, page: &S, code: &str) -> DriverResult<Vec<String>> {
        let mut urls = Vec::new();
        for img in page.query_all(IMG_SELECTOR).await? {
            // Nodes can detach mid-scan; skip them and keep what was found.
            let (zoom, src) = match read_image_sources(page, &img).await {
                Ok(sources) => sources,
                Err(e) => {
                    debug!("Skipping unreadable image element: {}", e);
                    continue;
                }
            };
            for url in [zoom, src].into_iter().flatten() {
                if image_tag_matches(&url, code) {
                    urls.push(url);
                }
            }
        }
        Ok(urls)
    }
}

async fn read_image_sources<S: PageSession>(
    page: &S,
    img: &S::Element,
) -> DriverResult<(Option<String>, Option<String>)> {
    let zoom = page.attribute(img, "data-zoom-src").await?;
    let src = page.attribute(img, "src").await?;
    Ok((zoom, src))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upscale_rewrites_size_suffix() {
        assert_eq!(
            upscale_listing_image("https://i.ebayimg.com/images/g/abc/s-l500.jpg"),
            "https://i.ebayimg.com/images/g/abc/s-l1600.webp"
        );
        assert_eq!(
            upscale_listing_image("https://i.ebayimg.com/images/g/abc/s-l64.jpeg"),
            "https://i.ebayimg.com/images/g/abc/s-l1600.webp"
        );
        assert_eq!(
            upscale_listing_image("https://i.ebayimg.com/images/g/abc/s-l960.webp"),
            "https://i.ebayimg.com/images/g/abc/s-l1600.webp"
        );
    }

    #[test]
    fn test_upscale_leaves_other_urls_alone() {
        let untouched = [
            "https://i.ebayimg.com/images/g/abc/s-l500.png",
            "https://i.ebayimg.com/images/g/abc/s-l500.jpg?x=1",
            "https://example.com/photo.jpg",
        ];
        for url in untouched {
            assert_eq!(upscale_listing_image(url), url);
        }
    }

    #[test]
    fn test_image_tag_filter() {
        assert!(!image_tag_matches(
            "https://cdn.test/thumbs/LSW123-1.jpg",
            "LSW123"
        ));
        assert!(image_tag_matches("https://cdn.test/LSW123-full.jpg", "LSW123"));
        assert!(!image_tag_matches("https://cdn.test/OTHER456.jpg", "LSW123"));
    }

    #[test]
    fn test_image_tag_filter_is_case_insensitive_on_code() {
        assert!(image_tag_matches("https://cdn.test/lsw123_big.JPG", "LSW123"));
        assert!(!image_tag_matches("", "LSW123"));
    }
}
