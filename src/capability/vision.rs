// ABOUTME: Narrow contracts for the template-matching and OCR services
// ABOUTME: The engine treats both as black boxes; unconfigured defaults fail every call

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{CapabilityError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub found: bool,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub confidence: f64,
}

/// Rectangular region of an image, `[x, y, width, height]` in script documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i64; 4]", into = "[i64; 4]")]
pub struct Region {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl From<[i64; 4]> for Region {
    fn from([x, y, width, height]: [i64; 4]) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl From<Region> for [i64; 4] {
    fn from(region: Region) -> Self {
        [region.x, region.y, region.width, region.height]
    }
}

#[async_trait]
pub trait TemplateMatcher: Send + Sync {
    async fn match_template(&self, image: &str, template: &str, threshold: f64)
        -> Result<MatchResult>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image: &str, region: Option<Region>) -> Result<String>;
}

/// Placeholder matcher used when no image backend is wired in
pub struct UnconfiguredMatcher;

#[async_trait]
impl TemplateMatcher for UnconfiguredMatcher {
    async fn match_template(
        &self,
        _image: &str,
        template: &str,
        _threshold: f64,
    ) -> Result<MatchResult> {
        Err(CapabilityError::Vision(format!(
            "no template matcher configured (template: {})",
            template
        )))
    }
}

pub struct UnconfiguredOcr;

#[async_trait]
impl OcrEngine for UnconfiguredOcr {
    async fn extract_text(&self, image: &str, _region: Option<Region>) -> Result<String> {
        Err(CapabilityError::Vision(format!(
            "no OCR engine configured (image: {})",
            image
        )))
    }
}
