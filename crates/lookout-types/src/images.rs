//! Captured frames and the detection results attached to them.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Width of the frame detection coordinates are expressed against.
pub const REFERENCE_WIDTH: f64 = 1920.0;
/// Height of the frame detection coordinates are expressed against.
pub const REFERENCE_HEIGHT: f64 = 1080.0;

/// One captured frame as listed by `GET /api/images`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
    /// Opaque value compared for equality between ticks.
    #[serde(default)]
    pub modified_at: serde_json::Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ImageRecord {
    /// Key used to look up detections: `instance` when present, else `source`.
    pub fn join_key(&self) -> Option<&str> {
        self.instance
            .as_deref()
            .filter(|key| !key.is_empty())
            .or_else(|| Some(self.source.as_str()).filter(|key| !key.is_empty()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageList {
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub right: f64,
    #[serde(default)]
    pub bottom: f64,
    #[serde(default)]
    pub score: f64,
}

/// Box position as percentages of the reference frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl DetectionBox {
    pub fn overlay(&self) -> OverlayRect {
        OverlayRect {
            left: self.left / REFERENCE_WIDTH * 100.0,
            top: self.top / REFERENCE_HEIGHT * 100.0,
            width: (self.right - self.left) / REFERENCE_WIDTH * 100.0,
            height: (self.bottom - self.top) / REFERENCE_HEIGHT * 100.0,
        }
    }
}

impl OverlayRect {
    /// Project back to pixel bounds `(left, top, right, bottom)` of a frame
    /// with the given dimensions.
    pub fn to_pixels(&self, width: u32, height: u32) -> (f64, f64, f64, f64) {
        let w = f64::from(width);
        let h = f64::from(height);
        let left = self.left / 100.0 * w;
        let top = self.top / 100.0 * h;
        (
            left,
            top,
            left + self.width / 100.0 * w,
            top + self.height / 100.0 * h,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(default)]
    pub results: Vec<DetectionBox>,
}

impl DetectionResult {
    pub fn best_score(&self) -> Option<f64> {
        self.results.iter().map(|b| b.score).reduce(f64::max)
    }
}

/// Detection results keyed by instance name or image source.
pub type DetectionMap = HashMap<String, DetectionResult>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionList {
    #[serde(default)]
    pub detections: DetectionMap,
}

/// An image with whatever detections matched its join key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedImage {
    #[serde(flatten)]
    pub image: ImageRecord,
    pub detections: Option<DetectionResult>,
}
