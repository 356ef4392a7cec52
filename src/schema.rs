//! Detection data model shared by the decoder, registry and presentation layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized rectangle, every field in [0, 1], origin at the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Fields paired with their wire names, for range checks
    pub(crate) fn fields(&self) -> [(&'static str, f64); 4] {
        [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ]
    }

    /// Center point in normalized coordinates
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// An object reported by the perception device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedObject {
    /// Stable within a session
    pub id: String,
    /// Class label (e.g. "person", "car")
    pub label: String,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Distance from the camera in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
    /// Set by the registry for the object currently being tracked
    #[serde(default)]
    pub is_tracked: bool,
}

/// Latest camera image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Encoded image as sent by the device (base64 JPEG in practice)
    pub payload: String,
    /// When this client decoded the frame
    pub received_at: DateTime<Utc>,
    /// Device-side capture time in unix milliseconds, when provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_timestamp: Option<i64>,
}

impl Frame {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Utc::now(),
            device_timestamp: None,
        }
    }
}

/// Authoritative set of objects currently in view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionBatch {
    pub objects: Vec<DetectedObject>,
    pub device_timestamp: Option<i64>,
}

impl DetectionBatch {
    pub fn new(objects: Vec<DetectedObject>) -> Self {
        Self {
            objects,
            device_timestamp: None,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|o| o.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detected_object_wire_names() {
        let object = DetectedObject {
            id: "7".to_string(),
            label: "Dog".to_string(),
            confidence: 0.78,
            bbox: BoundingBox::new(0.1, 0.7, 0.15, 0.2),
            depth: None,
            is_tracked: true,
        };
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["isTracked"], true);
        assert!(json.get("depth").is_none());
    }

    #[test]
    fn test_bbox_center() {
        let bbox = BoundingBox::new(0.2, 0.3, 0.2, 0.4);
        let (cx, cy) = bbox.center();
        assert!((cx - 0.3).abs() < 1e-9);
        assert!((cy - 0.5).abs() < 1e-9);
    }
}
