//! Detection stream protocol message types
//!
//! Defines the JSON message format exchanged with the perception device.

use serde::{Deserialize, Serialize};

use crate::schema::BoundingBox;

/// Device-to-client message
///
/// Object records stay as raw JSON here so that one bad record can be
/// dropped without losing the rest of the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Camera frame
    Frame {
        frame: String,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Full set of objects currently detected, optionally with the frame
    /// they were detected in
    Detections {
        objects: Vec<serde_json::Value>,
        #[serde(default)]
        frame: Option<String>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

impl DeviceMessage {
    /// Message kinds this client understands
    pub const KINDS: [&'static str; 2] = ["frame", "detections"];
}

/// One entry of a `detections` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: String,
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub depth: Option<f64>,
}

/// Client-to-device tracking command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TrackingCommand {
    /// Follow one object
    StartTracking {
        #[serde(rename = "objectId")]
        object_id: String,
    },
    /// Stop following whatever is tracked
    StopTracking,
}

impl TrackingCommand {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
