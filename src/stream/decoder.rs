//! Detection stream decoder
//!
//! Turns raw inbound text into typed [`StreamEvent`]s. Decoding problems stop
//! here: a bad message is logged and skipped, a bad object record is logged
//! and left out of its batch, and the session is never affected.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;

use crate::error::{ProtocolError, ValidationError};
use crate::schema::{DetectedObject, DetectionBatch, Frame};
use crate::stream::protocol::{DeviceMessage, ObjectRecord};

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Frame(Frame),
    Detections {
        batch: DetectionBatch,
        /// Frame the batch was detected in, if the device sent one along
        frame: Option<Frame>,
    },
}

/// Running counters, mostly for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub messages_accepted: u64,
    pub messages_rejected: u64,
    pub records_dropped: u64,
}

#[derive(Debug, Default)]
pub struct Decoder {
    stats: DecoderStats,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Decode one message, logging and discarding anything unusable.
    pub fn decode(&mut self, raw: &str) -> Option<StreamEvent> {
        match self.try_decode(raw) {
            Ok(event) => {
                self.stats.messages_accepted += 1;
                Some(event)
            }
            Err(e) => {
                self.stats.messages_rejected += 1;
                tracing::warn!("Discarding inbound message: {}", e);
                None
            }
        }
    }

    /// Decode one message, returning why it was rejected.
    pub fn try_decode(&mut self, raw: &str) -> Result<StreamEvent, ProtocolError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson {
            message: e.to_string(),
        })?;

        let kind = match value.get("type") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingType),
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => {
                return Err(ProtocolError::Malformed {
                    kind: other.to_string(),
                    message: "'type' must be a string".to_string(),
                })
            }
        };
        if !DeviceMessage::KINDS.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType { kind });
        }

        let message: DeviceMessage =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
                kind: kind.clone(),
                message: e.to_string(),
            })?;

        match message {
            DeviceMessage::Frame { frame, timestamp } => {
                Ok(StreamEvent::Frame(stamp_frame(frame, timestamp)))
            }
            DeviceMessage::Detections {
                objects,
                frame,
                timestamp,
            } => {
                let objects = self.decode_objects(objects);
                Ok(StreamEvent::Detections {
                    batch: DetectionBatch {
                        objects,
                        device_timestamp: timestamp,
                    },
                    frame: frame.map(|f| stamp_frame(f, timestamp)),
                })
            }
        }
    }

    /// Keep every record that validates; later duplicates of an id are dropped.
    fn decode_objects(&mut self, records: Vec<Value>) -> Vec<DetectedObject> {
        let mut seen = HashSet::with_capacity(records.len());
        let mut objects = Vec::with_capacity(records.len());

        for (index, raw) in records.into_iter().enumerate() {
            let result = serde_json::from_value::<ObjectRecord>(raw)
                .map_err(|e| ValidationError::Malformed {
                    index,
                    message: e.to_string(),
                })
                .and_then(|record| validate_record(index, record))
                .and_then(|object| {
                    if seen.insert(object.id.clone()) {
                        Ok(object)
                    } else {
                        Err(ValidationError::DuplicateId { id: object.id })
                    }
                });

            match result {
                Ok(object) => objects.push(object),
                Err(e) => {
                    self.stats.records_dropped += 1;
                    tracing::warn!("Dropping object record: {}", e);
                }
            }
        }

        objects
    }
}

fn stamp_frame(payload: String, device_timestamp: Option<i64>) -> Frame {
    Frame {
        payload,
        received_at: Utc::now(),
        device_timestamp,
    }
}

/// Range-check one record and convert it into a [`DetectedObject`].
pub fn validate_record(index: usize, record: ObjectRecord) -> Result<DetectedObject, ValidationError> {
    if record.id.is_empty() {
        return Err(ValidationError::EmptyId { index });
    }

    if !(0.0..=1.0).contains(&record.confidence) {
        return Err(ValidationError::ConfidenceOutOfRange {
            id: record.id,
            value: record.confidence,
        });
    }

    if let Some((field, value)) = record
        .bbox
        .fields()
        .into_iter()
        .find(|(_, v)| !(0.0..=1.0).contains(v))
    {
        return Err(ValidationError::BoundingBoxOutOfRange {
            id: record.id,
            field,
            value,
        });
    }

    if let Some(depth) = record.depth {
        if !depth.is_finite() || depth < 0.0 {
            return Err(ValidationError::InvalidDepth {
                id: record.id,
                value: depth,
            });
        }
    }

    Ok(DetectedObject {
        id: record.id,
        label: record.label,
        confidence: record.confidence,
        bbox: record.bbox,
        depth: record.depth,
        is_tracked: false,
    })
}
