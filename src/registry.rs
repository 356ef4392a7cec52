//! Object tracking registry
//!
//! Holds what the device currently sees: the latest frame, the latest object
//! set, and the user's selection. One invariant ties them together:
//!
//! > `tracking_enabled` is true only while `selected_id` names an object that
//! > is present in the current set.
//!
//! The registry does no locking of its own. The client keeps it behind a
//! single mutex so that inbound batches and user intents are applied one at a
//! time.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commands::CommandEmitter;
use crate::schema::{DetectedObject, DetectionBatch, Frame};

/// Upper bound on remembered object ids
const MAX_SIGHTINGS: usize = 512;

/// What is remembered about an id after it leaves the view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sighting {
    pub label: String,
    pub last_confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub times_detected: u64,
}

/// Read-only copy of the registry handed to the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub frame: Option<Frame>,
    /// In the order the device listed them
    pub objects: Vec<DetectedObject>,
    pub selected_id: Option<String>,
    pub tracking_enabled: bool,
}

impl RegistrySnapshot {
    /// Objects at or above the display threshold
    pub fn visible_objects(&self, threshold: f64) -> impl Iterator<Item = &DetectedObject> {
        self.objects.iter().filter(move |o| o.confidence >= threshold)
    }

    pub fn selected(&self) -> Option<&DetectedObject> {
        let id = self.selected_id.as_deref()?;
        self.objects.iter().find(|o| o.id == id)
    }
}

#[derive(Debug, Default)]
pub struct TrackingRegistry {
    objects: Vec<DetectedObject>,
    selected_id: Option<String>,
    tracking_enabled: bool,
    latest_frame: Option<Frame>,
    last_batch_at: Option<Instant>,
    sightings: HashMap<String, Sighting>,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracking_enabled
    }

    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest_frame.as_ref()
    }

    pub fn objects(&self) -> &[DetectedObject] {
        &self.objects
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|o| o.id.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.iter().any(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn sighting(&self, id: &str) -> Option<&Sighting> {
        self.sightings.get(id)
    }

    /// Every remembered id, most recently seen first
    pub fn sightings(&self) -> Vec<(String, Sighting)> {
        let mut all: Vec<_> = self
            .sightings
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        all.sort_by(|a, b| b.1.last_seen.cmp(&a.1.last_seen).then_with(|| a.0.cmp(&b.0)));
        all
    }

    /// Last write wins
    pub fn apply_frame(&mut self, frame: Frame) {
        self.latest_frame = Some(frame);
    }

    /// Replace the object set with `batch`.
    ///
    /// Ids are unique in the registry; if the batch repeats one, the first
    /// occurrence is kept. Returns true if the selection was dropped because
    /// its object is gone.
    pub fn apply_detections(&mut self, batch: DetectionBatch) -> bool {
        let mut seen = HashSet::with_capacity(batch.objects.len());
        let mut objects = batch.objects;
        objects.retain(|o| {
            let first = seen.insert(o.id.clone());
            if !first {
                tracing::warn!("Dropping repeated object id {}", o.id);
            }
            first
        });

        let now = Utc::now();
        for object in &objects {
            self.record_sighting(object, now);
        }

        self.objects = objects;
        self.last_batch_at = Some(Instant::now());

        let dropped = self.drop_vanished_selection();
        self.debug_check();
        dropped
    }

    /// Select an object, or clear the selection with `None`.
    ///
    /// Ids that are not currently present are ignored and false is returned.
    /// Any change of selection while tracking stops tracking first, so the
    /// device is never left following an object the user moved away from.
    pub fn select(&mut self, id: Option<&str>, emitter: &CommandEmitter) -> bool {
        match id {
            None => {
                if self.tracking_enabled {
                    emitter.emit_stop_tracking();
                }
                self.selected_id = None;
                self.tracking_enabled = false;
            }
            Some(id) => {
                if !self.contains(id) {
                    tracing::debug!("Ignoring selection of unknown object {}", id);
                    return false;
                }
                if self.selected_id.as_deref() != Some(id) {
                    if self.tracking_enabled {
                        emitter.emit_stop_tracking();
                        self.tracking_enabled = false;
                    }
                    self.selected_id = Some(id.to_string());
                }
            }
        }
        self.debug_check();
        true
    }

    /// Start tracking the selected object. No-op without a selection.
    pub fn start_tracking(&mut self, emitter: &CommandEmitter) -> bool {
        let Some(id) = self.selected_id.as_deref() else {
            tracing::debug!("Start tracking ignored, nothing selected");
            return false;
        };
        emitter.emit_start_tracking(id);
        self.tracking_enabled = true;
        self.debug_check();
        true
    }

    pub fn stop_tracking(&mut self, emitter: &CommandEmitter) {
        self.tracking_enabled = false;
        if self.selected_id.is_some() {
            emitter.emit_stop_tracking();
        }
    }

    /// Drop the object set if no batch arrived within `max_age`.
    pub fn expire_stale(&mut self, now: Instant, max_age: Duration) -> bool {
        let stale = match self.last_batch_at {
            Some(at) => now.saturating_duration_since(at) > max_age,
            None => false,
        };
        if !stale || self.objects.is_empty() {
            return false;
        }

        tracing::debug!("Expiring {} objects after {:?}", self.objects.len(), max_age);
        self.objects.clear();
        self.last_batch_at = None;
        self.drop_vanished_selection();
        self.debug_check();
        true
    }

    /// Forget everything tied to the session. Sightings outlive sessions.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.selected_id = None;
        self.tracking_enabled = false;
        self.latest_frame = None;
        self.last_batch_at = None;
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let tracked = self
            .selected_id
            .as_deref()
            .filter(|_| self.tracking_enabled);
        RegistrySnapshot {
            frame: self.latest_frame.clone(),
            objects: self
                .objects
                .iter()
                .map(|o| DetectedObject {
                    is_tracked: tracked == Some(o.id.as_str()),
                    ..o.clone()
                })
                .collect(),
            selected_id: self.selected_id.clone(),
            tracking_enabled: self.tracking_enabled,
        }
    }

    /// `tracking_enabled => selected_id ∈ ids`
    pub fn invariant_holds(&self) -> bool {
        !self.tracking_enabled
            || self
                .selected_id
                .as_deref()
                .is_some_and(|id| self.contains(id))
    }

    fn drop_vanished_selection(&mut self) -> bool {
        match self.selected_id.as_deref() {
            Some(id) if !self.contains(id) => {
                tracing::info!("Selected object {} left the view", id);
                self.selected_id = None;
                self.tracking_enabled = false;
                true
            }
            _ => false,
        }
    }

    fn record_sighting(&mut self, object: &DetectedObject, now: DateTime<Utc>) {
        if let Some(sighting) = self.sightings.get_mut(&object.id) {
            sighting.label.clone_from(&object.label);
            sighting.last_confidence = object.confidence;
            sighting.last_seen = now;
            sighting.times_detected += 1;
            return;
        }

        if self.sightings.len() >= MAX_SIGHTINGS {
            if let Some(oldest) = self
                .sightings
                .iter()
                .min_by_key(|(_, s)| s.last_seen)
                .map(|(id, _)| id.clone())
            {
                self.sightings.remove(&oldest);
            }
        }

        self.sightings.insert(
            object.id.clone(),
            Sighting {
                label: object.label.clone(),
                last_confidence: object.confidence,
                first_seen: now,
                last_seen: now,
                times_detected: 1,
            },
        );
    }

    fn debug_check(&self) {
        debug_assert!(
            self.invariant_holds(),
            "tracking enabled without a present selection"
        );
    }
}
