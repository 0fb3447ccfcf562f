//! Presence aggregation for one monitoring window.
//!
//! Presence is the elapsed span between a student's first and most recent
//! accepted detection, not a sum of detected intervals. A student who leaves
//! and returns is credited for the time away.

use crate::attendance::{status_for, DetectionEvent, Engagement, Verdict};
use crate::pose::HeadPose;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Running state for one student within one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPresence {
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub cumulative_seconds: u32,
    pub detection_log: Vec<DetectionEvent>,
    pub engagement: Engagement,
}

impl StudentPresence {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            first_seen_at: at,
            last_seen_at: at,
            cumulative_seconds: 0,
            detection_log: Vec::new(),
            engagement: Engagement::default(),
        }
    }

    /// Commit the tallies against the record's required duration.
    pub fn verdict(&self, required_secs: u32) -> Verdict {
        Verdict {
            status: status_for(self.cumulative_seconds, required_secs),
            presence_duration: self.cumulative_seconds,
            required_duration: required_secs,
            engagement_score: self.engagement.score,
        }
    }
}

/// What one accepted frame did to a student's state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameOutcome {
    pub engaged: bool,
    pub cumulative_seconds: u32,
    pub engagement_score: u8,
}

/// Per-student presence state for a single open window.
///
/// Frames for one window arrive sequentially; concurrent windows each own
/// a separate tracker.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    students: HashMap<String, StudentPresence>,
    /// Maximum detection-log length per student; `None` keeps everything.
    log_cap: Option<usize>,
}

impl PresenceTracker {
    pub fn new(log_cap: Option<usize>) -> Self {
        Self {
            students: HashMap::new(),
            log_cap: log_cap.filter(|&cap| cap > 0),
        }
    }

    /// Fold one accepted match into the student's state.
    ///
    /// `pose` is `None` when the detection carried no usable landmarks;
    /// such frames count as looking away.
    pub fn on_frame_match(
        &mut self,
        student_id: &str,
        timestamp: DateTime<Utc>,
        confidence: f32,
        pose: Option<&HeadPose>,
    ) -> FrameOutcome {
        let state = self
            .students
            .entry(student_id.to_string())
            .or_insert_with(|| StudentPresence::new(timestamp));

        if timestamp > state.last_seen_at {
            state.last_seen_at = timestamp;
        }
        let elapsed_ms = (state.last_seen_at - state.first_seen_at).num_milliseconds().max(0);
        state.cumulative_seconds = u32::try_from(elapsed_ms / 1000).unwrap_or(u32::MAX);

        let engaged = pose.map(|p| p.is_looking_forward).unwrap_or(false);
        state.engagement.record(engaged);

        state.detection_log.push(DetectionEvent {
            timestamp,
            confidence,
            engaged,
        });
        if let Some(cap) = self.log_cap {
            let excess = state.detection_log.len().saturating_sub(cap);
            if excess > 0 {
                state.detection_log.drain(..excess);
            }
        }

        FrameOutcome {
            engaged,
            cumulative_seconds: state.cumulative_seconds,
            engagement_score: state.engagement.score,
        }
    }

    pub fn get(&self, student_id: &str) -> Option<&StudentPresence> {
        self.students.get(student_id)
    }

    pub fn students(&self) -> impl Iterator<Item = (&String, &StudentPresence)> {
        self.students.iter()
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Verdict for a student seen in this window, or `None` if never seen.
    pub fn finalize(&self, student_id: &str, required_secs: u32) -> Option<Verdict> {
        self.students.get(student_id).map(|s| s.verdict(required_secs))
    }
}
