//! Attendance records, verdicts and the statistics derived from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fraction of the class a student must be seen for to count as present.
pub const DEFAULT_PRESENCE_FRACTION: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown attendance status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Present" => Ok(AttendanceStatus::Present),
            "Absent" => Ok(AttendanceStatus::Absent),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// `floor(class_secs × fraction)`.
pub fn required_duration_secs(class_secs: u32, fraction: f64) -> u32 {
    (f64::from(class_secs) * fraction).floor() as u32
}

/// Present iff the student was seen for at least the required duration.
pub fn status_for(presence_secs: u32, required_secs: u32) -> AttendanceStatus {
    if presence_secs >= required_secs {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Absent
    }
}

/// `round(100 × forward / total)`, or 0 with no frames.
pub fn engagement_score(frames_forward: u32, total_frames: u32) -> u8 {
    if total_frames == 0 {
        return 0;
    }
    let pct = (100.0 * f64::from(frames_forward) / f64::from(total_frames)).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Per-frame head-pose tallies for one student in one window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    #[serde(rename = "lookingForward", default)]
    pub frames_forward: u32,
    #[serde(rename = "lookingAway", default)]
    pub frames_away: u32,
    #[serde(default)]
    pub total_frames: u32,
    #[serde(default)]
    pub score: u8,
}

impl Engagement {
    pub fn record(&mut self, engaged: bool) {
        if engaged {
            self.frames_forward += 1;
        } else {
            self.frames_away += 1;
        }
        self.total_frames += 1;
        self.score = engagement_score(self.frames_forward, self.total_frames);
    }
}

/// One accepted face match in the detection log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Utc>,
    /// `1 - match distance`.
    pub confidence: f32,
    #[serde(rename = "engagement", default)]
    pub engaged: bool,
}

/// Final tallies for one student when a window is committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: AttendanceStatus,
    pub presence_duration: u32,
    pub required_duration: u32,
    pub engagement_score: u8,
}

/// Ledger key: one record per student, class and calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttendanceKey {
    pub student_id: String,
    pub class_id: String,
    pub day: NaiveDate,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    #[serde(rename = "date")]
    pub day: NaiveDate,
    pub roll_number: String,
    pub student_name: String,
    pub class_name: String,
    pub status: AttendanceStatus,
    /// Seconds the student was detected.
    pub presence_duration: u32,
    pub required_duration: u32,
    pub class_duration: u32,
    pub detection_log: Vec<DetectionEvent>,
    pub engagement_score: u8,
    pub engagement_data: Engagement,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Attendance efficiency over a set of records for one student.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Efficiency {
    pub total_classes: u32,
    pub classes_attended: u32,
    pub classes_absent: u32,
    /// Percent of classes attended, two decimals.
    pub efficiency: f64,
    /// Mean engagement score over attended classes only, two decimals.
    pub average_engagement: f64,
    /// Mean presence duration in seconds over all classes, two decimals.
    pub average_presence_duration: f64,
}

pub fn compute_efficiency(records: &[AttendanceRecord]) -> Efficiency {
    let total = records.len() as u32;
    if total == 0 {
        return Efficiency::default();
    }

    let attended: Vec<&AttendanceRecord> = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present)
        .collect();
    let present = attended.len() as u32;

    let average_engagement = if attended.is_empty() {
        0.0
    } else {
        attended
            .iter()
            .map(|r| f64::from(r.engagement_score))
            .sum::<f64>()
            / attended.len() as f64
    };

    let average_presence = records
        .iter()
        .map(|r| f64::from(r.presence_duration))
        .sum::<f64>()
        / f64::from(total);

    Efficiency {
        total_classes: total,
        classes_attended: present,
        classes_absent: total - present,
        efficiency: round2(100.0 * f64::from(present) / f64::from(total)),
        average_engagement: round2(average_engagement),
        average_presence_duration: round2(average_presence),
    }
}

/// Aggregate present/absent counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_records: u64,
    pub present_count: u64,
    pub absent_count: u64,
    pub present_percentage: f64,
}

impl AttendanceStats {
    pub fn from_counts(present_count: u64, absent_count: u64) -> Self {
        let total_records = present_count + absent_count;
        let present_percentage = if total_records > 0 {
            round2(100.0 * present_count as f64 / total_records as f64)
        } else {
            0.0
        };
        Self {
            total_records,
            present_count,
            absent_count,
            present_percentage,
        }
    }
}
