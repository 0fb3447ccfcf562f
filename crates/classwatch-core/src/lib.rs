//! classwatch-core: attendance domain logic.
//!
//! Face descriptors come from an external recognition model; this crate
//! matches them against enrolled students, classifies head pose, times
//! class windows and turns detections into attendance verdicts.

pub mod aggregator;
pub mod attendance;
pub mod pose;
pub mod schedule;
pub mod student;
pub mod types;

pub use aggregator::{FrameOutcome, PresenceTracker, StudentPresence};
pub use attendance::{
    AttendanceKey, AttendanceRecord, AttendanceStats, AttendanceStatus, DetectionEvent,
    Efficiency, Engagement, Verdict,
};
pub use schedule::{ClassSchedule, ScheduleError, Window};
pub use student::{StudentProfile, StudentSummary};
pub use types::{Descriptor, Detection, EnrolledFace, EuclideanMatcher, Landmarks, MatchResult, Matcher};
