//! JSON request and response bodies.

use chrono::{DateTime, NaiveDate, Utc};
use classwatch_core::{
    AttendanceRecord, AttendanceStatus, Detection, DetectionEvent, Efficiency, Engagement,
    StudentProfile, StudentSummary,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub roll_number: Option<String>,
    pub class_name: Option<String>,
    pub reference_image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorRequest {
    pub face_descriptor: Option<Vec<f32>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentQuery {
    pub class_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResponse {
    pub message: String,
    pub student: StudentSummary,
}

/// Everything a client needs to match faces locally.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceResponse {
    pub student_id: String,
    pub name: String,
    pub roll_number: String,
    pub reference_image: String,
    pub face_descriptor: Option<Vec<f32>>,
}

impl From<StudentProfile> for ReferenceResponse {
    fn from(student: StudentProfile) -> Self {
        Self {
            student_id: student.id,
            name: student.name,
            roll_number: student.roll_number,
            reference_image: student.reference_image,
            face_descriptor: student.face_descriptor.map(|d| d.values),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRequest {
    pub class_name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub day_of_week: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ClassResponse<T: Serialize> {
    pub message: String,
    pub class: T,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRequest {
    pub student_id: Option<String>,
    pub roll_number: Option<String>,
    pub class_name: Option<String>,
    pub class_id: Option<String>,
    pub presence_duration: Option<f64>,
    pub class_duration: Option<f64>,
    #[serde(default)]
    pub detections: Vec<DetectionEvent>,
    pub engagement_score: Option<f64>,
    pub engagement_data: Option<Engagement>,
}

#[derive(Debug, Serialize)]
pub struct MarkResponse {
    pub message: String,
    pub attendance: AttendanceRecord,
}

/// Filters shared by the attendance, stats and efficiency endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceQuery {
    pub student_id: Option<String>,
    pub class_name: Option<String>,
    pub class_id: Option<String>,
    pub date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// One line of a student's attendance history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub date: NaiveDate,
    pub class_id: String,
    pub class_name: String,
    pub status: AttendanceStatus,
    pub presence_duration: u32,
    pub required_duration: u32,
    pub engagement_score: u8,
}

impl From<&AttendanceRecord> for RecordSummary {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            date: record.day,
            class_id: record.class_id.clone(),
            class_name: record.class_name.clone(),
            status: record.status,
            presence_duration: record.presence_duration,
            required_duration: record.required_duration,
            engagement_score: record.engagement_score,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentEfficiency {
    pub student_id: String,
    pub student_name: String,
    pub roll_number: String,
    pub class_name: String,
    pub total_classes: u32,
    pub classes_attended: u32,
    pub classes_absent: u32,
    pub efficiency: f64,
    pub average_engagement: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_presence_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance_records: Option<Vec<RecordSummary>>,
}

impl StudentEfficiency {
    /// Bulk-report row.
    pub fn row(student: &StudentProfile, efficiency: &Efficiency) -> Self {
        Self {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            roll_number: student.roll_number.clone(),
            class_name: student.class_name.clone(),
            total_classes: efficiency.total_classes,
            classes_attended: efficiency.classes_attended,
            classes_absent: efficiency.classes_absent,
            efficiency: efficiency.efficiency,
            average_engagement: efficiency.average_engagement,
            average_presence_duration: None,
            attendance_records: None,
        }
    }

    /// Per-student report with history.
    pub fn detailed(
        student: &StudentProfile,
        efficiency: &Efficiency,
        records: &[AttendanceRecord],
    ) -> Self {
        Self {
            average_presence_duration: Some(efficiency.average_presence_duration),
            attendance_records: Some(records.iter().map(RecordSummary::from).collect()),
            ..Self::row(student, efficiency)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FrameRequest {
    /// Capture time; the server's receive time when omitted.
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub message: String,
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
