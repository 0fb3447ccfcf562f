use chrono::{NaiveDate, Utc};
use classwatch_core::attendance::compute_efficiency;
use classwatch_core::schedule::{duration_minutes, parse_clock_time, Cadence, DAILY};
use classwatch_core::{ClassSchedule, Descriptor, StudentProfile, StudentSummary};
use std::cmp::Ordering;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::{json, with_status, Response};
use warp::{Rejection, Reply};

use super::models::*;
use super::{ApiError, AppState};
use crate::service::MarkInput;
use crate::store::{AttendanceFilter, NewStudent};

type HandlerResult = Result<Response, Rejection>;

fn ok<T: serde::Serialize>(body: &T) -> HandlerResult {
    Ok(json(body).into_response())
}

fn created<T: serde::Serialize>(body: &T) -> HandlerResult {
    Ok(with_status(json(body), StatusCode::CREATED).into_response())
}

/// Trimmed, non-empty value of a required field.
fn required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("Invalid {field} '{raw}': expected YYYY-MM-DD")))
}

impl AttendanceQuery {
    /// `date` pins a single day; otherwise `startDate`/`endDate` bound the range.
    fn to_filter(&self, limit: Option<usize>) -> Result<AttendanceFilter, ApiError> {
        let (from_day, to_day) = match &self.date {
            Some(date) => {
                let day = parse_date("date", date)?;
                (Some(day), Some(day))
            }
            None => (
                self.start_date
                    .as_deref()
                    .map(|d| parse_date("startDate", d))
                    .transpose()?,
                self.end_date
                    .as_deref()
                    .map(|d| parse_date("endDate", d))
                    .transpose()?,
            ),
        };
        Ok(AttendanceFilter {
            student_id: self.student_id.clone(),
            class_id: self.class_id.clone(),
            class_name: self.class_name.clone(),
            from_day,
            to_day,
            limit,
        })
    }
}

pub async fn health() -> HandlerResult {
    ok(&HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// Students

pub async fn register_student(state: AppState, body: RegisterRequest) -> HandlerResult {
    let (Some(name), Some(roll_number), Some(class_name), Some(reference_image)) = (
        required(body.name),
        required(body.roll_number),
        required(body.class_name),
        required(body.reference_image),
    ) else {
        return Err(ApiError::validation("Missing required fields").into());
    };

    let student = state
        .store()
        .insert_student(NewStudent {
            name,
            roll_number,
            class_name,
            reference_image,
        })
        .await?;
    tracing::info!(student_id = %student.id, roll_number = %student.roll_number, "student registered");

    created(&StudentResponse {
        message: "Student registered successfully".into(),
        student: student.summary(),
    })
}

pub async fn list_students(state: AppState, query: StudentQuery) -> HandlerResult {
    let class_name = required(query.class_name);
    let students = state.store().list_students(class_name.as_deref()).await?;
    let summaries: Vec<StudentSummary> = students.iter().map(StudentProfile::summary).collect();
    ok(&summaries)
}

async fn student_by_roll(state: &AppState, roll_number: &str) -> Result<StudentProfile, Rejection> {
    state
        .store()
        .find_student_by_roll(roll_number)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found").into())
}

pub async fn get_student(roll_number: String, state: AppState) -> HandlerResult {
    let student = student_by_roll(&state, &roll_number).await?;
    ok(&student.summary())
}

pub async fn set_descriptor(
    roll_number: String,
    state: AppState,
    body: DescriptorRequest,
) -> HandlerResult {
    let values = body
        .face_descriptor
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation("faceDescriptor is required"))?;
    let descriptor = Descriptor::new(values);
    if !descriptor.is_finite() {
        return Err(ApiError::validation("faceDescriptor must contain only finite numbers").into());
    }

    let student = state
        .store()
        .set_descriptor(&roll_number, descriptor)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    tracing::info!(roll_number = %student.roll_number, "face descriptor stored");

    ok(&StudentResponse {
        message: "Face descriptor updated".into(),
        student: student.summary(),
    })
}

pub async fn get_reference(roll_number: String, state: AppState) -> HandlerResult {
    let student = student_by_roll(&state, &roll_number).await?;
    ok(&ReferenceResponse::from(student))
}

// Classes

struct ClassFields {
    class_name: String,
    start: chrono::NaiveTime,
    end: chrono::NaiveTime,
    cadence: Cadence,
    duration: u32,
}

fn validate_class(
    class_name: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    day_of_week: Option<String>,
) -> Result<ClassFields, ApiError> {
    let (Some(class_name), Some(start_time), Some(end_time)) =
        (required(class_name), required(start_time), required(end_time))
    else {
        return Err(ApiError::validation("Missing required fields"));
    };

    let invalid = |e: classwatch_core::ScheduleError| ApiError::Validation(e.to_string());
    let start = parse_clock_time(&start_time).map_err(invalid)?;
    let end = parse_clock_time(&end_time).map_err(invalid)?;
    let duration = duration_minutes(start, end).map_err(invalid)?;
    let cadence = Cadence::parse(required(day_of_week).as_deref().unwrap_or(DAILY)).map_err(invalid)?;

    Ok(ClassFields {
        class_name,
        start,
        end,
        cadence,
        duration,
    })
}

pub async fn add_class(state: AppState, body: ClassRequest) -> HandlerResult {
    let fields = validate_class(body.class_name, body.start_time, body.end_time, body.day_of_week)?;
    let now = Utc::now();
    let class = ClassSchedule {
        id: Uuid::new_v4().to_string(),
        class_name: fields.class_name,
        start_time: fields.start,
        end_time: fields.end,
        day_of_week: fields.cadence.as_str().to_string(),
        duration: fields.duration,
        is_active: body.is_active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };

    state.store().insert_class(&class).await?;
    state.schedule_changed.notify_one();
    tracing::info!(class_id = %class.id, class_name = %class.class_name, "class added");

    created(&ClassResponse {
        message: "Class added successfully".into(),
        class,
    })
}

pub async fn list_classes(state: AppState) -> HandlerResult {
    let classes = state.store().list_classes(false).await?;
    ok(&classes)
}

pub async fn get_class(class_id: String, state: AppState) -> HandlerResult {
    let class = state
        .store()
        .get_class(&class_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Class not found"))?;
    ok(&class)
}

/// Partial update: omitted fields keep their stored value, and the duration
/// is recomputed from whatever times result.
pub async fn update_class(class_id: String, state: AppState, body: ClassRequest) -> HandlerResult {
    let existing = state
        .store()
        .get_class(&class_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Class not found"))?;

    let fields = validate_class(
        body.class_name.or(Some(existing.class_name.clone())),
        body.start_time
            .or_else(|| Some(existing.start_time.format("%H:%M").to_string())),
        body.end_time
            .or_else(|| Some(existing.end_time.format("%H:%M").to_string())),
        body.day_of_week.or(Some(existing.day_of_week.clone())),
    )?;

    let class = ClassSchedule {
        class_name: fields.class_name,
        start_time: fields.start,
        end_time: fields.end,
        day_of_week: fields.cadence.as_str().to_string(),
        duration: fields.duration,
        is_active: body.is_active.unwrap_or(existing.is_active),
        updated_at: Utc::now(),
        ..existing
    };

    if !state.store().update_class(&class).await? {
        return Err(ApiError::not_found("Class not found").into());
    }
    state.schedule_changed.notify_one();
    tracing::info!(class_id = %class.id, "class updated");

    ok(&ClassResponse {
        message: "Class updated successfully".into(),
        class,
    })
}

pub async fn delete_class(class_id: String, state: AppState) -> HandlerResult {
    if !state.store().delete_class(&class_id).await? {
        return Err(ApiError::not_found("Class not found").into());
    }
    state.schedule_changed.notify_one();
    tracing::info!(class_id = %class_id, "class deleted");

    ok(&MessageResponse {
        message: "Class deleted successfully".into(),
    })
}

// Attendance

/// Non-negative whole seconds from a JSON number.
fn seconds(value: f64) -> u32 {
    if value.is_finite() {
        value.max(0.0).min(f64::from(u32::MAX)).floor() as u32
    } else {
        0
    }
}

pub async fn mark_attendance(state: AppState, body: MarkRequest) -> HandlerResult {
    let class_duration = body.class_duration.map(seconds).filter(|&d| d > 0);
    let (Some(student_id), Some(_roll_number), Some(class_name), Some(class_id), Some(class_duration)) = (
        required(body.student_id),
        required(body.roll_number),
        required(body.class_name),
        required(body.class_id),
        class_duration,
    ) else {
        return Err(ApiError::validation("Missing required fields").into());
    };

    let record = state
        .service
        .mark_attendance(MarkInput {
            student_id,
            class_id,
            class_name,
            presence_duration: body.presence_duration.map(seconds).unwrap_or(0),
            class_duration,
            detections: body.detections,
            engagement_score: body.engagement_score,
            engagement_data: body.engagement_data,
        })
        .await?;

    ok(&MarkResponse {
        message: "Attendance marked successfully".into(),
        attendance: record,
    })
}

pub async fn query_attendance(state: AppState, query: AttendanceQuery) -> HandlerResult {
    let filter = query.to_filter(Some(state.config.query_limit))?;
    let records = state.store().query_attendance(filter).await?;
    ok(&records)
}

pub async fn today_roster(class_name: String, state: AppState) -> HandlerResult {
    let records = state
        .store()
        .today_roster(&class_name, state.service.today())
        .await?;
    ok(&records)
}

pub async fn attendance_stats(state: AppState, query: AttendanceQuery) -> HandlerResult {
    let filter = query.to_filter(None)?;
    let stats = state.store().attendance_stats(filter).await?;
    ok(&stats)
}

// Efficiency

async fn detailed_efficiency(
    state: &AppState,
    student: &StudentProfile,
    query: &AttendanceQuery,
) -> HandlerResult {
    let mut filter = query.to_filter(None)?;
    filter.student_id = Some(student.id.clone());
    let records = state.store().query_attendance(filter).await?;
    let efficiency = compute_efficiency(&records);
    ok(&StudentEfficiency::detailed(student, &efficiency, &records))
}

pub async fn efficiency_by_student(
    student_id: String,
    state: AppState,
    query: AttendanceQuery,
) -> HandlerResult {
    let student = state
        .store()
        .get_student(&student_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    detailed_efficiency(&state, &student, &query).await
}

pub async fn efficiency_by_roll(
    roll_number: String,
    state: AppState,
    query: AttendanceQuery,
) -> HandlerResult {
    let student = student_by_roll(&state, &roll_number).await?;
    detailed_efficiency(&state, &student, &query).await
}

/// Every student (optionally one class), best attendance first.
pub async fn efficiency_report(state: AppState, query: AttendanceQuery) -> HandlerResult {
    let base = query.to_filter(None)?;
    let class_name = required(query.class_name.clone());
    let students = state.store().list_students(class_name.as_deref()).await?;

    let mut rows = Vec::with_capacity(students.len());
    for student in &students {
        let filter = AttendanceFilter {
            student_id: Some(student.id.clone()),
            ..base.clone()
        };
        let records = state.store().query_attendance(filter).await?;
        rows.push(StudentEfficiency::row(student, &compute_efficiency(&records)));
    }
    rows.sort_by(|a, b| {
        b.efficiency
            .partial_cmp(&a.efficiency)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.roll_number.cmp(&b.roll_number))
    });

    ok(&rows)
}

// Monitoring

pub async fn active_windows(state: AppState) -> HandlerResult {
    let active = state.service.monitor().active().await?;
    ok(&active)
}

pub async fn start_monitoring(class_id: String, state: AppState) -> HandlerResult {
    let summary = state.service.start_class(&class_id).await?;
    ok(&summary)
}

pub async fn submit_frame(class_id: String, state: AppState, body: FrameRequest) -> HandlerResult {
    let timestamp = body.timestamp.unwrap_or_else(Utc::now);
    let report = state
        .service
        .monitor()
        .frame(&class_id, timestamp, body.detections)
        .await?;
    ok(&report)
}

pub async fn window_snapshot(class_id: String, state: AppState) -> HandlerResult {
    let snapshot = state.service.monitor().snapshot(&class_id).await?;
    ok(&snapshot)
}

pub async fn flush_window(class_id: String, state: AppState) -> HandlerResult {
    let records = state.service.flush_window(&class_id).await?;
    ok(&FlushResponse {
        message: format!("Flushed {} attendance records", records.len()),
        records,
    })
}

pub async fn stop_monitoring(class_id: String, state: AppState) -> HandlerResult {
    let summary = state.service.close_window(&class_id).await?;
    ok(&summary)
}
