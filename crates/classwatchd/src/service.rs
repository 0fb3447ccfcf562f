//! Glue between the scheduler, the monitor and the ledger.
//!
//! Window tallies live in memory inside the monitor; they reach the ledger
//! only through [`AttendanceService::flush_window`] and
//! [`AttendanceService::close_window`].

use chrono::{NaiveDate, Utc};
use classwatch_core::attendance::{engagement_score, required_duration_secs, status_for};
use classwatch_core::{AttendanceKey, AttendanceRecord, ClassSchedule, DetectionEvent, Engagement};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::monitor::{MonitorError, MonitorHandle, WindowSnapshot};
use crate::scheduler::{Clock, WindowEvent};
use crate::store::{AttendanceUpdate, SeedRecord, Store, StoreError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Class not found: {0}")]
    ClassNotFound(String),
    #[error("Student not found: {0}")]
    StudentNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSummary {
    pub class_id: String,
    #[serde(rename = "date")]
    pub day: NaiveDate,
    /// False if the window was already open.
    pub opened: bool,
    /// Absent records created for students without one today.
    pub seeded: usize,
    /// Students with a reference descriptor available for matching.
    pub enrolled: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSummary {
    pub class_id: String,
    #[serde(rename = "date")]
    pub day: NaiveDate,
    pub records: Vec<AttendanceRecord>,
    pub finalized: usize,
}

/// A manual attendance mark, already validated by the caller.
#[derive(Debug, Clone)]
pub struct MarkInput {
    pub student_id: String,
    pub class_id: String,
    pub class_name: String,
    pub presence_duration: u32,
    pub class_duration: u32,
    pub detections: Vec<DetectionEvent>,
    pub engagement_score: Option<f64>,
    pub engagement_data: Option<Engagement>,
}

#[derive(Clone)]
pub struct AttendanceService {
    store: Store,
    monitor: MonitorHandle,
    clock: Arc<dyn Clock>,
    presence_fraction: f64,
}

impl AttendanceService {
    pub fn new(
        store: Store,
        monitor: MonitorHandle,
        clock: Arc<dyn Clock>,
        presence_fraction: f64,
    ) -> Self {
        Self {
            store,
            monitor,
            clock,
            presence_fraction,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    /// Today's date on the local clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    fn required_secs(&self, class_secs: u32) -> u32 {
        required_duration_secs(class_secs, self.presence_fraction)
    }

    /// Seed Absent records for the class roster and start collecting frames.
    /// Safe to call again for a window that is already open.
    pub async fn open_window(
        &self,
        class: &ClassSchedule,
        day: NaiveDate,
    ) -> Result<OpenSummary, ServiceError> {
        let class_secs = class.class_duration_secs();
        let required = self.required_secs(class_secs);
        let students = self.store.list_students(Some(&class.class_name)).await?;

        let mut seeded = 0;
        for student in &students {
            let key = AttendanceKey {
                student_id: student.id.clone(),
                class_id: class.id.clone(),
                day,
            };
            let seed = SeedRecord {
                roll_number: student.roll_number.clone(),
                student_name: student.name.clone(),
                class_name: class.class_name.clone(),
                required_seconds: required,
                class_seconds: class_secs,
            };
            match self.store.seed_absent(&key, seed).await {
                Ok(true) => seeded += 1,
                Ok(false) => {}
                Err(err) => tracing::error!(
                    student_id = %student.id,
                    class_id = %class.id,
                    error = %err,
                    "failed to seed attendance record"
                ),
            }
        }

        let gallery: Vec<_> = students.iter().filter_map(|s| s.enrolled_face()).collect();
        let enrolled = gallery.len();
        let opened = self.monitor.open(class.clone(), day, gallery).await?;
        tracing::info!(
            class_id = %class.id,
            class_name = %class.class_name,
            %day,
            seeded,
            enrolled,
            "window open"
        );

        Ok(OpenSummary {
            class_id: class.id.clone(),
            day,
            opened,
            seeded,
            enrolled,
        })
    }

    /// Manual start for a class by id, on today's date.
    pub async fn start_class(&self, class_id: &str) -> Result<OpenSummary, ServiceError> {
        let class = self
            .store
            .get_class(class_id)
            .await?
            .ok_or_else(|| ServiceError::ClassNotFound(class_id.to_string()))?;
        self.open_window(&class, self.today()).await
    }

    /// Persist the current tallies of an open window without closing it.
    pub async fn flush_window(&self, class_id: &str) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let snapshot = self.monitor.snapshot(class_id).await?;
        self.commit(&snapshot).await
    }

    /// Close the window: final flush, then stamp every record of the window as finalized.
    pub async fn close_window(&self, class_id: &str) -> Result<CloseSummary, ServiceError> {
        let snapshot = self.monitor.close(class_id).await?;
        let records = self.commit(&snapshot).await?;
        let finalized = self
            .store
            .finalize_window(class_id, snapshot.day, Utc::now())
            .await?;
        tracing::info!(
            class_id,
            day = %snapshot.day,
            written = records.len(),
            finalized,
            "window committed"
        );
        Ok(CloseSummary {
            class_id: class_id.to_string(),
            day: snapshot.day,
            records,
            finalized,
        })
    }

    async fn commit(&self, snapshot: &WindowSnapshot) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let class = &snapshot.class;
        let class_secs = class.class_duration_secs();
        let mut records = Vec::with_capacity(snapshot.students.len());

        for tally in &snapshot.students {
            let key = AttendanceKey {
                student_id: tally.student_id.clone(),
                class_id: class.id.clone(),
                day: snapshot.day,
            };
            let required = match self.store.get_attendance(&key).await? {
                Some(existing) => existing.required_duration,
                None => self.required_secs(class_secs),
            };
            let verdict = tally.presence.verdict(required);

            let update = AttendanceUpdate {
                roll_number: tally.roll_number.clone(),
                student_name: tally.student_name.clone(),
                class_name: class.class_name.clone(),
                status: verdict.status,
                presence_seconds: verdict.presence_duration,
                required_seconds: verdict.required_duration,
                class_seconds: class_secs,
                detection_log: tally.presence.detection_log.clone(),
                engagement: tally.presence.engagement.clone(),
            };
            records.push(self.store.upsert_attendance(&key, update).await?);
        }
        Ok(records)
    }

    /// Upsert today's record for a student from a client-side measurement.
    pub async fn mark_attendance(&self, input: MarkInput) -> Result<AttendanceRecord, ServiceError> {
        let student = self
            .store
            .get_student(&input.student_id)
            .await?
            .ok_or_else(|| ServiceError::StudentNotFound(input.student_id.clone()))?;

        let required = self.required_secs(input.class_duration);
        let mut engagement = input.engagement_data.unwrap_or_default();
        engagement.score = if engagement.total_frames > 0 {
            engagement_score(engagement.frames_forward, engagement.total_frames)
        } else {
            input
                .engagement_score
                .filter(|s| s.is_finite())
                .map(|s| s.round().clamp(0.0, 100.0) as u8)
                .unwrap_or(0)
        };

        let key = AttendanceKey {
            student_id: student.id.clone(),
            class_id: input.class_id,
            day: self.today(),
        };
        let update = AttendanceUpdate {
            roll_number: student.roll_number,
            student_name: student.name,
            class_name: input.class_name,
            status: status_for(input.presence_duration, required),
            presence_seconds: input.presence_duration,
            required_seconds: required,
            class_seconds: input.class_duration,
            detection_log: input.detections,
            engagement,
        };
        let record = self.store.upsert_attendance(&key, update).await?;
        tracing::info!(
            student_id = %record.student_id,
            class_id = %record.class_id,
            status = %record.status,
            presence = record.presence_duration,
            "attendance marked"
        );
        Ok(record)
    }

    /// React to scheduler events until the channel closes. Failures are
    /// logged and never stop the loop.
    pub async fn run_events(self, mut events: mpsc::Receiver<WindowEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                WindowEvent::Opened { schedule, window } => {
                    if let Err(err) = self.open_window(&schedule, window.open_at.date()).await {
                        tracing::error!(class_id = %schedule.id, error = %err, "failed to open window");
                    }
                }
                WindowEvent::Closed { schedule, .. } => self.close_quietly(&schedule.id).await,
                WindowEvent::Cancelled { class_id } => self.close_quietly(&class_id).await,
            }
        }
        tracing::info!("window event loop exiting");
    }

    async fn close_quietly(&self, class_id: &str) {
        match self.close_window(class_id).await {
            Ok(_) => {}
            Err(ServiceError::Monitor(MonitorError::NoOpenWindow(_))) => {
                tracing::debug!(class_id, "no open window to close");
            }
            Err(err) => tracing::error!(class_id, error = %err, "failed to close window"),
        }
    }
}
