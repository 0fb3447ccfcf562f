use chrono::{DateTime, NaiveDate, Utc};
use classwatch_core::{
    pose, ClassSchedule, Detection, EnrolledFace, EuclideanMatcher, FrameOutcome, Matcher,
    PresenceTracker, StudentPresence,
};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("no monitoring window is open for class {0}")]
    NoOpenWindow(String),
    #[error("monitor task exited")]
    ChannelClosed,
}

/// One accepted match within a frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMatch {
    pub student_id: String,
    pub roll_number: String,
    pub distance: f32,
    #[serde(flatten)]
    pub outcome: FrameOutcome,
}

/// What a frame did to the window.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameReport {
    pub matches: Vec<FrameMatch>,
    /// Detections that matched nobody and were dropped.
    pub unmatched: usize,
}

/// A student's running tallies in an open window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTally {
    pub student_id: String,
    pub roll_number: String,
    pub student_name: String,
    #[serde(flatten)]
    pub presence: StudentPresence,
}

/// Copy of one window's state, handed to the ledger on flush and close.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub class: ClassSchedule,
    #[serde(rename = "date")]
    pub day: NaiveDate,
    pub opened_at: DateTime<Utc>,
    pub enrolled: usize,
    pub students: Vec<StudentTally>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveWindow {
    pub class_id: String,
    pub class_name: String,
    #[serde(rename = "date")]
    pub day: NaiveDate,
    pub opened_at: DateTime<Utc>,
    pub students_seen: usize,
}

struct Session {
    class: ClassSchedule,
    day: NaiveDate,
    opened_at: DateTime<Utc>,
    gallery: Vec<EnrolledFace>,
    tracker: PresenceTracker,
}

impl Session {
    fn snapshot(&self) -> WindowSnapshot {
        let mut students: Vec<StudentTally> = self
            .tracker
            .students()
            .map(|(student_id, presence)| {
                let face = self.gallery.iter().find(|f| &f.student_id == student_id);
                StudentTally {
                    student_id: student_id.clone(),
                    roll_number: face.map(|f| f.label.clone()).unwrap_or_default(),
                    student_name: face.map(|f| f.name.clone()).unwrap_or_default(),
                    presence: presence.clone(),
                }
            })
            .collect();
        students.sort_by(|a, b| a.roll_number.cmp(&b.roll_number));

        WindowSnapshot {
            class: self.class.clone(),
            day: self.day,
            opened_at: self.opened_at,
            enrolled: self.gallery.len(),
            students,
        }
    }
}

enum MonitorRequest {
    Open {
        class: ClassSchedule,
        day: NaiveDate,
        gallery: Vec<EnrolledFace>,
        reply: oneshot::Sender<bool>,
    },
    Frame {
        class_id: String,
        timestamp: DateTime<Utc>,
        detections: Vec<Detection>,
        reply: oneshot::Sender<Result<FrameReport, MonitorError>>,
    },
    Snapshot {
        class_id: String,
        reply: oneshot::Sender<Result<WindowSnapshot, MonitorError>>,
    },
    Close {
        class_id: String,
        reply: oneshot::Sender<Result<WindowSnapshot, MonitorError>>,
    },
    Active {
        reply: oneshot::Sender<Vec<ActiveWindow>>,
    },
}

/// Clone-safe handle to the monitor task.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorRequest>,
}

impl MonitorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MonitorRequest,
    ) -> Result<T, MonitorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| MonitorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| MonitorError::ChannelClosed)
    }

    /// Open a window for `class`. Returns false if one was already open,
    /// in which case its state is kept and only the gallery is refreshed.
    pub async fn open(
        &self,
        class: ClassSchedule,
        day: NaiveDate,
        gallery: Vec<EnrolledFace>,
    ) -> Result<bool, MonitorError> {
        self.request(|reply| MonitorRequest::Open {
            class,
            day,
            gallery,
            reply,
        })
        .await
    }

    /// Match one frame's detections and fold accepted matches into the window.
    pub async fn frame(
        &self,
        class_id: &str,
        timestamp: DateTime<Utc>,
        detections: Vec<Detection>,
    ) -> Result<FrameReport, MonitorError> {
        let class_id = class_id.to_string();
        self.request(|reply| MonitorRequest::Frame {
            class_id,
            timestamp,
            detections,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self, class_id: &str) -> Result<WindowSnapshot, MonitorError> {
        let class_id = class_id.to_string();
        self.request(|reply| MonitorRequest::Snapshot { class_id, reply })
            .await?
    }

    /// Remove the window and return its final state.
    pub async fn close(&self, class_id: &str) -> Result<WindowSnapshot, MonitorError> {
        let class_id = class_id.to_string();
        self.request(|reply| MonitorRequest::Close { class_id, reply })
            .await?
    }

    pub async fn active(&self) -> Result<Vec<ActiveWindow>, MonitorError> {
        self.request(|reply| MonitorRequest::Active { reply }).await
    }
}

/// Spawn the monitor task. Every open window's state lives inside it, so
/// frames for a window are applied strictly one after another.
pub fn spawn_monitor(detection_threshold: f32, log_cap: Option<usize>) -> MonitorHandle {
    let (tx, mut rx) = mpsc::channel::<MonitorRequest>(64);

    tokio::spawn(async move {
        tracing::info!(threshold = detection_threshold, "monitor started");
        let matcher = EuclideanMatcher;
        let mut sessions: HashMap<String, Session> = HashMap::new();

        while let Some(req) = rx.recv().await {
            match req {
                MonitorRequest::Open {
                    class,
                    day,
                    gallery,
                    reply,
                } => {
                    let opened = match sessions.get_mut(&class.id) {
                        Some(session) if session.day == day => {
                            session.gallery = gallery;
                            false
                        }
                        _ => {
                            tracing::info!(
                                class_id = %class.id,
                                class_name = %class.class_name,
                                %day,
                                enrolled = gallery.len(),
                                "monitoring window opened"
                            );
                            sessions.insert(
                                class.id.clone(),
                                Session {
                                    class,
                                    day,
                                    opened_at: Utc::now(),
                                    gallery,
                                    tracker: PresenceTracker::new(log_cap),
                                },
                            );
                            true
                        }
                    };
                    let _ = reply.send(opened);
                }
                MonitorRequest::Frame {
                    class_id,
                    timestamp,
                    detections,
                    reply,
                } => {
                    let result = match sessions.get_mut(&class_id) {
                        Some(session) => Ok(apply_frame(
                            session,
                            &matcher,
                            detection_threshold,
                            timestamp,
                            &detections,
                        )),
                        None => Err(MonitorError::NoOpenWindow(class_id)),
                    };
                    let _ = reply.send(result);
                }
                MonitorRequest::Snapshot { class_id, reply } => {
                    let result = sessions
                        .get(&class_id)
                        .map(Session::snapshot)
                        .ok_or(MonitorError::NoOpenWindow(class_id));
                    let _ = reply.send(result);
                }
                MonitorRequest::Close { class_id, reply } => {
                    let result = match sessions.remove(&class_id) {
                        Some(session) => {
                            tracing::info!(
                                class_id = %class_id,
                                seen = session.tracker.len(),
                                "monitoring window closed"
                            );
                            Ok(session.snapshot())
                        }
                        None => Err(MonitorError::NoOpenWindow(class_id)),
                    };
                    let _ = reply.send(result);
                }
                MonitorRequest::Active { reply } => {
                    let mut active: Vec<ActiveWindow> = sessions
                        .values()
                        .map(|s| ActiveWindow {
                            class_id: s.class.id.clone(),
                            class_name: s.class.class_name.clone(),
                            day: s.day,
                            opened_at: s.opened_at,
                            students_seen: s.tracker.len(),
                        })
                        .collect();
                    active.sort_by(|a, b| a.class_id.cmp(&b.class_id));
                    let _ = reply.send(active);
                }
            }
        }
        tracing::info!("monitor exiting");
    });

    MonitorHandle { tx }
}

fn apply_frame(
    session: &mut Session,
    matcher: &impl Matcher,
    threshold: f32,
    timestamp: DateTime<Utc>,
    detections: &[Detection],
) -> FrameReport {
    let mut report = FrameReport::default();

    for detection in detections {
        if !detection.descriptor.is_finite() {
            report.unmatched += 1;
            continue;
        }
        let result = matcher.compare(&detection.descriptor, &session.gallery, threshold);
        let Some(student_id) = result.student_id.clone().filter(|_| result.matched) else {
            report.unmatched += 1;
            continue;
        };

        let head_pose = detection.landmarks.as_ref().and_then(pose::estimate);
        let outcome = session.tracker.on_frame_match(
            &student_id,
            timestamp,
            result.confidence(),
            head_pose.as_ref(),
        );
        tracing::trace!(
            student_id = %student_id,
            distance = result.distance,
            engaged = outcome.engaged,
            "frame matched"
        );
        report.matches.push(FrameMatch {
            student_id,
            roll_number: result.label,
            distance: result.distance,
            outcome,
        });
    }
    report
}
