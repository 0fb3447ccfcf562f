//! The attendance ledger: at most one record per (student, class, day).

use chrono::{DateTime, NaiveDate, Utc};
use classwatch_core::{
    AttendanceKey, AttendanceRecord, AttendanceStats, AttendanceStatus, DetectionEvent, Engagement,
};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    format_day, parse_column, parse_datetime, parse_day, parse_optional_column, to_json_error,
    u32_column, Store, StoreResult,
};

const ATTENDANCE_COLUMNS: &str = "id, student_id, class_id, day, roll_number, student_name, class_name, status, \
     presence_seconds, required_seconds, class_seconds, detection_log, engagement_score, \
     frames_forward, frames_away, total_frames, finalized_at, created_at, updated_at";

/// Shared WHERE clause for [`AttendanceFilter`]; parameters ?1..?5.
const FILTER_CLAUSE: &str = "(?1 IS NULL OR student_id = ?1)
     AND (?2 IS NULL OR class_id = ?2)
     AND (?3 IS NULL OR class_name = ?3)
     AND (?4 IS NULL OR day >= ?4)
     AND (?5 IS NULL OR day <= ?5)";

/// Denormalised fields written when a window opens and nobody has been seen yet.
#[derive(Debug, Clone)]
pub struct SeedRecord {
    pub roll_number: String,
    pub student_name: String,
    pub class_name: String,
    pub required_seconds: u32,
    pub class_seconds: u32,
}

/// Full replacement of a record's mutable fields.
#[derive(Debug, Clone)]
pub struct AttendanceUpdate {
    pub roll_number: String,
    pub student_name: String,
    pub class_name: String,
    pub status: AttendanceStatus,
    pub presence_seconds: u32,
    pub required_seconds: u32,
    pub class_seconds: u32,
    pub detection_log: Vec<DetectionEvent>,
    pub engagement: Engagement,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub class_name: Option<String>,
    /// Inclusive lower bound on the day.
    pub from_day: Option<NaiveDate>,
    /// Inclusive upper bound on the day.
    pub to_day: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl AttendanceFilter {
    fn bind(&self) -> [Option<String>; 5] {
        [
            self.student_id.clone(),
            self.class_id.clone(),
            self.class_name.clone(),
            self.from_day.map(format_day),
            self.to_day.map(format_day),
        ]
    }
}

fn row_to_attendance(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let engagement_score = u32_column(row, "engagement_score")?.min(100) as u8;
    Ok(AttendanceRecord {
        id: row.get("id")?,
        student_id: row.get("student_id")?,
        class_id: row.get("class_id")?,
        day: parse_column(row, "day", parse_day)?,
        roll_number: row.get("roll_number")?,
        student_name: row.get("student_name")?,
        class_name: row.get("class_name")?,
        status: parse_column(row, "status", |raw| raw.parse::<AttendanceStatus>())?,
        presence_duration: u32_column(row, "presence_seconds")?,
        required_duration: u32_column(row, "required_seconds")?,
        class_duration: u32_column(row, "class_seconds")?,
        detection_log: parse_column(row, "detection_log", |raw| {
            serde_json::from_str::<Vec<DetectionEvent>>(raw)
        })?,
        engagement_score,
        engagement_data: Engagement {
            frames_forward: u32_column(row, "frames_forward")?,
            frames_away: u32_column(row, "frames_away")?,
            total_frames: u32_column(row, "total_frames")?,
            score: engagement_score,
        },
        finalized_at: parse_optional_column(row, "finalized_at", parse_datetime)?,
        created_at: parse_column(row, "created_at", parse_datetime)?,
        updated_at: parse_column(row, "updated_at", parse_datetime)?,
    })
}

fn select_by_key(
    conn: &rusqlite::Connection,
    student_id: &str,
    class_id: &str,
    day: &str,
) -> rusqlite::Result<Option<AttendanceRecord>> {
    conn.query_row(
        &format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance
             WHERE student_id = ?1 AND class_id = ?2 AND day = ?3"
        ),
        params![student_id, class_id, day],
        row_to_attendance,
    )
    .optional()
}

impl Store {
    /// Insert an Absent record unless one already exists. Returns true if inserted.
    pub async fn seed_absent(&self, key: &AttendanceKey, seed: SeedRecord) -> StoreResult<bool> {
        let key = key.clone();
        self.call(move |conn| {
            let now = Utc::now().to_rfc3339();
            let inserted = conn.execute(
                "INSERT INTO attendance (id, student_id, class_id, day, roll_number, student_name, class_name,
                                         status, required_seconds, class_seconds, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'Absent', ?8, ?9, ?10, ?10)
                 ON CONFLICT (student_id, class_id, day) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    key.student_id,
                    key.class_id,
                    format_day(key.day),
                    seed.roll_number,
                    seed.student_name,
                    seed.class_name,
                    seed.required_seconds,
                    seed.class_seconds,
                    now,
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    /// Create or replace the record for `key` and return what is now stored.
    pub async fn upsert_attendance(
        &self,
        key: &AttendanceKey,
        update: AttendanceUpdate,
    ) -> StoreResult<AttendanceRecord> {
        let key = key.clone();
        self.call(move |conn| {
            let log = serde_json::to_string(&update.detection_log).map_err(to_json_error)?;
            let day = format_day(key.day);
            let now = Utc::now().to_rfc3339();

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO attendance (id, student_id, class_id, day, roll_number, student_name, class_name,
                                         status, presence_seconds, required_seconds, class_seconds, detection_log,
                                         engagement_score, frames_forward, frames_away, total_frames,
                                         created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
                 ON CONFLICT (student_id, class_id, day) DO UPDATE SET
                     roll_number = excluded.roll_number,
                     student_name = excluded.student_name,
                     class_name = excluded.class_name,
                     status = excluded.status,
                     presence_seconds = excluded.presence_seconds,
                     required_seconds = excluded.required_seconds,
                     class_seconds = excluded.class_seconds,
                     detection_log = excluded.detection_log,
                     engagement_score = excluded.engagement_score,
                     frames_forward = excluded.frames_forward,
                     frames_away = excluded.frames_away,
                     total_frames = excluded.total_frames,
                     updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    key.student_id,
                    key.class_id,
                    day,
                    update.roll_number,
                    update.student_name,
                    update.class_name,
                    update.status.as_str(),
                    update.presence_seconds,
                    update.required_seconds,
                    update.class_seconds,
                    log,
                    update.engagement.score,
                    update.engagement.frames_forward,
                    update.engagement.frames_away,
                    update.engagement.total_frames,
                    now,
                ],
            )?;
            let stored = select_by_key(&tx, &key.student_id, &key.class_id, &day)?;
            tx.commit()?;

            stored.ok_or_else(|| {
                tokio_rusqlite::Error::Other("attendance row vanished after upsert".into())
            })
        })
        .await
    }

    pub async fn get_attendance(&self, key: &AttendanceKey) -> StoreResult<Option<AttendanceRecord>> {
        let key = key.clone();
        self.call(move |conn| Ok(select_by_key(conn, &key.student_id, &key.class_id, &format_day(key.day))?))
            .await
    }

    /// Records matching `filter`, newest day first.
    pub async fn query_attendance(&self, filter: AttendanceFilter) -> StoreResult<Vec<AttendanceRecord>> {
        self.call(move |conn| {
            let [student_id, class_id, class_name, from, to] = filter.bind();
            // SQLite treats a negative LIMIT as unbounded.
            let limit = filter
                .limit
                .and_then(|n| i64::try_from(n).ok())
                .unwrap_or(-1);
            let mut stmt = conn.prepare(&format!(
                "SELECT {ATTENDANCE_COLUMNS} FROM attendance
                 WHERE {FILTER_CLAUSE}
                 ORDER BY day DESC, updated_at DESC
                 LIMIT ?6"
            ))?;
            let records = stmt
                .query_map(
                    params![student_id, class_id, class_name, from, to, limit],
                    row_to_attendance,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    /// Every record for a class on one day, ordered by student name.
    pub async fn today_roster(&self, class_name: &str, day: NaiveDate) -> StoreResult<Vec<AttendanceRecord>> {
        let class_name = class_name.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ATTENDANCE_COLUMNS} FROM attendance
                 WHERE class_name = ?1 AND day = ?2
                 ORDER BY student_name, roll_number"
            ))?;
            let records = stmt
                .query_map(params![class_name, format_day(day)], row_to_attendance)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    /// Present/absent counts over the records matching `filter` (limit ignored).
    pub async fn attendance_stats(&self, filter: AttendanceFilter) -> StoreResult<AttendanceStats> {
        self.call(move |conn| {
            let [student_id, class_id, class_name, from, to] = filter.bind();
            let (present, absent): (i64, i64) = conn.query_row(
                &format!(
                    "SELECT COALESCE(SUM(status = 'Present'), 0), COALESCE(SUM(status = 'Absent'), 0)
                     FROM attendance WHERE {FILTER_CLAUSE}"
                ),
                params![student_id, class_id, class_name, from, to],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(AttendanceStats::from_counts(
                present.max(0) as u64,
                absent.max(0) as u64,
            ))
        })
        .await
    }

    /// Stamp `finalized_at` on the window's records that are not already stamped.
    pub async fn finalize_window(
        &self,
        class_id: &str,
        day: NaiveDate,
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let class_id = class_id.to_string();
        self.call(move |conn| {
            let stamp = at.to_rfc3339();
            let changed = conn.execute(
                "UPDATE attendance SET finalized_at = ?1, updated_at = ?1
                 WHERE class_id = ?2 AND day = ?3 AND finalized_at IS NULL",
                params![stamp, class_id, format_day(day)],
            )?;
            Ok(changed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewStudent;
    use chrono::Datelike;
    use classwatch_core::StudentProfile;

    async fn store_with_student(roll: &str, name: &str) -> (Store, StudentProfile) {
        let store = Store::open_in_memory().await.unwrap();
        let student = store
            .insert_student(NewStudent {
                name: name.into(),
                roll_number: roll.into(),
                class_name: "Math101".into(),
                reference_image: "img".into(),
            })
            .await
            .unwrap();
        (store, student)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn key(student: &StudentProfile, class_id: &str, d: u32) -> AttendanceKey {
        AttendanceKey {
            student_id: student.id.clone(),
            class_id: class_id.into(),
            day: day(d),
        }
    }

    fn update(student: &StudentProfile, status: AttendanceStatus, presence: u32) -> AttendanceUpdate {
        let mut engagement = Engagement::default();
        engagement.record(true);
        engagement.record(false);
        AttendanceUpdate {
            roll_number: student.roll_number.clone(),
            student_name: student.name.clone(),
            class_name: student.class_name.clone(),
            status,
            presence_seconds: presence,
            required_seconds: 2700,
            class_seconds: 3600,
            detection_log: vec![DetectionEvent {
                timestamp: Utc::now(),
                confidence: 0.7,
                engaged: true,
            }],
            engagement,
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_record() {
        let (store, ada) = store_with_student("R1", "Ada").await;
        let k = key(&ada, "c1", 19);

        let first = store
            .upsert_attendance(&k, update(&ada, AttendanceStatus::Absent, 100))
            .await
            .unwrap();
        let second = store
            .upsert_attendance(&k, update(&ada, AttendanceStatus::Present, 2760))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, AttendanceStatus::Present);
        assert_eq!(second.presence_duration, 2760);
        assert_eq!(second.engagement_data.total_frames, 2);
        assert_eq!(second.engagement_data.score, 50);
        assert_eq!(second.detection_log.len(), 1);

        let all = store.query_attendance(AttendanceFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_seed_does_not_overwrite() {
        let (store, ada) = store_with_student("R1", "Ada").await;
        let k = key(&ada, "c1", 19);
        let seed = SeedRecord {
            roll_number: "R1".into(),
            student_name: "Ada".into(),
            class_name: "Math101".into(),
            required_seconds: 2700,
            class_seconds: 3600,
        };

        assert!(store.seed_absent(&k, seed.clone()).await.unwrap());
        let seeded = store.get_attendance(&k).await.unwrap().unwrap();
        assert_eq!(seeded.status, AttendanceStatus::Absent);
        assert_eq!(seeded.presence_duration, 0);
        assert!(seeded.detection_log.is_empty());

        store
            .upsert_attendance(&k, update(&ada, AttendanceStatus::Present, 2800))
            .await
            .unwrap();
        assert!(!store.seed_absent(&k, seed).await.unwrap());
        let kept = store.get_attendance(&k).await.unwrap().unwrap();
        assert_eq!(kept.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_query_filters_and_order() {
        let (store, ada) = store_with_student("R1", "Ada").await;
        for d in [17, 19, 18] {
            store
                .upsert_attendance(&key(&ada, "c1", d), update(&ada, AttendanceStatus::Present, 2800))
                .await
                .unwrap();
        }
        store
            .upsert_attendance(&key(&ada, "c2", 19), update(&ada, AttendanceStatus::Absent, 0))
            .await
            .unwrap();

        let all = store.query_attendance(AttendanceFilter::default()).await.unwrap();
        let days: Vec<_> = all.iter().map(|r| r.day.day()).collect();
        assert_eq!(days[0], 19);
        assert_eq!(*days.last().unwrap(), 17);

        let ranged = store
            .query_attendance(AttendanceFilter {
                class_id: Some("c1".into()),
                from_day: Some(day(18)),
                to_day: Some(day(19)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);

        let limited = store
            .query_attendance(AttendanceFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_and_roster() {
        let (store, ada) = store_with_student("R1", "Zed").await;
        let bob = store
            .insert_student(NewStudent {
                name: "Bob".into(),
                roll_number: "R2".into(),
                class_name: "Math101".into(),
                reference_image: "img".into(),
            })
            .await
            .unwrap();

        store
            .upsert_attendance(&key(&ada, "c1", 19), update(&ada, AttendanceStatus::Present, 2800))
            .await
            .unwrap();
        store
            .upsert_attendance(&key(&bob, "c1", 19), update(&bob, AttendanceStatus::Absent, 10))
            .await
            .unwrap();
        store
            .upsert_attendance(&key(&bob, "c1", 18), update(&bob, AttendanceStatus::Present, 2800))
            .await
            .unwrap();

        let stats = store.attendance_stats(AttendanceFilter::default()).await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.present_count, 2);
        assert_eq!(stats.present_percentage, 66.67);

        let roster = store.today_roster("Math101", day(19)).await.unwrap();
        let names: Vec<_> = roster.iter().map(|r| r.student_name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Zed"]);

        let empty = store
            .attendance_stats(AttendanceFilter {
                class_name: Some("Nope".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(empty.total_records, 0);
        assert_eq!(empty.present_percentage, 0.0);
    }

    #[tokio::test]
    async fn test_finalize_window_stamps_once() {
        let (store, ada) = store_with_student("R1", "Ada").await;
        let k = key(&ada, "c1", 19);
        store
            .upsert_attendance(&k, update(&ada, AttendanceStatus::Present, 2800))
            .await
            .unwrap();

        let at = Utc::now();
        assert_eq!(store.finalize_window("c1", day(19), at).await.unwrap(), 1);
        assert_eq!(store.finalize_window("c1", day(19), at).await.unwrap(), 0);
        let record = store.get_attendance(&k).await.unwrap().unwrap();
        assert!(record.finalized_at.is_some());
    }
}
