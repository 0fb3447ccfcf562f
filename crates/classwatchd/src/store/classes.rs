use classwatch_core::schedule::{parse_clock_time, ClassSchedule};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_column, parse_datetime, u32_column, Store, StoreResult};

const CLASS_COLUMNS: &str =
    "id, class_name, start_time, end_time, day_of_week, duration_minutes, is_active, created_at, updated_at";

fn row_to_class(row: &Row<'_>) -> rusqlite::Result<ClassSchedule> {
    Ok(ClassSchedule {
        id: row.get("id")?,
        class_name: row.get("class_name")?,
        start_time: parse_column(row, "start_time", parse_clock_time)?,
        end_time: parse_column(row, "end_time", parse_clock_time)?,
        day_of_week: row.get("day_of_week")?,
        duration: u32_column(row, "duration_minutes")?,
        is_active: row.get("is_active")?,
        created_at: parse_column(row, "created_at", parse_datetime)?,
        updated_at: parse_column(row, "updated_at", parse_datetime)?,
    })
}

impl Store {
    pub async fn insert_class(&self, class: &ClassSchedule) -> StoreResult<()> {
        let record = class.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO classes (id, class_name, start_time, end_time, day_of_week, duration_minutes, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.class_name,
                    record.start_time.format("%H:%M").to_string(),
                    record.end_time.format("%H:%M").to_string(),
                    record.day_of_week,
                    record.duration,
                    record.is_active,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_class(&self, class_id: &str) -> StoreResult<Option<ClassSchedule>> {
        let class_id = class_id.to_string();
        self.call(move |conn| {
            let class = conn
                .query_row(
                    &format!("SELECT {CLASS_COLUMNS} FROM classes WHERE id = ?1"),
                    params![class_id],
                    row_to_class,
                )
                .optional()?;
            Ok(class)
        })
        .await
    }

    /// Classes ordered by name then start time; inactive ones only when asked.
    pub async fn list_classes(&self, include_inactive: bool) -> StoreResult<Vec<ClassSchedule>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CLASS_COLUMNS} FROM classes
                 WHERE (?1 OR is_active = 1)
                 ORDER BY class_name, start_time"
            ))?;
            let classes = stmt
                .query_map(params![include_inactive], row_to_class)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(classes)
        })
        .await
    }

    /// Overwrite every mutable field. Returns false if the class does not exist.
    pub async fn update_class(&self, class: &ClassSchedule) -> StoreResult<bool> {
        let record = class.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE classes
                 SET class_name = ?1,
                     start_time = ?2,
                     end_time = ?3,
                     day_of_week = ?4,
                     duration_minutes = ?5,
                     is_active = ?6,
                     updated_at = ?7
                 WHERE id = ?8",
                params![
                    record.class_name,
                    record.start_time.format("%H:%M").to_string(),
                    record.end_time.format("%H:%M").to_string(),
                    record.day_of_week,
                    record.duration,
                    record.is_active,
                    record.updated_at.to_rfc3339(),
                    record.id,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn delete_class(&self, class_id: &str) -> StoreResult<bool> {
        let class_id = class_id.to_string();
        self.call(move |conn| {
            let changed = conn.execute("DELETE FROM classes WHERE id = ?1", params![class_id])?;
            Ok(changed > 0)
        })
        .await
    }
}
