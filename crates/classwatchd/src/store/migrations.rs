use rusqlite::{Connection, Transaction};

pub(super) const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS students (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    roll_number     TEXT NOT NULL UNIQUE,
    class_name      TEXT NOT NULL,
    reference_image TEXT NOT NULL,
    face_descriptor TEXT,
    registered_at   TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_students_class_name ON students (class_name);

CREATE TABLE IF NOT EXISTS classes (
    id               TEXT PRIMARY KEY,
    class_name       TEXT NOT NULL,
    start_time       TEXT NOT NULL,
    end_time         TEXT NOT NULL,
    day_of_week      TEXT NOT NULL DEFAULT 'Daily',
    duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
    is_active        INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_classes_name_start ON classes (class_name, start_time);

CREATE TABLE IF NOT EXISTS attendance (
    id               TEXT PRIMARY KEY,
    student_id       TEXT NOT NULL REFERENCES students (id) ON DELETE CASCADE,
    class_id         TEXT NOT NULL,
    day              TEXT NOT NULL,
    roll_number      TEXT NOT NULL,
    student_name     TEXT NOT NULL,
    class_name       TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'Absent' CHECK (status IN ('Present', 'Absent')),
    presence_seconds INTEGER NOT NULL DEFAULT 0,
    required_seconds INTEGER NOT NULL,
    class_seconds    INTEGER NOT NULL,
    detection_log    TEXT NOT NULL DEFAULT '[]',
    engagement_score INTEGER NOT NULL DEFAULT 0,
    frames_forward   INTEGER NOT NULL DEFAULT 0,
    frames_away      INTEGER NOT NULL DEFAULT 0,
    total_frames     INTEGER NOT NULL DEFAULT 0,
    finalized_at     TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE (student_id, class_id, day)
);
CREATE INDEX IF NOT EXISTS idx_attendance_student_day ON attendance (student_id, day);
CREATE INDEX IF NOT EXISTS idx_attendance_class_day ON attendance (class_name, day);
CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance (day);
";

/// Bring the schema up to `CURRENT_SCHEMA_VERSION` in a single transaction.
pub(super) fn run_migrations(conn: &mut Connection) -> Result<(), tokio_rusqlite::Error> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(tokio_rusqlite::Error::Other(
            format!(
                "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
            )
            .into(),
        ));
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        apply_migration(&tx, next)?;
        tracing::debug!(version = next, "applied schema migration");
        version = next;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), tokio_rusqlite::Error> {
    match version {
        1 => tx.execute_batch(SCHEMA_V1)?,
        other => {
            return Err(tokio_rusqlite::Error::Other(
                format!("no migration defined for version {other}").into(),
            ))
        }
    }
    Ok(())
}
