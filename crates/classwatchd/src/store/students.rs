use chrono::Utc;
use classwatch_core::student::normalize_roll_number;
use classwatch_core::{Descriptor, EnrolledFace, StudentProfile};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    is_unique_violation, parse_column, parse_datetime, parse_optional_column, to_json_error,
    Store, StoreError, StoreResult,
};

const STUDENT_COLUMNS: &str =
    "id, name, roll_number, class_name, reference_image, face_descriptor, registered_at, updated_at";

/// Registration input; fields are trimmed and the roll number normalised on insert.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub roll_number: String,
    pub class_name: String,
    pub reference_image: String,
}

fn row_to_student(row: &Row<'_>) -> rusqlite::Result<StudentProfile> {
    Ok(StudentProfile {
        id: row.get("id")?,
        name: row.get("name")?,
        roll_number: row.get("roll_number")?,
        class_name: row.get("class_name")?,
        reference_image: row.get("reference_image")?,
        face_descriptor: parse_optional_column(row, "face_descriptor", |raw| {
            serde_json::from_str::<Descriptor>(raw)
        })?,
        registered_at: parse_column(row, "registered_at", parse_datetime)?,
        updated_at: parse_column(row, "updated_at", parse_datetime)?,
    })
}

impl Store {
    pub async fn insert_student(&self, new: NewStudent) -> StoreResult<StudentProfile> {
        let now = Utc::now();
        let student = StudentProfile {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            roll_number: normalize_roll_number(&new.roll_number),
            class_name: new.class_name.trim().to_string(),
            reference_image: new.reference_image,
            face_descriptor: None,
            registered_at: now,
            updated_at: now,
        };

        let record = student.clone();
        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO students (id, name, roll_number, class_name, reference_image, registered_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.id,
                        record.name,
                        record.roll_number,
                        record.class_name,
                        record.reference_image,
                        record.registered_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(student),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::DuplicateRollNumber(student.roll_number))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_student(&self, student_id: &str) -> StoreResult<Option<StudentProfile>> {
        let student_id = student_id.to_string();
        self.call(move |conn| {
            let student = conn
                .query_row(
                    &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"),
                    params![student_id],
                    row_to_student,
                )
                .optional()?;
            Ok(student)
        })
        .await
    }

    pub async fn find_student_by_roll(&self, roll_number: &str) -> StoreResult<Option<StudentProfile>> {
        let roll_number = normalize_roll_number(roll_number);
        self.call(move |conn| {
            let student = conn
                .query_row(
                    &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE roll_number = ?1"),
                    params![roll_number],
                    row_to_student,
                )
                .optional()?;
            Ok(student)
        })
        .await
    }

    /// All students, optionally restricted to one class, ordered by roll number.
    pub async fn list_students(&self, class_name: Option<&str>) -> StoreResult<Vec<StudentProfile>> {
        let class_name = class_name.map(str::to_string);
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STUDENT_COLUMNS} FROM students
                 WHERE (?1 IS NULL OR class_name = ?1)
                 ORDER BY roll_number"
            ))?;
            let students = stmt
                .query_map(params![class_name], row_to_student)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(students)
        })
        .await
    }

    /// Store the reference descriptor. Returns the updated student, or `None`
    /// if the roll number is unknown.
    pub async fn set_descriptor(
        &self,
        roll_number: &str,
        descriptor: Descriptor,
    ) -> StoreResult<Option<StudentProfile>> {
        let roll_number = normalize_roll_number(roll_number);
        self.call(move |conn| {
            let encoded = serde_json::to_string(&descriptor).map_err(to_json_error)?;
            let changed = conn.execute(
                "UPDATE students SET face_descriptor = ?1, updated_at = ?2 WHERE roll_number = ?3",
                params![encoded, Utc::now().to_rfc3339(), roll_number],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let student = conn
                .query_row(
                    &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE roll_number = ?1"),
                    params![roll_number],
                    row_to_student,
                )
                .optional()?;
            Ok(student)
        })
        .await
    }

    /// Matching gallery for a class: every student in it with a stored descriptor.
    pub async fn enrolled_faces(&self, class_name: &str) -> StoreResult<Vec<EnrolledFace>> {
        let students = self.list_students(Some(class_name)).await?;
        Ok(students.iter().filter_map(StudentProfile::enrolled_face).collect())
    }
}
