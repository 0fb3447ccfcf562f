//! Enrolled student profiles.

use crate::types::{Descriptor, EnrolledFace};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Roll numbers are unique and compared upper-cased with surrounding whitespace removed.
pub fn normalize_roll_number(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    pub class_name: String,
    /// Reference photo as submitted at registration (data URL or base64).
    pub reference_image: String,
    /// Populated once a client has processed the reference photo.
    pub face_descriptor: Option<Descriptor>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a student; never carries the image or descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    pub class_name: String,
    pub has_descriptor: bool,
    pub registered_at: DateTime<Utc>,
}

impl StudentProfile {
    pub fn summary(&self) -> StudentSummary {
        StudentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            roll_number: self.roll_number.clone(),
            class_name: self.class_name.clone(),
            has_descriptor: self.face_descriptor.is_some(),
            registered_at: self.registered_at,
        }
    }

    /// Gallery entry for matching, if a descriptor has been stored.
    pub fn enrolled_face(&self) -> Option<EnrolledFace> {
        self.face_descriptor.as_ref().map(|descriptor| EnrolledFace {
            student_id: self.id.clone(),
            label: self.roll_number.clone(),
            name: self.name.clone(),
            descriptor: descriptor.clone(),
        })
    }
}
