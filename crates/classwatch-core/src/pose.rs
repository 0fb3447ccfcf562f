//! Head-pose engagement heuristic from five-point landmarks.
//!
//! The nose tip is compared against the midpoint of the outer eye corners,
//! normalised by the horizontal eye distance. Small deviations on both axes
//! mean the student is facing the camera.

use crate::types::{Landmarks, Point};
use serde::Serialize;

/// Horizontal nose deviation (in eye-distance units) below which the head counts as forward.
pub const FORWARD_HORIZONTAL_RATIO: f32 = 0.3;
/// Vertical nose deviation (in eye-distance units) below which the head counts as level.
pub const FORWARD_VERTICAL_RATIO: f32 = 0.5;

/// Coarse head direction. Advisory only; never persisted in aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadPose {
    pub horizontal_ratio: f32,
    pub vertical_ratio: f32,
    pub is_looking_forward: bool,
    pub direction: Direction,
}

/// Estimate head pose. Returns `None` when the eye corners share an x
/// coordinate, since the ratios have no baseline to normalise against.
pub fn estimate(landmarks: &Landmarks) -> Option<HeadPose> {
    let face_center = Point::midpoint(landmarks.left_eye, landmarks.right_eye);
    let eye_distance = (landmarks.right_eye.x - landmarks.left_eye.x).abs();
    if eye_distance <= f32::EPSILON {
        return None;
    }

    let nose = landmarks.nose;
    let horizontal_ratio = (nose.x - face_center.x).abs() / eye_distance;
    let vertical_ratio = (nose.y - face_center.y).abs() / eye_distance;

    let is_looking_forward =
        horizontal_ratio < FORWARD_HORIZONTAL_RATIO && vertical_ratio < FORWARD_VERTICAL_RATIO;

    let direction = if horizontal_ratio < FORWARD_HORIZONTAL_RATIO {
        Direction::Forward
    } else if nose.x > face_center.x {
        Direction::Right
    } else {
        Direction::Left
    };

    Some(HeadPose {
        horizontal_ratio,
        vertical_ratio,
        is_looking_forward,
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks(nose: (f32, f32)) -> Landmarks {
        Landmarks {
            nose: Point::new(nose.0, nose.1),
            left_eye: Point::new(100.0, 100.0),
            right_eye: Point::new(200.0, 100.0),
            left_mouth: Point::new(115.0, 180.0),
            right_mouth: Point::new(185.0, 180.0),
        }
    }

    #[test]
    fn test_nose_at_face_center_is_forward() {
        let pose = estimate(&landmarks((150.0, 100.0))).unwrap();
        assert!(pose.is_looking_forward);
        assert_eq!(pose.direction, Direction::Forward);
        assert_eq!(pose.horizontal_ratio, 0.0);
        assert_eq!(pose.vertical_ratio, 0.0);
    }

    #[test]
    fn test_typical_frontal_face() {
        // Nose 40px below the eye line on a 100px eye distance.
        let pose = estimate(&landmarks((155.0, 140.0))).unwrap();
        assert!((pose.horizontal_ratio - 0.05).abs() < 1e-6);
        assert!((pose.vertical_ratio - 0.4).abs() < 1e-6);
        assert!(pose.is_looking_forward);
    }

    #[test]
    fn test_turned_right() {
        let pose = estimate(&landmarks((185.0, 120.0))).unwrap();
        assert!(!pose.is_looking_forward);
        assert_eq!(pose.direction, Direction::Right);
    }

    #[test]
    fn test_turned_left() {
        let pose = estimate(&landmarks((110.0, 120.0))).unwrap();
        assert!(!pose.is_looking_forward);
        assert_eq!(pose.direction, Direction::Left);
    }

    #[test]
    fn test_head_tilted_down_is_not_forward() {
        // Horizontally centred but nose far below the eyes.
        let pose = estimate(&landmarks((150.0, 160.0))).unwrap();
        assert_eq!(pose.direction, Direction::Forward);
        assert!(!pose.is_looking_forward);
    }

    #[test]
    fn test_horizontal_boundary_is_exclusive() {
        let pose = estimate(&landmarks((180.0, 100.0))).unwrap();
        assert!((pose.horizontal_ratio - 0.3).abs() < 1e-6);
        assert!(!pose.is_looking_forward);
    }

    #[test]
    fn test_zero_eye_distance_is_guarded() {
        let mut lm = landmarks((150.0, 100.0));
        lm.right_eye = lm.left_eye;
        assert!(estimate(&lm).is_none());
    }
}
