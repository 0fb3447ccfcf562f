use serde::{Deserialize, Serialize};

/// Label reported by the matcher when no enrolled face is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A 2D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn midpoint(a: Point, b: Point) -> Point {
        Point {
            x: (a.x + b.x) / 2.0,
            y: (a.y + b.y) / 2.0,
        }
    }
}

/// Five-point facial landmarks used for head-pose estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmarks {
    pub nose: Point,
    /// Outer corner of the left eye.
    pub left_eye: Point,
    /// Outer corner of the right eye.
    pub right_eye: Point,
    pub left_mouth: Point,
    pub right_mouth: Point,
}

impl From<[(f32, f32); 5]> for Landmarks {
    /// Build from the detector ordering `[left_eye, right_eye, nose, left_mouth, right_mouth]`.
    fn from(points: [(f32, f32); 5]) -> Self {
        let p = |i: usize| Point::new(points[i].0, points[i].1);
        Self {
            left_eye: p(0),
            right_eye: p(1),
            nose: p(2),
            left_mouth: p(3),
            right_mouth: p(4),
        }
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub confidence: f32,
}

/// Face descriptor produced by the external recognition model
/// (128-dimensional for the browser models the clients run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in a frame by the external detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default, rename = "box")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub landmarks: Option<Landmarks>,
    pub descriptor: Descriptor,
}

/// An enrolled student's reference descriptor, as held in a matching gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledFace {
    pub student_id: String,
    /// Matching label; the student's roll number.
    pub label: String,
    pub name: String,
    pub descriptor: Descriptor,
}

/// Result of matching a probe descriptor against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance of the nearest neighbour (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Student id of the accepted match (if any).
    pub student_id: Option<String>,
    /// Label of the nearest neighbour, or [`UNKNOWN_LABEL`].
    pub label: String,
}

impl MatchResult {
    fn unknown(distance: f32) -> Self {
        Self {
            matched: false,
            distance,
            student_id: None,
            label: UNKNOWN_LABEL.to_string(),
        }
    }

    /// Match confidence recorded in the detection log: `1 - distance`.
    pub fn confidence(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Strategy for comparing a probe descriptor against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[EnrolledFace], threshold: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// The nearest gallery entry is accepted only when its label is not
/// [`UNKNOWN_LABEL`] and its distance is strictly below the threshold
/// (lower threshold = stricter). Entries whose dimension differs from
/// the probe are skipped.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[EnrolledFace], threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            if face.descriptor.len() != probe.len() {
                continue;
            }
            let dist = probe.euclidean_distance(&face.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if gallery[idx].label != UNKNOWN_LABEL && best_dist < threshold => {
                MatchResult {
                    matched: true,
                    distance: best_dist,
                    student_id: Some(gallery[idx].student_id.clone()),
                    label: gallery[idx].label.clone(),
                }
            }
            _ => MatchResult::unknown(best_dist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(id: &str, label: &str, values: Vec<f32>) -> EnrolledFace {
        EnrolledFace {
            student_id: id.into(),
            label: label.into(),
            name: format!("Student {id}"),
            descriptor: Descriptor::new(values),
        }
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![0.1, 0.2, 0.3]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_unit_axes() {
        let a = Descriptor::new(vec![1.0, 0.0]);
        let b = Descriptor::new(vec![0.0, 1.0]);
        assert!((a.euclidean_distance(&b) - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_picks_nearest_neighbour() {
        let probe = Descriptor::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            face("1", "R001", vec![0.0, 1.0, 0.0]),
            face("2", "R002", vec![0.0, 0.0, 1.0]),
            face("3", "R003", vec![0.9, 0.1, 0.0]),
        ];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.student_id.as_deref(), Some("3"));
        assert_eq!(result.label, "R003");
        assert!((result.confidence() - (1.0 - result.distance)).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_rejects_at_threshold() {
        // Distance exactly equal to the threshold is not a match.
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![face("1", "R001", vec![0.5, 0.0])];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.5);
        assert!(!result.matched);
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert!((result.distance - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_rejects_unknown_label() {
        let probe = Descriptor::new(vec![1.0, 0.0]);
        let gallery = vec![face("1", UNKNOWN_LABEL, vec![1.0, 0.0])];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert!(!result.matched);
        assert!(result.student_id.is_none());
    }

    #[test]
    fn test_matcher_skips_dimension_mismatch() {
        let probe = Descriptor::new(vec![1.0, 0.0]);
        let gallery = vec![
            face("1", "R001", vec![1.0, 0.0, 0.0]),
            face("2", "R002", vec![0.8, 0.0]),
        ];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.student_id.as_deref(), Some("2"));
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = Descriptor::new(vec![1.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &[], 0.6);
        assert!(!result.matched);
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_landmarks_from_detector_order() {
        let lm = Landmarks::from([(1.0, 1.0), (3.0, 1.0), (2.0, 2.0), (1.0, 3.0), (3.0, 3.0)]);
        assert_eq!(lm.left_eye, Point::new(1.0, 1.0));
        assert_eq!(lm.right_eye, Point::new(3.0, 1.0));
        assert_eq!(lm.nose, Point::new(2.0, 2.0));
        assert_eq!(lm.right_mouth, Point::new(3.0, 3.0));
    }

    #[test]
    fn test_detection_json_shape() {
        let json = r#"{
            "box": {"x": 1, "y": 2, "width": 30, "height": 40},
            "landmarks": {
                "nose": {"x": 15, "y": 20},
                "leftEye": {"x": 10, "y": 15},
                "rightEye": {"x": 20, "y": 15},
                "leftMouth": {"x": 11, "y": 30},
                "rightMouth": {"x": 19, "y": 30}
            },
            "descriptor": [0.1, 0.2]
        }"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.descriptor.values, vec![0.1, 0.2]);
        assert!(det.landmarks.is_some());
        assert_eq!(det.bounding_box.unwrap().width, 30.0);
    }
}
