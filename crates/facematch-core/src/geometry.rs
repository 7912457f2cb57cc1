//! Landmark geometry for the 68-point face layout.
//!
//! Index layout: jaw 0–16, brows 17–26, nose bridge 27–30, lower nose 31–35,
//! left eye 36–41, right eye 42–47, mouth 48–67. Each eye contour runs
//! outer corner, two upper-lid points, inner corner, two lower-lid points.

use crate::types::Point;
use std::ops::Range;

const LEFT_EYE: Range<usize> = 36..42;
const RIGHT_EYE: Range<usize> = 42..48;
const NOSE_TIP: usize = 30;

/// Number of points the eye/nose lookups need to be present.
const REQUIRED_FOR_POSE: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    fn range(self) -> Range<usize> {
        match self {
            Eye::Left => LEFT_EYE,
            Eye::Right => RIGHT_EYE,
        }
    }
}

/// Centroid of the six contour points of one eye.
pub fn eye_center(landmarks: &[Point], eye: Eye) -> Option<Point> {
    let pts = landmarks.get(eye.range())?;
    let n = pts.len() as f32;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point::new(sx / n, sy / n))
}

/// Symmetry of the nose tip between the two eye centres.
///
/// `min(dLeft, dRight) / max(dLeft, dRight)`: 1.0 for a frontal face,
/// approaching 0 as the head turns to profile. Returns 0 when the layout
/// is incomplete.
pub fn frontality(landmarks: &[Point]) -> f32 {
    if landmarks.len() < REQUIRED_FOR_POSE {
        return 0.0;
    }
    let (Some(left), Some(right)) = (
        eye_center(landmarks, Eye::Left),
        eye_center(landmarks, Eye::Right),
    ) else {
        return 0.0;
    };
    let nose = landmarks[NOSE_TIP];

    let d_left = nose.distance(&left);
    let d_right = nose.distance(&right);
    let max = d_left.max(d_right);
    if max <= f32::EPSILON {
        return 0.0;
    }
    (d_left.min(d_right) / max).clamp(0.0, 1.0)
}

/// Vertical lid aperture normalised by eye width.
///
/// `(|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3|)` over the eye contour.
pub fn eye_aspect_ratio(landmarks: &[Point], eye: Eye) -> Option<f32> {
    let p = landmarks.get(eye.range())?;
    let width = p[0].distance(&p[3]);
    if width <= f32::EPSILON {
        return None;
    }
    let aperture = p[1].distance(&p[5]) + p[2].distance(&p[4]);
    Some(aperture / (2.0 * width))
}

/// Both eyes open: mean aspect ratio strictly above `epsilon`.
pub fn eyes_open(landmarks: &[Point], epsilon: f32) -> bool {
    match (
        eye_aspect_ratio(landmarks, Eye::Left),
        eye_aspect_ratio(landmarks, Eye::Right),
    ) {
        (Some(l), Some(r)) => (l + r) / 2.0 > epsilon,
        _ => false,
    }
}

/// Blur proxy from the spread of adjacent landmark displacements.
///
/// Computes the variance of consecutive point-to-point distances,
/// normalised by the squared mean distance so the result does not depend
/// on face scale, capped at 1.0. A soft, detail-poor detection collapses
/// toward evenly spaced landmarks and scores low.
pub fn sharpness(landmarks: &[Point]) -> f32 {
    if landmarks.len() < 3 {
        return 0.0;
    }
    let steps: Vec<f32> = landmarks.windows(2).map(|w| w[0].distance(&w[1])).collect();
    let n = steps.len() as f32;
    let mean = steps.iter().sum::<f32>() / n;
    if mean <= f32::EPSILON {
        return 0.0;
    }
    let variance = steps.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n;
    (variance / (mean * mean)).clamp(0.0, 1.0)
}
