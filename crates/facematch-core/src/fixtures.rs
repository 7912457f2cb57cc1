//! Deterministic synthetic faces for tests across the workspace.

use crate::types::{BoundingBox, Embedding, Point, RawFace, EMBEDDING_DIM};

/// Pose and expression knobs for [`synthetic_landmarks`].
#[derive(Debug, Clone, Copy)]
pub struct LandmarkShape {
    /// Horizontal nose offset as a fraction of the half inter-eye distance.
    pub yaw: f32,
    pub eyes_open: bool,
}

impl Default for LandmarkShape {
    fn default() -> Self {
        Self { yaw: 0.0, eyes_open: true }
    }
}

/// Build a 68-point layout centred on `(cx, cy)` for a face `size` pixels wide.
pub fn synthetic_landmarks(cx: f32, cy: f32, size: f32, shape: LandmarkShape) -> Vec<Point> {
    let at = |dx: f32, dy: f32| Point::new(cx + dx * size, cy + dy * size);
    let mut pts = Vec::with_capacity(68);

    // Jaw 0–16: lower half-ellipse.
    for i in 0..17 {
        let t = std::f32::consts::PI * (i as f32 / 16.0);
        pts.push(at(-0.45 * t.cos(), 0.1 + 0.4 * t.sin()));
    }
    // Brows 17–26.
    for i in 0..5 {
        pts.push(at(-0.35 + 0.06 * i as f32, -0.22 - 0.02 * (i % 2) as f32));
    }
    for i in 0..5 {
        pts.push(at(0.11 + 0.06 * i as f32, -0.22 - 0.02 * (i % 2) as f32));
    }
    // Nose bridge 27–29 and tip 30.
    let nose_x = shape.yaw * 0.2;
    for i in 0..3 {
        pts.push(at(nose_x * (i as f32 / 3.0), -0.1 + 0.06 * i as f32));
    }
    pts.push(at(nose_x, 0.1));
    // Lower nose 31–35.
    for i in 0..5 {
        pts.push(at(nose_x - 0.08 + 0.04 * i as f32, 0.14));
    }
    // Eyes 36–47.
    let lid = if shape.eyes_open { 0.03 } else { 0.0 };
    for centre in [-0.2f32, 0.2] {
        let (w, c, y) = (0.15, centre, -0.1);
        pts.push(at(c - w / 2.0, y));
        pts.push(at(c - w / 6.0, y - lid));
        pts.push(at(c + w / 6.0, y - lid));
        pts.push(at(c + w / 2.0, y));
        pts.push(at(c + w / 6.0, y + lid));
        pts.push(at(c - w / 6.0, y + lid));
    }
    // Mouth 48–67: outer and inner ellipses.
    for i in 0..12 {
        let t = 2.0 * std::f32::consts::PI * (i as f32 / 12.0);
        pts.push(at(0.18 * t.cos(), 0.28 + 0.06 * t.sin()));
    }
    for i in 0..8 {
        let t = 2.0 * std::f32::consts::PI * (i as f32 / 8.0);
        pts.push(at(0.1 * t.cos(), 0.28 + 0.02 * t.sin()));
    }
    pts
}

/// Unit-length pseudo-random embedding; distinct seeds land far apart.
pub fn seeded_embedding(seed: u64) -> Embedding {
    let values = (0..EMBEDDING_DIM)
        .map(|i| {
            let x = (seed as f32 * 12.9898 + i as f32 * 78.233).sin() * 43_758.547;
            x.fract().abs() - 0.5
        })
        .collect();
    Embedding::new(normalize(values))
}

/// Move `base` roughly `step` units (Euclidean) along a fixed direction, then renormalise.
pub fn nudged(base: &Embedding, step: f32) -> Embedding {
    let dir = normalize((0..EMBEDDING_DIM).map(|i| (i as f32 * 1.7).cos()).collect());
    let values = base
        .values
        .iter()
        .zip(dir.iter())
        .map(|(v, d)| v + step * d)
        .collect();
    Embedding::new(normalize(values))
}

fn normalize(values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|v| v / norm).collect()
    } else {
        values
    }
}

/// Large, confident, frontal face with a full landmark layout.
pub fn strong_face(embedding: Embedding) -> RawFace {
    RawFace {
        bbox: BoundingBox { x: 40.0, y: 40.0, width: 120.0, height: 120.0 },
        landmarks: synthetic_landmarks(100.0, 100.0, 120.0, LandmarkShape::default()),
        embedding: Some(embedding),
        confidence: 0.95,
    }
}

/// Usable but low-grade face: low detector confidence and no landmarks.
/// Scores exactly 0.5 (size + descriptor).
pub fn weak_face(embedding: Embedding) -> RawFace {
    RawFace {
        bbox: BoundingBox { x: 40.0, y: 40.0, width: 120.0, height: 120.0 },
        landmarks: Vec::new(),
        embedding: Some(embedding),
        confidence: 0.3,
    }
}

/// Good-looking face whose detector produced no descriptor.
pub fn faceless_face() -> RawFace {
    RawFace { embedding: None, ..strong_face(Embedding::new(Vec::new())) }
}
