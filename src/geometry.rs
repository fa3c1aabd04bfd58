//! Polygon geometry stored by the vector sink.
//!
//! A [`Geometry`] is a set of closed rings. Outer boundaries and holes run in opposite
//! directions, so summing signed ring areas yields the enclosed area whatever the
//! ring order. Point containment uses the even-odd rule over all rings.

use serde::{Deserialize, Serialize};

/// Closed ring: first point equals last point.
pub type Ring = Vec<[f64; 2]>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub rings: Vec<Ring>,
}

/// Axis-aligned bounding box `(min_x, min_y, max_x, max_y)`.
pub type BBox = (f64, f64, f64, f64);

impl Geometry {
    pub fn from_rings(rings: Vec<Ring>) -> Self {
        Self { rings }
    }

    /// Axis-aligned rectangle (one counter-clockwise ring).
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            rings: vec![vec![
                [min_x, min_y],
                [max_x, min_y],
                [max_x, max_y],
                [min_x, max_y],
                [min_x, min_y],
            ]],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(|r| r.len() < 4)
    }

    /// Sum of signed ring areas (shoelace).
    pub fn signed_area(&self) -> f64 {
        self.rings.iter().map(|r| ring_signed_area(r)).sum()
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Total boundary length over all rings.
    pub fn perimeter(&self) -> f64 {
        self.rings.iter().map(|r| ring_length(r)).sum()
    }

    pub fn bbox(&self) -> Option<BBox> {
        let mut points = self.rings.iter().flatten();
        let first = points.next()?;
        let init = (first[0], first[1], first[0], first[1]);
        Some(points.fold(init, |(x0, y0, x1, y1), p| {
            (x0.min(p[0]), y0.min(p[1]), x1.max(p[0]), y1.max(p[1]))
        }))
    }

    /// Even-odd point-in-polygon test over every ring edge.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        for ring in &self.rings {
            for edge in ring.windows(2) {
                let [xi, yi] = edge[0];
                let [xj, yj] = edge[1];
                if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Douglas–Peucker simplification of every ring. Rings that collapse below a
    /// triangle are dropped.
    pub fn simplify(&self, tolerance: f64) -> Geometry {
        if tolerance <= 0.0 {
            return self.clone();
        }
        let rings = self
            .rings
            .iter()
            .filter_map(|r| {
                let s = simplify_ring(r, tolerance);
                (s.len() >= 4).then_some(s)
            })
            .collect();
        Geometry { rings }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

pub fn ring_signed_area(ring: &[[f64; 2]]) -> f64 {
    let twice: f64 = ring
        .windows(2)
        .map(|e| e[0][0] * e[1][1] - e[1][0] * e[0][1])
        .sum();
    twice / 2.0
}

pub fn ring_length(ring: &[[f64; 2]]) -> f64 {
    ring.windows(2)
        .map(|e| (e[1][0] - e[0][0]).hypot(e[1][1] - e[0][1]))
        .sum()
}

fn simplify_ring(ring: &[[f64; 2]], tolerance: f64) -> Ring {
    if ring.len() <= 4 {
        return ring.to_vec();
    }
    // Split at the vertex farthest from the start so the closed ring has two open halves.
    let start = ring[0];
    let (split, _) = ring
        .iter()
        .enumerate()
        .map(|(i, p)| (i, (p[0] - start[0]).hypot(p[1] - start[1])))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
    if split == 0 || split == ring.len() - 1 {
        return ring.to_vec();
    }
    let mut first = douglas_peucker(&ring[..=split], tolerance);
    let second = douglas_peucker(&ring[split..], tolerance);
    first.pop();
    first.extend(second);
    first
}

fn douglas_peucker(points: &[[f64; 2]], tolerance: f64) -> Vec<[f64; 2]> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let a = points[0];
    let b = points[points.len() - 1];
    let (idx, dist) = points[1..points.len() - 1]
        .iter()
        .enumerate()
        .map(|(i, p)| (i + 1, segment_distance(*p, a, b)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
    if dist > tolerance {
        let mut left = douglas_peucker(&points[..=idx], tolerance);
        let right = douglas_peucker(&points[idx..], tolerance);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![a, b]
    }
}

fn segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return (p[0] - a[0]).hypot(p[1] - a[1]);
    }
    let t = (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len2).clamp(0.0, 1.0);
    (p[0] - (a[0] + t * dx)).hypot(p[1] - (a[1] + t * dy))
}
