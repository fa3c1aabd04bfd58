//! Label polygonizer: one polygon per distinct label in a tile.
//!
//! Every pixel side on a label boundary (or on the tile border) becomes a directed unit edge.
//! Edges run with the region on the same side, so chaining them yields closed rings where
//! outer boundaries and holes have opposite orientation. Collinear vertices are dropped and
//! the remaining corners are mapped through the raster's geotransform.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::LabelRaster;
use crate::geometry::{Geometry, Ring};
use crate::sink::MemoryLayer;
use crate::streaming::Polygonizer;
use crate::types::{
    Extent, Feature, FieldDefn, FieldType, FieldValue, GeometryType, RasterTile, SpatialRef,
};
use crate::utils::config::{DEFAULT_START_LABEL, LABEL_FIELD, NBPIXELS_FIELD};

type Vertex = (i64, i64);

#[derive(Clone, Debug)]
pub struct LabelPolygonizer {
    labels: Arc<LabelRaster>,
    label_field: String,
    start_label: u32,
}

#[derive(Default)]
struct LabelEdges {
    pixels: i64,
    edges: BTreeMap<Vertex, Vec<Vertex>>,
}

impl LabelEdges {
    fn push(&mut self, from: Vertex, to: Vertex) {
        self.edges.entry(from).or_default().push(to);
    }

    fn pop_from(&mut self, from: Vertex) -> Option<Vertex> {
        let ends = self.edges.get_mut(&from)?;
        let to = ends.pop();
        if ends.is_empty() {
            self.edges.remove(&from);
        }
        to
    }

    /// Chain all edges into closed rings (first vertex repeated at the end).
    fn into_rings(mut self) -> Vec<Vec<Vertex>> {
        let mut rings = Vec::new();
        while let Some(start) = self.edges.keys().next().copied() {
            let mut ring = vec![start];
            let mut cur = start;
            while let Some(next) = self.pop_from(cur) {
                ring.push(next);
                cur = next;
                if cur == start {
                    break;
                }
            }
            rings.push(drop_collinear(ring));
        }
        rings
    }
}

fn collinear(a: Vertex, b: Vertex, c: Vertex) -> bool {
    (a.0 == b.0 && b.0 == c.0) || (a.1 == b.1 && b.1 == c.1)
}

fn drop_collinear(ring: Vec<Vertex>) -> Vec<Vertex> {
    let open = &ring[..ring.len().saturating_sub(1)];
    let n = open.len();
    if n < 4 {
        return ring;
    }
    let mut out: Vec<Vertex> = (0..n)
        .filter(|&i| !collinear(open[(i + n - 1) % n], open[i], open[(i + 1) % n]))
        .map(|i| open[i])
        .collect();
    if let Some(&first) = out.first() {
        out.push(first);
    }
    out
}

impl LabelPolygonizer {
    pub fn new(labels: Arc<LabelRaster>) -> Self {
        Self {
            labels,
            label_field: LABEL_FIELD.to_string(),
            start_label: DEFAULT_START_LABEL,
        }
    }

    /// Name the label field `name` instead of `label`.
    pub fn with_label_field(mut self, name: impl Into<String>) -> Self {
        self.label_field = name.into();
        self
    }

    /// Write raster label 1 as `start`, label 2 as `start + 1`, and so on.
    pub fn with_start_label(mut self, start: u32) -> Self {
        self.start_label = start;
        self
    }

    pub fn labels(&self) -> &Arc<LabelRaster> {
        &self.labels
    }

    /// Difference between a written label value and the raster label it came from.
    pub fn label_offset(&self) -> i64 {
        i64::from(self.start_label) - 1
    }

    /// Transient schema: the label field and `nbpixels`.
    pub fn schema(label_field: &str) -> Vec<FieldDefn> {
        vec![
            FieldDefn::new(label_field, FieldType::Integer),
            FieldDefn::new(NBPIXELS_FIELD, FieldType::Integer),
        ]
    }

    /// Boundary edges of every non-zero label in `tile`, in first-seen order.
    fn collect_edges(&self, tile: &RasterTile) -> Vec<(u32, LabelEdges)> {
        let local = self.labels.crop(tile);
        let (w, h) = (tile.width, tile.height);
        let at = |x: usize, y: usize| local[y * w + x];

        let mut order: Vec<(u32, LabelEdges)> = Vec::new();
        let mut slot: HashMap<u32, usize> = HashMap::new();
        for y in 0..h {
            for x in 0..w {
                let l = at(x, y);
                if l == 0 {
                    continue;
                }
                let idx = *slot.entry(l).or_insert_with(|| {
                    order.push((l, LabelEdges::default()));
                    order.len() - 1
                });
                let e = &mut order[idx].1;
                e.pixels += 1;
                let (xi, yi) = (x as i64, y as i64);
                if y == 0 || at(x, y - 1) != l {
                    e.push((xi + 1, yi), (xi, yi));
                }
                if y + 1 == h || at(x, y + 1) != l {
                    e.push((xi, yi + 1), (xi + 1, yi + 1));
                }
                if x == 0 || at(x - 1, y) != l {
                    e.push((xi, yi), (xi, yi + 1));
                }
                if x + 1 == w || at(x + 1, y) != l {
                    e.push((xi + 1, yi + 1), (xi + 1, yi));
                }
            }
        }
        order
    }
}

impl Polygonizer for LabelPolygonizer {
    fn extent(&self) -> Extent {
        self.labels.extent()
    }

    fn srs(&self) -> SpatialRef {
        self.labels.srs.clone()
    }

    fn fields(&self) -> Vec<FieldDefn> {
        Self::schema(&self.label_field)
    }

    fn process_tile(&mut self, tile: &RasterTile) -> Result<MemoryLayer> {
        let geo = self.labels.geo;
        let mut layer = MemoryLayer::new(
            format!("tile_{}", tile.index),
            self.labels.srs.clone(),
            GeometryType::Polygon,
            self.fields(),
        );
        let offset = self.label_offset();
        for (label, edges) in self.collect_edges(tile) {
            let pixels = edges.pixels;
            let rings: Vec<Ring> = edges
                .into_rings()
                .into_iter()
                .map(|ring| {
                    ring.into_iter()
                        .map(|(x, y)| {
                            geo.apply((tile.x as i64 + x) as f64, (tile.y as i64 + y) as f64)
                        })
                        .collect()
                })
                .collect();
            layer.create_feature(Feature::new(
                Geometry::from_rings(rings),
                vec![
                    FieldValue::Integer(i64::from(label) + offset),
                    FieldValue::Integer(pixels),
                ],
            ))?;
        }
        Ok(layer)
    }
}
