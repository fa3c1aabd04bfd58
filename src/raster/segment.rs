//! Pixel-level segmentation.

use anyhow::Result;
use log::debug;

use super::{ImageRaster, LabelRaster};
use crate::error::RastvecError;

/// Produces a label raster from an image. Labels start at 1.
pub trait Segmenter {
    fn segment(&self, image: &ImageRaster) -> Result<LabelRaster>;
}

/// Groups 4-connected pixels whose bands each differ by at most `range_radius`.
/// Labels are assigned in row-major first-seen order.
#[derive(Clone, Copy, Debug)]
pub struct RangeSegmenter {
    pub range_radius: f32,
}

impl RangeSegmenter {
    pub fn new(range_radius: f32) -> Self {
        Self { range_radius }
    }

    fn similar(&self, a: &[f32], b: &[f32]) -> bool {
        a.iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= self.range_radius)
    }
}

/// Disjoint-set forest with path halving and union by size.
pub(crate) struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `a` and `b`; returns the new root.
    pub(crate) fn union(&mut self, a: usize, b: usize) -> usize {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return ra;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.attach(small, big);
        big
    }

    /// Make root `child` a member of root `root`'s set, keeping `root` as representative.
    pub(crate) fn attach(&mut self, child: usize, root: usize) {
        self.parent[child] = root;
        self.size[root] += self.size[child];
    }
}

impl Segmenter for RangeSegmenter {
    fn segment(&self, image: &ImageRaster) -> Result<LabelRaster> {
        if self.range_radius.is_nan() || self.range_radius < 0.0 {
            return Err(RastvecError::config(format!(
                "range radius must be a non-negative number, got {}",
                self.range_radius
            ))
            .into());
        }
        let (w, h) = (image.width, image.height);
        let mut uf = UnionFind::new(w * h);
        for y in 0..h {
            for x in 0..w {
                let p = image.pixel(x, y);
                if x + 1 < w && self.similar(p, image.pixel(x + 1, y)) {
                    uf.union(y * w + x, y * w + x + 1);
                }
                if y + 1 < h && self.similar(p, image.pixel(x, y + 1)) {
                    uf.union(y * w + x, (y + 1) * w + x);
                }
            }
        }

        // Roots → consecutive labels in first-seen order.
        let mut root_label = vec![0u32; w * h];
        let mut next = 0u32;
        let mut data = Vec::with_capacity(w * h);
        for i in 0..w * h {
            let r = uf.find(i);
            if root_label[r] == 0 {
                next += 1;
                root_label[r] = next;
            }
            data.push(root_label[r]);
        }
        debug!("Segmented {w}x{h} image into {next} regions");

        Ok(LabelRaster {
            width: w,
            height: h,
            data,
            geo: image.geo,
            srs: image.srs.clone(),
        })
    }
}
