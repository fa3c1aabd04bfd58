//! Small-region merging.
//!
//! Regions smaller than `min_size` pixels are absorbed by the 4-adjacent region whose spectral
//! mean is closest, processing sizes 1, 2, .. `min_size - 1` in turn. Labels are renumbered
//! consecutively from 1 afterwards.

use anyhow::Result;
use log::debug;
use rayon::prelude::*;
use std::collections::BTreeSet;

use super::segment::UnionFind;
use super::{ImageRaster, LabelRaster};
use crate::error::RastvecError;

/// Per-label pixel counts and per-band sums.
struct RegionStats {
    bands: usize,
    counts: Vec<u64>,
    sums: Vec<f64>,
}

impl RegionStats {
    fn empty(n: usize, bands: usize) -> Self {
        Self {
            bands,
            counts: vec![0; n],
            sums: vec![0.0; n * bands],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.counts
            .iter_mut()
            .zip(&other.counts)
            .for_each(|(a, b)| *a += b);
        self.sums
            .iter_mut()
            .zip(&other.sums)
            .for_each(|(a, b)| *a += b);
        self
    }

    fn absorb(&mut self, into: usize, from: usize) {
        self.counts[into] += self.counts[from];
        self.counts[from] = 0;
        for b in 0..self.bands {
            self.sums[into * self.bands + b] += self.sums[from * self.bands + b];
            self.sums[from * self.bands + b] = 0.0;
        }
    }

    fn mean_distance(&self, a: usize, b: usize) -> f64 {
        let (ca, cb) = (self.counts[a].max(1) as f64, self.counts[b].max(1) as f64);
        (0..self.bands)
            .map(|k| {
                let d = self.sums[a * self.bands + k] / ca - self.sums[b * self.bands + k] / cb;
                d * d
            })
            .sum()
    }
}

fn collect_stats(labels: &LabelRaster, image: &ImageRaster, n: usize) -> RegionStats {
    let bands = image.bands;
    let w = labels.width;
    labels
        .data
        .par_chunks(w.max(1))
        .zip(image.data.par_chunks((w * bands).max(1)))
        .fold(
            || RegionStats::empty(n, bands),
            |mut acc, (lrow, irow)| {
                for (x, &l) in lrow.iter().enumerate() {
                    let l = l as usize;
                    acc.counts[l] += 1;
                    for b in 0..bands {
                        acc.sums[l * bands + b] += f64::from(irow[x * bands + b]);
                    }
                }
                acc
            },
        )
        .reduce(|| RegionStats::empty(n, bands), RegionStats::merge)
}

fn collect_adjacency(labels: &LabelRaster, n: usize) -> Vec<BTreeSet<u32>> {
    let mut adj = vec![BTreeSet::new(); n];
    let (w, h) = (labels.width, labels.height);
    for y in 0..h {
        for x in 0..w {
            let a = labels.get(x, y);
            let mut link = |b: u32| {
                if a != b && a != 0 && b != 0 {
                    adj[a as usize].insert(b);
                    adj[b as usize].insert(a);
                }
            };
            if x + 1 < w {
                link(labels.get(x + 1, y));
            }
            if y + 1 < h {
                link(labels.get(x, y + 1));
            }
        }
    }
    adj
}

/// Merge every region below `min_size` pixels into its spectrally closest neighbour.
/// `min_size <= 1` only renumbers. A region with no neighbour is kept as is.
pub fn merge_small_regions(
    labels: &LabelRaster,
    image: &ImageRaster,
    min_size: u32,
) -> Result<LabelRaster> {
    if labels.width != image.width || labels.height != image.height {
        return Err(RastvecError::config(format!(
            "label map is {}x{} but image is {}x{}",
            labels.width, labels.height, image.width, image.height
        ))
        .into());
    }
    let n = labels.max_label() as usize + 1;
    let mut stats = collect_stats(labels, image, n);
    let mut adj = collect_adjacency(labels, n);
    let mut uf = UnionFind::new(n);
    let mut merged = 0usize;

    for size in 1..u64::from(min_size) {
        for label in 1..n {
            if uf.find(label) != label || stats.counts[label] != size {
                continue;
            }
            let neighbours: BTreeSet<usize> = adj[label]
                .iter()
                .map(|&b| uf.find(b as usize))
                .filter(|&r| r != label)
                .collect();
            let target = neighbours
                .into_iter()
                .map(|r| (stats.mean_distance(label, r), r))
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let Some((_, target)) = target else {
                continue;
            };
            uf.attach(label, target);
            stats.absorb(target, label);
            let moved = std::mem::take(&mut adj[label]);
            adj[target].extend(moved);
            merged += 1;
        }
    }
    debug!("Merged {merged} regions below {min_size} pixels");

    // Consecutive relabel in first-seen order; 0 stays 0.
    let mut new_label = vec![0u32; n];
    let mut next = 0u32;
    let mut data = Vec::with_capacity(labels.data.len());
    for &l in &labels.data {
        if l == 0 {
            data.push(0);
            continue;
        }
        let r = uf.find(l as usize);
        if new_label[r] == 0 {
            next += 1;
            new_label[r] = next;
        }
        data.push(new_label[r]);
    }

    Ok(LabelRaster {
        width: labels.width,
        height: labels.height,
        data,
        geo: labels.geo,
        srs: labels.srs.clone(),
    })
}
