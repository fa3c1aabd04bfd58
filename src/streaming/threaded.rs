//! Partition / compute / gather over the features of a persistent layer.
//!
//! Features are split into contiguous partitions, each worker thread computes derived field
//! values for its own partition, and the results are written back in partition order. Output
//! order and values do not depend on the worker count.

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::RastvecError;
use crate::sink::{DataSource, Layer, LayerOptions, LayerRef, OpenMode};
use crate::types::{Feature, FieldDefn, FieldValue};

/// Per-feature computation run by the worker threads. Implementations hold only shared,
/// read-only state.
pub trait FeatureComputation: Sync {
    /// Fields produced by `compute`, in output order.
    fn fields(&self) -> Vec<FieldDefn>;

    fn compute(&self, feature: &Feature) -> Result<Vec<FieldValue>>;
}

/// Split `0..len` into `parts` contiguous ranges of equal size; the last range takes the
/// remainder. `parts` is clamped to `len`; `len == 0` yields no ranges.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, len.max(1));
    if len == 0 {
        return Vec::new();
    }
    let chunk = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * chunk;
            let end = if i + 1 == parts { len } else { start + chunk };
            start..end
        })
        .collect()
}

/// Where computed values go.
#[derive(Clone, Debug)]
pub enum Destination {
    /// Update the source layer; it must already declare every computed field.
    InPlace,
    /// Create `layer_name` in the data source at `path` with the source schema followed by
    /// the computed fields.
    NewLayer { path: PathBuf, layer_name: String },
}

#[derive(Clone, Copy, Debug)]
pub struct ThreadedTileProcessor {
    num_threads: usize,
}

impl Default for ThreadedTileProcessor {
    fn default() -> Self {
        Self::new(rayon::current_num_threads())
    }
}

impl ThreadedTileProcessor {
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Compute `comp` for every feature. Returns `(feature, values)` pairs in input order.
    pub fn compute_all<C: FeatureComputation>(
        &self,
        mut features: Vec<Feature>,
        comp: &C,
    ) -> Result<Vec<(Feature, Vec<FieldValue>)>> {
        let ranges = partition(features.len(), self.num_threads);
        if ranges.is_empty() {
            return Ok(Vec::new());
        }

        // Each worker owns its partition; split from the back so ranges stay contiguous.
        let mut chunks: Vec<Vec<Feature>> = Vec::with_capacity(ranges.len());
        for range in ranges.iter().rev() {
            chunks.push(features.split_off(range.start));
        }
        chunks.reverse();
        debug!(
            "Computing {} features in {} partitions",
            ranges.iter().map(|r| r.len()).sum::<usize>(),
            chunks.len()
        );

        let results: Vec<Result<Vec<(Feature, Vec<FieldValue>)>>> = std::thread::scope(|s| {
            let handles: Vec<_> = chunks
                .into_iter()
                .enumerate()
                .map(|(part, chunk)| {
                    s.spawn(move || -> Result<Vec<(Feature, Vec<FieldValue>)>> {
                        let mut out = Vec::with_capacity(chunk.len());
                        for feat in chunk {
                            let values = comp.compute(&feat).with_context(|| {
                                format!("partition {part}: feature {:?}", feat.fid)
                            })?;
                            out.push((feat, values));
                        }
                        Ok(out)
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(part, h)| {
                    h.join()
                        .map_err(|_| anyhow!("worker thread for partition {part} panicked"))?
                })
                .collect()
        });

        let mut gathered = Vec::new();
        for part in results {
            gathered.extend(part?);
        }
        Ok(gathered)
    }

    /// Enumerate `layer_name` of `source` read-only, compute in parallel, then write the
    /// results to `dest`. The read-only handle is closed before any update handle is opened.
    /// Returns the number of features written.
    pub fn run<C: FeatureComputation>(
        &self,
        source: &Path,
        layer_name: &str,
        dest: &Destination,
        comp: &C,
    ) -> Result<usize> {
        let (src_layer, features) = {
            let ds = DataSource::open(source, OpenMode::ReadOnly)?;
            let layer = ds.get_layer(LayerRef::Name(layer_name))?;
            let features = ds.features(&layer)?;
            ds.close()?;
            (layer, features)
        };
        let computed_fields = comp.fields();
        let names: Vec<&str> = computed_fields.iter().map(|f| f.name.as_str()).collect();

        if let Destination::InPlace = dest
            && let Some(missing) = names.iter().find(|n| src_layer.field_index(n).is_none())
        {
            return Err(RastvecError::config(format!(
                "layer {layer_name} has no field {missing} to update in place"
            ))
            .into());
        }

        let results = self.compute_all(features, comp)?;
        let written = results.len();

        match dest {
            Destination::InPlace => {
                let mut ds = DataSource::open(source, OpenMode::Update)?;
                let mut tx = ds.begin_transaction()?;
                for (feat, values) in &results {
                    let fid = feat
                        .fid
                        .ok_or_else(|| anyhow!("feature read from {layer_name} has no fid"))?;
                    tx.update_fields(&src_layer, fid, &names, values)?;
                }
                tx.commit()?;
                ds.close()?;
            }
            Destination::NewLayer { path, layer_name: out_name } => {
                let mode = if path.exists() {
                    OpenMode::Update
                } else {
                    OpenMode::Overwrite
                };
                let mut ds = DataSource::open(path, mode)?;
                let out_layer = create_output_layer(
                    &mut ds,
                    &src_layer,
                    out_name,
                    &computed_fields,
                )?;
                let mut tx = ds.begin_transaction()?;
                for (feat, values) in results {
                    let mut all = feat.values;
                    all.extend(values);
                    tx.create_feature(&out_layer, &Feature::new(feat.geometry, all))?;
                }
                tx.commit()?;
                ds.close()?;
            }
        }
        info!(
            "Computed {} field(s) for {} features with {} thread(s)",
            names.len(),
            written,
            self.num_threads
        );
        Ok(written)
    }
}

fn create_output_layer(
    ds: &mut DataSource,
    src: &Layer,
    name: &str,
    computed: &[FieldDefn],
) -> Result<Layer> {
    let fields: Vec<FieldDefn> = src.fields.iter().chain(computed).cloned().collect();
    ds.create_layer_with_fields(
        name,
        &src.srs,
        src.geometry_type,
        &LayerOptions::default(),
        &fields,
    )
}
