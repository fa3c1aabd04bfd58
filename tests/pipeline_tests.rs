//! End-to-end pipeline tests on a small synthetic image.

use clap::Parser;
use rastvec::engine::{Cli, setup_opts};
use rastvec::pipeline::{Handoff, intermediate_paths, output_schema, remove_file_best_effort};
use rastvec::raster::{ImageRaster, RangeSegmenter};
use rastvec::sink::{DataSource, LayerRef, OpenMode, open_handle_counts};
use rastvec::{
    Feature, FieldValue, Opts, PipelineOrchestrator, PipelineState, RastvecError, SpatialRef,
    error_kind,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use tiff::encoder::{TiffEncoder, colortype};

const SIDE: usize = 40;

/// Fresh directory per test under the target tmp dir.
fn tmp_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR"))
        .join("pipeline_tests")
        .join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// 40x40: left half 10, right half 200, two single-pixel 100 speckles in the left half.
fn sample_pixels() -> Vec<u8> {
    let mut data = Vec::with_capacity(SIDE * SIDE);
    for y in 0..SIDE {
        for x in 0..SIDE {
            let v = match (x, y) {
                (5, 5) | (12, 30) => 100,
                (x, _) if x < SIDE / 2 => 10,
                _ => 200,
            };
            data.push(v);
        }
    }
    data
}

fn sample_image() -> ImageRaster {
    let data = sample_pixels().into_iter().map(f32::from).collect();
    ImageRaster::new(SIDE, SIDE, 1, data)
}

fn run_with(output: &Path, opts: Opts) -> rastvec::RunReport {
    let segmenter = RangeSegmenter::new(opts.range_radius);
    let mut orch = PipelineOrchestrator::with_segmenter(None, output, opts, segmenter);
    orch.execute_with_image(sample_image()).unwrap()
}

fn read_output(output: &Path, layer_name: &str) -> (Vec<String>, Vec<Feature>) {
    let ds = DataSource::open(output, OpenMode::ReadOnly).unwrap();
    let layer = ds.get_layer(LayerRef::Name(layer_name)).unwrap();
    let names = layer.field_names().into_iter().map(String::from).collect();
    (names, ds.features(&layer).unwrap())
}

fn value(names: &[String], feature: &Feature, field: &str) -> FieldValue {
    let idx = names.iter().position(|n| n == field).unwrap();
    feature.values[idx].clone()
}

fn real(names: &[String], feature: &Feature, field: &str) -> f64 {
    value(names, feature, field).as_f64().unwrap()
}

#[test]
fn test_whole_image_without_merge() {
    let dir = tmp_dir("whole");
    let output = dir.join("out.sqlite");
    let report = run_with(&output, Opts::default());
    assert_eq!(report.state, PipelineState::Complete);
    assert_eq!(report.handoff, Handoff::InMemory);
    assert_eq!(report.tiles, 1);
    assert_eq!(report.features, 4);
    assert!(report.intermediates.is_empty());

    let (names, feats) = read_output(&output, "layer");
    assert_eq!(
        names,
        vec!["label", "nbpixels", "area", "perimeter", "compactness", "meanB0", "varB0"]
    );
    assert_eq!(feats.len(), 4);
    let total: f64 = feats.iter().map(|f| real(&names, f, "area")).sum();
    assert_eq!(total, (SIDE * SIDE) as f64);
    let left = &feats[0];
    assert_eq!(real(&names, left, "area"), 798.0);
    assert_eq!(value(&names, left, "nbpixels"), FieldValue::Integer(798));
}

#[test]
fn test_tiled_run_splits_regions_at_tile_borders() {
    let dir = tmp_dir("tiled");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        tile_size: Some(20),
        ..Opts::default()
    };
    let report = run_with(&output, opts);
    assert_eq!(report.tiles, 4);
    assert_eq!(report.features, 6);

    let (names, feats) = read_output(&output, "layer");
    assert_eq!(feats.len(), 6);

    // Tile 0: left region with a one-pixel hole, then the speckle.
    let left = &feats[0];
    assert_eq!(real(&names, left, "area"), 399.0);
    assert_eq!(real(&names, left, "perimeter"), 84.0);
    assert_eq!(value(&names, left, "nbpixels"), FieldValue::Integer(399));
    assert!((real(&names, left, "meanB0") - 10.0).abs() < 1e-9);
    assert_eq!(value(&names, &feats[1], "nbpixels"), FieldValue::Integer(1));

    // Tile 1: the right region's top square.
    let right = &feats[2];
    assert_eq!(real(&names, right, "area"), 400.0);
    assert_eq!(real(&names, right, "perimeter"), 80.0);
    assert!((real(&names, right, "compactness") - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    assert!((real(&names, right, "meanB0") - 200.0).abs() < 1e-9);
    assert!(real(&names, right, "varB0").abs() < 1e-9);
}

#[test]
fn test_merge_removes_speckles_and_cleans_intermediates() {
    let dir = tmp_dir("merge");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        tile_size: Some(20),
        min_size: 2,
        ..Opts::default()
    };
    let report = run_with(&output, opts.clone());
    assert_eq!(report.handoff, Handoff::Files);
    assert_eq!(report.features, 4);
    assert_eq!(report.intermediates.len(), 2);
    assert_eq!(report.cleaned, 2);

    let paths = intermediate_paths(&output, None);
    assert_eq!(paths.labelmap, dir.join("out_labelmap.tif"));
    assert_eq!(paths.merged, dir.join("out_labelmap_merged.tif"));
    assert!(!paths.labelmap.exists());
    assert!(!paths.merged.exists());

    // Removing again is harmless.
    assert!(!remove_file_best_effort(&paths.labelmap).unwrap());

    let (names, feats) = read_output(&output, "layer");
    assert_eq!(feats.len(), 4);
    assert!(
        feats
            .iter()
            .all(|f| value(&names, f, "nbpixels") == FieldValue::Integer(400))
    );
}

#[test]
fn test_intermediates_kept_without_cleanup() {
    let dir = tmp_dir("keep");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        min_size: 2,
        cleanup: false,
        ..Opts::default()
    };
    let report = run_with(&output, opts);
    assert_eq!(report.cleaned, 0);
    let paths = intermediate_paths(&output, None);
    assert!(paths.labelmap.exists());
    assert!(paths.merged.exists());
    assert_eq!(report.intermediates, vec![paths.labelmap, paths.merged]);
}

#[test]
fn test_tmp_dir_holds_intermediates() {
    let dir = tmp_dir("tmpdir");
    let output = dir.join("run.sqlite");
    let scratch = dir.join("scratch");
    let opts = Opts {
        min_size: 2,
        cleanup: false,
        tmp_dir: Some(scratch.clone()),
        ..Opts::default()
    };
    let report = run_with(&output, opts);
    assert_eq!(report.state, PipelineState::Complete);
    assert!(scratch.join("run_labelmap.tif").exists());
    assert!(scratch.join("run_labelmap_merged.tif").exists());
    assert!(!dir.join("run_labelmap.tif").exists());
}

#[test]
fn test_created_tmp_dir_removed_after_cleanup() {
    let dir = tmp_dir("tmpdir_cleanup");
    let output = dir.join("run.sqlite");
    let scratch = dir.join("scratch");
    let opts = Opts {
        min_size: 2,
        tmp_dir: Some(scratch.clone()),
        ..Opts::default()
    };
    let report = run_with(&output, opts);
    assert_eq!(report.cleaned, 2);
    assert!(!scratch.exists());
}

#[test]
fn test_state_history_follows_stages() {
    let dir = tmp_dir("history");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        min_size: 2,
        filter: Some("nbpixels > 0".into()),
        ..Opts::default()
    };
    let mut orch = PipelineOrchestrator::with_segmenter(
        None,
        &output,
        opts,
        RangeSegmenter::new(15.0),
    );
    let report = orch.execute_with_image(sample_image()).unwrap();
    assert_eq!(
        orch.history(),
        &[
            PipelineState::Init,
            PipelineState::SegmentationDone,
            PipelineState::MergeDone,
            PipelineState::VectorizationDone,
            PipelineState::GeometricDone,
            PipelineState::SpectralDone,
            PipelineState::FilterDone,
            PipelineState::Complete,
        ]
    );
    let stages: Vec<&str> = report.timings.iter().map(|t| t.stage).collect();
    assert_eq!(
        stages,
        vec![
            "Segmentation",
            "SmallRegionMerging",
            "Vectorization",
            "GeometricFeatures",
            "SpectralFeatures",
            "ObjectFiltering"
        ]
    );

    // A finished orchestrator does not run twice.
    assert!(orch.execute_with_image(sample_image()).is_err());
}

#[test]
fn test_filter_removes_non_matching_features() {
    let dir = tmp_dir("filter");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        tile_size: Some(20),
        filter: Some("nbpixels > 1".into()),
        ..Opts::default()
    };
    let report = run_with(&output, opts);
    assert_eq!(report.filtered_out, 2);
    assert_eq!(report.features, 4);
    let (_, feats) = read_output(&output, "layer");
    assert_eq!(feats.len(), 4);
}

#[test]
fn test_invalid_filter_fails_filter_stage() {
    let dir = tmp_dir("bad_filter");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        min_size: 2,
        filter: Some("no_such_field > 3".into()),
        ..Opts::default()
    };
    let mut orch =
        PipelineOrchestrator::with_segmenter(None, &output, opts, RangeSegmenter::new(15.0));
    let err = orch.execute_with_image(sample_image()).unwrap_err();
    assert_eq!(
        orch.state(),
        PipelineState::Failed {
            stage: "ObjectFiltering"
        }
    );
    assert!(matches!(
        error_kind(&err),
        Some(RastvecError::Configuration(_))
    ));
    // Intermediates survive a failed run; the output keeps every feature.
    let paths = orch.intermediate_paths();
    assert!(paths.labelmap.exists());
    assert!(paths.merged.exists());
    let (_, feats) = read_output(&output, "layer");
    assert_eq!(feats.len(), 4);
    assert_eq!(open_handle_counts(&output), (0, 0));
}

#[test]
fn test_srs_mismatch_fails_vectorization() {
    let dir = tmp_dir("srs");
    let output = dir.join("out.sqlite");
    let mut image = sample_image();
    image.srs = SpatialRef::new("EPSG:4326");
    let opts = Opts {
        srs: Some("EPSG:3857".into()),
        ..Opts::default()
    };
    let mut orch =
        PipelineOrchestrator::with_segmenter(None, &output, opts, RangeSegmenter::new(15.0));
    let err = orch.execute_with_image(image).unwrap_err();
    assert_eq!(
        orch.state(),
        PipelineState::Failed {
            stage: "Vectorization"
        }
    );
    assert!(matches!(
        error_kind(&err),
        Some(RastvecError::Configuration(_))
    ));
}

#[test]
fn test_srs_option_references_unreferenced_image() {
    let dir = tmp_dir("srs_assign");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        srs: Some("EPSG:32631".into()),
        layer_name: "segments".into(),
        ..Opts::default()
    };
    run_with(&output, opts);
    let ds = DataSource::open(&output, OpenMode::ReadOnly).unwrap();
    let layer = ds.get_layer(LayerRef::Name("segments")).unwrap();
    assert_eq!(layer.srs.as_str(), Some("EPSG:32631"));
}

#[test]
fn test_rerun_recreates_output() {
    let dir = tmp_dir("rerun");
    let output = dir.join("out.sqlite");
    run_with(&output, Opts::default());
    let report = run_with(&output, Opts::default());
    assert_eq!(report.features, 4);
    let (_, feats) = read_output(&output, "layer");
    assert_eq!(feats.len(), 4);
}

#[test]
fn test_run_from_tiff_file() {
    let dir = tmp_dir("from_file");
    let input = dir.join("image.tif");
    {
        let mut file = File::create(&input).unwrap();
        let mut enc = TiffEncoder::new(&mut file).unwrap();
        enc.write_image::<colortype::Gray8>(SIDE as u32, SIDE as u32, &sample_pixels())
            .unwrap();
    }
    let output = dir.join("out.sqlite");
    let report = rastvec::run(&input, &output, &Opts::default()).unwrap();
    assert_eq!(report.features, 4);
}

#[test]
fn test_missing_input_fails_segmentation() {
    let dir = tmp_dir("missing_input");
    let mut orch =
        PipelineOrchestrator::new(&dir.join("nope.tif"), &dir.join("out.sqlite"), Opts::default());
    assert!(orch.execute().is_err());
    assert_eq!(
        orch.state(),
        PipelineState::Failed {
            stage: "Segmentation"
        }
    );
}

#[test]
fn test_unusable_tmp_dir_fails_segmentation() {
    let dir = tmp_dir("tmp_blocked");
    let blocker = dir.join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let output = dir.join("out.sqlite");
    let opts = Opts {
        min_size: 2,
        tmp_dir: Some(blocker.join("sub")),
        ..Opts::default()
    };
    let mut orch =
        PipelineOrchestrator::with_segmenter(None, &output, opts, RangeSegmenter::new(15.0));
    assert!(orch.execute_with_image(sample_image()).is_err());
    let failed = PipelineState::Failed {
        stage: "Segmentation",
    };
    assert_eq!(orch.state(), failed);
    assert_eq!(orch.history(), &[PipelineState::Init, failed]);
    assert!(!output.exists());
    // A failed orchestrator does not run again.
    assert!(orch.execute_with_image(sample_image()).is_err());
    assert_eq!(orch.history().len(), 2);
}

#[test]
fn test_label_field_and_start_label_reach_the_output() {
    let dir = tmp_dir("label_field");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        label_field: "DN".into(),
        start_label: 100,
        ..Opts::default()
    };
    let report = run_with(&output, opts);
    assert_eq!(report.features, 4);

    let (names, feats) = read_output(&output, "layer");
    assert_eq!(names[0], "DN");
    let mut labels: Vec<i64> = feats
        .iter()
        .map(|f| value(&names, f, "DN").as_i64().unwrap())
        .collect();
    labels.sort_unstable();
    assert_eq!(labels, vec![100, 101, 102, 103]);
    // Spectral statistics still find each feature's pixels.
    let left = &feats[0];
    assert_eq!(value(&names, left, "nbpixels"), FieldValue::Integer(798));
    assert!((real(&names, left, "meanB0") - 10.0).abs() < 1e-9);
}

#[test]
fn test_mask_limits_vectorization() {
    let dir = tmp_dir("mask");
    let mask = dir.join("mask.tif");
    {
        let pixels: Vec<u8> = (0..SIDE * SIDE)
            .map(|i| u8::from(i % SIDE >= SIDE / 2))
            .collect();
        let mut file = File::create(&mask).unwrap();
        let mut enc = TiffEncoder::new(&mut file).unwrap();
        enc.write_image::<colortype::Gray8>(SIDE as u32, SIDE as u32, &pixels)
            .unwrap();
    }
    let output = dir.join("out.sqlite");
    let opts = Opts {
        mask: Some(mask),
        ..Opts::default()
    };
    let report = run_with(&output, opts);
    assert_eq!(report.features, 1);
    let (names, feats) = read_output(&output, "layer");
    assert_eq!(value(&names, &feats[0], "nbpixels"), FieldValue::Integer(800));
    assert!((real(&names, &feats[0], "meanB0") - 200.0).abs() < 1e-9);
    assert_eq!(
        feats[0].geometry.bbox(),
        Some(((SIDE / 2) as f64, 0.0, SIDE as f64, SIDE as f64))
    );
}

#[test]
fn test_mask_of_other_size_fails_vectorization() {
    let dir = tmp_dir("mask_size");
    let mask = dir.join("mask.tif");
    {
        let mut file = File::create(&mask).unwrap();
        let mut enc = TiffEncoder::new(&mut file).unwrap();
        enc.write_image::<colortype::Gray8>(4, 4, &[1; 16]).unwrap();
    }
    let opts = Opts {
        mask: Some(mask),
        ..Opts::default()
    };
    let mut orch = PipelineOrchestrator::with_segmenter(
        None,
        &dir.join("out.sqlite"),
        opts,
        RangeSegmenter::new(15.0),
    );
    let err = orch.execute_with_image(sample_image()).unwrap_err();
    assert!(matches!(
        error_kind(&err),
        Some(RastvecError::Configuration(_))
    ));
    assert_eq!(
        orch.state(),
        PipelineState::Failed {
            stage: "Vectorization"
        }
    );
}

#[test]
fn test_layer_options_are_stored_with_the_layer() {
    let dir = tmp_dir("layer_options");
    let output = dir.join("out.sqlite");
    let opts = Opts {
        layer_options: vec!["spatial_index=NO".into()],
        ..Opts::default()
    };
    run_with(&output, opts);
    let ds = DataSource::open(&output, OpenMode::ReadOnly).unwrap();
    let layer = ds.get_layer(LayerRef::Name("layer")).unwrap();
    assert_eq!(
        layer.options.extra.get("SPATIAL_INDEX").map(String::as_str),
        Some("NO")
    );

    let opts = Opts {
        layer_options: vec!["spatial_index".into()],
        ..Opts::default()
    };
    let mut orch =
        PipelineOrchestrator::with_segmenter(None, &output, opts, RangeSegmenter::new(15.0));
    let err = orch.execute_with_image(sample_image()).unwrap_err();
    assert!(matches!(
        error_kind(&err),
        Some(RastvecError::Configuration(_))
    ));
    assert_eq!(
        orch.state(),
        PipelineState::Failed {
            stage: "Vectorization"
        }
    );
}

#[test]
fn test_output_schema_per_band_count() {
    let names: Vec<String> = output_schema("label", 3)
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(
        names,
        vec![
            "label",
            "nbpixels",
            "area",
            "perimeter",
            "compactness",
            "meanB0",
            "varB0",
            "meanB1",
            "varB1",
            "meanB2",
            "varB2"
        ]
    );
}

#[test]
fn test_setup_opts_layers_file_then_cli() {
    let dir = tmp_dir("config");
    std::fs::write(
        dir.join(".rastvec.toml"),
        "[settings]\nlayer_name = \"from_file\"\nmin_size = 4\ntile_size = 128\ncleanup = false\n",
    )
    .unwrap();

    let cli = Cli::parse_from(["rastvec", "in.tif", "out.sqlite", "--min-size", "2"]);
    let opts = setup_opts(&cli, &dir);
    assert_eq!(opts.layer_name, "from_file");
    assert_eq!(opts.min_size, 2);
    assert_eq!(opts.tile_size, Some(128));
    assert!(!opts.cleanup);
    assert_eq!(opts.range_radius, 15.0);

    let cli = Cli::parse_from(["rastvec", "in.tif", "out.sqlite", "--cleanup", "-v"]);
    let opts = setup_opts(&cli, &dir);
    assert!(opts.cleanup);
    assert!(opts.verbose);

    let cli = Cli::parse_from([
        "rastvec",
        "in.tif",
        "out.sqlite",
        "--label-field",
        "DN",
        "--start-label",
        "5",
        "--layer-option",
        "A=1",
        "--layer-option",
        "B=2",
        "--mask",
        "mask.tif",
    ]);
    let opts = setup_opts(&cli, &dir);
    assert_eq!(opts.label_field, "DN");
    assert_eq!(opts.start_label, 5);
    assert_eq!(opts.layer_options, vec!["A=1", "B=2"]);
    assert_eq!(opts.mask, Some(PathBuf::from("mask.tif")));
    assert!(Cli::try_parse_from(["rastvec", "in.tif", "out.sqlite", "--start-label", "0"]).is_err());

    // No file: plain defaults.
    let empty = tmp_dir("config_empty");
    let cli = Cli::parse_from(["rastvec", "in.tif", "out.sqlite"]);
    let opts = setup_opts(&cli, &empty);
    assert_eq!(opts.layer_name, "layer");
    assert_eq!(opts.label_field, "label");
    assert_eq!(opts.start_label, 1);
    assert_eq!(opts.min_size, 0);
    assert!(opts.cleanup);
}
