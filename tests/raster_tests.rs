//! Raster tests: segmentation, small-region merge, polygonization and TIFF I/O.

use rastvec::geometry::Geometry;
use rastvec::raster::{
    ImageRaster, LabelPolygonizer, LabelRaster, RangeSegmenter, Segmenter, merge_small_regions,
    read_image, read_label_map, write_label_map,
};
use rastvec::streaming::Polygonizer;
use rastvec::{FieldValue, GeoTransform, RasterTile, RastvecError, SpatialRef, error_kind};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tiff::encoder::{TiffEncoder, colortype};

fn tmp_tif(name: &str) -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("raster_tests");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{name}.tif"))
}

fn gray(width: usize, height: usize, values: &[f32]) -> ImageRaster {
    assert_eq!(values.len(), width * height);
    ImageRaster::new(width, height, 1, values.to_vec())
}

// ---- Segmentation ----

#[test]
fn test_range_segmenter_labels_in_first_seen_order() {
    #[rustfmt::skip]
    let image = gray(4, 3, &[
        0.0, 0.0, 50.0, 50.0,
        0.0, 3.0, 50.0, 52.0,
        90.0, 90.0, 90.0, 90.0,
    ]);
    let labels = RangeSegmenter::new(5.0).segment(&image).unwrap();
    assert_eq!(
        labels.data,
        vec![1, 1, 2, 2, 1, 1, 2, 2, 3, 3, 3, 3]
    );
    assert_eq!(labels.max_label(), 3);
}

#[test]
fn test_range_segmenter_zero_radius_splits_every_value() {
    let image = gray(3, 1, &[1.0, 2.0, 1.0]);
    let labels = RangeSegmenter::new(0.0).segment(&image).unwrap();
    assert_eq!(labels.data, vec![1, 2, 3]);
}

#[test]
fn test_range_segmenter_compares_every_band() {
    // Band 0 is flat, band 1 jumps between the two columns.
    let image = ImageRaster::new(2, 1, 2, vec![10.0, 0.0, 10.0, 40.0]);
    let labels = RangeSegmenter::new(5.0).segment(&image).unwrap();
    assert_eq!(labels.data, vec![1, 2]);
}

#[test]
fn test_range_segmenter_rejects_negative_radius() {
    let image = gray(2, 2, &[0.0; 4]);
    for radius in [-1.0, f32::NAN] {
        let err = RangeSegmenter::new(radius).segment(&image).unwrap_err();
        assert!(matches!(
            error_kind(&err),
            Some(RastvecError::Configuration(_))
        ));
    }
}

#[test]
fn test_segmentation_keeps_georeference() {
    let mut image = gray(2, 2, &[0.0; 4]);
    image.geo = GeoTransform {
        origin_x: 10.0,
        origin_y: 20.0,
        pixel_width: 2.0,
        pixel_height: -2.0,
    };
    image.srs = SpatialRef::new("EPSG:3857");
    let labels = RangeSegmenter::new(1.0).segment(&image).unwrap();
    assert_eq!(labels.geo, image.geo);
    assert_eq!(labels.srs, image.srs);
}

// ---- Small-region merge ----

#[test]
fn test_merge_absorbs_noise_into_closest_neighbour() {
    // Left half 10, right half 200, a 190 pixel on the border.
    #[rustfmt::skip]
    let image = gray(6, 4, &[
        10.0, 10.0, 10.0, 200.0, 200.0, 200.0,
        10.0, 10.0, 190.0, 200.0, 200.0, 200.0,
        10.0, 10.0, 10.0, 200.0, 200.0, 200.0,
        10.0, 10.0, 10.0, 200.0, 200.0, 200.0,
    ]);
    let labels = RangeSegmenter::new(5.0).segment(&image).unwrap();
    assert_eq!(labels.max_label(), 3);
    assert_eq!(labels.get(2, 1), 3);

    let merged = merge_small_regions(&labels, &image, 2).unwrap();
    assert_eq!(merged.max_label(), 2);
    assert_eq!(merged.get(2, 1), merged.get(3, 1));
    assert_ne!(merged.get(2, 1), merged.get(1, 1));
    assert_eq!(merged.data.iter().filter(|&&l| l == 1).count(), 11);
}

#[test]
fn test_merge_keeps_regions_at_min_size() {
    let image = gray(4, 1, &[0.0, 0.0, 100.0, 100.0]);
    let labels = RangeSegmenter::new(1.0).segment(&image).unwrap();
    let merged = merge_small_regions(&labels, &image, 2).unwrap();
    assert_eq!(merged.data, vec![1, 1, 2, 2]);
}

#[test]
fn test_merge_chain_of_small_regions() {
    // Three singletons in a row next to a large region: all end up merged.
    let image = gray(6, 1, &[0.0, 0.0, 0.0, 20.0, 40.0, 60.0]);
    let labels = RangeSegmenter::new(1.0).segment(&image).unwrap();
    assert_eq!(labels.max_label(), 4);
    let merged = merge_small_regions(&labels, &image, 3).unwrap();
    assert!(merged.data.iter().all(|&l| l == merged.data[0]));
    assert_eq!(merged.max_label(), 1);
}

#[test]
fn test_merge_without_min_size_only_renumbers() {
    let labels = LabelRaster::new(4, 1, vec![5, 5, 0, 9]);
    let image = gray(4, 1, &[0.0; 4]);
    for min_size in [0, 1] {
        let merged = merge_small_regions(&labels, &image, min_size).unwrap();
        assert_eq!(merged.data, vec![1, 1, 0, 2]);
    }
}

#[test]
fn test_merge_rejects_dimension_mismatch() {
    let labels = LabelRaster::new(2, 2, vec![1; 4]);
    let image = gray(3, 1, &[0.0; 3]);
    let err = merge_small_regions(&labels, &image, 4).unwrap_err();
    assert!(matches!(
        error_kind(&err),
        Some(RastvecError::Configuration(_))
    ));
}

// ---- Polygonization ----

fn polygonize_whole(labels: LabelRaster) -> Vec<rastvec::Feature> {
    let mut p = LabelPolygonizer::new(Arc::new(labels));
    let tile = RasterTile::whole(p.extent());
    p.process_tile(&tile).unwrap().into_features()
}

#[test]
fn test_polygonize_square_block() {
    #[rustfmt::skip]
    let labels = LabelRaster::new(5, 5, vec![
        0, 0, 0, 0, 0,
        0, 1, 1, 1, 0,
        0, 1, 1, 1, 0,
        0, 1, 1, 1, 0,
        0, 0, 0, 0, 0,
    ]);
    let feats = polygonize_whole(labels);
    assert_eq!(feats.len(), 1);
    let f = &feats[0];
    assert_eq!(f.values, vec![FieldValue::Integer(1), FieldValue::Integer(9)]);
    assert_eq!(f.geometry.rings.len(), 1);
    assert_eq!(f.geometry.rings[0].len(), 5);
    assert_eq!(f.geometry.area(), 9.0);
    assert_eq!(f.geometry.perimeter(), 12.0);
    assert_eq!(f.geometry.bbox(), Some((1.0, 1.0, 4.0, 4.0)));
}

#[test]
fn test_polygonize_donut_has_hole() {
    #[rustfmt::skip]
    let labels = LabelRaster::new(3, 3, vec![
        1, 1, 1,
        1, 2, 1,
        1, 1, 1,
    ]);
    let feats = polygonize_whole(labels);
    assert_eq!(feats.len(), 2);
    let ring = &feats[0];
    assert_eq!(ring.values[1], FieldValue::Integer(8));
    assert_eq!(ring.geometry.rings.len(), 2);
    assert_eq!(ring.geometry.area(), 8.0);
    assert_eq!(ring.geometry.perimeter(), 16.0);
    assert!(!ring.geometry.contains(1.5, 1.5));
    assert!(ring.geometry.contains(0.5, 0.5));

    let hole = &feats[1];
    assert_eq!(hole.values[0], FieldValue::Integer(2));
    assert_eq!(hole.geometry.area(), 1.0);
}

#[test]
fn test_polygonize_disconnected_label_is_one_feature() {
    let labels = LabelRaster::new(3, 1, vec![4, 0, 4]);
    let feats = polygonize_whole(labels);
    assert_eq!(feats.len(), 1);
    assert_eq!(feats[0].geometry.rings.len(), 2);
    assert_eq!(feats[0].geometry.area(), 2.0);
}

#[test]
fn test_polygonize_applies_geotransform() {
    let mut labels = LabelRaster::new(2, 2, vec![7; 4]);
    labels.geo = GeoTransform {
        origin_x: 100.0,
        origin_y: 200.0,
        pixel_width: 10.0,
        pixel_height: -10.0,
    };
    let feats = polygonize_whole(labels);
    assert_eq!(feats[0].geometry.bbox(), Some((100.0, 180.0, 120.0, 200.0)));
    assert_eq!(feats[0].geometry.area(), 400.0);
}

#[test]
fn test_polygonize_tile_uses_global_coordinates() {
    let labels = LabelRaster::new(4, 2, vec![1, 1, 2, 2, 1, 1, 2, 2]);
    let mut p = LabelPolygonizer::new(Arc::new(labels));
    let tile = RasterTile {
        index: 1,
        x: 2,
        y: 0,
        width: 2,
        height: 2,
    };
    let layer = p.process_tile(&tile).unwrap();
    assert_eq!(layer.name, "tile_1");
    let feats = layer.into_features();
    assert_eq!(feats.len(), 1);
    assert_eq!(feats[0].values[0], FieldValue::Integer(2));
    assert_eq!(feats[0].geometry.bbox(), Some((2.0, 0.0, 4.0, 2.0)));
}

#[test]
fn test_polygonize_with_label_field_and_start_label() {
    let labels = LabelRaster::new(3, 1, vec![1, 2, 2]);
    let mut p = LabelPolygonizer::new(Arc::new(labels))
        .with_label_field("DN")
        .with_start_label(100);
    assert_eq!(p.label_offset(), 99);
    let names: Vec<String> = p.fields().into_iter().map(|f| f.name).collect();
    assert_eq!(names, vec!["DN", "nbpixels"]);
    let tile = RasterTile::whole(p.extent());
    let layer = p.process_tile(&tile).unwrap();
    assert_eq!(layer.fields[0].name, "DN");
    let values: Vec<Vec<FieldValue>> = layer.into_features().into_iter().map(|f| f.values).collect();
    assert_eq!(
        values,
        vec![
            vec![FieldValue::Integer(100), FieldValue::Integer(1)],
            vec![FieldValue::Integer(101), FieldValue::Integer(2)],
        ]
    );
}

#[test]
fn test_mask_zeroes_non_positive_pixels() {
    let labels = LabelRaster::new(4, 1, vec![1, 1, 2, 3]);
    let mask = gray(4, 1, &[1.0, 0.0, -2.0, f32::NAN]);
    let masked = labels.masked(&mask).unwrap();
    assert_eq!(masked.data, vec![1, 0, 0, 0]);

    let feats = polygonize_whole(masked);
    assert_eq!(feats.len(), 1);
    assert_eq!(feats[0].values[1], FieldValue::Integer(1));

    let err = labels.masked(&gray(2, 2, &[1.0; 4])).unwrap_err();
    assert!(matches!(
        error_kind(&err),
        Some(RastvecError::Configuration(_))
    ));
}

#[test]
fn test_geometry_simplify_and_json() {
    let jagged = Geometry::from_rings(vec![vec![
        [0.0, 0.0],
        [5.0, 0.1],
        [10.0, 0.0],
        [10.0, 10.0],
        [0.0, 10.0],
        [0.0, 0.0],
    ]]);
    let simple = jagged.simplify(0.5);
    assert_eq!(simple.rings[0].len(), 5);
    assert_eq!(simple.area(), 100.0);
    assert_eq!(jagged.simplify(0.0), jagged);

    let back = Geometry::from_json(&simple.to_json().unwrap()).unwrap();
    assert_eq!(back, simple);
}

// ---- TIFF I/O ----

#[test]
fn test_label_map_round_trip_keeps_georeference() {
    let path = tmp_tif("labels_geo");
    let mut labels = LabelRaster::new(4, 3, (1..=12).collect());
    labels.geo = GeoTransform {
        origin_x: 500000.0,
        origin_y: 4000000.0,
        pixel_width: 30.0,
        pixel_height: -30.0,
    };
    labels.srs = SpatialRef::new("EPSG:32631");
    write_label_map(&path, &labels).unwrap();
    let back = read_label_map(&path).unwrap();
    assert_eq!(back, labels);
}

#[test]
fn test_label_map_without_srs_reads_unknown() {
    let path = tmp_tif("labels_plain");
    let labels = LabelRaster::new(2, 2, vec![1, 2, 3, 70000]);
    write_label_map(&path, &labels).unwrap();
    let back = read_label_map(&path).unwrap();
    assert_eq!(back.data, labels.data);
    assert_eq!(back.srs, SpatialRef::unknown());
    assert_eq!(back.geo, GeoTransform::default());
}

#[test]
fn test_read_gray_and_rgb_images() {
    let gray_path = tmp_tif("gray8");
    {
        let mut file = File::create(&gray_path).unwrap();
        let mut enc = TiffEncoder::new(&mut file).unwrap();
        enc.write_image::<colortype::Gray8>(3, 2, &[0, 10, 20, 30, 40, 255])
            .unwrap();
    }
    let img = read_image(&gray_path).unwrap();
    assert_eq!((img.width, img.height, img.bands), (3, 2, 1));
    assert_eq!(img.pixel(2, 1), &[255.0]);
    assert_eq!(img.srs, SpatialRef::unknown());

    let rgb_path = tmp_tif("rgb8");
    {
        let mut file = File::create(&rgb_path).unwrap();
        let mut enc = TiffEncoder::new(&mut file).unwrap();
        let data: Vec<u8> = (0..12).collect();
        enc.write_image::<colortype::RGB8>(2, 2, &data).unwrap();
    }
    let img = read_image(&rgb_path).unwrap();
    assert_eq!(img.bands, 3);
    assert_eq!(img.pixel(1, 0), &[3.0, 4.0, 5.0]);
}

#[test]
fn test_read_missing_image_fails() {
    assert!(read_image(&tmp_tif("does_not_exist")).is_err());
}
