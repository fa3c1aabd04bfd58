//! TIFF reading and writing with the GeoTIFF tags the pipeline needs.
//!
//! `ModelPixelScale` + `ModelTiepoint` give the pixel → map transform; the spatial reference
//! text is stored in `GeoAsciiParams`.

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use super::{ImageRaster, LabelRaster};
use crate::types::{GeoTransform, SpatialRef};

fn open_decoder(path: &Path) -> Result<Decoder<File>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let decoder = Decoder::new(file)
        .with_context(|| format!("read TIFF header of {}", path.display()))?
        .with_limits(Limits::unlimited());
    Ok(decoder)
}

/// Geotransform from `ModelPixelScale` / `ModelTiepoint`, identity when absent.
fn read_geo(decoder: &mut Decoder<File>) -> Result<GeoTransform> {
    let scale = match decoder.find_tag(Tag::ModelPixelScaleTag)? {
        Some(v) => v.into_f64_vec()?,
        None => return Ok(GeoTransform::default()),
    };
    let tie = match decoder.find_tag(Tag::ModelTiepointTag)? {
        Some(v) => v.into_f64_vec()?,
        None => return Ok(GeoTransform::default()),
    };
    if scale.len() < 2 || tie.len() < 6 {
        return Ok(GeoTransform::default());
    }
    // Tiepoint (i, j, k, x, y, z): raster point (i, j) sits at map point (x, y).
    // Map y grows north, raster rows grow south.
    Ok(GeoTransform {
        origin_x: tie[3] - tie[0] * scale[0],
        origin_y: tie[4] + tie[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: -scale[1],
    })
}

fn read_srs(decoder: &mut Decoder<File>) -> Result<SpatialRef> {
    Ok(match decoder.find_tag(Tag::GeoAsciiParamsTag)? {
        Some(v) => SpatialRef::new(v.into_string()?.trim_end_matches(['|', '\0'])),
        None => SpatialRef::unknown(),
    })
}

fn samples_to_f32(img: DecodingResult) -> Result<Vec<f32>> {
    Ok(match img {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        other => bail!("unsupported TIFF sample format: {:?}", sample_kind(&other)),
    })
}

fn sample_kind(img: &DecodingResult) -> &'static str {
    match img {
        DecodingResult::U64(_) => "u64",
        DecodingResult::I64(_) => "i64",
        _ => "other",
    }
}

/// Read a Gray / GrayA / RGB / RGBA image into band-interleaved `f32`.
pub fn read_image(path: &Path) -> Result<ImageRaster> {
    let mut decoder = open_decoder(path)?;
    let bands = match decoder.colortype()? {
        tiff::ColorType::Gray(_) => 1,
        tiff::ColorType::GrayA(_) => 2,
        tiff::ColorType::RGB(_) => 3,
        tiff::ColorType::RGBA(_) => 4,
        other => bail!("{}: unsupported color type {:?}", path.display(), other),
    };
    let (w, h) = decoder.dimensions()?;
    let geo = read_geo(&mut decoder)?;
    let srs = read_srs(&mut decoder)?;
    let img = decoder
        .read_image()
        .with_context(|| format!("decode {}", path.display()))?;
    let data = samples_to_f32(img).with_context(|| path.display().to_string())?;
    let (width, height) = (w as usize, h as usize);
    if data.len() != width * height * bands {
        bail!(
            "{}: expected {} samples, decoded {}",
            path.display(),
            width * height * bands,
            data.len()
        );
    }
    Ok(ImageRaster {
        width,
        height,
        bands,
        data,
        geo,
        srs,
    })
}

/// Read a single-band integer label map.
pub fn read_label_map(path: &Path) -> Result<LabelRaster> {
    let mut decoder = open_decoder(path)?;
    match decoder.colortype()? {
        tiff::ColorType::Gray(_) => {}
        other => bail!(
            "{}: label map must be single-band, found {:?}",
            path.display(),
            other
        ),
    }
    let (w, h) = decoder.dimensions()?;
    let geo = read_geo(&mut decoder)?;
    let srs = read_srs(&mut decoder)?;
    let data: Vec<u32> = match decoder
        .read_image()
        .with_context(|| format!("decode {}", path.display()))?
    {
        DecodingResult::U8(buf) => buf.into_iter().map(u32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(u32::from).collect(),
        DecodingResult::U32(buf) => buf,
        _ => bail!("{}: label map must hold unsigned integers", path.display()),
    };
    Ok(LabelRaster {
        width: w as usize,
        height: h as usize,
        data,
        geo,
        srs,
    })
}

/// Write a label map as 32-bit gray TIFF with its geotransform and spatial reference.
pub fn write_label_map(path: &Path, labels: &LabelRaster) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut tiff = TiffEncoder::new(&mut file)?;
    let mut image = tiff.new_image::<colortype::Gray32>(labels.width as u32, labels.height as u32)?;

    let g = &labels.geo;
    let scale = [g.pixel_width, -g.pixel_height, 0.0];
    let tie = [0.0, 0.0, 0.0, g.origin_x, g.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tie[..])?;
    if let Some(srs) = labels.srs.as_str() {
        image.encoder().write_tag(Tag::GeoAsciiParamsTag, srs)?;
    }
    image
        .write_data(&labels.data)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
