//! Image XObject recompression.
//!
//! Images are copied out of the document as [`ImageJob`]s so they can be
//! re-encoded in parallel without holding the document, then written back
//! with [`apply`].

use std::collections::HashSet;
use std::io::{Read, Write};

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView, GrayImage, RgbImage};
use lopdf::{Document, Object, ObjectId, Stream};

/// An image stream (and its soft mask, if any) detached from the document.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub id: ObjectId,
    image: Stream,
    mask: Option<(ObjectId, Stream)>,
}

#[derive(Debug)]
pub struct Recompressed {
    pub id: ObjectId,
    image: Stream,
    mask: Option<(ObjectId, Stream)>,
    actions: Vec<String>,
}

impl Recompressed {
    pub fn summary(&self) -> String {
        self.actions.join(", ")
    }
}

fn is_image(stream: &Stream) -> bool {
    matches!(
        stream.dict.get(b"Subtype").and_then(|o| o.as_name()),
        Ok(name) if name == b"Image"
    )
}

fn smask_of(stream: &Stream) -> Option<ObjectId> {
    match stream.dict.get(b"SMask") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    }
}

/// Replaces indirect references with the objects they point at.
fn resolve_indirect(doc: &Document, value: &Object) -> Option<Object> {
    match value {
        Object::Reference(id) => Some(doc.objects.get(id).cloned().unwrap_or(Object::Null)),
        Object::Array(items) if items.iter().any(|o| matches!(o, Object::Reference(_))) => {
            let resolved = items
                .iter()
                .map(|item| match item {
                    Object::Reference(id) => doc.objects.get(id).cloned().unwrap_or_else(|| item.clone()),
                    _ => item.clone(),
                })
                .collect();
            Some(Object::Array(resolved))
        }
        _ => None,
    }
}

fn resolve_filters(doc: &Document, stream: &mut Stream) {
    for key in [&b"Filter"[..], &b"DecodeParms"[..]] {
        let resolved = stream
            .dict
            .get(key)
            .ok()
            .and_then(|value| resolve_indirect(doc, value));
        if let Some(value) = resolved {
            stream.dict.set(key.to_vec(), value);
        }
    }
}

/// Every image XObject in `doc`. Soft masks travel with the image that uses
/// them instead of becoming jobs of their own.
pub fn collect_jobs(doc: &Document) -> Vec<ImageJob> {
    let masks: HashSet<ObjectId> = doc
        .objects
        .values()
        .filter_map(|object| match object {
            Object::Stream(stream) if is_image(stream) => smask_of(stream),
            _ => None,
        })
        .collect();

    let mut jobs = Vec::new();
    for (id, object) in &doc.objects {
        let Object::Stream(stream) = object else {
            continue;
        };
        if !is_image(stream) || masks.contains(id) {
            continue;
        }

        let mut image = stream.clone();
        resolve_filters(doc, &mut image);

        let mask = smask_of(stream).and_then(|mask_id| match doc.objects.get(&mask_id) {
            Some(Object::Stream(mask)) => {
                let mut mask = mask.clone();
                resolve_filters(doc, &mut mask);
                Some((mask_id, mask))
            }
            _ => None,
        });

        jobs.push(ImageJob {
            id: *id,
            image,
            mask,
        });
    }
    jobs
}

pub fn apply(doc: &mut Document, recompressed: Recompressed) {
    doc.objects
        .insert(recompressed.id, Object::Stream(recompressed.image));
    if let Some((mask_id, mask)) = recompressed.mask {
        doc.objects.insert(mask_id, Object::Stream(mask));
    }
}

fn has_filter(stream: &Stream, filter: &[u8]) -> bool {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == filter,
        Ok(Object::Array(arr)) => arr
            .iter()
            .any(|o| matches!(o, Object::Name(name) if name == filter)),
        _ => false,
    }
}

fn inflate(stream: &Stream) -> Result<Vec<u8>> {
    if stream.dict.get(b"Filter").is_err() {
        return Ok(stream.content.clone());
    }
    match stream.decompressed_content() {
        Ok(content) => Ok(content),
        Err(e) if has_filter(stream, b"FlateDecode") => {
            log::trace!("lopdf could not decode stream ({:?}), inflating manually", e);
            let mut decoder = ZlibDecoder::new(&stream.content[..]);
            let mut buffer = Vec::new();
            decoder
                .read_to_end(&mut buffer)
                .context("manual zlib inflate failed")?;
            Ok(buffer)
        }
        Err(e) => Err(anyhow!("decompression failed: {:?}", e)),
    }
}

fn dimension(stream: &Stream, key: &[u8]) -> Result<u32> {
    let value = stream
        .dict
        .get(key)
        .and_then(|o| o.as_i64())
        .map_err(|_| anyhow!("missing {}", String::from_utf8_lossy(key)))?;
    u32::try_from(value).map_err(|_| anyhow!("invalid {} {}", String::from_utf8_lossy(key), value))
}

fn cmyk_to_rgb(content: &[u8]) -> Vec<u8> {
    content
        .chunks_exact(4)
        .flat_map(|cmyk| {
            let c = cmyk[0] as f32 / 255.0;
            let m = cmyk[1] as f32 / 255.0;
            let y = cmyk[2] as f32 / 255.0;
            let k = cmyk[3] as f32 / 255.0;
            [
                ((1.0 - c) * (1.0 - k) * 255.0) as u8,
                ((1.0 - m) * (1.0 - k) * 255.0) as u8,
                ((1.0 - y) * (1.0 - k) * 255.0) as u8,
            ]
        })
        .collect()
}

fn decode(stream: &Stream, actions: &mut Vec<String>) -> Result<DynamicImage> {
    if has_filter(stream, b"DCTDecode") {
        actions.push("was JPEG".to_string());
        let data = match stream.dict.get(b"Filter") {
            // DCT wrapped in further filters
            Ok(Object::Array(_)) => stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone()),
            _ => stream.content.clone(),
        };
        return image::load_from_memory(&data).context("failed to decode JPEG image");
    }

    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .and_then(|o| o.as_i64())
        .unwrap_or(8);
    if bits != 8 {
        bail!("unsupported bit depth {}", bits);
    }
    if let Ok(Object::Array(space)) = stream.dict.get(b"ColorSpace") {
        if matches!(space.first(), Some(Object::Name(name)) if name == b"Indexed") {
            bail!("indexed color spaces are left as is");
        }
    }

    let width = dimension(stream, b"Width")?;
    let height = dimension(stream, b"Height")?;
    let content = inflate(stream)?;
    let pixels = width as usize * height as usize;

    let components = match stream.dict.get(b"ColorSpace") {
        Ok(Object::Name(name)) if name == b"DeviceGray" => 1,
        Ok(Object::Name(name)) if name == b"DeviceRGB" => 3,
        Ok(Object::Name(name)) if name == b"DeviceCMYK" => 4,
        _ if content.len() == pixels => 1,
        _ if content.len() == pixels * 4 => 4,
        _ => 3,
    };

    match components {
        1 => GrayImage::from_raw(width, height, content)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| anyhow!("gray buffer does not match {}x{}", width, height)),
        3 => RgbImage::from_raw(width, height, content)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height)),
        _ => {
            actions.push("CMYK->RGB".to_string());
            RgbImage::from_raw(width, height, cmyk_to_rgb(&content))
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| anyhow!("CMYK buffer does not match {}x{}", width, height))
        }
    }
}

fn rewrite_dict(stream: &mut Stream, filter: &str, width: u32, height: u32, color_space: &str) {
    stream.dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    stream.dict.set("Width", Object::Integer(width as i64));
    stream.dict.set("Height", Object::Integer(height as i64));
    stream
        .dict
        .set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    stream.dict.set("BitsPerComponent", Object::Integer(8));
    stream.dict.remove(b"DecodeParms");
    stream.dict.remove(b"Decode");
}

/// Decodes, downsizes and re-encodes one image. `Ok(None)` means the
/// re-encoded image would not be smaller and the original should stay.
pub fn recompress(job: &ImageJob, quality: u8, max_dim: u32) -> Result<Option<Recompressed>> {
    let mut actions = Vec::new();
    let mut img = decode(&job.image, &mut actions)?;

    let mut has_alpha = false;
    if let Some((_, mask)) = &job.mask {
        let mw = dimension(mask, b"Width")?;
        let mh = dimension(mask, b"Height")?;
        if (mw, mh) == img.dimensions() {
            let alpha = inflate(mask).context("failed to inflate mask")?;
            let mask = GrayImage::from_raw(mw, mh, alpha)
                .ok_or_else(|| anyhow!("mask buffer does not match {}x{}", mw, mh))?;
            let mut rgba = img.to_rgba8();
            for (x, y, pixel) in rgba.enumerate_pixels_mut() {
                pixel[3] = mask.get_pixel(x, y)[0];
            }
            img = DynamicImage::ImageRgba8(rgba);
            has_alpha = true;
            actions.push("applied SMask".to_string());
        }
    }

    let resized = img.width() > max_dim || img.height() > max_dim;
    let img = if resized {
        let new_img = img.resize(max_dim, max_dim, FilterType::Lanczos3);
        actions.push(format!(
            "resize {}x{} -> {}x{}",
            img.width(),
            img.height(),
            new_img.width(),
            new_img.height()
        ));
        new_img
    } else {
        actions.push(format!("keep dims {}x{}", img.width(), img.height()));
        img
    };
    let (w, h) = img.dimensions();

    let gray = !has_alpha && img.color().channel_count() == 1;
    let (pixels, color, color_space) = if gray {
        (img.to_luma8().into_raw(), ColorType::L8, "DeviceGray")
    } else {
        (img.to_rgb8().into_raw(), ColorType::Rgb8, "DeviceRGB")
    };

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality).encode(&pixels, w, h, color.into())?;

    if !resized && !has_alpha && buffer.len() >= job.image.content.len() {
        return Ok(None);
    }
    actions.push(format!("re-encode: JPEG(q={})", quality));

    let mut image = job.image.clone();
    rewrite_dict(&mut image, "DCTDecode", w, h, color_space);
    image.set_content(buffer);

    let mask = match &job.mask {
        Some((mask_id, mask)) if has_alpha => {
            actions.push("alpha: Flate".to_string());
            let alpha: Vec<u8> = img.to_rgba8().pixels().map(|p| p[3]).collect();
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::best());
            encoder.write_all(&alpha)?;
            let mut mask = mask.clone();
            rewrite_dict(&mut mask, "FlateDecode", w, h, "DeviceGray");
            mask.set_content(encoder.finish()?);
            Some((*mask_id, mask))
        }
        _ => None,
    };

    Ok(Some(Recompressed {
        id: job.id,
        image,
        mask,
        actions,
    }))
}
