//! Size optimization
//!
//! The pipeline runs in a fixed order:
//! 1. strip document metadata
//! 2. flatten form widgets into page content
//! 3. drop non-essential annotations
//! 4. merge byte-identical objects and prune unreachable ones
//! 5. re-encode raster images (heavy tier only)
//!
//! Packing into object streams is the serializer's job. Page count and media
//! boxes are never touched.

use std::collections::{BTreeSet, HashMap};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::content::Operation;
use lopdf::{Object, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::{rewrite_references, PdfDocument, RefRewrite};
use crate::error::{Result, Warning};
use crate::images::{encode_jpeg, flate, inflate};
use crate::overlay::{add_resource, append_overlay, page_resources};
use crate::page_index::{number, PageEntry, Rect};
use crate::progress::{marks, Progress, Stage};
use crate::serializer::write_object;

/// `/Info` keys removed when stripping metadata.
pub const METADATA_KEYS: [&[u8]; 8] = [
    b"Title",
    b"Author",
    b"Subject",
    b"Keywords",
    b"Producer",
    b"Creator",
    b"CreationDate",
    b"ModDate",
];
/// Longest image side kept by the heavy tier.
pub const MAX_IMAGE_SIDE: u32 = 2000;
const ANNOTATION_HIDDEN_FLAG: i64 = 1 << 1;
const ANNOTATION_NO_VIEW_FLAG: i64 = 1 << 5;
const DEDUPLICATION_PASSES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionProfile {
    Light,
    #[default]
    Medium,
    Heavy,
}

/// Tiers offered by the remote conversion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteTier {
    Good,
    Better,
    Best,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// JPEG quality used when images are re-encoded.
    pub image_quality: u8,
    pub strip_metadata: bool,
    pub flatten_forms: bool,
    pub remove_annotations: bool,
    pub resample_images: bool,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        CompressionProfile::default().settings()
    }
}

impl CompressionProfile {
    pub fn settings(&self) -> ProfileSettings {
        match self {
            CompressionProfile::Light => ProfileSettings {
                image_quality: 85,
                strip_metadata: true,
                flatten_forms: false,
                remove_annotations: false,
                resample_images: false,
            },
            CompressionProfile::Medium => ProfileSettings {
                image_quality: 65,
                strip_metadata: true,
                flatten_forms: true,
                remove_annotations: true,
                resample_images: false,
            },
            CompressionProfile::Heavy => ProfileSettings {
                image_quality: 45,
                strip_metadata: true,
                flatten_forms: true,
                remove_annotations: true,
                resample_images: true,
            },
        }
    }

    pub fn remote_tier(&self) -> RemoteTier {
        match self {
            CompressionProfile::Light => RemoteTier::Good,
            CompressionProfile::Medium => RemoteTier::Better,
            CompressionProfile::Heavy => RemoteTier::Best,
        }
    }
}

impl std::str::FromStr for CompressionProfile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "light" | "good" => Ok(CompressionProfile::Light),
            "medium" | "better" => Ok(CompressionProfile::Medium),
            "heavy" | "best" => Ok(CompressionProfile::Heavy),
            other => Err(format!("unknown compression profile '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizeReport {
    pub removed_objects: usize,
    pub deduplicated_objects: usize,
    pub resampled_images: usize,
    pub flattened_fields: usize,
    pub removed_annotations: usize,
    pub warnings: Vec<Warning>,
}

pub fn optimize(
    doc: &PdfDocument,
    profile: CompressionProfile,
    progress: &mut Progress,
) -> Result<(PdfDocument, OptimizeReport)> {
    info!(?profile, "optimizing document");
    optimize_with(doc, &profile.settings(), progress)
}

pub fn optimize_with(
    doc: &PdfDocument,
    settings: &ProfileSettings,
    progress: &mut Progress,
) -> Result<(PdfDocument, OptimizeReport)> {
    let mut out = doc.clone();
    let mut report = OptimizeReport::default();

    if settings.strip_metadata {
        strip_metadata(&mut out)?;
    }
    progress.report(Stage::Optimizing, marks::EDITING);

    if settings.flatten_forms || settings.remove_annotations {
        let index = out.page_index()?;
        for (done, page) in index.iter().enumerate() {
            process_annotations(&mut out, page, settings, &mut report)?;
            progress.step(Stage::Optimizing, marks::EDITING, 60, done + 1, index.len());
        }
        if settings.flatten_forms {
            let catalog_id = out.catalog_id()?;
            if let Ok(catalog) = out.inner_mut().get_dictionary_mut(catalog_id) {
                catalog.remove(b"AcroForm");
            }
        }
    }

    report.deduplicated_objects = deduplicate(&mut out);
    progress.report(Stage::Optimizing, 65);
    report.removed_objects = out.prune_unreachable();
    progress.report(Stage::Optimizing, 70);

    if settings.resample_images {
        resample_images(&mut out, settings.image_quality, &mut report, progress);
    }
    progress.report(Stage::Optimizing, marks::SERIALIZING);

    debug!(?report, "optimization finished");
    Ok((out, report))
}

fn strip_metadata(doc: &mut PdfDocument) -> Result<()> {
    if doc.info_dictionary().is_some() {
        let info = doc.info_dictionary_mut()?;
        for key in METADATA_KEYS {
            info.remove(key);
        }
        if info.is_empty() {
            doc.inner_mut().trailer.remove(b"Info");
        }
    }
    let catalog_id = doc.catalog_id()?;
    if let Ok(catalog) = doc.inner_mut().get_dictionary_mut(catalog_id) {
        catalog.remove(b"Metadata");
    }
    Ok(())
}

fn subtype_of(doc: &PdfDocument, annot: &Object) -> Option<Vec<u8>> {
    let dict = doc.resolve(annot)?.as_dict().ok()?;
    dict.get(b"Subtype").and_then(Object::as_name).ok().map(<[u8]>::to_vec)
}

/// Flatten widgets and drop annotations on one page according to `settings`.
fn process_annotations(
    doc: &mut PdfDocument,
    page: &PageEntry,
    settings: &ProfileSettings,
    report: &mut OptimizeReport,
) -> Result<()> {
    let annots = match doc
        .inner()
        .get_dictionary(page.id)
        .ok()
        .and_then(|d| d.get(b"Annots").ok())
        .and_then(|a| doc.resolve(a))
    {
        Some(Object::Array(items)) => items.clone(),
        _ => return Ok(()),
    };

    let mut kept = Vec::with_capacity(annots.len());
    let mut operations = Vec::new();
    let mut resources = page_resources(doc, page);

    for annot in annots {
        let subtype = subtype_of(doc, &annot);
        let is_widget = subtype.as_deref() == Some(b"Widget".as_slice());
        let is_link = subtype.as_deref() == Some(b"Link".as_slice());

        if is_widget && settings.flatten_forms {
            match widget_appearance(doc, &annot) {
                Ok(Some(drawing)) => {
                    let name = add_resource(&mut resources, b"XObject", "Fm", drawing.form_id);
                    operations.extend(drawing.operations(&name));
                    report.flattened_fields += 1;
                }
                Ok(None) => {}
                Err(reason) => {
                    warn!(page = page.number, %reason, "form field dropped without drawing");
                    report.warnings.push(Warning::FieldNotFlattened {
                        page: page.number,
                        reason,
                    });
                }
            }
            continue;
        }

        let keep = !settings.remove_annotations || is_link || is_widget;
        if keep {
            kept.push(annot);
        } else {
            report.removed_annotations += 1;
        }
    }

    if !operations.is_empty() {
        append_overlay(doc, page, resources, operations)?;
    }
    if let Ok(dict) = doc.inner_mut().get_dictionary_mut(page.id) {
        if kept.is_empty() {
            dict.remove(b"Annots");
        } else {
            dict.set("Annots", Object::Array(kept));
        }
    }
    Ok(())
}

struct WidgetDrawing {
    form_id: ObjectId,
    rect: Rect,
    bbox: Rect,
}

impl WidgetDrawing {
    /// Map the appearance's bounding box onto the widget rectangle.
    fn operations(&self, name: &str) -> Vec<Operation> {
        let sx = if self.bbox.width() > 0.0 {
            self.rect.width() / self.bbox.width()
        } else {
            1.0
        };
        let sy = if self.bbox.height() > 0.0 {
            self.rect.height() / self.bbox.height()
        } else {
            1.0
        };
        vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    sx.into(),
                    0.into(),
                    0.into(),
                    sy.into(),
                    (self.rect.llx - self.bbox.llx * sx).into(),
                    (self.rect.lly - self.bbox.lly * sy).into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ]
    }
}

/// The normal appearance of a visible widget, or `None` for hidden ones.
fn widget_appearance(
    doc: &mut PdfDocument,
    annot: &Object,
) -> std::result::Result<Option<WidgetDrawing>, String> {
    let dict = doc
        .resolve(annot)
        .and_then(|o| o.as_dict().ok())
        .ok_or_else(|| "widget is not a dictionary".to_string())?;

    let flags = dict
        .get(b"F")
        .and_then(Object::as_i64)
        .unwrap_or(0);
    if flags & (ANNOTATION_HIDDEN_FLAG | ANNOTATION_NO_VIEW_FLAG) != 0 {
        return Ok(None);
    }
    let rect = dict
        .get(b"Rect")
        .ok()
        .and_then(|r| Rect::from_object(doc, r))
        .ok_or_else(|| "widget has no usable /Rect".to_string())?;

    let normal = dict
        .get(b"AP")
        .ok()
        .and_then(|ap| doc.resolve(ap))
        .and_then(|ap| ap.as_dict().ok())
        .and_then(|ap| ap.get(b"N").ok())
        .ok_or_else(|| "widget has no normal appearance".to_string())?;

    let form_id = match normal {
        Object::Reference(id) => match doc.inner().get_object(*id) {
            Ok(Object::Stream(_)) => *id,
            // A state dictionary: pick the entry named by /AS.
            Ok(Object::Dictionary(states)) => {
                let state = dict
                    .get(b"AS")
                    .and_then(Object::as_name)
                    .map_err(|_| "appearance states without /AS".to_string())?;
                states
                    .get(state)
                    .and_then(Object::as_reference)
                    .map_err(|_| "no appearance for the current state".to_string())?
            }
            _ => return Err("appearance is not a stream".to_string()),
        },
        Object::Dictionary(states) => {
            let state = dict
                .get(b"AS")
                .and_then(Object::as_name)
                .map_err(|_| "appearance states without /AS".to_string())?;
            states
                .get(state)
                .and_then(Object::as_reference)
                .map_err(|_| "no appearance for the current state".to_string())?
        }
        _ => return Err("appearance is not a stream".to_string()),
    };

    let stream = doc
        .inner_mut()
        .get_object_mut(form_id)
        .and_then(Object::as_stream_mut)
        .map_err(|_| "appearance is not a stream".to_string())?;
    stream.dict.set("Type", Object::Name(b"XObject".to_vec()));
    stream.dict.set("Subtype", Object::Name(b"Form".to_vec()));
    if !stream.dict.has(b"BBox") {
        stream.dict.set(
            "BBox",
            Rect {
                llx: 0.0,
                lly: 0.0,
                urx: rect.width(),
                ury: rect.height(),
            }
            .to_object(),
        );
    }
    let matrix = stream.dict.get(b"Matrix").ok().and_then(form_matrix);
    let bbox_object = stream
        .dict
        .get(b"BBox")
        .cloned()
        .map_err(|_| "appearance has no /BBox".to_string())?;
    let mut bbox = Rect::from_object(doc, &bbox_object).ok_or_else(|| "unusable /BBox".to_string())?;
    // `Do` applies the form's own /Matrix, so fit the transformed box.
    if let Some(matrix) = matrix {
        bbox = transform_rect(&bbox, &matrix);
    }

    Ok(Some(WidgetDrawing {
        form_id,
        rect,
        bbox,
    }))
}

fn form_matrix(object: &Object) -> Option<[f32; 6]> {
    let Object::Array(items) = object else {
        return None;
    };
    if items.len() != 6 {
        return None;
    }
    let mut matrix = [0f32; 6];
    for (slot, item) in matrix.iter_mut().zip(items) {
        *slot = number(item)?;
    }
    Some(matrix)
}

/// Axis-aligned bounds of `rect` after `[a b c d e f]`.
fn transform_rect(rect: &Rect, m: &[f32; 6]) -> Rect {
    let corners = [
        (rect.llx, rect.lly),
        (rect.urx, rect.lly),
        (rect.llx, rect.ury),
        (rect.urx, rect.ury),
    ]
    .map(|(x, y)| (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5]));
    let xs = corners.map(|(x, _)| x);
    let ys = corners.map(|(_, y)| y);
    Rect {
        llx: xs.iter().copied().fold(f32::INFINITY, f32::min),
        lly: ys.iter().copied().fold(f32::INFINITY, f32::min),
        urx: xs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        ury: ys.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    }
}

/// Objects that must keep their identity even when byte-identical.
fn keeps_identity(object: &Object) -> bool {
    let dict = match object {
        Object::Dictionary(dict) => dict,
        Object::Stream(stream) => &stream.dict,
        _ => return false,
    };
    if dict.has(b"FT") {
        return true;
    }
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(name) if name == b"Page" || name == b"Pages" || name == b"Annot" || name == b"Catalog"
    )
}

/// Merge byte-identical objects onto the lowest-numbered copy. Returns how
/// many objects were dropped.
fn deduplicate(doc: &mut PdfDocument) -> usize {
    let mut removed = 0;
    for _ in 0..DEDUPLICATION_PASSES {
        let mut canonical: HashMap<Vec<u8>, ObjectId> = HashMap::new();
        let mut replace: HashMap<ObjectId, ObjectId> = HashMap::new();
        for (id, object) in &doc.inner().objects {
            if keeps_identity(object) {
                continue;
            }
            let mut key = Vec::new();
            write_object(&mut key, object);
            match canonical.get(&key) {
                Some(first) => {
                    replace.insert(*id, *first);
                }
                None => {
                    canonical.insert(key, *id);
                }
            }
        }
        if replace.is_empty() {
            break;
        }

        let mut map = |id: ObjectId| match replace.get(&id) {
            Some(to) => RefRewrite::To(*to),
            None => RefRewrite::Keep,
        };
        let inner = doc.inner_mut();
        for object in inner.objects.values_mut() {
            rewrite_references(object, &mut map);
        }
        for (_, value) in inner.trailer.iter_mut() {
            rewrite_references(value, &mut map);
        }
        inner.objects.retain(|id, _| !replace.contains_key(id));
        removed += replace.len();
    }
    if removed > 0 {
        debug!(removed, "merged duplicate objects");
    }
    removed
}

fn is_image(object: &Object) -> bool {
    object
        .as_stream()
        .ok()
        .and_then(|s| s.dict.get(b"Subtype").ok())
        .and_then(|s| s.as_name().ok())
        .map(|name| name == b"Image")
        .unwrap_or(false)
}

fn resample_images(
    doc: &mut PdfDocument,
    quality: u8,
    report: &mut OptimizeReport,
    progress: &mut Progress,
) {
    let ids: BTreeSet<ObjectId> = doc
        .inner()
        .objects
        .iter()
        .filter(|(_, object)| is_image(object))
        .map(|(id, _)| *id)
        .collect();

    for (done, id) in ids.iter().enumerate() {
        match reencode_image(doc, *id, quality) {
            Ok(true) => report.resampled_images += 1,
            Ok(false) => {}
            Err(reason) => {
                warn!(object = ?id, %reason, "image left untouched");
                report.warnings.push(Warning::ImageSkipped {
                    object: *id,
                    reason,
                });
            }
        }
        progress.step(Stage::Optimizing, 70, marks::SERIALIZING, done + 1, ids.len());
    }
}

/// Replace an 8-bit RGB or gray image with a JPEG when that is smaller.
/// `Ok(false)` means the image is not a candidate or would not shrink.
fn reencode_image(doc: &mut PdfDocument, id: ObjectId, quality: u8) -> std::result::Result<bool, String> {
    let stream = doc
        .inner()
        .get_object(id)
        .and_then(Object::as_stream)
        .map_err(|e| e.to_string())?;
    let dict = &stream.dict;

    let filter = match dict.get(b"Filter") {
        Err(_) => None,
        Ok(Object::Name(name)) => Some(name.clone()),
        Ok(Object::Array(items)) if items.len() == 1 => items[0].as_name().ok().map(<[u8]>::to_vec),
        Ok(_) => return Ok(false),
    };
    let unfiltered = match filter.as_deref() {
        None => true,
        Some(b"FlateDecode") => false,
        Some(_) => return Ok(false),
    };
    if dict.has(b"DecodeParms") || dict.has(b"Decode") || dict.has(b"ImageMask") {
        return Ok(false);
    }
    if dict.get(b"BitsPerComponent").and_then(Object::as_i64).ok() != Some(8) {
        return Ok(false);
    }
    let channels = match dict.get(b"ColorSpace").and_then(Object::as_name) {
        Ok(b"DeviceRGB") => 3,
        Ok(b"DeviceGray") => 1,
        _ => return Ok(false),
    };
    let width = dict.get(b"Width").and_then(Object::as_i64).map_err(|e| e.to_string())?;
    let height = dict.get(b"Height").and_then(Object::as_i64).map_err(|e| e.to_string())?;
    if width <= 0 || height <= 0 {
        return Err(format!("bad dimensions {}x{}", width, height));
    }
    let (width, height) = (width as u32, height as u32);

    let raw = if unfiltered {
        stream.content.clone()
    } else {
        inflate(&stream.content)?
    };
    let expected = width as usize * height as usize * channels;
    if raw.len() < expected {
        return Err(format!(
            "{} bytes of samples, expected {}",
            raw.len(),
            expected
        ));
    }
    let baseline = if unfiltered {
        flate(&raw).map(|c| c.len()).unwrap_or(raw.len())
    } else {
        stream.content.len()
    };

    let mut img = if channels == 3 {
        RgbImage::from_raw(width, height, raw[..expected].to_vec())
            .map(DynamicImage::ImageRgb8)
    } else {
        GrayImage::from_raw(width, height, raw[..expected].to_vec())
            .map(DynamicImage::ImageLuma8)
    }
    .ok_or_else(|| "sample buffer does not match dimensions".to_string())?;

    if width.max(height) > MAX_IMAGE_SIDE {
        img = img.resize(MAX_IMAGE_SIDE, MAX_IMAGE_SIDE, FilterType::Lanczos3);
    }
    let jpeg = encode_jpeg(&img, quality)?;
    if jpeg.len() >= baseline {
        return Ok(false);
    }

    let stream = doc
        .inner_mut()
        .get_object_mut(id)
        .and_then(Object::as_stream_mut)
        .map_err(|e| e.to_string())?;
    stream.dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    stream.dict.set("Width", Object::Integer(img.width() as i64));
    stream.dict.set("Height", Object::Integer(img.height() as i64));
    stream.dict.set("Length", Object::Integer(jpeg.len() as i64));
    stream.content = jpeg;
    stream.allows_compression = false;
    Ok(true)
}
