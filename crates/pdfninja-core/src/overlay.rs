//! Watermark and signature overlays
//!
//! Overlays are strictly additive. Each touched page gets its existing
//! content wrapped in a balanced `q`/`Q` pair by two new streams placed
//! around the original ones, and the overlay is drawn after the closing `Q`.
//! The original content streams are never rewritten.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::PdfDocument;
use crate::error::{ParseError, ResourceError, Result, SerializationError, ValidationError, Warning};
use crate::images::{decode_data_url, embed_image, EmbeddedImage};
use crate::page_index::{PageEntry, Rect};
use crate::progress::{marks, Progress, Stage};

/// Width in points of an image watermark.
pub const IMAGE_WATERMARK_WIDTH: f32 = 150.0;
/// Scale applied to a drawn signature image.
pub const SIGNATURE_IMAGE_SCALE: f32 = 0.3;
const SIGNATURE_FONT_SIZE: f32 = 12.0;
/// Characters of an unusable signature payload kept in the text fallback.
const SIGNATURE_FALLBACK_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    #[default]
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Position {
    /// Drawing origin relative to the page's media box.
    pub fn anchor(&self, media_box: &Rect) -> (f32, f32) {
        let (w, h) = (media_box.width(), media_box.height());
        let (x, y) = match self {
            Position::Center => (w / 2.0 - 75.0, h / 2.0),
            Position::TopLeft => (50.0, h - 50.0),
            Position::TopRight => (w - 150.0, h - 50.0),
            Position::BottomLeft => (50.0, 50.0),
            Position::BottomRight => (w - 150.0, 50.0),
        };
        (media_box.llx + x, media_box.lly + y)
    }
}

impl std::str::FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "center" => Ok(Position::Center),
            "top-left" => Ok(Position::TopLeft),
            "top-right" => Ok(Position::TopRight),
            "bottom-left" => Ok(Position::BottomLeft),
            "bottom-right" => Ok(Position::BottomRight),
            other => Err(format!("unknown position '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WatermarkContent {
    Text { text: String },
    /// PNG or JPEG bytes.
    Image { data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkSpec {
    pub content: WatermarkContent,
    pub position: Position,
    /// Percent, 0 (invisible) to 100 (opaque).
    pub opacity: u8,
    pub rotation_degrees: f32,
    pub font_size: f32,
    /// Fill gray level for text, 0 (black) to 1 (white).
    pub gray: f32,
}

impl Default for WatermarkSpec {
    fn default() -> Self {
        Self {
            content: WatermarkContent::Text {
                text: "CONFIDENTIAL".to_string(),
            },
            position: Position::Center,
            opacity: 50,
            rotation_degrees: 45.0,
            font_size: 24.0,
            gray: 0.5,
        }
    }
}

impl WatermarkSpec {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: WatermarkContent::Text { text: text.into() },
            ..Self::default()
        }
    }

    pub fn image(data: Vec<u8>) -> Self {
        Self {
            content: WatermarkContent::Image { data },
            ..Self::default()
        }
    }
}

/// What to draw as a signature: literal text, or a `data:image/...;base64,`
/// URL as produced by a drawing pad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureSpec {
    pub payload: String,
}

impl SignatureSpec {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.payload.starts_with("data:image")
    }
}

/// Draw the watermark on every page.
pub fn add_watermark(
    doc: &PdfDocument,
    spec: &WatermarkSpec,
    progress: &mut Progress,
) -> Result<(PdfDocument, Vec<Warning>)> {
    let mut out = doc.clone();
    let index = out.page_index()?;
    if index.is_empty() {
        return Err(ValidationError::EmptySelection.into());
    }
    let opacity = spec.opacity.min(100) as f32 / 100.0;
    let gs_id = out.inner_mut().add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => opacity,
        "CA" => opacity,
    });

    let mut warnings = Vec::new();
    let mark = match &spec.content {
        WatermarkContent::Text { text } => Mark::Text {
            font_id: helvetica(&mut out),
            text: encode_text(text, &mut warnings),
        },
        WatermarkContent::Image { data } => {
            let image = embed_image(out.inner_mut(), data).map_err(|reason| {
                ResourceError::ImageEmbedFailure { page: 1, reason }
            })?;
            Mark::Image(image)
        }
    };
    info!(pages = index.len(), position = ?spec.position, opacity = spec.opacity, "adding watermark");

    let total = index.len();
    for (done, page) in index.iter().enumerate() {
        let mut resources = page_resources(&out, page);
        let gs_name = add_resource(&mut resources, b"ExtGState", "GSwm", gs_id);
        let (x, y) = spec.position.anchor(&page.media_box);

        let operations = match &mark {
            Mark::Text { font_id, text } => {
                let font = add_resource(&mut resources, b"Font", "Fwm", *font_id);
                text_operations(TextDraw {
                    font: &font,
                    size: spec.font_size,
                    gray: spec.gray,
                    x,
                    y,
                    rotation: spec.rotation_degrees,
                    text,
                    ext_gstate: Some(&gs_name),
                })
            }
            Mark::Image(image) => {
                let name = add_resource(&mut resources, b"XObject", "Imwm", image.id);
                let height = image.height_for_width(IMAGE_WATERMARK_WIDTH);
                image_operations(
                    &name,
                    IMAGE_WATERMARK_WIDTH,
                    height,
                    x,
                    y,
                    spec.rotation_degrees,
                    Some(&gs_name),
                )
            }
        };
        append_overlay(&mut out, page, resources, operations)?;
        progress.step(Stage::Editing, marks::EDITING, marks::SERIALIZING, done + 1, total);
    }
    Ok((out, warnings))
}

/// Draw a signature on the first page, anchored bottom-right. An image
/// payload that cannot be embedded degrades to a text signature and a
/// [`Warning::ImageEmbedFailure`].
pub fn add_signature(
    doc: &PdfDocument,
    spec: &SignatureSpec,
    progress: &mut Progress,
) -> Result<(PdfDocument, Vec<Warning>)> {
    let mut out = doc.clone();
    let index = out.page_index()?;
    let page = index
        .get(1)
        .ok_or(ValidationError::EmptySelection)?
        .clone();
    let mut warnings = Vec::new();
    let mut resources = page_resources(&out, &page);
    let w = page.media_box.width();
    let (ox, oy) = (page.media_box.llx, page.media_box.lly);

    let image = if spec.is_image() {
        match decode_data_url(&spec.payload).and_then(|bytes| embed_image(out.inner_mut(), &bytes)) {
            Ok(image) => Some(image),
            Err(reason) => {
                warn!(%reason, "signature image unusable, drawing text instead");
                warnings.push(Warning::from(ResourceError::ImageEmbedFailure { page: 1, reason }));
                None
            }
        }
    } else {
        None
    };
    progress.report(Stage::Editing, 50);

    let operations = match image {
        Some(image) => {
            let width = image.width as f32 * SIGNATURE_IMAGE_SCALE;
            let height = image.height as f32 * SIGNATURE_IMAGE_SCALE;
            let name = add_resource(&mut resources, b"XObject", "Imsig", image.id);
            image_operations(&name, width, height, ox + w - width - 50.0, oy + 50.0, 0.0, None)
        }
        None => {
            let text = if spec.is_image() {
                let head: String = spec.payload.chars().take(SIGNATURE_FALLBACK_CHARS).collect();
                format!("Signature: {}...", head)
            } else {
                format!("Signature: {}", spec.payload)
            };
            let text = encode_text(&text, &mut warnings);
            let font_id = helvetica(&mut out);
            let font = add_resource(&mut resources, b"Font", "Fsig", font_id);
            text_operations(TextDraw {
                font: &font,
                size: SIGNATURE_FONT_SIZE,
                gray: 0.0,
                x: ox + w - 200.0,
                y: oy + 50.0,
                rotation: 0.0,
                text: &text,
                ext_gstate: None,
            })
        }
    };
    append_overlay(&mut out, &page, resources, operations)?;
    debug!(warnings = warnings.len(), "signature drawn");
    progress.report(Stage::Editing, marks::SERIALIZING);
    Ok((out, warnings))
}

enum Mark {
    Text { font_id: ObjectId, text: Vec<u8> },
    Image(EmbeddedImage),
}

struct TextDraw<'a> {
    font: &'a str,
    size: f32,
    gray: f32,
    x: f32,
    y: f32,
    rotation: f32,
    text: &'a [u8],
    ext_gstate: Option<&'a str>,
}

/// The document's WinAnsi Helvetica, added on first use.
fn helvetica(doc: &mut PdfDocument) -> ObjectId {
    let font = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    };
    let existing = doc
        .inner()
        .objects
        .iter()
        .find(|(_, object)| matches!(object, Object::Dictionary(dict) if *dict == font))
        .map(|(id, _)| *id);
    existing.unwrap_or_else(|| doc.inner_mut().add_object(font))
}

/// Effective resources of `page` as a direct dictionary with direct
/// sub-dictionaries, ready to receive new entries.
pub(crate) fn page_resources(doc: &PdfDocument, page: &PageEntry) -> Dictionary {
    let mut resources = match page.inherited.get(b"Resources").ok().and_then(|r| doc.resolve(r)) {
        Some(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };
    for key in [b"Font".as_slice(), b"XObject", b"ExtGState"] {
        let resolved = match resources.get(key).ok().and_then(|v| doc.resolve(v)) {
            Some(Object::Dictionary(dict)) => Some(dict.clone()),
            _ => None,
        };
        if let Some(dict) = resolved {
            resources.set(key.to_vec(), Object::Dictionary(dict));
        }
    }
    resources
}

/// Register `id` under a name not yet used in `resources[category]`.
pub(crate) fn add_resource(resources: &mut Dictionary, category: &[u8], base: &str, id: ObjectId) -> String {
    let mut sub = match resources.get(category) {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };
    let mut name = base.to_string();
    let mut n = 1;
    while sub.has(name.as_bytes()) {
        n += 1;
        name = format!("{}{}", base, n);
    }
    sub.set(name.clone(), Object::Reference(id));
    resources.set(category.to_vec(), Object::Dictionary(sub));
    name
}

fn rotation_matrix(degrees: f32) -> (f32, f32) {
    let radians = degrees.to_radians();
    (radians.cos(), radians.sin())
}

fn text_operations(draw: TextDraw<'_>) -> Vec<Operation> {
    let (cos, sin) = rotation_matrix(draw.rotation);
    let mut ops = vec![Operation::new("q", vec![])];
    if let Some(gs) = draw.ext_gstate {
        ops.push(Operation::new("gs", vec![Object::Name(gs.as_bytes().to_vec())]));
    }
    ops.extend([
        Operation::new("g", vec![draw.gray.clamp(0.0, 1.0).into()]),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(draw.font.as_bytes().to_vec()), draw.size.into()],
        ),
        Operation::new(
            "Tm",
            vec![cos.into(), sin.into(), (-sin).into(), cos.into(), draw.x.into(), draw.y.into()],
        ),
        Operation::new(
            "Tj",
            vec![Object::String(draw.text.to_vec(), StringFormat::Literal)],
        ),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]);
    ops
}

fn image_operations(
    name: &str,
    width: f32,
    height: f32,
    x: f32,
    y: f32,
    rotation: f32,
    ext_gstate: Option<&str>,
) -> Vec<Operation> {
    let (cos, sin) = rotation_matrix(rotation);
    let mut ops = vec![Operation::new("q", vec![])];
    if let Some(gs) = ext_gstate {
        ops.push(Operation::new("gs", vec![Object::Name(gs.as_bytes().to_vec())]));
    }
    ops.extend([
        Operation::new(
            "cm",
            vec![
                (width * cos).into(),
                (width * sin).into(),
                (-height * sin).into(),
                (height * cos).into(),
                x.into(),
                y.into(),
            ],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]);
    ops
}

/// WinAnsiEncoding code for `c`, if the standard fonts can show it.
fn win_ansi(c: char) -> Option<u8> {
    let code = match c as u32 {
        0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
        0x20AC => 0x80,
        0x201A => 0x82,
        0x0192 => 0x83,
        0x201E => 0x84,
        0x2026 => 0x85,
        0x2020 => 0x86,
        0x2021 => 0x87,
        0x02C6 => 0x88,
        0x2030 => 0x89,
        0x0160 => 0x8A,
        0x2039 => 0x8B,
        0x0152 => 0x8C,
        0x017D => 0x8E,
        0x2018 => 0x91,
        0x2019 => 0x92,
        0x201C => 0x93,
        0x201D => 0x94,
        0x2022 => 0x95,
        0x2013 => 0x96,
        0x2014 => 0x97,
        0x02DC => 0x98,
        0x2122 => 0x99,
        0x0161 => 0x9A,
        0x203A => 0x9B,
        0x0153 => 0x9C,
        0x017E => 0x9E,
        0x0178 => 0x9F,
        _ => return None,
    };
    Some(code)
}

/// Encode `text` for a standard font. Characters without a WinAnsi code are
/// drawn as `?` and reported once per string.
fn encode_text(text: &str, warnings: &mut Vec<Warning>) -> Vec<u8> {
    let mut replaced = 0;
    let encoded = text
        .chars()
        .map(|c| {
            win_ansi(c).unwrap_or_else(|| {
                replaced += 1;
                b'?'
            })
        })
        .collect();
    if replaced > 0 {
        warn!(replaced, "text has characters the standard fonts cannot show");
        warnings.push(Warning::TextSubstituted {
            text: text.to_string(),
            replaced,
        });
    }
    encoded
}

/// Wrap the page's content in `q ... Q`, then draw `operations` on top.
pub(crate) fn append_overlay(
    doc: &mut PdfDocument,
    page: &PageEntry,
    resources: Dictionary,
    operations: Vec<Operation>,
) -> Result<()> {
    let mut tail = Content {
        operations: vec![Operation::new("Q", vec![])],
    };
    tail.operations.extend(operations);
    let tail_bytes = tail
        .encode()
        .map_err(|e| SerializationError::unwritable(format!("overlay content: {}", e)))?;

    let inner = doc.inner_mut();
    let open_id = inner.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let tail_id = inner.add_object(Stream::new(Dictionary::new(), tail_bytes));

    let mut contents = vec![Object::Reference(open_id)];
    contents.extend(page.content_ids.iter().map(|id| Object::Reference(*id)));
    contents.push(Object::Reference(tail_id));

    let dict = inner
        .get_object_mut(page.id)
        .and_then(Object::as_dict_mut)
        .map_err(|_| ParseError::malformed(format!("page {} is not a dictionary", page.number)))?;
    dict.set("Contents", Object::Array(contents));
    dict.set("Resources", Object::Dictionary(resources));
    Ok(())
}
