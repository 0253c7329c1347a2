//! Synthetic documents shared by the integration tests.

#![allow(dead_code)]

use lopdf::{content::Content, content::Operation, Dictionary, Document, Object, ObjectId, Stream};
use pdfninja_core::page_index::page_content;
use pdfninja_core::images::flate;
use pdfninja_core::{parse, PdfDocument};

pub fn page_label(prefix: &str, n: u32) -> String {
    format!("{} Page {}", prefix, n)
}

fn page_stream(prefix: &str, n: u32) -> Stream {
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
            Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
            Operation::new("Tj", vec![Object::string_literal(page_label(prefix, n))]),
            Operation::new("ET", vec![]),
        ],
    };
    Stream::new(Dictionary::new(), content.encode().unwrap())
}

/// Builds a document page by page. `extra` may add objects and return
/// entries to set on each page dictionary.
fn build_with(
    num_pages: u32,
    prefix: &str,
    mut extra: impl FnMut(&mut Document, u32) -> Vec<(&'static str, Object)>,
) -> Document {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
    ]));

    let mut kids = Vec::new();
    for n in 1..=num_pages {
        let content_id = doc.add_object(page_stream(prefix, n));
        let mut page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
        ]);
        let mut fonts = Dictionary::new();
        fonts.set("F1", Object::Reference(font_id));
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(fonts));
        for (key, value) in extra(&mut doc, n) {
            if key == "XObject" {
                resources.set("XObject", value);
            } else {
                page.set(key, value);
            }
        }
        page.set("Resources", Object::Dictionary(resources));
        kids.push(Object::Reference(doc.add_object(page)));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(num_pages as i64)),
            ("Kids", Object::Array(kids)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    let info_id = doc.add_object(Dictionary::from_iter(vec![
        ("Title", Object::string_literal(format!("{} document", prefix))),
        ("Author", Object::string_literal("Integration Suite")),
        ("Creator", Object::string_literal("pdfninja tests")),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.trailer.set("Info", Object::Reference(info_id));
    doc
}

fn save(mut doc: Document) -> Vec<u8> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Plain text pages, saved with lopdf's classic writer.
pub fn create_synthetic_pdf(num_pages: u32, prefix: &str) -> Vec<u8> {
    save(build_with(num_pages, prefix, |_, _| Vec::new()))
}

/// Deterministic RGB noise. Flate cannot shrink it much, JPEG can.
pub fn noisy_pixels(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9E37_79B9;
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (state >> 24) as u8;
            pixels.push((x as u8).wrapping_add(noise / 4));
            pixels.push((y as u8).wrapping_add(noise / 3));
            pixels.push(noise);
        }
    }
    pixels
}

fn raw_image(width: u32, height: u32) -> Stream {
    Stream::new(
        Dictionary::from_iter(vec![
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(width as i64)),
            ("Height", Object::Integer(height as i64)),
            ("ColorSpace", Object::Name(b"DeviceRGB".to_vec())),
            ("BitsPerComponent", Object::Integer(8)),
        ]),
        noisy_pixels(width, height),
    )
}

/// The same noise stored the way most producers write images.
pub fn flate_image(width: u32, height: u32) -> Stream {
    let mut stream = raw_image(width, height);
    stream.content = flate(&stream.content).unwrap();
    stream.dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    stream.allows_compression = false;
    stream
}

/// Pages carrying sticky-note annotations, a shared unfiltered photo and a
/// shared Flate-compressed one: the kind of file every compression tier has
/// something to remove from.
pub fn create_heavy_pdf(num_pages: u32, prefix: &str) -> Vec<u8> {
    let mut images: Option<(ObjectId, ObjectId)> = None;
    let doc = build_with(num_pages, prefix, |doc, n| {
        let (raw_id, flate_id) = *images.get_or_insert_with(|| {
            (
                doc.add_object(raw_image(160, 160)),
                doc.add_object(flate_image(300, 300)),
            )
        });
        let notes: Vec<Object> = (0..12)
            .map(|i| {
                let note = Dictionary::from_iter(vec![
                    ("Type", Object::Name(b"Annot".to_vec())),
                    ("Subtype", Object::Name(b"Text".to_vec())),
                    (
                        "Rect",
                        Object::Array(vec![
                            Object::Integer(20 * i),
                            Object::Integer(20),
                            Object::Integer(20 * i + 18),
                            Object::Integer(38),
                        ]),
                    ),
                    (
                        "Contents",
                        Object::string_literal(format!(
                            "Reviewer note {} on page {}: please double check the figures quoted in this paragraph against the appendix.",
                            i, n
                        )),
                    ),
                ]);
                Object::Reference(doc.add_object(note))
            })
            .collect();
        let mut xobjects = Dictionary::new();
        xobjects.set("Im1", Object::Reference(raw_id));
        xobjects.set("Im2", Object::Reference(flate_id));
        vec![
            ("Annots", Object::Array(notes)),
            ("XObject", Object::Dictionary(xobjects)),
        ]
    });
    save(doc)
}

fn rect(values: [i64; 4]) -> Object {
    Object::Array(values.iter().map(|v| Object::Integer(*v)).collect())
}

/// Page size, crop, rotation and fonts live on the `/Pages` node only, and
/// every page's `/Contents` is a reference to an array of two streams.
pub fn create_inherited_pdf(num_pages: u32, prefix: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.6");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Courier".to_vec())),
    ]));

    let mut kids = Vec::new();
    for n in 1..=num_pages {
        let setup_id = doc.add_object(Stream::new(Dictionary::new(), b"0 g".to_vec()));
        let label_id = doc.add_object(page_stream(prefix, n));
        let array_id = doc.add_object(Object::Array(vec![
            Object::Reference(setup_id),
            Object::Reference(label_id),
        ]));
        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(array_id)),
        ]);
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let mut fonts = Dictionary::new();
    fonts.set("F1", Object::Reference(font_id));
    let mut resources = Dictionary::new();
    resources.set("Font", Object::Dictionary(fonts));
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(num_pages as i64)),
            ("Kids", Object::Array(kids)),
            ("MediaBox", rect([0, 0, 595, 842])),
            ("CropBox", rect([20, 20, 575, 822])),
            ("Rotate", Object::Integer(90)),
            ("Resources", Object::Dictionary(resources)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));
    save(doc)
}

/// Decoded content of every page, in page order.
pub fn page_contents(doc: &PdfDocument) -> Vec<Vec<u8>> {
    let index = doc.page_index().unwrap();
    index.iter().map(|p| page_content(doc, p).unwrap()).collect()
}

pub fn contents_of(bytes: &[u8]) -> Vec<Vec<u8>> {
    page_contents(&parse(bytes).unwrap())
}

pub fn shows_label(content: &[u8], prefix: &str, n: u32) -> bool {
    let needle = format!("({}) Tj", page_label(prefix, n));
    String::from_utf8_lossy(content).contains(&needle)
}
