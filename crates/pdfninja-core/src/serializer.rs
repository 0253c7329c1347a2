//! [`PdfDocument`] to bytes
//!
//! Always a complete rewrite. Object numbers are kept as they are in the
//! pool, so references survive a parse/serialize round trip unchanged; gaps
//! in the numbering become free xref entries.
//!
//! Layout with object streams enabled:
//! ```text
//! %PDF-x.y
//! stream objects and generation != 0 objects, written directly
//! /ObjStm containers holding every other object (at most 100 each)
//! /XRef stream (/W [1 4 2]) carrying /Root, /Info and /ID
//! startxref
//! ```

use std::collections::BTreeMap;

use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::PdfDocument;
use crate::error::{Result, SerializationError};
use crate::images::flate;
use crate::progress::{marks, Progress, Stage};

/// Objects per `/ObjStm` container.
pub const OBJECTS_PER_STREAM: usize = 100;
/// Oldest version that can carry object and xref streams.
const OBJECT_STREAM_VERSION: &str = "1.5";
/// Trailer keys carried into the output. Everything else (`/Prev`,
/// `/XRefStm`, `/Encrypt`, ...) describes the source file's layout.
const TRAILER_KEYS: [&[u8]; 3] = [b"Root", b"Info", b"ID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializeOptions {
    /// Pack non-stream objects into object streams and write an xref stream.
    pub object_streams: bool,
    /// Flate-compress streams that carry no filter yet.
    pub compress_streams: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            object_streams: true,
            compress_streams: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum XrefEntry {
    Direct { offset: usize, generation: u16 },
    Packed { container: u32, index: usize },
}

pub fn serialize(
    doc: &PdfDocument,
    options: &SerializeOptions,
    progress: &mut Progress,
) -> Result<Vec<u8>> {
    let inner = doc.inner();
    let version = if options.object_streams && inner.version.as_str() < OBJECT_STREAM_VERSION {
        OBJECT_STREAM_VERSION
    } else {
        inner.version.as_str()
    };

    let mut out = Vec::with_capacity(4096);
    out.extend_from_slice(format!("%PDF-{}\n", version).as_bytes());
    out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    let live: Vec<(&ObjectId, &Object)> = inner
        .objects
        .iter()
        .filter(|(_, object)| !is_stale_container(object))
        .collect();
    let (direct, packed): (Vec<_>, Vec<_>) = live.into_iter().partition(|(id, object)| {
        !options.object_streams || id.1 != 0 || matches!(object, Object::Stream(_))
    });

    let mut xref: BTreeMap<u32, XrefEntry> = BTreeMap::new();
    let total = direct.len() + packed.len().div_ceil(OBJECTS_PER_STREAM);
    let mut done = 0;

    for (id, object) in &direct {
        let offset = out.len();
        write_indirect(&mut out, **id, object, options)?;
        xref.insert(
            id.0,
            XrefEntry::Direct {
                offset,
                generation: id.1,
            },
        );
        done += 1;
        progress.step(Stage::Serializing, marks::SERIALIZING, marks::SERIALIZED, done, total);
    }

    let mut next_number = inner
        .objects
        .keys()
        .map(|id| id.0)
        .max()
        .unwrap_or(0)
        .max(inner.max_id)
        + 1;

    for chunk in packed.chunks(OBJECTS_PER_STREAM) {
        let container = next_number;
        next_number += 1;
        let stream = object_stream(chunk)?;
        let offset = out.len();
        write_indirect(&mut out, (container, 0), &Object::Stream(stream), options)?;
        xref.insert(container, XrefEntry::Direct { offset, generation: 0 });
        for (index, (id, _)) in chunk.iter().enumerate() {
            xref.insert(id.0, XrefEntry::Packed { container, index });
        }
        done += 1;
        progress.step(Stage::Serializing, marks::SERIALIZING, marks::SERIALIZED, done, total);
    }

    let trailer = trailer_dictionary(&inner.trailer);
    if options.object_streams {
        let xref_number = next_number;
        let xref_offset = out.len();
        xref.insert(
            xref_number,
            XrefEntry::Direct {
                offset: xref_offset,
                generation: 0,
            },
        );
        let stream = xref_stream(&xref, trailer)?;
        write_indirect(&mut out, (xref_number, 0), &Object::Stream(stream), options)?;
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    } else {
        let xref_offset = out.len();
        write_xref_table(&mut out, &xref, trailer)?;
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    }

    debug!(
        bytes = out.len(),
        objects = xref.len(),
        object_streams = options.object_streams,
        "serialized document"
    );
    Ok(out)
}

/// Object streams and xref streams left over from the source file. Their
/// contents are already in the pool as ordinary objects.
fn is_stale_container(object: &Object) -> bool {
    match object {
        Object::Stream(stream) => stream
            .dict
            .get(b"Type")
            .and_then(Object::as_name)
            .map(|name| name == b"ObjStm" || name == b"XRef")
            .unwrap_or(false),
        _ => false,
    }
}

fn trailer_dictionary(source: &Dictionary) -> Dictionary {
    let mut trailer = Dictionary::new();
    for key in TRAILER_KEYS {
        if let Ok(value) = source.get(key) {
            trailer.set(key.to_vec(), value.clone());
        }
    }
    trailer
}

fn write_indirect(
    out: &mut Vec<u8>,
    id: ObjectId,
    object: &Object,
    options: &SerializeOptions,
) -> Result<()> {
    out.extend_from_slice(format!("{} {} obj\n", id.0, id.1).as_bytes());
    match object {
        Object::Stream(stream) => write_stream(out, stream, options).map_err(|reason| {
            SerializationError::Unwritable {
                object: Some(id),
                reason,
            }
        })?,
        other => write_object(out, other),
    }
    out.extend_from_slice(b"\nendobj\n");
    Ok(())
}

fn write_stream(
    out: &mut Vec<u8>,
    stream: &Stream,
    options: &SerializeOptions,
) -> std::result::Result<(), String> {
    let mut dict = stream.dict.clone();
    let compress = options.compress_streams
        && stream.allows_compression
        && !dict.has(b"Filter")
        && !stream.content.is_empty();
    let content = if compress {
        let compressed = flate(&stream.content)?;
        if compressed.len() < stream.content.len() {
            dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
            compressed
        } else {
            stream.content.clone()
        }
    } else {
        stream.content.clone()
    };
    dict.set("Length", Object::Integer(content.len() as i64));
    write_dictionary(out, &dict);
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(&content);
    out.extend_from_slice(b"\nendstream");
    Ok(())
}

fn object_stream(chunk: &[(&ObjectId, &Object)]) -> Result<Stream> {
    let mut header = Vec::new();
    let mut body = Vec::new();
    for (id, object) in chunk {
        header.extend_from_slice(format!("{} {} ", id.0, body.len()).as_bytes());
        write_object(&mut body, object);
        body.push(b'\n');
    }
    let first = header.len();
    header.extend_from_slice(&body);
    let compressed = flate(&header).map_err(SerializationError::unwritable)?;

    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"ObjStm".to_vec()));
    dict.set("N", Object::Integer(chunk.len() as i64));
    dict.set("First", Object::Integer(first as i64));
    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    let mut stream = Stream::new(dict, compressed);
    stream.allows_compression = false;
    Ok(stream)
}

fn xref_stream(xref: &BTreeMap<u32, XrefEntry>, mut trailer: Dictionary) -> Result<Stream> {
    let size = xref.keys().next_back().map(|n| n + 1).unwrap_or(1);
    let mut rows = Vec::with_capacity(size as usize * 7);
    for number in 0..size {
        match xref.get(&number) {
            Some(XrefEntry::Direct { offset, generation }) => {
                let offset = u32::try_from(*offset).map_err(|_| SerializationError::Unwritable {
                    object: Some((number, *generation)),
                    reason: "offset does not fit a 4-byte xref field".to_string(),
                })?;
                rows.push(1);
                rows.extend_from_slice(&offset.to_be_bytes());
                rows.extend_from_slice(&generation.to_be_bytes());
            }
            Some(XrefEntry::Packed { container, index }) => {
                rows.push(2);
                rows.extend_from_slice(&container.to_be_bytes());
                rows.extend_from_slice(&(*index as u16).to_be_bytes());
            }
            None => {
                let generation: u16 = if number == 0 { 65535 } else { 0 };
                rows.push(0);
                rows.extend_from_slice(&0u32.to_be_bytes());
                rows.extend_from_slice(&generation.to_be_bytes());
            }
        }
    }
    let compressed = flate(&rows).map_err(SerializationError::unwritable)?;

    trailer.set("Type", Object::Name(b"XRef".to_vec()));
    trailer.set("Size", Object::Integer(size as i64));
    trailer.set(
        "W",
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(4),
            Object::Integer(2),
        ]),
    );
    trailer.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    let mut stream = Stream::new(trailer, compressed);
    stream.allows_compression = false;
    Ok(stream)
}

fn write_xref_table(
    out: &mut Vec<u8>,
    xref: &BTreeMap<u32, XrefEntry>,
    mut trailer: Dictionary,
) -> Result<()> {
    let size = xref.keys().next_back().map(|n| n + 1).unwrap_or(1);
    out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
    for number in 0..size {
        let line = match xref.get(&number) {
            Some(XrefEntry::Direct { offset, generation }) => {
                format!("{:010} {:05} n \n", offset, generation)
            }
            Some(XrefEntry::Packed { .. }) => {
                return Err(SerializationError::Unwritable {
                    object: Some((number, 0)),
                    reason: "packed object in a classic xref table".to_string(),
                }
                .into())
            }
            None if number == 0 => "0000000000 65535 f \n".to_string(),
            None => "0000000000 00000 f \n".to_string(),
        };
        out.extend_from_slice(line.as_bytes());
    }
    trailer.set("Size", Object::Integer(size as i64));
    out.extend_from_slice(b"trailer\n");
    write_dictionary(out, &trailer);
    out.push(b'\n');
    Ok(())
}

/// Write a direct object in PDF syntax. Streams write their dictionary and
/// content as-is.
pub fn write_object(out: &mut Vec<u8>, object: &Object) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Object::Real(r) => out.extend_from_slice(format_real(*r).as_bytes()),
        Object::Name(name) => write_name(out, name),
        Object::String(bytes, StringFormat::Literal) => write_literal_string(out, bytes),
        Object::String(bytes, StringFormat::Hexadecimal) => {
            out.push(b'<');
            for b in bytes {
                out.extend_from_slice(format!("{:02X}", b).as_bytes());
            }
            out.push(b'>');
        }
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item);
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(out, dict),
        Object::Stream(stream) => {
            write_dictionary(out, &stream.dict);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&stream.content);
            out.extend_from_slice(b"\nendstream");
        }
        Object::Reference(id) => out.extend_from_slice(format!("{} {} R", id.0, id.1).as_bytes()),
    }
}

fn write_dictionary(out: &mut Vec<u8>, dict: &Dictionary) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        write_name(out, key);
        out.push(b' ');
        write_object(out, value);
    }
    out.extend_from_slice(b">>");
}

fn write_name(out: &mut Vec<u8>, name: &[u8]) {
    out.push(b'/');
    for &b in name {
        if b <= b' ' || b > b'~' || b"#()<>[]{}/%".contains(&b) {
            out.extend_from_slice(format!("#{:02X}", b).as_bytes());
        } else {
            out.push(b);
        }
    }
}

fn write_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &b in bytes {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'(' => out.extend_from_slice(b"\\("),
            b')' => out.extend_from_slice(b"\\)"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            other => out.push(other),
        }
    }
    out.push(b')');
}

/// Plain decimal notation. PDF has no exponent syntax.
fn format_real(r: f32) -> String {
    if !r.is_finite() {
        return "0".to_string();
    }
    let text = format!("{}", r);
    if text == "-0" {
        "0".to_string()
    } else {
        text
    }
}
