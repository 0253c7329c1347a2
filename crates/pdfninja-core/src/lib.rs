//! PDF editing engine
//!
//! Parses PDF bytes into an object graph, edits it (page extraction,
//! deletion, merging, watermarks, signatures, form flattening), optimizes it
//! for size and writes it back out as a complete, standalone file.
//!
//! Each operation takes its own [`PdfDocument`] and reports progress through
//! a [`Progress`] callback. Nothing is shared between calls.
//!
//! Most callers go through [`execute`]:
//!
//! ```no_run
//! use pdfninja_core::{execute, EngineLimits, NamedFile, PdfCommand, Progress, SelectionSpec};
//!
//! let bytes = std::fs::read("report.pdf").unwrap();
//! let command = PdfCommand::Delete {
//!     file: NamedFile::new("report.pdf", bytes),
//!     selection: SelectionSpec::Range("2, 4-5".into()),
//! };
//! let result = execute(command, &EngineLimits::default(), &mut Progress::silent()).unwrap();
//! ```

pub mod command;
pub mod convert;
pub mod copy;
pub mod document;
pub mod editor;
pub mod error;
pub mod images;
pub mod optimize;
pub mod overlay;
pub mod page_index;
pub mod parser;
pub mod progress;
pub mod ranges;
pub mod security;
pub mod serializer;

pub use command::{
    execute, execute_with, EngineLimits, NamedFile, Output, PdfCommand, ProcessMetrics,
    ProcessResult, SelectionSpec,
};
pub use convert::{convert, ConversionRequest, ConversionService, JobStatus, Poller};
pub use document::{DocumentMetadata, PdfDocument};
pub use editor::{delete_pages, extract, merge, ExtractMode, Extracted};
pub use error::{
    ConversionError, ParseError, PdfNinjaError, ResourceError, Result, SerializationError,
    ValidationError, Warning,
};
pub use optimize::{optimize, optimize_with, CompressionProfile, OptimizeReport, ProfileSettings};
pub use overlay::{add_signature, add_watermark, Position, SignatureSpec, WatermarkContent, WatermarkSpec};
pub use page_index::{PageEntry, PageIndex, Rect};
pub use parser::{parse, parse_with_password};
pub use progress::{Progress, ProgressEvent, Stage};
pub use ranges::{all_pages, even_pages, every_nth, odd_pages, parse_range, PageSelection};
pub use security::{label_protected, make_read_only, unlock};
pub use serializer::{serialize, SerializeOptions};

/// Parse PDF bytes and return the page count.
pub fn page_count(bytes: &[u8]) -> Result<u32> {
    parse(bytes)?.page_count()
}

/// Parse PDF bytes and summarize the document.
pub fn inspect(bytes: &[u8]) -> Result<DocumentMetadata> {
    parse(bytes)?.metadata()
}
