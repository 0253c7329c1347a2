//! Command layer: one request in, one typed result out
//!
//! [`execute`] runs a [`PdfCommand`] through parse, edit or optimize, and
//! serialize, reporting progress for each stage and closing the run with
//! `(Complete, 100)` or `(Error, last)`.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::document::PdfDocument;
use crate::editor::{self, extracted_file_name, ExtractMode, Extracted};
use crate::error::{Result, ValidationError, Warning};
use crate::optimize::{optimize, CompressionProfile};
use crate::overlay::{add_signature, add_watermark, SignatureSpec, WatermarkSpec};
use crate::parser::parse;
use crate::progress::{marks, Progress, Stage};
use crate::ranges::{every_nth, parse_range, PageSelection};
use crate::security::{label_protected, make_read_only, unlock};
use crate::serializer::{serialize, SerializeOptions};

/// Largest input accepted by default: 100 MiB.
pub const DEFAULT_MAX_INPUT_BYTES: usize = 100 * 1024 * 1024;

/// A file handed to or produced by a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedFile {
    pub name: String,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
}

impl NamedFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// File name without a trailing `.pdf`, used to derive output names.
    pub fn stem(&self) -> &str {
        let name = self.name.as_str();
        match name.len().checked_sub(4) {
            Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".pdf") => {
                &name[..cut]
            }
            _ => name,
        }
    }
}

/// Which pages a command applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionSpec {
    /// Range text such as `"1-3, 5"`; resolved in ascending order.
    Range(String),
    /// Explicit page numbers; their order is kept.
    Pages(Vec<u32>),
    EveryNth { every_nth: u32 },
}

impl SelectionSpec {
    pub fn resolve(&self, total: u32) -> PageSelection {
        match self {
            SelectionSpec::Range(text) => parse_range(text, total),
            SelectionSpec::Pages(pages) => PageSelection::ordered(pages.iter().copied()),
            SelectionSpec::EveryNth { every_nth: n } => every_nth(*n, total),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PdfCommand {
    Compress {
        file: NamedFile,
        #[serde(default)]
        profile: CompressionProfile,
    },
    Extract {
        file: NamedFile,
        selection: SelectionSpec,
        #[serde(default)]
        mode: ExtractMode,
    },
    Delete {
        file: NamedFile,
        selection: SelectionSpec,
    },
    Merge {
        files: Vec<NamedFile>,
    },
    Watermark {
        file: NamedFile,
        #[serde(default)]
        watermark: WatermarkSpec,
    },
    Sign {
        file: NamedFile,
        signature: SignatureSpec,
    },
    LabelProtected {
        file: NamedFile,
        label: String,
    },
    Unlock {
        file: NamedFile,
        #[serde(default)]
        password: String,
    },
    MakeReadOnly {
        file: NamedFile,
    },
    PageCount {
        file: NamedFile,
    },
}

impl PdfCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PdfCommand::Compress { .. } => "compress",
            PdfCommand::Extract { .. } => "extract",
            PdfCommand::Delete { .. } => "delete",
            PdfCommand::Merge { .. } => "merge",
            PdfCommand::Watermark { .. } => "watermark",
            PdfCommand::Sign { .. } => "sign",
            PdfCommand::LabelProtected { .. } => "label",
            PdfCommand::Unlock { .. } => "unlock",
            PdfCommand::MakeReadOnly { .. } => "read-only",
            PdfCommand::PageCount { .. } => "page-count",
        }
    }

    fn inputs(&self) -> Vec<&NamedFile> {
        match self {
            PdfCommand::Merge { files } => files.iter().collect(),
            PdfCommand::Compress { file, .. }
            | PdfCommand::Extract { file, .. }
            | PdfCommand::Delete { file, .. }
            | PdfCommand::Watermark { file, .. }
            | PdfCommand::Sign { file, .. }
            | PdfCommand::LabelProtected { file, .. }
            | PdfCommand::Unlock { file, .. }
            | PdfCommand::MakeReadOnly { file }
            | PdfCommand::PageCount { file } => vec![file],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Per-file input size limit.
    pub max_input_bytes: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
        }
    }
}

impl EngineLimits {
    pub fn check(&self, file: &NamedFile) -> Result<()> {
        if file.data.len() > self.max_input_bytes {
            return Err(ValidationError::InputTooLarge {
                size: file.data.len(),
                limit: self.max_input_bytes,
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Output {
    Single(NamedFile),
    Files(Vec<NamedFile>),
    PageCount(u32),
}

impl Output {
    pub fn files(&self) -> Vec<&NamedFile> {
        match self {
            Output::Single(file) => vec![file],
            Output::Files(files) => files.iter().collect(),
            Output::PageCount(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub output: Output,
    pub metrics: ProcessMetrics,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
    /// Percent of the input size saved, rounded. Negative when the output grew.
    pub compression_ratio: i32,
}

/// Saved percentage between two sizes, rounded to the nearest integer.
pub fn compression_ratio(input: usize, output: usize) -> i32 {
    if input == 0 {
        return 0;
    }
    ((1.0 - output as f64 / input as f64) * 100.0).round() as i32
}

pub fn execute(
    command: PdfCommand,
    limits: &EngineLimits,
    progress: &mut Progress,
) -> Result<ProcessResult> {
    execute_with(command, limits, &SerializeOptions::default(), progress)
}

pub fn execute_with(
    command: PdfCommand,
    limits: &EngineLimits,
    options: &SerializeOptions,
    progress: &mut Progress,
) -> Result<ProcessResult> {
    let span = info_span!("command", name = command.name());
    let _enter = span.enter();
    let result = run(command, limits, options, progress);
    progress.finish(result)
}

/// Documents produced by the edit stage, before serialization.
enum Edited {
    One(String, PdfDocument),
    Many(Vec<(String, PdfDocument)>),
    Count(u32),
}

fn run(
    command: PdfCommand,
    limits: &EngineLimits,
    options: &SerializeOptions,
    progress: &mut Progress,
) -> Result<ProcessResult> {
    let started = Instant::now();
    progress.report(Stage::Queued, 0);
    let inputs = command.inputs();
    for file in &inputs {
        limits.check(file)?;
    }
    let input_size_bytes: usize = inputs.iter().map(|f| f.data.len()).sum();
    let mut warnings = Vec::new();

    let edited = match &command {
        PdfCommand::Merge { files } => {
            if files.is_empty() {
                return Err(ValidationError::NoInputFiles.into());
            }
            let mut docs = Vec::with_capacity(files.len());
            for (done, file) in files.iter().enumerate() {
                docs.push(parse(&file.data)?);
                progress.step(Stage::Parsing, marks::PARSING, marks::EDITING, done + 1, files.len());
            }
            let merged = editor::merge(&docs, progress)?;
            Edited::One(format!("{}_merged.pdf", files[0].stem()), merged)
        }
        PdfCommand::Unlock { file, password } => {
            progress.report(Stage::Parsing, marks::PARSING);
            let doc = unlock(&file.data, password)?;
            Edited::One(format!("{}_unlocked.pdf", file.stem()), doc)
        }
        PdfCommand::Compress { file, profile } => {
            let doc = parse_stage(file, progress)?;
            let (out, report) = optimize(&doc, *profile, progress)?;
            warnings.extend(report.warnings);
            Edited::One(format!("{}_compressed.pdf", file.stem()), out)
        }
        PdfCommand::Extract {
            file,
            selection,
            mode,
        } => {
            let doc = parse_stage(file, progress)?;
            let selection = selection.resolve(doc.page_count()?);
            match editor::extract(&doc, &selection, *mode, progress)? {
                Extracted::Single(out) => {
                    Edited::One(extracted_file_name(file.stem(), None), out)
                }
                Extracted::Separate(outs) => Edited::Many(
                    outs.into_iter()
                        .map(|(n, out)| (extracted_file_name(file.stem(), Some(n)), out))
                        .collect(),
                ),
            }
        }
        PdfCommand::Delete { file, selection } => {
            let doc = parse_stage(file, progress)?;
            let selection = selection.resolve(doc.page_count()?);
            let out = editor::delete_pages(&doc, &selection, progress)?;
            Edited::One(format!("{}_edited.pdf", file.stem()), out)
        }
        PdfCommand::Watermark { file, watermark } => {
            let doc = parse_stage(file, progress)?;
            let (out, marked_warnings) = add_watermark(&doc, watermark, progress)?;
            warnings.extend(marked_warnings);
            Edited::One(format!("{}_watermarked.pdf", file.stem()), out)
        }
        PdfCommand::Sign { file, signature } => {
            let doc = parse_stage(file, progress)?;
            let (out, signed_warnings) = add_signature(&doc, signature, progress)?;
            warnings.extend(signed_warnings);
            Edited::One(format!("{}_signed.pdf", file.stem()), out)
        }
        PdfCommand::LabelProtected { file, label } => {
            let doc = parse_stage(file, progress)?;
            Edited::One(
                format!("{}_labelled.pdf", file.stem()),
                label_protected(&doc, label)?,
            )
        }
        PdfCommand::MakeReadOnly { file } => {
            let doc = parse_stage(file, progress)?;
            let (out, flatten_warnings) = make_read_only(&doc, progress)?;
            warnings.extend(flatten_warnings);
            Edited::One(format!("{}_readonly.pdf", file.stem()), out)
        }
        PdfCommand::PageCount { file } => {
            let doc = parse_stage(file, progress)?;
            Edited::Count(doc.page_count()?)
        }
    };

    progress.report(Stage::Serializing, marks::SERIALIZING);
    let (output, page_count) = match edited {
        Edited::One(name, doc) => {
            let pages = doc.page_count()?;
            let bytes = serialize(&doc, options, progress)?;
            (Output::Single(NamedFile::new(name, bytes)), pages)
        }
        Edited::Many(docs) => {
            let mut files = Vec::with_capacity(docs.len());
            let mut pages = 0;
            for (name, doc) in docs {
                pages += doc.page_count()?;
                files.push(NamedFile::new(name, serialize(&doc, options, progress)?));
            }
            (Output::Files(files), pages)
        }
        Edited::Count(n) => (Output::PageCount(n), n),
    };

    let output_size_bytes: usize = output.files().iter().map(|f| f.data.len()).sum();
    let metrics = ProcessMetrics {
        input_size_bytes,
        output_size_bytes,
        page_count,
        processing_time_ms: started.elapsed().as_millis() as u64,
        compression_ratio: compression_ratio(input_size_bytes, output_size_bytes),
    };
    info!(
        input = metrics.input_size_bytes,
        output = metrics.output_size_bytes,
        pages = metrics.page_count,
        ms = metrics.processing_time_ms,
        warnings = warnings.len(),
        "command finished"
    );
    Ok(ProcessResult {
        output,
        metrics,
        warnings,
    })
}

fn parse_stage(file: &NamedFile, progress: &mut Progress) -> Result<PdfDocument> {
    progress.report(Stage::Parsing, marks::PARSING);
    let doc = parse(&file.data)?;
    progress.report(Stage::Editing, marks::EDITING);
    Ok(doc)
}
