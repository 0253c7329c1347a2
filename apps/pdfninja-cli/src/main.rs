//! pdfninja command-line interface
//!
//! Thin wrapper over `pdfninja_core::execute`: reads input files, runs one
//! command, writes the outputs and prints a report.

mod config;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pdfninja_core::{
    execute_with, inspect, CompressionProfile, ExtractMode, NamedFile, Output, PdfCommand,
    Position, ProcessResult, Progress, SelectionSpec, SignatureSpec, Stage, WatermarkContent,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "pdfninja")]
#[command(version, about = "Edit, merge, split and compress PDF files")]
struct Args {
    /// Config file (defaults to ./pdfninja.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print a JSON report on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Do not print progress on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show page count and metadata
    Info { input: PathBuf },
    /// Reduce file size
    Compress {
        input: PathBuf,
        /// light, medium or heavy
        #[arg(short, long)]
        profile: Option<CompressionProfile>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Copy pages into a new file, or one file per page with --separate
    Extract {
        input: PathBuf,
        /// Pages such as "1-3, 5"
        #[arg(short, long, conflicts_with = "every")]
        pages: Option<String>,
        /// Every n-th page
        #[arg(long)]
        every: Option<u32>,
        #[arg(long)]
        separate: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove pages
    Delete {
        input: PathBuf,
        #[arg(short, long)]
        pages: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Concatenate files in the given order
    Merge {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Stamp text or an image on every page
    Watermark {
        input: PathBuf,
        #[arg(long, conflicts_with = "image")]
        text: Option<String>,
        /// PNG or JPEG file
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long)]
        position: Option<Position>,
        /// 0 to 100
        #[arg(long)]
        opacity: Option<u8>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Draw a signature on the first page
    Sign {
        input: PathBuf,
        /// Text, or a data:image/...;base64, URL
        #[arg(long, conflicts_with = "image")]
        text: Option<String>,
        /// Signature image file, embedded as a data URL
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Record a protection label in the document metadata (no encryption)
    Label {
        input: PathBuf,
        #[arg(short, long)]
        label: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove encryption from a file you have the password for
    Unlock {
        input: PathBuf,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Flatten form fields and drop annotations
    ReadOnly {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs);

    let config = Config::load(args.config.as_deref())?;
    debug!(?config, "loaded configuration");

    if let Command::Info { input } = &args.command {
        let bytes = read_input(input)?;
        let meta = inspect(&bytes).with_context(|| format!("Failed to read {}", input.display()))?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&meta)?);
        } else {
            println!("File:      {}", input.display());
            println!("Version:   {}", meta.version);
            println!("Pages:     {}", meta.page_count);
            println!("Objects:   {}", meta.object_count);
            println!("Encrypted: {}", meta.encrypted);
            if let Some(title) = &meta.title {
                println!("Title:     {}", title);
            }
            if let Some(author) = &meta.author {
                println!("Author:    {}", author);
            }
        }
        return Ok(());
    }

    let (command, explicit_output) = build_command(args.command, &config)?;
    let name = command.name();
    info!(command = name, "running");

    let quiet = args.quiet;
    let mut report = |stage: Stage, percentage: u8| {
        if !quiet {
            eprintln!("[{}] {}%", stage, percentage);
        }
    };
    let mut progress = Progress::new(&mut report);
    let result = execute_with(
        command,
        &config.limits,
        &config.output.serialize_options(),
        &mut progress,
    )
    .with_context(|| format!("{} failed", name))?;

    let written = write_outputs(&result, explicit_output.as_deref(), &config.output.directory)?;
    print_report(&result, &written, args.json)
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pdfninja={level},pdfninja_core={level}")));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().with_current_span(false).init();
    } else {
        builder.init();
    }
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn named_input(path: &Path) -> anyhow::Result<NamedFile> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    Ok(NamedFile::new(name, read_input(path)?))
}

/// Translate a subcommand into an engine command, filling gaps from config.
fn build_command(
    command: Command,
    config: &Config,
) -> anyhow::Result<(PdfCommand, Option<PathBuf>)> {
    let built = match command {
        Command::Info { .. } => bail!("info is handled before execution"),
        Command::Compress {
            input,
            profile,
            output,
        } => (
            PdfCommand::Compress {
                file: named_input(&input)?,
                profile: profile.unwrap_or(config.compress.profile),
            },
            output,
        ),
        Command::Extract {
            input,
            pages,
            every,
            separate,
            output,
        } => {
            let selection = match (pages, every) {
                (Some(text), _) => SelectionSpec::Range(text),
                (None, Some(n)) => SelectionSpec::EveryNth { every_nth: n },
                (None, None) => bail!("extract needs --pages or --every"),
            };
            let mode = if separate {
                ExtractMode::Separate
            } else {
                ExtractMode::Single
            };
            (
                PdfCommand::Extract {
                    file: named_input(&input)?,
                    selection,
                    mode,
                },
                output,
            )
        }
        Command::Delete {
            input,
            pages,
            output,
        } => (
            PdfCommand::Delete {
                file: named_input(&input)?,
                selection: SelectionSpec::Range(pages),
            },
            output,
        ),
        Command::Merge { inputs, output } => {
            let files = inputs
                .iter()
                .map(|p| named_input(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            (PdfCommand::Merge { files }, output)
        }
        Command::Watermark {
            input,
            text,
            image,
            position,
            opacity,
            output,
        } => {
            let mut watermark = config.watermark.clone();
            if let Some(text) = text {
                watermark.content = WatermarkContent::Text { text };
            }
            if let Some(image) = image {
                watermark.content = WatermarkContent::Image {
                    data: read_input(&image)?,
                };
            }
            if let Some(position) = position {
                watermark.position = position;
            }
            if let Some(opacity) = opacity {
                watermark.opacity = opacity.min(100);
            }
            (
                PdfCommand::Watermark {
                    file: named_input(&input)?,
                    watermark,
                },
                output,
            )
        }
        Command::Sign {
            input,
            text,
            image,
            output,
        } => {
            let signature = match (text, image) {
                (Some(text), _) => SignatureSpec::new(text),
                (None, Some(path)) => SignatureSpec::new(data_url(&path, &read_input(&path)?)),
                (None, None) => bail!("sign needs --text or --image"),
            };
            (
                PdfCommand::Sign {
                    file: named_input(&input)?,
                    signature,
                },
                output,
            )
        }
        Command::Label {
            input,
            label,
            output,
        } => (
            PdfCommand::LabelProtected {
                file: named_input(&input)?,
                label,
            },
            output,
        ),
        Command::Unlock {
            input,
            password,
            output,
        } => (
            PdfCommand::Unlock {
                file: named_input(&input)?,
                password,
            },
            output,
        ),
        Command::ReadOnly { input, output } => (
            PdfCommand::MakeReadOnly {
                file: named_input(&input)?,
            },
            output,
        ),
    };
    Ok(built)
}

fn data_url(path: &Path, bytes: &[u8]) -> String {
    use pdfninja_core::images::encode_data_url;
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => {
            "image/jpeg"
        }
        _ => "image/png",
    };
    encode_data_url(mime, bytes)
}

/// Write every output file. A single output goes to `explicit` when given;
/// everything else lands in `directory` under its generated name.
fn write_outputs(
    result: &ProcessResult,
    explicit: Option<&Path>,
    directory: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let files = result.output.files();
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = match (explicit, &result.output) {
            (Some(path), Output::Single(_)) => path.to_path_buf(),
            (Some(dir), Output::Files(_)) => dir.join(&file.name),
            _ => directory.join(&file.name),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, &file.data)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), bytes = file.data.len(), "wrote output");
        written.push(path);
    }
    Ok(written)
}

fn print_report(result: &ProcessResult, written: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    if json {
        let report = serde_json::json!({
            "output": result.output,
            "metrics": result.metrics,
            "warnings": result.warnings,
            "written": written,
        });
        writeln!(stdout, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(());
    }

    if let Output::PageCount(n) = result.output {
        writeln!(stdout, "{} pages", n)?;
    }
    for path in written {
        writeln!(stdout, "wrote {}", path.display())?;
    }
    let m = &result.metrics;
    writeln!(
        stdout,
        "{} pages, {} -> {} bytes ({}% saved) in {} ms",
        m.page_count, m.input_size_bytes, m.output_size_bytes, m.compression_ratio, m.processing_time_ms
    )?;
    for warning in &result.warnings {
        writeln!(stdout, "warning: {}", serde_json::to_string(warning)?)?;
    }
    Ok(())
}
