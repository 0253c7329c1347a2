use thiserror::Error;

use crate::progress::Stage;

pub type Result<T> = std::result::Result<T, PdfNinjaError>;

#[derive(Error, Debug)]
pub enum PdfNinjaError {
    #[error("Failed to parse PDF: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The byte stream cannot be turned into a usable object graph.
    #[error("malformed document: {reason}")]
    Malformed { reason: String },

    /// The document is well-formed but declares something we cannot remove,
    /// such as an encryption handler the password does not open.
    #[error("unsupported document: {reason}")]
    Unsupported { reason: String },
}

impl ParseError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("no pages selected")]
    EmptySelection,

    #[error("deleting {selected} of {total} pages would leave an empty document")]
    WouldEmptyDocument { selected: usize, total: u32 },

    #[error("no input files supplied")]
    NoInputFiles,

    #[error("page {page} is out of range (document has {total} pages)")]
    InvalidRange { page: u32, total: u32 },

    #[error("input of {size} bytes exceeds the {limit} byte limit")]
    InputTooLarge { size: usize, limit: usize },
}

/// Recoverable problems. Operations that hit one of these fall back and
/// surface it as a [`crate::Warning`] instead of failing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("could not embed image on page {page}: {reason}")]
    ImageEmbedFailure { page: u32, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SerializationError {
    #[error("cannot write object {object:?}: {reason}")]
    Unwritable {
        object: Option<(u32, u16)>,
        reason: String,
    },
}

impl SerializationError {
    pub fn unwritable(reason: impl Into<String>) -> Self {
        Self::Unwritable {
            object: None,
            reason: reason.into(),
        }
    }
}

/// Failures reported by the remote conversion collaborator. The engine treats
/// them as opaque.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("conversion service unavailable: {0}")]
    Unavailable(String),

    #[error("conversion job failed: {0}")]
    JobFailed(String),

    #[error("conversion job did not finish after {attempts} status checks")]
    TimedOut { attempts: u32 },
}

impl PdfNinjaError {
    /// Stage the error is attributed to when reported through progress.
    pub fn stage(&self) -> Stage {
        match self {
            PdfNinjaError::Parse(_) => Stage::Parsing,
            PdfNinjaError::Validation(_) | PdfNinjaError::Resource(_) => Stage::Editing,
            PdfNinjaError::Serialization(_) => Stage::Serializing,
            PdfNinjaError::Conversion(_) => Stage::Editing,
        }
    }
}

/// Non-fatal conditions carried alongside a successful result.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind")]
pub enum Warning {
    /// The signature image could not be decoded; text was drawn instead.
    ImageEmbedFailure { page: u32, reason: String },
    /// An image stream was left untouched by the optimizer.
    ImageSkipped { object: (u32, u16), reason: String },
    /// A form field had no usable appearance and was dropped without drawing.
    FieldNotFlattened { page: u32, reason: String },
    /// Overlay text had characters outside WinAnsiEncoding, drawn as `?`.
    TextSubstituted { text: String, replaced: usize },
}

impl From<ResourceError> for Warning {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::ImageEmbedFailure { page, reason } => {
                Warning::ImageEmbedFailure { page, reason }
            }
        }
    }
}
