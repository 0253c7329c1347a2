//! Optional TOML configuration
//!
//! Every section and field has a default, so an empty file (or no file) is
//! valid. Command-line flags override what is loaded here.

use anyhow::Context;
use pdfninja_core::{CompressionProfile, EngineLimits, SerializeOptions, WatermarkSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "pdfninja.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: EngineLimits,
    pub watermark: WatermarkSpec,
    pub compress: CompressConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    pub profile: CompressionProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where output files are written when no explicit path is given.
    pub directory: PathBuf,
    pub object_streams: bool,
    pub compress_streams: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let serialize = SerializeOptions::default();
        Self {
            directory: PathBuf::from("."),
            object_streams: serialize.object_streams,
            compress_streams: serialize.compress_streams,
        }
    }
}

impl OutputConfig {
    pub fn serialize_options(&self) -> SerializeOptions {
        SerializeOptions {
            object_streams: self.object_streams,
            compress_streams: self.compress_streams,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML configuration")
    }

    /// Load `explicit` if given, else `pdfninja.toml` when it exists, else
    /// the defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }
}
