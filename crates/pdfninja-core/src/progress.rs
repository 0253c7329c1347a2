//! Progress reporting shared by every long-running operation
//!
//! Operations receive a [`Progress`] and report `(stage, percentage)` pairs.
//! The reporter enforces the contract the UI relies on:
//! - percentages are clamped to `[0, 100]` and never go backwards
//! - a successful run ends with exactly one `(Complete, 100)`
//! - a failed run ends with `(Error, last reported percentage)`
//! - nothing is emitted after the terminal event

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Percentages at which a command run enters each stage. Editing and
/// optimizing loops step between `EDITING` and `SERIALIZING`.
pub mod marks {
    pub const PARSING: u8 = 10;
    pub const EDITING: u8 = 30;
    pub const SERIALIZING: u8 = 80;
    pub const SERIALIZED: u8 = 95;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Queued,
    Parsing,
    Editing,
    Optimizing,
    Serializing,
    /// Remote conversion only.
    Uploading,
    Converting,
    Downloading,
    Complete,
    Error,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Parsing => "parsing",
            Stage::Editing => "editing",
            Stage::Optimizing => "optimizing",
            Stage::Serializing => "serializing",
            Stage::Uploading => "uploading",
            Stage::Converting => "converting",
            Stage::Downloading => "downloading",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single callback invocation, kept for logs and JSON reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub percentage: u8,
}

pub struct Progress<'a> {
    callback: Option<&'a mut dyn FnMut(Stage, u8)>,
    last: u8,
    last_stage: Option<Stage>,
    finished: bool,
}

impl<'a> Progress<'a> {
    pub fn new(callback: &'a mut dyn FnMut(Stage, u8)) -> Self {
        Self {
            callback: Some(callback),
            last: 0,
            last_stage: None,
            finished: false,
        }
    }

    /// Reporter that drops every event. Used when the caller passed no callback.
    pub fn silent() -> Self {
        Self {
            callback: None,
            last: 0,
            last_stage: None,
            finished: false,
        }
    }

    /// Last percentage handed to the callback.
    pub fn last(&self) -> u8 {
        self.last
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Report an intermediate stage. Terminal stages are routed to
    /// [`Progress::complete`] / [`Progress::fail`].
    pub fn report(&mut self, stage: Stage, percentage: u8) {
        match stage {
            Stage::Complete => self.complete(),
            Stage::Error => self.fail(),
            _ => {
                let pct = percentage.min(100).max(self.last);
                self.emit(stage, pct);
            }
        }
    }

    /// Report `done` of `total` units of work mapped linearly onto
    /// `[start, end]`. This is the per-page yield point of chunked loops.
    pub fn step(&mut self, stage: Stage, start: u8, end: u8, done: usize, total: usize) {
        let span = end.saturating_sub(start) as usize;
        let offset = if total == 0 {
            span
        } else {
            span * done.min(total) / total
        };
        self.report(stage, start.saturating_add(offset as u8));
    }

    pub fn complete(&mut self) {
        self.emit(Stage::Complete, 100);
    }

    pub fn fail(&mut self) {
        let last = self.last;
        self.emit(Stage::Error, last);
    }

    /// Close the run according to `result` and hand it back.
    pub fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.complete(),
            Err(err) => {
                tracing::debug!(stage = %err.stage(), error = %err, "operation failed");
                self.fail();
            }
        }
        result
    }

    fn emit(&mut self, stage: Stage, percentage: u8) {
        if self.finished {
            return;
        }
        // Chunked loops step more often than the percentage moves.
        if self.last_stage == Some(stage) && self.last == percentage && !stage.is_terminal() {
            return;
        }
        if stage.is_terminal() {
            self.finished = true;
        }
        self.last = percentage;
        self.last_stage = Some(stage);
        if let Some(callback) = self.callback.as_mut() {
            callback(stage, percentage);
        }
    }
}

impl Default for Progress<'_> {
    fn default() -> Self {
        Self::silent()
    }
}
