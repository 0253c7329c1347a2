//! Remote format conversion boundary
//!
//! Office formats are converted by an external service. The engine only
//! drives the job lifecycle (submit, poll, fetch); hosts supply the transport
//! by implementing [`ConversionService`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConversionError, Result};
use crate::optimize::RemoteTier;
use crate::progress::{Progress, Stage};

const UPLOAD_STARTED: u8 = 10;
const UPLOADED: u8 = 25;
const PROCESSING_START: u8 = 50;
const PROCESSING_END: u8 = 95;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub file_name: String,
    pub from_format: String,
    pub to_format: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Quality tier requested from the service, when it offers tiers.
    pub tier: Option<RemoteTier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    /// Service-reported completion percentage.
    Processing(u8),
    Finished,
    Failed(String),
}

/// A remote converter. Calls block until the service answers.
pub trait ConversionService {
    fn name(&self) -> &'static str;

    /// Upload the input and create a job. Returns the job id.
    fn submit(&mut self, request: &ConversionRequest) -> std::result::Result<String, ConversionError>;

    fn status(&mut self, job: &str) -> std::result::Result<JobStatus, ConversionError>;

    /// Download the output of a finished job.
    fn fetch(&mut self, job: &str) -> std::result::Result<Vec<u8>, ConversionError>;
}

/// How often and how long to wait for a job.
pub struct Poller<'a> {
    pub max_attempts: u32,
    pub interval: Duration,
    sleep: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a> Poller<'a> {
    pub fn new(max_attempts: u32, interval: Duration, sleep: impl FnMut(Duration) + 'a) -> Self {
        Self {
            max_attempts,
            interval,
            sleep: Box::new(sleep),
        }
    }

    /// Sleep on the current thread between status checks.
    pub fn blocking(max_attempts: u32, interval: Duration) -> Self {
        Self::new(max_attempts, interval, std::thread::sleep)
    }

    fn wait(&mut self) {
        (self.sleep)(self.interval);
    }
}

impl Default for Poller<'_> {
    /// Two-second interval, giving up after five minutes.
    fn default() -> Self {
        Self::blocking(150, Duration::from_secs(2))
    }
}

/// Run one conversion job to completion and return the converted bytes.
pub fn convert(
    service: &mut dyn ConversionService,
    request: &ConversionRequest,
    poll: &mut Poller,
    progress: &mut Progress,
) -> Result<Vec<u8>> {
    let result = run_job(service, request, poll, progress);
    progress.finish(result)
}

fn run_job(
    service: &mut dyn ConversionService,
    request: &ConversionRequest,
    poll: &mut Poller,
    progress: &mut Progress,
) -> Result<Vec<u8>> {
    info!(
        service = service.name(),
        from = %request.from_format,
        to = %request.to_format,
        bytes = request.data.len(),
        "submitting conversion job"
    );
    progress.report(Stage::Uploading, UPLOAD_STARTED);
    let job = service.submit(request)?;
    progress.report(Stage::Uploading, UPLOADED);

    let mut attempts = 0;
    loop {
        let status = service.status(&job)?;
        attempts += 1;
        debug!(%job, attempts, ?status, "conversion status");
        match status {
            JobStatus::Finished => break,
            JobStatus::Failed(message) => {
                warn!(%job, %message, "conversion job failed");
                return Err(ConversionError::JobFailed(message).into());
            }
            JobStatus::Waiting => progress.report(Stage::Converting, PROCESSING_START),
            JobStatus::Processing(pct) => progress.step(
                Stage::Converting,
                PROCESSING_START,
                PROCESSING_END,
                pct.min(100) as usize,
                100,
            ),
        }
        if attempts >= poll.max_attempts {
            return Err(ConversionError::TimedOut { attempts }.into());
        }
        poll.wait();
    }

    let output = service.fetch(&job)?;
    progress.report(Stage::Downloading, PROCESSING_END);
    info!(%job, bytes = output.len(), "conversion finished");
    Ok(output)
}
