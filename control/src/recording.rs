//! Recording job manager.
//!
//! One video file worker per destination directory.  While recording, a
//! background loop polls every worker and hands the status snapshot to an
//! observer; judging the snapshot is left to the observer.
//!
//! Failures part-way through [`RecordingManager::start`] are not rolled
//! back.  The jobs created so far stay registered, so a following
//! [`stop`](RecordingManager::stop) still stops them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cv40_client::WorkerState;
use cv40_common::config::Config;

use crate::device::Device;

/// Status given to a job whose worker could not be read.
pub const FAILED: &str = "FAILED";

/// Shortest poll period; tokio intervals cannot tick at zero.
const MIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("cannot record to {}: {source}", .target.display())]
    Start {
        target: PathBuf,
        #[source]
        source: cv40_client::Error,
    },

    #[error("{action} {url}: {source}")]
    Worker {
        action: &'static str,
        url: String,
        #[source]
        source: cv40_client::Error,
    },

    /// Stop completed but no usable output file exists.
    #[error("no recording found in {}", .target.display())]
    VerificationMismatch { target: PathBuf },
}

/// A started worker and the directory it writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub url: String,
    pub target: PathBuf,
}

/// One job's state at one poll tick.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub job: Job,
    /// Device-reported status, or [`FAILED`].
    pub status: String,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn is_failed(&self) -> bool {
        self.status == FAILED
    }

    /// Only a worker that is writing counts; `running` and `started` are
    /// not enough.
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "ACTIVE" | "recording")
    }
}

/// Largest output file found in a destination after stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingResult {
    pub target: PathBuf,
    pub file: Option<PathBuf>,
    pub size: u64,
}

impl RecordingResult {
    pub fn verify(&self) -> Result<(), RecordingError> {
        match &self.file {
            Some(_) if self.size > 0 => Ok(()),
            _ => Err(RecordingError::VerificationMismatch {
                target: self.target.clone(),
            }),
        }
    }
}

/// Receives every poll snapshot.
pub type Observer = Arc<dyn Fn(&[JobStatus]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    pub stop_check: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            stop_timeout: Duration::from_secs(5),
            stop_check: Duration::from_millis(200),
        }
    }
}

impl Timing {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            stop_timeout: config.stop_timeout(),
            stop_check: config.stop_check(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Pause,
    Stop,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }
}

async fn command<D: Device>(device: &D, action: Action, url: &str) -> cv40_client::Result<()> {
    match action {
        Action::Start => device.start_worker(url).await,
        Action::Pause => device.pause_worker(url).await,
        Action::Stop => device.stop_worker(url).await,
    }
}

/// Output extension of a media type, e.g. `video/mp4` → `mp4`.
pub fn extension_for(media: &str) -> String {
    let subtype = media.rsplit('/').next().unwrap_or(media);
    match subtype.trim_start_matches("x-") {
        "matroska" => "mkv".into(),
        "quicktime" => "mov".into(),
        "mpeg" => "mpg".into(),
        other => other.to_ascii_lowercase(),
    }
}

// ── poll loop ────────────────────────────────────────────────────────────

struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Poller {
    fn spawn<D: Device>(
        device: Arc<D>,
        jobs: Vec<Job>,
        observer: Arc<Mutex<Option<Observer>>>,
        interval: Duration,
    ) -> Self {
        let interval = interval.max(MIN_POLL);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            info!("Polling {} recording job(s) every {interval:?}", jobs.len());
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let statuses = snapshot(device.as_ref(), &jobs).await;
                let observer = observer.lock().clone();
                if let Some(observer) = observer {
                    observer(&statuses);
                }
            }
            debug!("Recording poll loop stopped");
        });

        Self { cancel, task }
    }

    async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            error!("Recording poll loop failed: {e}");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn snapshot<D: Device>(device: &D, jobs: &[Job]) -> Vec<JobStatus> {
    let mut statuses = Vec::with_capacity(jobs.len());
    for job in jobs {
        let status = match device.worker_status(&job.url).await {
            Ok(status) => JobStatus {
                job: job.clone(),
                status,
                error: None,
            },
            Err(e) => {
                debug!("Poll {}: {e}", job.url);
                let message = e.to_string();
                JobStatus {
                    job: job.clone(),
                    status: FAILED.into(),
                    error: Some(if message.is_empty() {
                        "unknown error".into()
                    } else {
                        message
                    }),
                }
            }
        };
        statuses.push(status);
    }
    statuses
}

// ── manager ──────────────────────────────────────────────────────────────

pub struct RecordingManager<D: Device> {
    device: Arc<D>,
    timing: Timing,
    jobs: Vec<Job>,
    extension: String,
    observer: Arc<Mutex<Option<Observer>>>,
    poller: Option<Poller>,
}

impl<D: Device> RecordingManager<D> {
    pub fn new(device: Arc<D>, timing: Timing) -> Self {
        Self {
            device,
            timing,
            jobs: Vec::new(),
            extension: String::new(),
            observer: Arc::new(Mutex::new(None)),
            poller: None,
        }
    }

    /// Register the callback receiving poll snapshots.  Replaces any
    /// previous one; the running loop picks it up on its next tick.
    pub fn on_update(&self, observer: impl Fn(&[JobStatus]) + Send + Sync + 'static) {
        *self.observer.lock() = Some(Arc::new(observer));
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.task.is_finished())
    }

    /// Create and start one worker per destination, then begin polling.
    ///
    /// The first failure is returned; workers started before it keep
    /// running and polling does not begin.
    pub async fn start(
        &mut self,
        destinations: &[PathBuf],
        media: &str,
    ) -> Result<Vec<Job>, RecordingError> {
        self.cancel_polling().await;
        if !self.jobs.is_empty() {
            warn!(
                "Starting over with {} job(s) still registered; they are no longer tracked",
                self.jobs.len()
            );
            self.jobs.clear();
        }
        self.extension = extension_for(media);

        for target in destinations {
            let url = self
                .device
                .create_video_worker(target, media)
                .await
                .map_err(|source| RecordingError::Start {
                    target: target.clone(),
                    source,
                })?;
            self.jobs.push(Job {
                url: url.clone(),
                target: target.clone(),
            });

            self.device
                .start_worker(&url)
                .await
                .map_err(|source| RecordingError::Start {
                    target: target.clone(),
                    source,
                })?;
            info!("Recording {media} to {} via {url}", target.display());
        }

        self.poller = Some(Poller::spawn(
            self.device.clone(),
            self.jobs.clone(),
            self.observer.clone(),
            self.timing.poll_interval,
        ));
        Ok(self.jobs.clone())
    }

    pub async fn pause(&self) -> Result<(), RecordingError> {
        self.fan_out(Action::Pause).await
    }

    pub async fn resume(&self) -> Result<(), RecordingError> {
        self.fan_out(Action::Start).await
    }

    async fn fan_out(&self, action: Action) -> Result<(), RecordingError> {
        for job in &self.jobs {
            command(self.device.as_ref(), action, &job.url)
                .await
                .map_err(|source| RecordingError::Worker {
                    action: action.as_str(),
                    url: job.url.clone(),
                    source,
                })?;
        }
        info!("Recording {}: {} job(s)", action.as_str(), self.jobs.len());
        Ok(())
    }

    /// Stop every job, wait (bounded) for the device to confirm, and look
    /// for each destination's output.
    ///
    /// Every job is sent a stop even if an earlier one fails.  The first
    /// stop failure is returned after the drain and verification ran.
    pub async fn stop(&mut self) -> Result<Vec<RecordingResult>, RecordingError> {
        self.cancel_polling().await;

        let mut first_error = None;
        for job in &self.jobs {
            if let Err(source) = command(self.device.as_ref(), Action::Stop, &job.url).await {
                warn!("Stop {}: {source}", job.url);
                first_error.get_or_insert(RecordingError::Worker {
                    action: Action::Stop.as_str(),
                    url: job.url.clone(),
                    source,
                });
            }
        }

        self.drain().await;

        let results: Vec<RecordingResult> = self
            .jobs
            .iter()
            .map(|job| find_recording(&job.target, &self.extension))
            .collect();
        for result in &results {
            match &result.file {
                Some(file) => info!("Recorded {} ({} bytes)", file.display(), result.size),
                None => warn!("No .{} recording in {}", self.extension, result.target.display()),
            }
        }
        self.jobs.clear();

        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Poll until every job is stopped or finalized, at most `stop_timeout`.
    async fn drain(&self) {
        let mut confirmed = vec![false; self.jobs.len()];
        let wait = async {
            loop {
                for (job, done) in self.jobs.iter().zip(confirmed.iter_mut()) {
                    if *done {
                        continue;
                    }
                    match self.device.worker_status(&job.url).await {
                        Ok(status) if WorkerState::from_status(&status).is_terminal() => {
                            debug!("{}: {status}", job.url);
                            *done = true;
                        }
                        Ok(_) => {}
                        Err(e) => debug!("{} not confirmed yet: {e}", job.url),
                    }
                }
                if confirmed.iter().all(|done| *done) {
                    break;
                }
                tokio::time::sleep(self.timing.stop_check).await;
            }
        };

        if tokio::time::timeout(self.timing.stop_timeout, wait).await.is_err() {
            warn!(
                "Workers did not confirm stop within {:?}",
                self.timing.stop_timeout
            );
        }
    }

    async fn cancel_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
        }
    }
}

/// Largest file under `target` whose extension matches, case-insensitive.
pub fn find_recording(target: &Path, extension: &str) -> RecordingResult {
    let mut best: Option<(PathBuf, u64)> = None;

    match std::fs::read_dir(target) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                let matches = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(extension));
                if !matches {
                    continue;
                }
                let Ok(meta) = entry.metadata() else { continue };
                if !meta.is_file() {
                    continue;
                }
                if best.as_ref().map_or(true, |(_, size)| meta.len() > *size) {
                    best = Some((path, meta.len()));
                }
            }
        }
        Err(e) => warn!("Cannot scan {}: {e}", target.display()),
    }

    let (file, size) = match best {
        Some((file, size)) => (Some(file), size),
        None => (None, 0),
    };
    RecordingResult {
        target: target.to_path_buf(),
        file,
        size,
    }
}
