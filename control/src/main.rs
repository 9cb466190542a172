//! CV40 Control – records the camera to every storage root.
//!
//! This binary:
//! 1. Reads configuration from `cv40.conf`
//! 2. Checks that the camera answers and reports its video signal
//! 3. Creates the session directories and applies the configured preset
//! 4. Records until Ctrl-C, then stops and verifies every recording.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use cv40_client::Client;
use cv40_control::device::{Cv40Device, HEALTH_TIMEOUT};
use cv40_control::limiter::Limiter;
use cv40_control::preset::Preset;
use cv40_control::recording::{RecordingManager, Timing};
use cv40_control::session::{self, StorageTargets};
use cv40_control::state::{classify, AppState, StateStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| cv40_common::config::Config::default_path().to_string());
    let config =
        cv40_common::config::load(&PathBuf::from(&config_path)).context("Config load failed")?;

    info!("CV40 Control starting (camera={})", config.camera_url());
    let state = Arc::new(StateStore::new());

    // ── health check ─────────────────────────────────────────────────
    let device = Arc::new(Cv40Device::new(Client::new(), &config));
    let camera = match device.health_check(HEALTH_TIMEOUT).await {
        Ok(camera) => camera,
        Err(e) => {
            state.set(AppState::ErrorBlocking);
            return Err(e).context("Camera health check failed");
        }
    };
    if camera.video.is_locked() {
        info!(
            "Camera {} ready: {}x{} @ {} fps",
            camera.model, camera.video.size[0], camera.video.size[1], camera.video.framerate
        );
    } else {
        warn!("Camera {} has no video signal ({})", camera.model, camera.video.signal);
    }
    state.set(AppState::Ready);

    // ── session ──────────────────────────────────────────────────────
    let targets = StorageTargets::init(&config.storage_roots)?;
    let session_id = session::session_id();
    let sessions = targets.session_dirs(&session_id)?;
    state.set(AppState::SessionActive);
    info!("Session {session_id} on {} root(s)", sessions.len());

    // ── parameters ───────────────────────────────────────────────────
    let limiter = Limiter::spawn(device.clone(), config.ranges.clone(), config.limiter_tick());
    if let Some(name) = &config.preset {
        match name.parse::<Preset>() {
            Ok(preset) => {
                if let Err(e) = preset.apply(device.as_ref(), &limiter).await {
                    warn!("Cannot apply preset {preset}: {e}");
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    // ── ctrl-c ───────────────────────────────────────────────────────
    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        signal.notify_one();
    })
    .context("Cannot set Ctrl-C handler")?;

    // ── record ───────────────────────────────────────────────────────
    let mut recording = RecordingManager::new(device.clone(), Timing::from_config(&config));
    let observed = state.clone();
    recording.on_update(move |statuses| {
        let next = classify(statuses);
        let previous = observed.set(next);
        if previous != next {
            info!("State {previous} -> {next}");
        }
        for status in statuses.iter().filter(|s| s.is_failed()) {
            warn!(
                "Recording to {} failed: {}",
                status.job.target.display(),
                status.error.as_deref().unwrap_or("unknown error")
            );
        }
    });

    let destinations: Vec<PathBuf> = sessions.iter().map(|s| s.video.clone()).collect();
    let started = recording
        .start(&destinations, &config.recording.media)
        .await;
    match started {
        Ok(jobs) => {
            state.set(AppState::Recording);
            info!("Recording {} destination(s), Ctrl-C to stop", jobs.len());
            shutdown.notified().await;
        }
        Err(e) => {
            error!("{e}");
            state.set(AppState::ErrorBlocking);
        }
    }

    // ── stop and verify ──────────────────────────────────────────────
    match recording.stop().await {
        Ok(results) => {
            let verified = results.iter().filter(|r| r.verify().is_ok()).count();
            for result in &results {
                if let Err(e) = result.verify() {
                    error!("{e}");
                }
            }
            info!("{verified}/{} recording(s) verified", results.len());
        }
        Err(e) => error!("Stop failed: {e}"),
    }

    limiter.shutdown().await;
    info!("CV40 Control stopped");

    Ok(())
}
