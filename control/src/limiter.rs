//! Parameter limiter.
//!
//! Colors and visuals each get a single-slot queue drained on a fixed
//! tick.  Submitting overwrites whatever is pending, so the device sees at
//! most one write per class per tick and always ends on the newest value.
//! Submissions are clamped to the configured safe ranges first.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cv40_common::config::SafeRanges;
use cv40_common::protocol::{CameraColors, CameraExposure, CameraVisuals, CameraWhite};

use crate::device::Device;

/// Clip every bounded field to its safe range.
pub trait Clamp {
    fn clamped(self, ranges: &SafeRanges) -> Self;
}

impl Clamp for CameraColors {
    fn clamped(mut self, ranges: &SafeRanges) -> Self {
        self.brightness = ranges.brightness.clamp(self.brightness);
        self.contrast = ranges.contrast.clamp(self.contrast);
        self.saturation = ranges.saturation.clamp(self.saturation);
        self.hue = ranges.hue.clamp(self.hue);
        self
    }
}

impl Clamp for CameraVisuals {
    fn clamped(mut self, ranges: &SafeRanges) -> Self {
        self.zoom = ranges.zoom.clamp(self.zoom);
        self.sharpness = ranges.sharpness.clamp(self.sharpness);
        self
    }
}

impl Clamp for CameraWhite {
    fn clamped(mut self, ranges: &SafeRanges) -> Self {
        self.temperature = ranges.temperature.clamp(self.temperature);
        self
    }
}

impl Clamp for CameraExposure {
    fn clamped(mut self, ranges: &SafeRanges) -> Self {
        self.low_light_gain = ranges.low_light_gain.clamp(self.low_light_gain);
        self
    }
}

/// Shortest drain period; tokio intervals cannot tick at zero.
const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Default)]
struct Counters {
    writes: AtomicU64,
    failed: AtomicU64,
}

pub struct Limiter {
    colors: watch::Sender<Option<CameraColors>>,
    visuals: watch::Sender<Option<CameraVisuals>>,
    ranges: SafeRanges,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Limiter {
    /// Start both drain loops.  Must be called inside a tokio runtime.
    pub fn spawn<D: Device>(device: Arc<D>, ranges: SafeRanges, tick: Duration) -> Self {
        if tick < MIN_TICK {
            warn!("Limiter tick {tick:?} too short, using {MIN_TICK:?}");
        }
        let tick = tick.max(MIN_TICK);
        let (colors, colors_rx) = watch::channel(None);
        let (visuals, visuals_rx) = watch::channel(None);
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();

        let colors_device = device.clone();
        let visuals_device = device;
        let tasks = vec![
            drain(
                "colors",
                colors_rx,
                tick,
                cancel.clone(),
                counters.clone(),
                move |value: CameraColors| {
                    let device = colors_device.clone();
                    async move { device.set_colors(value).await }
                },
            ),
            drain(
                "visuals",
                visuals_rx,
                tick,
                cancel.clone(),
                counters.clone(),
                move |value: CameraVisuals| {
                    let device = visuals_device.clone();
                    async move { device.set_visuals(value).await }
                },
            ),
        ];
        info!("Parameter limiter running every {tick:?}");

        Self {
            colors,
            visuals,
            ranges,
            counters,
            cancel,
            tasks,
        }
    }

    pub fn ranges(&self) -> &SafeRanges {
        &self.ranges
    }

    /// Queue `colors` for the next tick, replacing any pending value.
    pub fn submit_colors(&self, colors: CameraColors) {
        self.colors.send_replace(Some(colors.clamped(&self.ranges)));
    }

    /// Queue `visuals` for the next tick, replacing any pending value.
    pub fn submit_visuals(&self, visuals: CameraVisuals) {
        self.visuals.send_replace(Some(visuals.clamped(&self.ranges)));
    }

    /// Device writes sent successfully so far.
    pub fn writes(&self) -> u64 {
        self.counters.writes.load(Ordering::Relaxed)
    }

    /// Device writes that failed so far.
    pub fn failed_writes(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Stop both loops.  Pending values are dropped.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Limiter task failed: {e}");
            }
        }
        debug!("Parameter limiter stopped");
    }
}

impl Drop for Limiter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn drain<T, F, Fut>(
    class: &'static str,
    mut pending: watch::Receiver<Option<T>>,
    tick: Duration,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    send: F,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = cv40_client::Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match pending.has_changed() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => break,
            }
            let Some(value) = pending.borrow_and_update().clone() else {
                continue;
            };
            match send(value).await {
                Ok(()) => {
                    counters.writes.fetch_add(1, Ordering::Relaxed);
                    debug!("Wrote {class}");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Writing {class} failed: {e}");
                }
            }
        }
    })
}
