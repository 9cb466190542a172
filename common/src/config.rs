//! Configuration parsing – reads a KEY=VALUE file (`cv40.conf`).
//!
//! Unknown keys are ignored, so one file can serve several deployments.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Inclusive `[min, max]` bound applied to one device parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafeRange<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> SafeRange<T> {
    /// Build a range, swapping the bounds if they arrive reversed.
    pub fn new(a: T, b: T) -> Self {
        if b < a {
            Self { min: b, max: a }
        } else {
            Self { min: a, max: b }
        }
    }

    /// Clip `value` to the nearest bound. Never rejects.
    ///
    /// Values that compare false against both bounds (NaN) clip to `min`.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn clamp(&self, value: T) -> T {
        if !(value >= self.min) {
            self.min
        } else if !(value <= self.max) {
            self.max
        } else {
            value
        }
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Safe ranges for every bounded camera parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SafeRanges {
    pub brightness: SafeRange<i32>,
    pub contrast: SafeRange<i32>,
    pub saturation: SafeRange<i32>,
    pub hue: SafeRange<i32>,
    pub sharpness: SafeRange<f64>,
    pub zoom: SafeRange<f64>,
    pub temperature: SafeRange<i32>,
    pub low_light_gain: SafeRange<f64>,
}

impl Default for SafeRanges {
    fn default() -> Self {
        Self {
            brightness: SafeRange::new(-100, 100),
            contrast: SafeRange::new(-100, 100),
            saturation: SafeRange::new(-100, 100),
            hue: SafeRange::new(-100, 100),
            sharpness: SafeRange::new(0.0, 1.0),
            zoom: SafeRange::new(1.0, 8.0),
            temperature: SafeRange::new(2500, 10000),
            low_light_gain: SafeRange::new(0.0, 1.0),
        }
    }
}

/// Encoder defaults for recording workers.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingDefaults {
    pub media: String,
    pub codec: String,
    pub encoder: String,
    pub bitrate: i64,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ── device ───────────────────────────────────────────────────────
    /// Scheme (and authority) prefix, e.g. `cv40:` or `tcp://10.0.0.2:9000`.
    pub device_url: String,
    pub board_id: u32,
    pub camera_id: u32,

    // ── storage ──────────────────────────────────────────────────────
    pub storage_roots: Vec<PathBuf>,

    // ── recording ────────────────────────────────────────────────────
    pub recording: RecordingDefaults,
    pub poll_interval_ms: u64,
    pub stop_timeout_ms: u64,
    pub stop_check_ms: u64,

    // ── parameters ───────────────────────────────────────────────────
    pub limiter_tick_ms: u64,
    pub ranges: SafeRanges,
    pub preset: Option<String>,
}

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/cv40/cv40.conf"
    }

    /// Resource URL of the configured camera, e.g. `cv40:/0/camera/0`.
    pub fn camera_url(&self) -> String {
        format!(
            "{}/{}/camera/{}",
            self.device_url.trim_end_matches('/'),
            self.board_id,
            self.camera_id
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_check(&self) -> Duration {
        Duration::from_millis(self.stop_check_ms)
    }

    pub fn limiter_tick(&self) -> Duration {
        Duration::from_millis(self.limiter_tick_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        from_map(&HashMap::new())
    }
}

/// Parse a `KEY=VALUE` configuration file.
///
/// Lines starting with `#` are comments.  Values may be optionally
/// double-quoted.  Unknown keys are silently ignored.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config: {}", path.display()))?;

    let map = parse_conf(&text);
    info!("Loaded config from {}", path.display());

    Ok(from_map(&map))
}

fn from_map(map: &HashMap<String, String>) -> Config {
    let get = |key: &str| -> Option<String> { map.get(key).cloned() };
    let get_num = |key: &str, default: u64| -> u64 {
        get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    };
    // Cadences must be non-zero.
    let get_period = |key: &str, default: u64| -> u64 {
        match get_num(key, default) {
            0 => {
                warn!("{key}: must be above zero – using {default}");
                default
            }
            ms => ms,
        }
    };
    let defaults = SafeRanges::default();

    let storage_roots: Vec<PathBuf> = get("STORAGE_ROOTS")
        .map(|s| {
            s.split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .filter(|roots: &Vec<PathBuf>| !roots.is_empty())
        .unwrap_or_else(|| vec![PathBuf::from("/data")]);

    Config {
        device_url: get("DEVICE_URL")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "cv40:".into()),
        board_id: get("BOARD_ID").and_then(|v| v.parse().ok()).unwrap_or(0),
        camera_id: get("CAMERA_ID").and_then(|v| v.parse().ok()).unwrap_or(0),

        storage_roots,

        recording: RecordingDefaults {
            media: get("RECORDING_MEDIA").unwrap_or_else(|| "video/mp4".into()),
            codec: get("RECORDING_CODEC").unwrap_or_else(|| "h264".into()),
            encoder: get("RECORDING_ENCODER").unwrap_or_else(|| "hw".into()),
            bitrate: get("RECORDING_BITRATE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        },
        poll_interval_ms: get_period("POLL_INTERVAL_MS", 300),
        stop_timeout_ms: get_num("STOP_TIMEOUT_MS", 5000),
        stop_check_ms: get_period("STOP_CHECK_MS", 200),

        limiter_tick_ms: get_period("LIMITER_TICK_MS", 75),
        ranges: SafeRanges {
            brightness: range(map, "BRIGHTNESS_RANGE", defaults.brightness),
            contrast: range(map, "CONTRAST_RANGE", defaults.contrast),
            saturation: range(map, "SATURATION_RANGE", defaults.saturation),
            hue: range(map, "HUE_RANGE", defaults.hue),
            sharpness: range(map, "SHARPNESS_RANGE", defaults.sharpness),
            zoom: range(map, "ZOOM_RANGE", defaults.zoom),
            temperature: range(map, "TEMPERATURE_RANGE", defaults.temperature),
            low_light_gain: range(map, "LOW_LIGHT_GAIN_RANGE", defaults.low_light_gain),
        },
        preset: get("PRESET").filter(|s| !s.is_empty()),
    }
}

/// Parse a `MIN,MAX` pair, falling back to `default` when malformed.
fn range<T>(map: &HashMap<String, String>, key: &str, default: SafeRange<T>) -> SafeRange<T>
where
    T: FromStr + PartialOrd + Copy + Display,
{
    let Some(raw) = map.get(key) else {
        return default;
    };
    let parsed = raw
        .split_once(',')
        .and_then(|(a, b)| Some((a.trim().parse::<T>().ok()?, b.trim().parse::<T>().ok()?)));

    match parsed {
        Some((a, b)) => {
            if b < a {
                warn!("{key}: min {a} is above max {b}, swapping");
            }
            SafeRange::new(a, b)
        }
        None => {
            warn!("{key}: cannot parse '{raw}' as MIN,MAX – using default");
            default
        }
    }
}

/// Parse `KEY=VALUE` lines into a map, stripping optional double-quotes.
fn parse_conf(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            let val = val.trim().trim_matches('"');
            map.insert(key.to_string(), val.to_string());
        }
    }
    map
}

// ─── tests ───────────────────────────────────────────────────────────────
