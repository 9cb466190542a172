//! Device resource schema.
//!
//! Request and response bodies exchanged with the camera, one struct per
//! resource path.  Field names follow the device's camelCase JSON.

use serde::{Deserialize, Serialize};

// ── system ───────────────────────────────────────────────────────────────

/// `GET /`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Agent {
    pub version: String,
    pub revision: String,
    pub time: String,
}

/// `GET /:board`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Board {
    pub model: String,
    pub sn: u32,
    pub cpu: u32,
    pub fpga: u32,
    pub bridge: u32,
}

/// `GET /:board/buttons/:id`, `GET /:board/camera/:camera/buttons/:id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Button {
    pub description: String,
    pub pressed: bool,
    pub pressed_count: i64,
    pub timestamp: i64,
}

/// `GET /:board/buttons`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Buttons {
    pub buttons: Vec<Button>,
}

// ── signals ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSignal {
    pub description: String,
    pub format: String,
    pub signal: String,
    pub channels: i32,
    pub samplerate: i32,
    pub depth: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSignal {
    pub description: String,
    pub format: String,
    /// `"locked"` when a source is present.
    pub signal: String,
    pub size: [i32; 2],
    pub framerate: f64,
    pub interlaced: bool,
}

impl VideoSignal {
    pub fn is_locked(&self) -> bool {
        self.signal == "locked"
    }
}

// ── camera ───────────────────────────────────────────────────────────────

/// `GET /:board/camera/:id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub model: String,
    pub sn: u32,
    pub cpu: u32,
    pub fpga: u32,
    pub audio: AudioSignal,
    pub video: VideoSignal,
}

/// `GET,POST /:board/camera/:id/exposure`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CameraExposure {
    pub framerate: f64,
    pub is_auto: bool,
    // Manual
    pub shutter: f64,
    pub gain: f64,
    pub binning: f64,
    pub low_light_gain: f64,
    // Auto
    pub level: f64,
    pub speed: f64,
    pub max_saturation: f64,
    // Limits
    pub shutter_limits: [f64; 2],
    pub gain_limits: [f64; 2],
    pub binning_limits: [f64; 2],
    pub low_light_gain_limits: [f64; 2],
    pub window: [i32; 4],
}

/// `GET,POST /:board/camera/:id/white`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraWhite {
    pub balance: [f64; 3],
    pub temperature: i32,
}

/// `GET,POST /:board/camera/:id/colors`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CameraColors {
    pub gamma: f64,
    pub hue: i32,
    pub saturation: i32,
    pub brightness: i32,
    pub contrast: i32,
    pub color_gain: [f64; 3],
}

/// `GET,POST /:board/camera/:id/visuals`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CameraVisuals {
    pub flip: String,
    pub zoom: f64,
    pub sharpness: f64,
    pub sharpness_floor: i32,
    pub anisotropic: i32,
    pub bilateral: i32,
    pub shadow_lighting_gain: f64,
}

/// `GET,POST /:board/:output/:id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Output {
    pub source: String,
    pub overlay: String,
    pub overlay_mode: String,
    pub osd: String,
    pub format: String,
    pub link: String,
    pub audio: AudioSignal,
    pub video: VideoSignal,
}

// ── data workers (POST /:board/camera/:id/data) ──────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioDataWorker {
    /// `audio/...`
    pub media: String,
    pub channels: i32,
    pub samplerate: i32,
    pub depth: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageDataWorker {
    /// `image/...`
    pub media: String,
    pub size: [i32; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoDataWorker {
    /// `video/...`
    pub media: String,
    pub size: [i32; 2],
    pub framerate: f64,
}

// ── file workers (POST /:board/camera/:id/file) ──────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFileWorker {
    pub media: String,
    /// Absolute directory the device writes into.
    pub location: String,
    pub duration: i64,
    pub split_size: i64,
    pub split_duration: i64,
    pub channels: i32,
    pub samplerate: i32,
    pub depth: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageFileWorker {
    pub media: String,
    pub location: String,
    pub size: [i32; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoEncoderExtra {
    pub hw: String,
    pub bitrate: i64,
    pub quality: i32,
    pub gop: i32,
    pub codec: String,
    pub preset: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFileWorker {
    pub media: String,
    pub location: String,
    pub duration: i64,
    pub split_size: i64,
    pub split_duration: i64,
    pub size: [i32; 2],
    pub framerate: f64,
    pub extra: VideoEncoderExtra,
}

// ── packet metadata ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioMetadata {
    pub channels: i32,
    pub samplerate: i32,
    pub depth: i32,
    pub samples: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMetadata {
    pub size: [i32; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoMetadata {
    pub size: [i32; 2],
    pub framerate: f64,
    pub interlaced: bool,
    pub keyframe: bool,
}
