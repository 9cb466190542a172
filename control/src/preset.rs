//! Fixed image presets.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use cv40_common::protocol::{CameraColors, CameraVisuals, CameraWhite};

use crate::device::Device;
use crate::limiter::{Clamp, Limiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Arthroscopy,
    RedBoost,
}

/// Parameter values a preset sets.  Everything else keeps the device's
/// current value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetValues {
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub hue: i32,
    pub zoom: f64,
    pub sharpness: f64,
    pub temperature: i32,
}

impl Preset {
    pub const ALL: [Preset; 2] = [Preset::Arthroscopy, Preset::RedBoost];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Arthroscopy => "arthroscopy",
            Self::RedBoost => "red_boost",
        }
    }

    pub fn values(&self) -> PresetValues {
        match self {
            Self::Arthroscopy => PresetValues {
                brightness: 10,
                contrast: 15,
                saturation: 5,
                hue: 0,
                zoom: 1.0,
                sharpness: 0.7,
                temperature: 6500,
            },
            Self::RedBoost => PresetValues {
                brightness: 20,
                contrast: 25,
                saturation: 15,
                hue: -5,
                zoom: 1.0,
                sharpness: 0.8,
                temperature: 5800,
            },
        }
    }

    /// The preset after this one, wrapping around.
    pub fn next(&self) -> Self {
        match self {
            Self::Arthroscopy => Self::RedBoost,
            Self::RedBoost => Self::Arthroscopy,
        }
    }

    /// Read the current parameters, overlay the preset and write it back:
    /// colors and visuals through the limiter, white directly (clamped).
    pub async fn apply<D: Device>(&self, device: &D, limiter: &Limiter) -> cv40_client::Result<()> {
        let values = self.values();

        let colors = device.colors().await?;
        limiter.submit_colors(values.overlay_colors(colors));

        let visuals = device.visuals().await?;
        limiter.submit_visuals(values.overlay_visuals(visuals));

        let white = values
            .overlay_white(device.white().await?)
            .clamped(limiter.ranges());
        device.set_white(white).await?;

        info!("Applied preset {self}");
        Ok(())
    }
}

impl PresetValues {
    pub fn overlay_colors(&self, colors: CameraColors) -> CameraColors {
        CameraColors {
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
            hue: self.hue,
            ..colors
        }
    }

    pub fn overlay_visuals(&self, visuals: CameraVisuals) -> CameraVisuals {
        CameraVisuals {
            zoom: self.zoom,
            sharpness: self.sharpness,
            ..visuals
        }
    }

    pub fn overlay_white(&self, white: CameraWhite) -> CameraWhite {
        CameraWhite {
            temperature: self.temperature,
            ..white
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| format!("unknown preset '{s}'"))
    }
}
