// src/config.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::skeleton::DEFAULT_WINDOW_CAPACITY;

/// Where the sensor sits in the room and how it is turned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorPlacement {
    /// Room-space position, meters.
    pub position: [f64; 3],
    /// Pitch around the sensor's horizontal axis, degrees.
    pub tilt_degrees: f64,
    /// Yaw around the vertical axis, degrees.
    pub orientation_degrees: f64,
}

impl Default for SensorPlacement {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            tilt_degrees: 0.0,
            orientation_degrees: 0.0,
        }
    }
}

/// Axis-aligned room box with one corner at the origin.
/// x spans the width, y the height, z the depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomGeometry {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
    pub include_floor: bool,
    pub include_ceiling: bool,
}

impl Default for RoomGeometry {
    fn default() -> Self {
        Self {
            width: 5.0,
            height: 3.0,
            depth: 5.0,
            include_floor: false,
            include_ceiling: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub window_capacity: usize,
    pub collect_window: bool,
    pub tracking_capacity: usize,
    pub gesture_dwell_frames: usize,
    /// How far the wrist must be above the shoulder to count as raised, meters.
    pub gesture_margin: f64,
    pub windowed_sampling: bool,
    /// Add each classified sample to the training set until the user's next
    /// control command confirms or withdraws it.
    pub reinforce_on_select: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            collect_window: true,
            tracking_capacity: 2,
            gesture_dwell_frames: 3,
            gesture_margin: 0.05,
            windowed_sampling: true,
            reinforce_on_select: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointingConfig {
    pub sensor: SensorPlacement,
    pub room: RoomGeometry,
    pub pipeline: PipelineConfig,
    pub samples_path: Option<PathBuf>,
}

impl PointingConfig {
    /// `<config dir>/point_control/config.json`, falling back to the working directory.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "point_control")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .unwrap_or_else(|| PathBuf::from("./config.json"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;

        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let room = &self.room;
        if room.width <= 0.0 || room.height <= 0.0 || room.depth <= 0.0 {
            bail!(
                "room extents must be positive (width {}, height {}, depth {})",
                room.width,
                room.height,
                room.depth
            );
        }
        if self.pipeline.window_capacity == 0 {
            bail!("window_capacity must be at least 1");
        }
        if self.pipeline.tracking_capacity == 0 {
            bail!("tracking_capacity must be at least 1");
        }
        Ok(())
    }
}
