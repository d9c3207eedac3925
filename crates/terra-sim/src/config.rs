//! Simulation configuration.
//!
//! Loaded from a TOML file; missing fields take their defaults and an
//! unreadable file falls back to the defaults entirely.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use terra_stream::StreamingConfig;
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "terra.toml";

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    // === Streaming ===
    /// Engine settings
    pub streaming: StreamingConfig,

    // === Terrain ===
    /// Terrain seed
    pub seed: u32,
    /// Horizontal noise scale in samples
    pub terrain_scale: f64,
    /// Vertical scale of the generated heights
    pub height_scale: f64,

    // === Viewer ===
    /// View distance of each detail ring, finest first, in world units
    pub view_distances: Vec<f64>,
    /// World units the viewer travels per tick along +x
    pub viewer_speed: f32,

    // === Run ===
    /// Ticks to simulate
    pub ticks: u64,
    /// Frame length in milliseconds (0 = run unthrottled)
    pub frame_ms: f64,
    /// Log statistics every this many ticks
    pub report_interval: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            streaming: StreamingConfig::default(),
            seed: 12345,
            terrain_scale: 100.0,
            height_scale: 50.0,
            view_distances: vec![96.0, 192.0, 320.0, 480.0],
            viewer_speed: 8.0,
            ticks: 600,
            frame_ms: 16.0,
            report_interval: 60,
        }
    }
}

impl SimConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let mut contents = String::new();
        if let Err(e) = fs::File::open(path).and_then(|mut file| file.read_to_string(&mut contents)) {
            warn!("Failed to read config file: {e}");
            return Self::default();
        }

        match toml::from_str(&contents) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.streaming.validate();

        self.terrain_scale = self.terrain_scale.clamp(1.0, 10_000.0);
        self.height_scale = self.height_scale.clamp(0.0, 10_000.0);

        // Rings must be positive and ascending, and fit the detail levels.
        self.view_distances.retain(|d| d.is_finite() && *d > 0.0);
        self.view_distances.sort_by(f64::total_cmp);
        self.view_distances.dedup();
        self.view_distances.truncate(self.streaming.detail_levels);
        if self.view_distances.is_empty() {
            self.view_distances = vec![f64::from(self.streaming.chunk_visual_size) * 2.0];
        }

        if !self.viewer_speed.is_finite() {
            self.viewer_speed = 0.0;
        }
        self.frame_ms = self.frame_ms.clamp(0.0, 1000.0);
        self.report_interval = self.report_interval.max(1);
    }
}
