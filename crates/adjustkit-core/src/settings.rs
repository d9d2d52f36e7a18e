//! Workstation settings
//!
//! Read once at startup and immutable afterward. Missing keys are
//! defaulted and the effective values are written back, so a fresh
//! install leaves a complete settings file behind for the operator to
//! edit.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render settings: {0}")]
    Render(#[from] toml::ser::Error),
}

/// All workstation tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub locator: LocatorSettings,
    #[serde(default)]
    pub meteo: MeteoSettings,
}

/// Locator-kit link tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorSettings {
    /// Gateway TCP port the adjusting kit is mapped to.
    #[serde(default = "default_locator_port")]
    pub port: u16,
    /// Carrier frequency `f`, Hz.
    #[serde(default = "default_carrier_hz")]
    pub f: f64,
    /// PLL reference frequency `fref`, Hz.
    #[serde(default = "default_reference_hz")]
    pub fref: f64,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            port: default_locator_port(),
            f: default_carrier_hz(),
            fref: default_reference_hz(),
        }
    }
}

/// Weather-kit listener tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteoSettings {
    /// Local port the listener binds.
    #[serde(default = "default_meteo_listen_port")]
    pub listen_port: u16,
    /// Source port the weather kit is expected to dial in from; peers on
    /// any other port are dropped.
    #[serde(default = "default_meteo_peer_port")]
    pub peer_port: u16,
}

impl Default for MeteoSettings {
    fn default() -> Self {
        Self {
            listen_port: default_meteo_listen_port(),
            peer_port: default_meteo_peer_port(),
        }
    }
}

fn default_locator_port() -> u16 {
    4004
}

fn default_carrier_hz() -> f64 {
    30_250_000.0
}

fn default_reference_hz() -> f64 {
    40_000_000.0
}

fn default_meteo_listen_port() -> u16 {
    4002
}

fn default_meteo_peer_port() -> u16 {
    4001
}

impl Settings {
    /// Load settings from `path`, defaulting anything absent, and write
    /// the effective values back.
    pub fn load_or_create(path: &Path) -> Result<Self, SettingsError> {
        let settings = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            Settings::default()
        };

        let rendered = toml::to_string_pretty(&settings)?;
        std::fs::write(path, rendered)?;

        Ok(settings)
    }
}
