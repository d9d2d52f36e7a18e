//! adjustkit-core - shared models and settings
//!
//! The types every other crate in the workspace agrees on: the device
//! state record that travels inward as a request and outward as a
//! snapshot, and the workstation settings read once at startup.

pub mod models;
pub mod settings;

pub use models::{AdjustState, LinkStatus, MediatorEvent, RequestMode};
pub use settings::{Settings, SettingsError};
