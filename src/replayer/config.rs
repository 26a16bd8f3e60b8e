//! Player configuration

use super::FrameTiming;
use crate::{Result, SidError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for the scheduler and its diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Cycle budget for one init or play call
    pub max_cycles_per_call: u64,
    /// How far SP may sink below its entry value before the call is aborted
    pub stack_drift_limit: u8,
    /// Timing used when the speed bitmask is all zero
    pub default_timing: FrameTiming,
    /// Abort calls that spin on one instruction or leak stack
    pub loop_detection: bool,
    /// Output gain
    pub boost: f32,
    /// Unknown-opcode warnings emitted before going quiet
    pub unknown_opcode_log_limit: u32,
    /// Runaway-routine warnings emitted before going quiet
    pub runaway_log_limit: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            max_cycles_per_call: 100_000,
            stack_drift_limit: 10,
            default_timing: FrameTiming::Pal,
            loop_detection: true,
            boost: 1.0,
            unknown_opcode_log_limit: 20,
            runaway_log_limit: 20,
        }
    }
}

impl PlayerConfig {
    /// Defaults with `SIDPLAY_MAX_CYCLES`, `SIDPLAY_DEFAULT_TIMING` and
    /// `SIDPLAY_NO_LOOP_DETECTION` applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of `self`. Unparseable values are
    /// ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(cycles) = std::env::var("SIDPLAY_MAX_CYCLES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.max_cycles_per_call = cycles;
        }
        if let Some(timing) = std::env::var("SIDPLAY_DEFAULT_TIMING")
            .ok()
            .and_then(|v| FrameTiming::from_name(&v))
        {
            self.default_timing = timing;
        }
        if std::env::var_os("SIDPLAY_NO_LOOP_DETECTION").is_some() {
            self.loop_detection = false;
        }
        self
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SidError::Config(e.to_string()))
    }

    /// Read and parse a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
