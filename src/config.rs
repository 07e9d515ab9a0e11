//! Configuration management for the drainguard host.
//!
//! This module handles loading and saving host-side tuning from disk: the
//! telemetry polling cadence, the valid voltage range filtered before
//! ingest, and the thresholds that decide when a shutdown warning is
//! raised.

use std::{env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DrainGuardError, Result};

/// Reference temperature below which the warning voltage threshold rises.
const NOMINAL_TEMP: f32 = 25.0;

/// Main configuration structure for the host.
#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
   /// Seconds between telemetry polls.
   #[serde(default = "default_poll_interval")]
   pub poll_interval: u64,

   /// Samples with voltage outside this range never reach the core.
   #[serde(default = "default_voltage_valid_min")]
   pub voltage_valid_min_mv: u32,

   #[serde(default = "default_voltage_valid_max")]
   pub voltage_valid_max_mv: u32,

   /// Charge level at or below which a warning is raised.
   #[serde(default = "default_warn_level")]
   pub warn_level_percent: u8,

   /// Voltage at or below which a warning is raised, at nominal temperature.
   #[serde(default = "default_warn_voltage")]
   pub warn_voltage_mv: u32,

   /// Predicted minutes at or below which a warning is raised.
   #[serde(default = "default_warn_minutes")]
   pub warn_minutes: f64,

   /// Millivolts added to the voltage threshold per degree below nominal;
   /// cold packs sag under load well before an equivalent warm pack.
   #[serde(default = "default_cold_voltage_slope")]
   pub cold_voltage_slope_mv: f64,
}

const fn default_poll_interval() -> u64 {
   30
}

const fn default_voltage_valid_min() -> u32 {
   2500
}

const fn default_voltage_valid_max() -> u32 {
   4500
}

const fn default_warn_level() -> u8 {
   15
}

const fn default_warn_voltage() -> u32 {
   3300
}

const fn default_warn_minutes() -> f64 {
   30.0
}

const fn default_cold_voltage_slope() -> f64 {
   10.0
}

impl Default for Config {
   fn default() -> Self {
      Self {
         poll_interval: default_poll_interval(),
         voltage_valid_min_mv: default_voltage_valid_min(),
         voltage_valid_max_mv: default_voltage_valid_max(),
         warn_level_percent: default_warn_level(),
         warn_voltage_mv: default_warn_voltage(),
         warn_minutes: default_warn_minutes(),
         cold_voltage_slope_mv: default_cold_voltage_slope(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_path()?;

      if config_path.exists() {
         let contents = fs::read_to_string(&config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         // Create default config
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      let config_path = Self::config_path()?;

      // Ensure directory exists
      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(&config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(drainguard_home) = env::var("DRAINGUARD_HOME") {
         PathBuf::from(drainguard_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(DrainGuardError::ConfigDirNotFound);
      };

      Ok(config_dir.join("drainguard").join("config.toml"))
   }

   /// Checks whether a sample's voltage is inside the trusted range.
   pub const fn is_voltage_valid(&self, voltage_mv: u32) -> bool {
      voltage_mv >= self.voltage_valid_min_mv && voltage_mv <= self.voltage_valid_max_mv
   }

   /// Warning voltage threshold adjusted for pack temperature.
   pub fn voltage_threshold_at(&self, temperature: f32) -> u32 {
      let below_nominal = f64::from((NOMINAL_TEMP - temperature).max(0.0));
      below_nominal.mul_add(self.cold_voltage_slope_mv, f64::from(self.warn_voltage_mv)) as u32
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_voltage_threshold_rises_in_the_cold() {
      let config = Config::default();
      assert_eq!(config.voltage_threshold_at(25.0), 3300);
      assert_eq!(config.voltage_threshold_at(30.0), 3300);
      assert_eq!(config.voltage_threshold_at(15.0), 3400);
   }

   #[test]
   fn test_voltage_validity_range() {
      let config = Config::default();
      assert!(config.is_voltage_valid(3800));
      assert!(!config.is_voltage_valid(2400));
      assert!(!config.is_voltage_valid(9000));
   }
}
