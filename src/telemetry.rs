//! Battery telemetry data structures.
//!
//! This module contains the sample and prediction types shared between the
//! drain estimator, the adaptive corrector and the host: raw telemetry
//! readings, derived drain rate records and shutdown predictions.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Maximum number of telemetry samples retained in the rolling history.
pub const MAX_HISTORY: usize = 200;

/// Maximum number of derived drain rate records retained.
pub const DRAIN_WINDOW: usize = 20;

/// Upper bound on predicted minutes; anything further out is not credible.
pub const MAX_PREDICTION_MINUTES: f64 = 1440.0;

/// One periodic battery telemetry reading, immutable once recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
   /// Wall-clock timestamp in milliseconds, supplied by the host.
   pub timestamp_ms: u64,
   /// Charge level in percent, 0..=100.
   pub level: u8,
   /// Pack temperature in degrees Celsius.
   pub temperature: f32,
   /// Pack voltage in millivolts.
   pub voltage: u32,
   /// Whether the device was charging when the reading was taken.
   pub charging: bool,
}

impl Sample {
   pub const fn new(
      timestamp_ms: u64,
      level: u8,
      temperature: f32,
      voltage: u32,
      charging: bool,
   ) -> Self {
      Self {
         timestamp_ms,
         level,
         temperature,
         voltage,
         charging,
      }
   }
}

/// A derived instantaneous drain rate, kept in a secondary bounded window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainRateRecord {
   /// Drain rate in percent per minute.
   pub rate: f64,
   /// Temperature at the time the rate was derived.
   pub temperature: f32,
   /// Timestamp of the sample that produced this record.
   pub timestamp_ms: u64,
}

/// How much drain history backs a prediction.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
)]
pub enum Confidence {
   #[strum(serialize = "insufficient_data")]
   InsufficientData,
   #[strum(serialize = "low")]
   Low,
   #[strum(serialize = "medium")]
   Medium,
   #[strum(serialize = "high")]
   High,
   #[strum(serialize = "charging")]
   Charging,
}

/// A time-to-shutdown prediction. Derived state, recomputed on every read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShutdownPrediction {
   /// Minutes until predicted shutdown; `f64::INFINITY` when no shutdown
   /// is foreseeable (charging or no data).
   pub minutes_left: f64,
   pub confidence: Confidence,
}

impl ShutdownPrediction {
   pub const fn unavailable(confidence: Confidence) -> Self {
      Self {
         minutes_left: f64::INFINITY,
         confidence,
      }
   }

   pub fn to_json(self) -> serde_json::Value {
      json!({
          "minutes_left": if self.minutes_left.is_finite() {
             Some(self.minutes_left)
          } else {
             None
          },
          "confidence": self.confidence.to_string(),
      })
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::str::FromStr;

   #[test]
   fn test_confidence_round_trip() {
      assert_eq!(Confidence::Medium.to_string(), "medium");
      assert_eq!(
         Confidence::from_str("insufficient_data").unwrap(),
         Confidence::InsufficientData
      );
   }

   #[test]
   fn test_prediction_json_hides_infinite_minutes() {
      let p = ShutdownPrediction::unavailable(Confidence::Charging);
      let v = p.to_json();
      assert!(v["minutes_left"].is_null());
      assert_eq!(v["confidence"], "charging");
   }
}
