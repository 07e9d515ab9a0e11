//! Battery drain estimation.
//!
//! This module tracks discharge cycles and derives a recency- and
//! temperature-weighted drain rate from the rolling sample history, feeding
//! a voltage-banded time-to-shutdown prediction. Charging invalidates the
//! recent discharge trend and clears the drain rate window.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
   ringbuf::Ring,
   store::STATE_VERSION,
   telemetry::{
      Confidence, DRAIN_WINDOW, DrainRateRecord, MAX_HISTORY, MAX_PREDICTION_MINUTES, Sample,
      ShutdownPrediction,
   },
};

/// Number of most recent samples considered by the instantaneous rate pass.
const RATE_SPAN: usize = 10;
/// Smoothing factor for the estimated cycle count (new estimate weight).
const CYCLE_SMOOTHING: f64 = 0.2;
/// Exponential decay constant favoring recent sample pairs.
const RECENCY_DECAY: f64 = 0.1;
/// Weight gain per degree of temperature divergence.
const TEMP_INFLUENCE: f64 = 0.02;
/// Reference pack temperature in degrees Celsius.
const NOMINAL_TEMP: f32 = 25.0;

/// Durable portion of the estimator, versioned for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorState {
   pub version: u32,
   pub cumulative_discharge: f64,
   pub estimated_cycles: f64,
   pub previous_level: Option<u8>,
   pub history: Vec<Sample>,
}

impl Default for EstimatorState {
   fn default() -> Self {
      Self {
         version: STATE_VERSION,
         cumulative_discharge: 0.0,
         estimated_cycles: 0.0,
         previous_level: None,
         history: Vec::new(),
      }
   }
}

/// Tracks battery telemetry and derives drain rate and shutdown predictions.
///
/// The estimator is fed one [`Sample`] at a time and keeps two bounded
/// windows: the raw sample history and a secondary window of already-derived
/// drain rates. The drain rate window is not persisted; it restarts empty
/// and confidence ramps back up as new samples arrive.
#[derive(Debug, Default)]
pub struct DrainEstimator {
   history: Ring<Sample, MAX_HISTORY>,
   drain_window: Ring<DrainRateRecord, DRAIN_WINDOW>,
   cumulative_discharge: f64,
   estimated_cycles: f64,
   previous_level: Option<u8>,
}

impl DrainEstimator {
   /// Rehydrates an estimator from persisted state.
   pub fn from_state(state: EstimatorState) -> Self {
      Self {
         history: state.history.into_iter().collect(),
         drain_window: Ring::default(),
         cumulative_discharge: state.cumulative_discharge,
         estimated_cycles: state.estimated_cycles,
         previous_level: state.previous_level,
      }
   }

   /// Captures the durable portion of the estimator for persistence.
   pub fn snapshot(&self) -> EstimatorState {
      EstimatorState {
         version: STATE_VERSION,
         cumulative_discharge: self.cumulative_discharge,
         estimated_cycles: self.estimated_cycles,
         previous_level: self.previous_level,
         history: self.history.iter().copied().collect(),
      }
   }

   /// Ingests one telemetry sample, updating cycle accounting and the drain
   /// rate window.
   ///
   /// A charging sample clears the drain rate window and contributes neither
   /// a cycle increment nor a drain rate record; the discharge trend prior
   /// to a charge session does not describe the session that follows it.
   pub fn ingest(&mut self, sample: Sample) {
      if sample.charging {
         if !self.drain_window.is_empty() {
            debug!("Charging detected, clearing drain rate window");
         }
         self.drain_window.clear();
         self.history.push(sample);
         self.previous_level = Some(sample.level);
         return;
      }

      if let Some(prev) = self.previous_level
         && sample.level < prev
      {
         let dropped = f64::from(prev - sample.level);
         self.cumulative_discharge += dropped;
         self.estimated_cycles = (self.cumulative_discharge / 100.0)
            .mul_add(CYCLE_SMOOTHING, self.estimated_cycles * (1.0 - CYCLE_SMOOTHING));
         debug!(
            "Battery dropped from {prev} to {} ({:.1}% lifetime discharge, {:.3} cycles)",
            sample.level, self.cumulative_discharge, self.estimated_cycles
         );
      }

      self.history.push(sample);

      if self.history.len() >= 2 {
         let rate = self.instantaneous_rate(sample.temperature);
         self.drain_window.push(DrainRateRecord {
            rate,
            temperature: sample.temperature,
            timestamp_ms: sample.timestamp_ms,
         });
      }

      self.previous_level = Some(sample.level);
   }

   /// Weighted mean over the last [`RATE_SPAN`] samples. Pairs recorded
   /// under temperature conditions diverging from the present sample are
   /// upweighted: they carry more information about stress behavior.
   fn instantaneous_rate(&self, current_temp: f32) -> f64 {
      let skip = self.history.len().saturating_sub(RATE_SPAN);
      let recent: heapless::Vec<Sample, RATE_SPAN> =
         self.history.iter().skip(skip).copied().collect();

      let pairs = recent.len().saturating_sub(1);
      let mut weighted_sum = 0.0;
      let mut total_weight = 0.0;

      for (i, pair) in recent.windows(2).enumerate() {
         let (prev, curr) = (pair[0], pair[1]);
         // Skip charging and flat intervals
         if prev.charging || curr.charging || curr.level >= prev.level {
            continue;
         }
         let minutes = curr.timestamp_ms.saturating_sub(prev.timestamp_ms) as f64 / 60_000.0;
         if minutes <= 0.0 {
            continue;
         }

         let instant = f64::from(prev.level - curr.level) / minutes;
         let recency = (-RECENCY_DECAY * (pairs - i) as f64).exp();
         let temp_influence =
            f64::from((current_temp - prev.temperature).abs()).mul_add(TEMP_INFLUENCE, 1.0);
         let weight = recency * temp_influence;

         weighted_sum += instant * weight;
         total_weight += weight;
      }

      if total_weight > 0.0 {
         weighted_sum / total_weight
      } else {
         0.0
      }
   }

   /// Smoothed drain rate in percent per minute, weighted over the derived
   /// rate window. Returns 0 when the window is empty.
   pub fn weighted_drain_rate(&self) -> f64 {
      let len = self.drain_window.len();
      if len == 0 {
         return 0.0;
      }

      let mut weighted_sum = 0.0;
      let mut total_weight = 0.0;

      for (i, record) in self.drain_window.iter().enumerate() {
         let recency = 2.0 * (i + 1) as f64 / len as f64;
         let temp_weight = 1.5
            * f64::from((record.temperature - NOMINAL_TEMP).abs()).mul_add(TEMP_INFLUENCE, 1.0);
         let weight = recency * temp_weight;

         weighted_sum += record.rate * weight;
         total_weight += weight;
      }

      if total_weight > 0.0 {
         weighted_sum / total_weight
      } else {
         0.0
      }
   }

   /// Predicts minutes until shutdown with a confidence tier. Pure read.
   ///
   /// The minutes figure comes from a voltage-banded characteristic rate
   /// rather than the weighted rate: voltage bands are device-characteristic
   /// floors that do not overreact to transient drain spikes, while the
   /// weighted rate stays available as an auxiliary signal.
   pub fn predict(&self) -> ShutdownPrediction {
      let Some(latest) = self.history.last() else {
         return ShutdownPrediction::unavailable(Confidence::InsufficientData);
      };
      if latest.charging {
         return ShutdownPrediction::unavailable(Confidence::Charging);
      }

      let rate = banded_drain_rate(latest.voltage);
      let minutes_left = (f64::from(latest.level) / rate).min(MAX_PREDICTION_MINUTES);

      let confidence = match self.drain_window.len() {
         n if n < 5 => Confidence::Low,
         n if n < 10 => Confidence::Medium,
         _ => Confidence::High,
      };

      ShutdownPrediction {
         minutes_left,
         confidence,
      }
   }

   /// Exponentially smoothed count of full discharge cycles observed.
   pub const fn estimated_cycles(&self) -> f64 {
      self.estimated_cycles
   }

   /// Lifetime sum of all observed level drops, in percent.
   pub const fn cumulative_discharge(&self) -> f64 {
      self.cumulative_discharge
   }
}

/// Characteristic drain speed for a voltage band, in percent per minute.
const fn banded_drain_rate(voltage_mv: u32) -> f64 {
   match voltage_mv {
      v if v > 4000 => 0.5,
      v if v > 3700 => 1.2,
      v if v > 3400 => 2.5,
      v if v > 3200 => 5.0,
      _ => 10.0,
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn sample_at(minute: u64, level: u8) -> Sample {
      Sample::new(minute * 60_000, level, 25.0, 3800, false)
   }

   fn charging_at(minute: u64, level: u8) -> Sample {
      Sample::new(minute * 60_000, level, 25.0, 4100, true)
   }

   #[test]
   fn test_cumulative_discharge_sums_drops() {
      let mut est = DrainEstimator::default();
      est.ingest(sample_at(0, 100));
      est.ingest(sample_at(1, 98));
      est.ingest(sample_at(2, 95));

      assert_eq!(est.cumulative_discharge(), 5.0);
   }

   #[test]
   fn test_cycle_smoothing_law_holds_per_step() {
      let mut est = DrainEstimator::default();
      est.ingest(sample_at(0, 100));

      est.ingest(sample_at(1, 98));
      // 0.2 * (2/100) + 0.8 * 0
      assert!((est.estimated_cycles() - 0.004).abs() < 1e-12);

      est.ingest(sample_at(2, 95));
      // 0.2 * (5/100) + 0.8 * 0.004
      assert!((est.estimated_cycles() - 0.0132).abs() < 1e-12);
   }

   #[test]
   fn test_level_increase_and_charging_never_contribute() {
      let mut est = DrainEstimator::default();
      est.ingest(sample_at(0, 80));
      est.ingest(sample_at(1, 85));
      est.ingest(charging_at(2, 90));
      est.ingest(charging_at(3, 60));

      assert_eq!(est.cumulative_discharge(), 0.0);
      assert_eq!(est.estimated_cycles(), 0.0);
   }

   #[test]
   fn test_charging_clears_drain_window() {
      let mut est = DrainEstimator::default();
      for i in 0..5 {
         est.ingest(sample_at(i, 90 - i as u8));
      }
      assert!(est.weighted_drain_rate() > 0.0);

      est.ingest(charging_at(5, 85));
      assert_eq!(est.weighted_drain_rate(), 0.0);
   }

   #[test]
   fn test_history_is_bounded_fifo() {
      let mut est = DrainEstimator::default();
      for i in 0..250u64 {
         est.ingest(sample_at(i, 100u8.saturating_sub((i % 100) as u8)));
      }

      assert_eq!(est.history.len(), MAX_HISTORY);
      // The first 50 samples were evicted
      let oldest = est.history.iter().next().unwrap();
      assert_eq!(oldest.timestamp_ms, 50 * 60_000);
   }

   #[test]
   fn test_predict_empty_history() {
      let est = DrainEstimator::default();
      let p = est.predict();
      assert!(p.minutes_left.is_infinite());
      assert_eq!(p.confidence, Confidence::InsufficientData);
   }

   #[test]
   fn test_predict_while_charging() {
      let mut est = DrainEstimator::default();
      est.ingest(sample_at(0, 80));
      est.ingest(charging_at(1, 81));

      let p = est.predict();
      assert!(p.minutes_left.is_infinite());
      assert_eq!(p.confidence, Confidence::Charging);
   }

   #[test]
   fn test_confidence_tiers_follow_window_size() {
      let mut est = DrainEstimator::default();
      let mut minute = 0u64;
      let mut level = 100u8;
      let mut ingest_drops = |est: &mut DrainEstimator, n: usize| {
         for _ in 0..n {
            est.ingest(sample_at(minute, level));
            minute += 1;
            level -= 1;
         }
      };

      // One sample: window empty
      ingest_drops(&mut est, 1);
      assert_eq!(est.drain_window.len(), 0);
      assert_eq!(est.predict().confidence, Confidence::Low);

      // 5 samples total: 4 records
      ingest_drops(&mut est, 4);
      assert_eq!(est.drain_window.len(), 4);
      assert_eq!(est.predict().confidence, Confidence::Low);

      // 10 samples total: 9 records
      ingest_drops(&mut est, 5);
      assert_eq!(est.drain_window.len(), 9);
      assert_eq!(est.predict().confidence, Confidence::Medium);

      // 16 samples total: 15 records
      ingest_drops(&mut est, 6);
      assert_eq!(est.drain_window.len(), 15);
      assert_eq!(est.predict().confidence, Confidence::High);
   }

   #[test]
   fn test_drain_window_is_bounded() {
      let mut est = DrainEstimator::default();
      for i in 0..40u64 {
         est.ingest(sample_at(i, 100u8.saturating_sub(i as u8)));
      }
      assert_eq!(est.drain_window.len(), DRAIN_WINDOW);
   }

   #[test]
   fn test_two_percent_over_two_minutes() {
      // 80% -> 78% over two minutes at 3800 mV and nominal temperature:
      // one record at 1.0 %/min, prediction 78 / 1.2 = 65 minutes, low tier.
      let mut est = DrainEstimator::default();
      est.ingest(sample_at(0, 80));
      est.ingest(sample_at(2, 78));

      assert_eq!(est.cumulative_discharge(), 2.0);
      assert_eq!(est.drain_window.len(), 1);
      assert!((est.weighted_drain_rate() - 1.0).abs() < 1e-12);

      let p = est.predict();
      assert!((p.minutes_left - 65.0).abs() < 1e-12);
      assert_eq!(p.confidence, Confidence::Low);
   }

   #[test]
   fn test_prediction_is_capped() {
      let mut est = DrainEstimator::default();
      for i in 0..30u64 {
         est.ingest(sample_at(i, 100));
      }
      // Flat level still produces a prediction from the voltage band
      let p = est.predict();
      assert!(p.minutes_left <= MAX_PREDICTION_MINUTES);
   }

   #[test]
   fn test_voltage_bands() {
      assert_eq!(banded_drain_rate(4200), 0.5);
      assert_eq!(banded_drain_rate(3800), 1.2);
      assert_eq!(banded_drain_rate(3500), 2.5);
      assert_eq!(banded_drain_rate(3300), 5.0);
      assert_eq!(banded_drain_rate(3000), 10.0);
   }

   #[test]
   fn test_snapshot_round_trip() {
      let mut est = DrainEstimator::default();
      for i in 0..12u64 {
         est.ingest(sample_at(i, (90 - i) as u8));
      }

      let restored = DrainEstimator::from_state(est.snapshot());
      assert_eq!(restored.cumulative_discharge(), est.cumulative_discharge());
      assert_eq!(restored.estimated_cycles(), est.estimated_cycles());
      assert_eq!(restored.previous_level, est.previous_level);
      assert_eq!(restored.history.len(), est.history.len());
      // Derived window is not persisted
      assert_eq!(restored.drain_window.len(), 0);
   }
}
