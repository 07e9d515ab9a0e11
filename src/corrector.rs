//! Adaptive prediction correction.
//!
//! This module tracks the lifecycle of an in-flight shutdown warning and
//! learns a bounded multiplicative correction from its outcome: a cancelled
//! warning means the prediction was too pessimistic, a confirmed shutdown
//! pulls the correction toward the observed accuracy ratio.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{ringbuf::Ring, store::STATE_VERSION};

/// Maximum number of resolved warning outcomes retained for inspection.
pub const OUTCOME_HISTORY: usize = 50;

/// Weight of a single outcome when updating the adjustment factor.
const LEARNING_RATE: f64 = 0.1;
/// Lower clamp: a correction may at most halve a prediction.
const FACTOR_MIN: f64 = 0.5;
/// Upper clamp: a correction may at most double a prediction.
const FACTOR_MAX: f64 = 2.0;

/// Snapshot taken when a shutdown countdown begins. At most one is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownWarning {
   pub start_ms: u64,
   pub predicted_minutes: f64,
   pub voltage: u32,
   pub temperature: f32,
   pub level: u8,
}

/// Terminal record of a warning's resolution. Audit only; learning uses the
/// single latest outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningOutcome {
   pub warning: ShutdownWarning,
   pub actual_shutdown_ms: Option<u64>,
   pub was_cancelled: bool,
}

/// Durable portion of the corrector, versioned for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectorState {
   pub version: u32,
   pub adjustment: f64,
   pub outcomes: Vec<WarningOutcome>,
}

impl Default for CorrectorState {
   fn default() -> Self {
      Self {
         version: STATE_VERSION,
         adjustment: 1.0,
         outcomes: Vec::new(),
      }
   }
}

/// Learns a clamped correction factor from warning outcomes.
///
/// Timestamps are passed in by the caller; the corrector itself never reads
/// the clock, which keeps the learning laws exactly reproducible.
#[derive(Debug)]
pub struct AdaptiveCorrector {
   active: Option<ShutdownWarning>,
   outcomes: Ring<WarningOutcome, OUTCOME_HISTORY>,
   adjustment: f64,
}

impl Default for AdaptiveCorrector {
   fn default() -> Self {
      Self {
         active: None,
         outcomes: Ring::default(),
         adjustment: 1.0,
      }
   }
}

impl AdaptiveCorrector {
   /// Rehydrates a corrector from persisted state.
   pub fn from_state(state: CorrectorState) -> Self {
      Self {
         active: None,
         outcomes: state.outcomes.into_iter().collect(),
         adjustment: state.adjustment.clamp(FACTOR_MIN, FACTOR_MAX),
      }
   }

   /// Captures the durable portion of the corrector for persistence.
   pub fn snapshot(&self) -> CorrectorState {
      CorrectorState {
         version: STATE_VERSION,
         adjustment: self.adjustment,
         outcomes: self.outcomes.iter().copied().collect(),
      }
   }

   /// Captures the start of a shutdown warning. An already-active warning
   /// is replaced by the new snapshot.
   pub fn record_warning_start(
      &mut self,
      now_ms: u64,
      predicted_minutes: f64,
      voltage: u32,
      temperature: f32,
      level: u8,
   ) {
      if let Some(prev) = self.active {
         debug!(
            "Replacing active warning from {} ({:.1} min predicted)",
            prev.start_ms, prev.predicted_minutes
         );
      }
      self.active = Some(ShutdownWarning {
         start_ms: now_ms,
         predicted_minutes,
         voltage,
         temperature,
         level,
      });
   }

   /// Resolves the active warning as cancelled: the predicted shutdown did
   /// not happen, so future predictions are scaled up. No-op when idle.
   pub fn record_warning_cancelled(&mut self) {
      let Some(warning) = self.active.take() else {
         return;
      };

      self.outcomes.push(WarningOutcome {
         warning,
         actual_shutdown_ms: None,
         was_cancelled: true,
      });

      self.adjustment = (self.adjustment * (1.0 + LEARNING_RATE)).clamp(FACTOR_MIN, FACTOR_MAX);
      debug!(
         "Warning cancelled, prediction adjustment now {:.3}",
         self.adjustment
      );
   }

   /// Resolves the active warning as confirmed by an actual shutdown,
   /// blending the factor toward the observed accuracy ratio. No-op when
   /// idle.
   pub fn record_actual_shutdown(&mut self, now_ms: u64) {
      let Some(warning) = self.active.take() else {
         return;
      };

      self.outcomes.push(WarningOutcome {
         warning,
         actual_shutdown_ms: Some(now_ms),
         was_cancelled: false,
      });

      let actual_minutes = now_ms.saturating_sub(warning.start_ms) as f64 / 60_000.0;
      // IEEE division: a zero prediction yields an infinite ratio, which the
      // clamp resolves; a NaN ratio is discarded outright.
      let ratio = actual_minutes / warning.predicted_minutes;
      let blended = ratio.mul_add(LEARNING_RATE, self.adjustment * (1.0 - LEARNING_RATE));
      if !blended.is_nan() {
         self.adjustment = blended.clamp(FACTOR_MIN, FACTOR_MAX);
      }

      debug!(
         "Shutdown after {actual_minutes:.1} min against {:.1} predicted, adjustment now {:.3}",
         warning.predicted_minutes, self.adjustment
      );
   }

   /// Current correction factor applied to predicted minutes. Pure read.
   pub const fn adjustment(&self) -> f64 {
      self.adjustment
   }

   /// Resolved warning outcomes, oldest first. Pure read.
   pub fn outcomes(&self) -> Vec<WarningOutcome> {
      self.outcomes.iter().copied().collect()
   }
}
