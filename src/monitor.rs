//! Host-facing monitor handle.
//!
//! This module wraps the drain estimator and the adaptive corrector behind
//! a single mutex so the host may call in from broadcast receivers, timer
//! ticks and user actions concurrently. Persistence is fire-and-forget: a
//! background writer drains state snapshots off a channel, so no call into
//! the core ever stalls on storage I/O inside a countdown loop.

use std::{
   sync::Arc,
   thread::{self, JoinHandle},
   time::SystemTime,
};

use crossbeam::channel::{self, Sender};
use log::warn;
use parking_lot::Mutex;

use crate::{
   corrector::{AdaptiveCorrector, WarningOutcome},
   estimator::DrainEstimator,
   store::{PersistedState, StateStore},
   telemetry::{MAX_PREDICTION_MINUTES, Sample, ShutdownPrediction},
};

struct Inner {
   estimator: DrainEstimator,
   corrector: AdaptiveCorrector,
}

impl Inner {
   fn snapshot(&self) -> PersistedState {
      PersistedState {
         estimator: self.estimator.snapshot(),
         corrector: self.corrector.snapshot(),
      }
   }
}

/// The explicitly owned core instance a host keeps for its session.
///
/// All operations are safe to call from multiple threads on a shared
/// reference; mutating operations are atomic with respect to each other.
pub struct DrainMonitor {
   inner: Mutex<Inner>,
   persist: PersistWorker,
}

impl DrainMonitor {
   /// Builds a monitor rehydrated from the given store and starts the
   /// persistence worker.
   pub fn new(store: Arc<dyn StateStore>) -> Self {
      let state = store.load();
      let inner = Inner {
         estimator: DrainEstimator::from_state(state.estimator),
         corrector: AdaptiveCorrector::from_state(state.corrector),
      };

      Self {
         inner: Mutex::new(inner),
         persist: PersistWorker::spawn(store),
      }
   }

   /// Ingests a reading stamped with the current wall clock.
   pub fn ingest(&self, level: u8, temperature: f32, voltage: u32, charging: bool) {
      self.ingest_at(Sample::new(now_ms(), level, temperature, voltage, charging));
   }

   /// Ingests a sample carrying an explicit host-supplied timestamp.
   pub fn ingest_at(&self, sample: Sample) {
      let mut inner = self.inner.lock();
      inner.estimator.ingest(sample);
      let snapshot = inner.snapshot();
      drop(inner);

      self.persist.submit(snapshot);
   }

   /// Current shutdown prediction with the learned correction applied to
   /// the minutes figure. Infinite predictions pass through unscaled.
   pub fn predict(&self) -> ShutdownPrediction {
      let inner = self.inner.lock();
      let mut prediction = inner.estimator.predict();
      if prediction.minutes_left.is_finite() {
         prediction.minutes_left =
            (prediction.minutes_left * inner.corrector.adjustment()).min(MAX_PREDICTION_MINUTES);
      }
      prediction
   }

   /// Exponentially smoothed count of full discharge cycles observed.
   pub fn estimated_cycles(&self) -> f64 {
      self.inner.lock().estimator.estimated_cycles()
   }

   /// Smoothed drain rate in percent per minute; an auxiliary signal the
   /// host may use to tune its polling frequency.
   pub fn weighted_drain_rate(&self) -> f64 {
      self.inner.lock().estimator.weighted_drain_rate()
   }

   /// Records that the host raised a shutdown warning.
   pub fn record_warning_start(
      &self,
      predicted_minutes: f64,
      voltage: u32,
      temperature: f32,
      level: u8,
   ) {
      self.inner.lock().corrector.record_warning_start(
         now_ms(),
         predicted_minutes,
         voltage,
         temperature,
         level,
      );
   }

   /// Records that the host cleared the warning without a shutdown.
   pub fn record_warning_cancelled(&self) {
      let mut inner = self.inner.lock();
      inner.corrector.record_warning_cancelled();
      let snapshot = inner.snapshot();
      drop(inner);

      self.persist.submit(snapshot);
   }

   /// Records that an actual shutdown followed the warning.
   pub fn record_actual_shutdown(&self) {
      let mut inner = self.inner.lock();
      inner.corrector.record_actual_shutdown(now_ms());
      let snapshot = inner.snapshot();
      drop(inner);

      self.persist.submit(snapshot);
   }

   /// Current correction factor applied to predicted minutes.
   pub fn prediction_adjustment(&self) -> f64 {
      self.inner.lock().corrector.adjustment()
   }

   /// Resolved warning outcomes, oldest first.
   pub fn warning_history(&self) -> Vec<WarningOutcome> {
      self.inner.lock().corrector.outcomes()
   }
}

fn now_ms() -> u64 {
   SystemTime::UNIX_EPOCH
      .elapsed()
      .map_or(0, |d| d.as_millis() as u64)
}

/// Background writer draining state snapshots off a channel.
struct PersistWorker {
   tx: Option<Sender<PersistedState>>,
   handle: Option<JoinHandle<()>>,
}

impl PersistWorker {
   fn spawn(store: Arc<dyn StateStore>) -> Self {
      let (tx, rx) = channel::unbounded::<PersistedState>();

      let handle = thread::spawn(move || {
         while let Ok(mut state) = rx.recv() {
            // Coalesce queued snapshots, only the newest matters
            while let Ok(newer) = rx.try_recv() {
               state = newer;
            }
            if let Err(e) = store.save(&state) {
               warn!("State save failed: {e}");
            }
         }
      });

      Self {
         tx: Some(tx),
         handle: Some(handle),
      }
   }

   fn submit(&self, state: PersistedState) {
      if let Some(tx) = &self.tx {
         let _ = tx.send(state);
      }
   }
}

impl Drop for PersistWorker {
   fn drop(&mut self) {
      drop(self.tx.take());
      if let Some(handle) = self.handle.take() {
         let _ = handle.join();
      }
   }
}
