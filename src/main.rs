//! Reference replay host for the drainguard core.
//!
//! Reads JSON-encoded telemetry samples, one per line, from a file or
//! standard input and drives the estimation core with them, applying the
//! host responsibilities the core leaves outside: voltage range filtering
//! and the threshold logic deciding when a shutdown warning is raised or
//! cancelled.

use std::{
   env,
   fs::File,
   io::{BufRead, BufReader},
   sync::Arc,
};

use log::{debug, info, warn};

use drainguard::{
   config::Config,
   error::Result,
   monitor::DrainMonitor,
   store::LmdbStore,
   telemetry::{Sample, ShutdownPrediction},
};

fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting drainguard replay host...");

   // Load configuration
   let config = Config::load()?;

   // Open the persistent state store and rehydrate the core
   let store = Arc::new(LmdbStore::open()?);
   let monitor = DrainMonitor::new(store);

   let reader: Box<dyn BufRead> = match env::args().nth(1) {
      Some(path) => Box::new(BufReader::new(File::open(path)?)),
      None => Box::new(BufReader::new(std::io::stdin())),
   };

   let mut warning_active = false;
   let mut prediction_available = false;

   for line in reader.lines() {
      let line = line?;
      if line.trim().is_empty() {
         continue;
      }

      let sample: Sample = match serde_json::from_str(&line) {
         Ok(sample) => sample,
         Err(e) => {
            warn!("Skipping malformed telemetry record: {e}");
            continue;
         },
      };

      if !config.is_voltage_valid(sample.voltage) {
         debug!(
            "Filtered sample with out-of-range voltage {} mV",
            sample.voltage
         );
         continue;
      }

      monitor.ingest_at(sample);
      let prediction = monitor.predict();

      let available = prediction.minutes_left.is_finite();
      if available && !prediction_available {
         info!(
            "Shutdown prediction now available: {:.0} minutes remaining ({})",
            prediction.minutes_left, prediction.confidence
         );
      } else if !available && prediction_available {
         debug!("Shutdown prediction unavailable: {}", prediction.confidence);
      }
      prediction_available = available;

      match (warning_active, should_warn(&config, sample, prediction)) {
         (false, true) => {
            info!(
               "Raising shutdown warning at {}%: {:.0} minutes predicted ({})",
               sample.level, prediction.minutes_left, prediction.confidence
            );
            monitor.record_warning_start(
               prediction.minutes_left,
               sample.voltage,
               sample.temperature,
               sample.level,
            );
            warning_active = true;
         },
         (true, false) => {
            info!("Conditions recovered, cancelling shutdown warning");
            monitor.record_warning_cancelled();
            warning_active = false;
         },
         _ => {},
      }
   }

   info!(
      "Replay finished: {:.2} cycles, {:.3} %/min weighted drain, adjustment {:.3}, {} warning outcomes",
      monitor.estimated_cycles(),
      monitor.weighted_drain_rate(),
      monitor.prediction_adjustment(),
      monitor.warning_history().len()
   );

   Ok(())
}

/// Warning threshold logic: level, temperature-adjusted voltage, or
/// predicted minutes. Never warns while charging.
fn should_warn(config: &Config, sample: Sample, prediction: ShutdownPrediction) -> bool {
   if sample.charging {
      return false;
   }

   sample.level <= config.warn_level_percent
      || sample.voltage <= config.voltage_threshold_at(sample.temperature)
      || prediction.minutes_left <= config.warn_minutes
}
