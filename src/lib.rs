//! Battery drain estimation and shutdown prediction core.
//!
//! Given a stream of periodic battery telemetry samples, this crate
//! maintains a smoothed estimate of cumulative discharge cycles, derives a
//! recency- and temperature-weighted drain rate, predicts time to shutdown
//! with a discrete confidence tier, and adaptively corrects its own
//! prediction bias from the outcomes of shutdown warnings.
//!
//! The host owns a [`DrainMonitor`] for the lifetime of its session and
//! calls into it synchronously with each new sample; state survives process
//! restarts through a pluggable [`StateStore`].

pub mod config;
pub mod corrector;
pub mod error;
pub mod estimator;
pub mod monitor;
pub mod ringbuf;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use corrector::{AdaptiveCorrector, ShutdownWarning, WarningOutcome};
pub use error::{DrainGuardError, Result};
pub use estimator::DrainEstimator;
pub use monitor::DrainMonitor;
pub use store::{LmdbStore, MemoryStore, PersistedState, StateStore};
pub use telemetry::{Confidence, DrainRateRecord, Sample, ShutdownPrediction};
