//! Persistent state storage using heed (LMDB).
//!
//! This module defines the versioned serialization contract for the
//! estimator and corrector state behind a small [`StateStore`] interface,
//! so the host can choose the actual backing. The default backing is an
//! LMDB environment with one database per logical namespace.
//!
//! Unreadable or incompatible state never propagates as an error: the
//! affected namespace resets to defaults, because the estimator must always
//! be able to produce some prediction.

use std::{
   path::{Path, PathBuf},
   sync::Arc,
};

use heed::{
   Database, Env, EnvOpenOptions,
   types::{SerdeBincode, Str},
};
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{corrector::CorrectorState, estimator::EstimatorState};

/// Version stamped into every persisted namespace record.
pub const STATE_VERSION: u32 = 1;

/// Key under which each namespace stores its single record.
const STATE_KEY: &str = "state";

/// Errors that can occur in state store operations.
#[derive(Error, Debug)]
pub enum Error {
   #[error("Failed to create state directory: {0}")]
   CreateDirectory(#[from] std::io::Error),

   #[error("Failed to open heed environment: {0}")]
   OpenEnvironment(heed::Error),

   #[error("Database transaction error: {0}")]
   Transaction(heed::Error),

   #[error("Database operation error: {0}")]
   DatabaseOperation(heed::Error),

   #[error("Could not find local data directory")]
   DataDirectoryNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Everything the core persists across process restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
   pub estimator: EstimatorState,
   pub corrector: CorrectorState,
}

/// Durable key/value storage for the core's state.
pub trait StateStore: Send + Sync {
   /// Loads persisted state. Missing, corrupt or version-incompatible
   /// namespaces come back as defaults rather than failures.
   fn load(&self) -> PersistedState;

   /// Writes the given state back.
   fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Database layout for the persisted core state.
#[derive(Debug)]
struct Db {
   env: Env,
   estimator: Database<Str, SerdeBincode<EstimatorState>>,
   corrector: Database<Str, SerdeBincode<CorrectorState>>,
}

/// Thread-safe LMDB-backed state store.
#[derive(Clone, Debug)]
pub struct LmdbStore {
   db: Arc<Db>,
}

impl LmdbStore {
   /// Open or create the state database at the default path.
   pub fn open() -> Result<Self> {
      Self::open_at(&Self::db_path()?)
   }

   /// Open or create the state database at an explicit path.
   pub fn open_at(path: &Path) -> Result<Self> {
      std::fs::create_dir_all(path)?;

      let env = unsafe {
         EnvOpenOptions::new()
            .map_size(10 * 1024 * 1024) // 10MB should be plenty
            .max_dbs(2)
            .open(path)
            .map_err(Error::OpenEnvironment)?
      };

      let mut wtxn = env.write_txn().map_err(Error::Transaction)?;

      let estimator = env
         .create_database(&mut wtxn, Some("estimator"))
         .map_err(Error::DatabaseOperation)?;
      let corrector = env
         .create_database(&mut wtxn, Some("corrector"))
         .map_err(Error::DatabaseOperation)?;

      wtxn.commit().map_err(Error::Transaction)?;

      Ok(Self {
         db: Arc::new(Db {
            env,
            estimator,
            corrector,
         }),
      })
   }

   fn db_path() -> Result<PathBuf> {
      // Check for override environment variable first
      if let Ok(path) = std::env::var("DRAINGUARD_DB_PATH") {
         return Ok(PathBuf::from(path));
      }

      // ~/.local/share/drainguard/state.db
      let base = dirs::data_local_dir().ok_or(Error::DataDirectoryNotFound)?;
      Ok(base.join("drainguard").join("state.db"))
   }
}

impl StateStore for LmdbStore {
   fn load(&self) -> PersistedState {
      let rtxn = match self.db.env.read_txn() {
         Ok(rtxn) => rtxn,
         Err(e) => {
            warn!("State load failed, starting from defaults: {e}");
            return PersistedState::default();
         },
      };

      let estimator = match self.db.estimator.get(&rtxn, STATE_KEY) {
         Ok(Some(state)) if state.version == STATE_VERSION => state,
         Ok(Some(state)) => {
            warn!(
               "Estimator state version {} is incompatible, resetting namespace",
               state.version
            );
            EstimatorState::default()
         },
         Ok(None) => EstimatorState::default(),
         Err(e) => {
            warn!("Estimator state unreadable, resetting namespace: {e}");
            EstimatorState::default()
         },
      };

      let corrector = match self.db.corrector.get(&rtxn, STATE_KEY) {
         Ok(Some(state)) if state.version == STATE_VERSION => state,
         Ok(Some(state)) => {
            warn!(
               "Corrector state version {} is incompatible, resetting namespace",
               state.version
            );
            CorrectorState::default()
         },
         Ok(None) => CorrectorState::default(),
         Err(e) => {
            warn!("Corrector state unreadable, resetting namespace: {e}");
            CorrectorState::default()
         },
      };

      PersistedState {
         estimator,
         corrector,
      }
   }

   fn save(&self, state: &PersistedState) -> Result<()> {
      let mut wtxn = self.db.env.write_txn().map_err(Error::Transaction)?;

      self
         .db
         .estimator
         .put(&mut wtxn, STATE_KEY, &state.estimator)
         .map_err(Error::DatabaseOperation)?;
      self
         .db
         .corrector
         .put(&mut wtxn, STATE_KEY, &state.corrector)
         .map_err(Error::DatabaseOperation)?;

      wtxn.commit().map_err(Error::Transaction)?;

      Ok(())
   }
}

/// In-memory state store for tests and embedding hosts that bring their own
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
   state: Mutex<PersistedState>,
}

impl StateStore for MemoryStore {
   fn load(&self) -> PersistedState {
      self.state.lock().clone()
   }

   fn save(&self, state: &PersistedState) -> Result<()> {
      *self.state.lock() = state.clone();
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::telemetry::Sample;

   use tempfile::TempDir;

   fn create_test_store() -> (LmdbStore, TempDir) {
      let temp_dir = TempDir::new().unwrap();
      let store = LmdbStore::open_at(temp_dir.path()).unwrap();
      (store, temp_dir)
   }

   #[test]
   fn test_fresh_store_loads_defaults() {
      let (store, _dir) = create_test_store();

      let state = store.load();
      assert_eq!(state, PersistedState::default());
      assert_eq!(state.corrector.adjustment, 1.0);
      assert!(state.estimator.history.is_empty());
   }

   #[test]
   fn test_save_and_load_round_trip() {
      let (store, _dir) = create_test_store();

      let mut state = PersistedState::default();
      state.estimator.cumulative_discharge = 42.0;
      state.estimator.estimated_cycles = 0.4;
      state.estimator.previous_level = Some(58);
      state
         .estimator
         .history
         .push(Sample::new(1_000, 58, 24.5, 3810, false));
      state.corrector.adjustment = 1.3;

      store.save(&state).unwrap();
      assert_eq!(store.load(), state);

      // A reopened environment sees the same state
      let path = store.db.env.path().to_path_buf();
      drop(store);
      let reopened = LmdbStore::open_at(&path).unwrap();
      assert_eq!(reopened.load(), state);
   }

   #[test]
   fn test_incompatible_version_resets_namespace() {
      let (store, _dir) = create_test_store();

      let mut state = PersistedState::default();
      state.estimator.cumulative_discharge = 10.0;
      state.estimator.version = 99;
      state.corrector.adjustment = 1.7;
      store.save(&state).unwrap();

      let loaded = store.load();
      // Only the incompatible namespace is reset
      assert_eq!(loaded.estimator, EstimatorState::default());
      assert_eq!(loaded.corrector.adjustment, 1.7);
   }

   #[test]
   fn test_memory_store_round_trip() {
      let store = MemoryStore::default();
      assert_eq!(store.load(), PersistedState::default());

      let mut state = PersistedState::default();
      state.corrector.adjustment = 0.8;
      store.save(&state).unwrap();
      assert_eq!(store.load(), state);
   }
}
