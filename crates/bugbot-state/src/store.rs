//! Optimistic-concurrency store over a versioned backend.

use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bugbot_core::write_text_atomic;

use crate::types::BotState;

const UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state write conflicted with version {latest_version}")]
    Conflict { latest_version: u64 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Versioned document backend: load the latest `(version, state)` pair and
/// conditionally replace it. A missing document loads as version 0 with the
/// default state.
pub trait StateBackend: Send + Sync {
    fn load(&self) -> Result<(u64, BotState), StateStoreError>;

    /// Replaces the document if the stored version still equals
    /// `expected_version`, returning the new version. Fails with
    /// [`StateStoreError::Conflict`] otherwise.
    fn store(&self, expected_version: u64, state: &BotState) -> Result<u64, StateStoreError>;
}

/// Caches the last observed `(version, state)` and serializes writers.
///
/// Readers take the shared lock; `update_state` holds the exclusive lock for
/// the whole bounded retry loop so the cached version never goes backwards.
pub struct StateStore {
    backend: Box<dyn StateBackend>,
    cached: RwLock<(u64, BotState)>,
}

impl StateStore {
    pub fn open(backend: Box<dyn StateBackend>) -> Result<Self, StateStoreError> {
        let cached = backend.load()?;
        Ok(Self {
            backend,
            cached: RwLock::new(cached),
        })
    }

    /// Gives `read` access to the current state, locking out writers.
    pub fn read_state<R>(&self, read: impl FnOnce(&BotState) -> R) -> R {
        let guard = self.cached.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        read(&guard.1)
    }

    /// Applies `tx` to the latest known state and writes the result back.
    ///
    /// On a version conflict the latest remote document is re-read and `tx`
    /// re-applied, up to three attempts; the last conflict error is surfaced
    /// when they are exhausted. `tx` must therefore be safe to call more
    /// than once.
    pub fn update_state(
        &self,
        tx: impl Fn(&BotState) -> Result<BotState, anyhow::Error>,
    ) -> Result<(), StateStoreError> {
        let mut guard = self.cached.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (mut version, mut state) = guard.clone();

        let mut last_conflict = None;
        for _ in 0..UPDATE_ATTEMPTS {
            let next = tx(&state).context("state transaction failed")?;
            match self.backend.store(version, &next) {
                Ok(new_version) => {
                    *guard = (new_version, next);
                    return Ok(());
                }
                Err(StateStoreError::Conflict { latest_version }) => {
                    last_conflict = Some(StateStoreError::Conflict { latest_version });
                    let latest = self.backend.load()?;
                    version = latest.0;
                    state = latest.1;
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_conflict.unwrap_or(StateStoreError::Conflict { latest_version: version }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u64,
    #[serde(default)]
    state: BotState,
}

/// JSON document on disk with the version embedded in the envelope.
///
/// The conditional write re-reads the stored version before replacing the
/// file, which is what makes the retry loop observable for a second writer
/// pointed at the same path.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_document(&self) -> Result<Option<StateDocument>, StateStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file {}", self.path.display()))?;
        let document = serde_json::from_str::<StateDocument>(&raw)
            .with_context(|| format!("failed to parse state file {}", self.path.display()))?;
        Ok(Some(document))
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> Result<(u64, BotState), StateStoreError> {
        match self.read_document()? {
            Some(document) => Ok((document.version, document.state)),
            None => Ok((0, BotState::default())),
        }
    }

    fn store(&self, expected_version: u64, state: &BotState) -> Result<u64, StateStoreError> {
        let current_version = self.read_document()?.map(|document| document.version).unwrap_or(0);
        if current_version != expected_version {
            return Err(StateStoreError::Conflict {
                latest_version: current_version,
            });
        }

        let next_version = expected_version.saturating_add(1);
        let document = StateDocument {
            version: next_version,
            state: state.clone(),
        };
        let encoded = serde_json::to_string_pretty(&document)
            .context("failed to encode state document")?;
        write_text_atomic(&self.path, &encoded)?;
        Ok(next_version)
    }
}
