//! Model governor
//!
//! Single source of truth for the active embedding model. Vectors produced
//! by different models are dimensionally incompatible and semantically
//! non-comparable, so a model switch invalidates every stored vector and
//! the graph built on top of them. Only this component may authorize that
//! destructive cascade.

use crate::embedding::VectorIndex;
use crate::error::Result;
use crate::storage::Store;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

const ACTIVE_MODEL_KEY: &str = "active_embedding_model";

/// Outcome of a switch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SetResult {
    /// The requested model is already active
    Unchanged,
    /// Stored vectors belong to other models; the caller must confirm the
    /// destructive switch by retrying with force
    ConfirmationRequired {
        existing_models: Vec<String>,
        new_model: String,
    },
    /// The switch completed and all dependent state was cleared
    Switched,
}

/// Tracks the active embedding model and runs the switch cascade
pub struct ModelGovernor {
    store: Arc<Store>,
    chunk_index_dir: PathBuf,
    entity_index_dir: PathBuf,
    active: RwLock<String>,
}

impl ModelGovernor {
    /// Load the persisted active model, or record the default on first run
    pub fn open(
        store: Arc<Store>,
        chunk_index_dir: PathBuf,
        entity_index_dir: PathBuf,
        default_model: &str,
    ) -> Result<Self> {
        let active = match store.get_setting(ACTIVE_MODEL_KEY)? {
            Some(model) => model,
            None => {
                let normalized = normalize(default_model).to_string();
                store.set_setting(ACTIVE_MODEL_KEY, &normalized)?;
                normalized
            }
        };

        Ok(Self {
            store,
            chunk_index_dir,
            entity_index_dir,
            active: RwLock::new(active),
        })
    }

    /// The active embedding model name
    pub fn current(&self) -> String {
        self.active.read().unwrap().clone()
    }

    /// Request a switch to a new model.
    ///
    /// Without force, a switch that would orphan existing vectors returns
    /// `ConfirmationRequired` and changes nothing. With force (or when no
    /// conflicting vectors exist) the cascade deletes both vector index
    /// directories, all documents and chunks, prunes the graph to an
    /// orphan-free state and records the new model. The cascade is
    /// idempotent; a retry after a partial failure completes it.
    pub fn set(&self, name: &str, force: bool) -> Result<SetResult> {
        let new_model = normalize(name).to_string();
        let current = self.current();

        if normalize(&current) == new_model {
            return Ok(SetResult::Unchanged);
        }

        if !force {
            let existing_models = self.store.distinct_embedding_models()?;
            if !existing_models.is_empty() && !existing_models.iter().any(|m| normalize(m) == new_model)
            {
                return Ok(SetResult::ConfirmationRequired {
                    existing_models,
                    new_model,
                });
            }
        }

        tracing::info!(
            "Switching embedding model {} -> {}; clearing all vector state",
            current,
            new_model
        );

        VectorIndex::destroy(&self.chunk_index_dir)?;
        VectorIndex::destroy(&self.entity_index_dir)?;
        self.store.clear_documents()?;
        self.store.cleanup_orphans()?;

        self.store.set_setting(ACTIVE_MODEL_KEY, &new_model)?;
        *self.active.write().unwrap() = new_model;

        Ok(SetResult::Switched)
    }
}

/// Model names compare with a trailing `:latest` tag stripped
fn normalize(name: &str) -> &str {
    name.trim().trim_end_matches(":latest")
}
