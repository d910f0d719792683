//! Presentation storage.

use super::{Presentation, PresentationId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors from presentation storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Storage backend error
    #[error("Presentation storage error: {0}")]
    Storage(String),
}

/// Load and save presentations.
pub trait PresentationRepository: Send + Sync {
    /// Fetch a presentation.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the read fails.
    fn get(
        &self,
        id: PresentationId,
    ) -> impl Future<Output = Result<Option<Presentation>, RepositoryError>> + Send;

    /// Insert or replace a presentation.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the write fails.
    fn save(&self, presentation: &Presentation) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Presentations held in a map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPresentationRepository {
    presentations: Arc<RwLock<HashMap<PresentationId, Presentation>>>,
}

impl InMemoryPresentationRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository holding `presentations`.
    #[must_use]
    pub fn with(presentations: impl IntoIterator<Item = Presentation>) -> Self {
        let map = presentations.into_iter().map(|p| (p.id, p)).collect();
        Self {
            presentations: Arc::new(RwLock::new(map)),
        }
    }

    fn poisoned<T>(_: T) -> RepositoryError {
        RepositoryError::Storage("lock poisoned".to_string())
    }
}

impl PresentationRepository for InMemoryPresentationRepository {
    async fn get(&self, id: PresentationId) -> Result<Option<Presentation>, RepositoryError> {
        let presentations = self.presentations.read().map_err(Self::poisoned)?;
        Ok(presentations.get(&id).cloned())
    }

    async fn save(&self, presentation: &Presentation) -> Result<(), RepositoryError> {
        let mut presentations = self.presentations.write().map_err(Self::poisoned)?;
        presentations.insert(presentation.id, presentation.clone());
        Ok(())
    }
}
