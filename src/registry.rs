use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use crate::errors::AppError;
use crate::models::Model;

/// Source of the platform's hosted model catalog.
#[async_trait]
pub trait HostedCatalog: Send + Sync {
    async fn hosted_models(&self) -> Result<Vec<Model>, AppError>;
}

/// Source of a user's registered custom endpoints, mapped to catalog entries.
#[async_trait]
pub trait CustomCatalog: Send + Sync {
    async fn custom_models(&self, user_id: &str) -> Result<Vec<Model>, AppError>;
}

/// Process-wide model catalog. The visible catalog is an `Arc` swapped
/// atomically under a write lock, so readers observe either the previous
/// build or the next one, never a partial list. Rebuilds are serialized
/// through `refresh_gate`: concurrent lazy initializations collapse into one
/// underlying catalog build and every waiter sees the same result.
pub struct ModelRegistry {
    hosted: Arc<dyn HostedCatalog>,
    custom: Arc<dyn CustomCatalog>,
    catalog: RwLock<Arc<Vec<Model>>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl ModelRegistry {
    pub fn new(hosted: Arc<dyn HostedCatalog>, custom: Arc<dyn CustomCatalog>) -> Self {
        Self {
            hosted,
            custom,
            catalog: RwLock::new(Arc::new(Vec::new())),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The currently visible catalog, or `None` before the first build.
    pub fn current(&self) -> Option<Arc<Vec<Model>>> {
        let catalog = self.catalog.read().expect("catalog lock poisoned").clone();
        if catalog.is_empty() { None } else { Some(catalog) }
    }

    fn swap(&self, next: Vec<Model>) -> Arc<Vec<Model>> {
        let next = Arc::new(next);
        *self.catalog.write().expect("catalog lock poisoned") = next.clone();
        next
    }

    /// Hosted models always; the caller's custom endpoints appended after
    /// them when a user is given. Hosted-first order is what makes
    /// first-model-wins default selection deterministic.
    async fn build(&self, user_id: Option<&str>) -> Result<Vec<Model>, AppError> {
        let mut models = self.hosted.hosted_models().await?;
        if let Some(user_id) = user_id {
            models.extend(self.custom.custom_models(user_id).await?);
        }
        info!("Model catalog built: {} entries", models.len());
        Ok(models)
    }

    /// Lazily populates the catalog. Double-checked around the refresh gate:
    /// the first caller builds, concurrent callers wait on the gate and then
    /// observe the fully-populated catalog without a second build.
    pub async fn ensure(&self) -> Result<Arc<Vec<Model>>, AppError> {
        if let Some(catalog) = self.current() {
            return Ok(catalog);
        }
        let _gate = self.refresh_gate.lock().await;
        if let Some(catalog) = self.current() {
            return Ok(catalog);
        }
        let models = self.build(None).await?;
        Ok(self.swap(models))
    }

    /// Forces a rebuild, including `user_id`'s custom endpoints when given,
    /// and atomically replaces the visible catalog.
    pub async fn refresh(&self, user_id: Option<&str>) -> Result<Arc<Vec<Model>>, AppError> {
        let _gate = self.refresh_gate.lock().await;
        let models = self.build(user_id).await?;
        Ok(self.swap(models))
    }

    /// Returns `preferred` if it names a catalog entry, else the first entry.
    /// An empty catalog is fatal for anything needing a default model.
    pub async fn valid_model_id(&self, preferred: Option<&str>) -> Result<String, AppError> {
        let catalog = self.ensure().await?;
        if let Some(id) = preferred {
            if catalog.iter().any(|m| m.id == id) {
                return Ok(id.to_string());
            }
        }
        catalog
            .first()
            .map(|m| m.id.clone())
            .ok_or(AppError::NoModelsAvailable)
    }

    /// Looks up `id` in the currently visible catalog without building it.
    pub fn find(&self, id: &str) -> Option<Model> {
        self.current()?.iter().find(|m| m.id == id).cloned()
    }

    /// Looks up `id` in the current catalog; on a miss with an authenticated
    /// user, rebuilds including their custom endpoints and retries once.
    pub async fn resolve(&self, id: &str, user_id: Option<&str>) -> Result<Model, AppError> {
        self.ensure().await?;
        if let Some(model) = self.find(id) {
            return Ok(model);
        }
        if let Some(user_id) = user_id {
            self.refresh(Some(user_id)).await?;
            if let Some(model) = self.find(id) {
                return Ok(model);
            }
        }
        Err(AppError::ModelNotFound { id: id.to_string() })
    }
}
