use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

use crate::errors::AppError;
use crate::models::{Deployment, Model, ModelBackend, PlatformUser};
use crate::registry::HostedCatalog;

/// HTTP client for the model platform: token verification plus the hosted
/// model/deployment catalog. Construction is cheap; the inner reqwest client
/// is shared and cloning is shallow.
#[derive(Clone)]
pub struct PlatformClient {
    base_url: String,
    http: reqwest::Client,
}

/// Hosted model as returned by the platform catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct HostedModel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Load-balanced deployment of a hosted model, joined to its model by `m_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct HostedDeployment {
    pub id: String,
    pub m_id: String,
    pub lb_port: u16,
}

impl PlatformClient {
    pub fn new(base_url: &str, http: reqwest::Client) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn unavailable(&self, e: reqwest::Error) -> AppError {
        error!("Platform request failed ({}): {e}", self.base_url);
        AppError::PlatformUnavailable { url: self.base_url.clone() }
    }

    /// Verifies a bearer credential against the platform; any non-success
    /// response means the session is invalid.
    pub async fn verify_token(&self, token: &str) -> Result<PlatformUser, AppError> {
        let response = self
            .http
            .get(format!("{}/auth/verify-token", self.base_url))
            .header("Cookie", format!("access_token={token}"))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        if !response.status().is_success() {
            return Err(AppError::Unauthorized);
        }

        response
            .json::<PlatformUser>()
            .await
            .map_err(|e| AppError::Unexpected(format!("Malformed verify-token response: {e}")))
    }

    pub async fn list_models(&self) -> Result<Vec<HostedModel>, AppError> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?
            .error_for_status()
            .map_err(|e| self.unavailable(e))?;

        response
            .json::<Vec<HostedModel>>()
            .await
            .map_err(|e| AppError::Unexpected(format!("Malformed model list: {e}")))
    }

    pub async fn list_deployments(&self) -> Result<Vec<HostedDeployment>, AppError> {
        let response = self
            .http
            .get(format!("{}/serving/deployments", self.base_url))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?
            .error_for_status()
            .map_err(|e| self.unavailable(e))?;

        response
            .json::<Vec<HostedDeployment>>()
            .await
            .map_err(|e| AppError::Unexpected(format!("Malformed deployment list: {e}")))
    }
}

/// Maps a hosted model and its (optional) deployment to a catalog entry.
/// Models without a deployment stay listable but fail resolution with
/// `InvalidModelConfiguration` when a turn targets them.
pub fn map_hosted_model(model: &HostedModel, deployment: Option<&HostedDeployment>) -> Model {
    let api_identifier = match &model.version {
        Some(version) => format!("{}@{version}", model.name),
        None => model.name.clone(),
    };
    Model {
        id: model.id.clone(),
        label: model.name.clone(),
        api_identifier,
        description: model.description.clone().unwrap_or_default(),
        backend: ModelBackend::Hosted {
            deployment: deployment.map(|d| Deployment { id: d.id.clone(), lb_port: d.lb_port }),
        },
    }
}

#[async_trait]
impl HostedCatalog for PlatformClient {
    async fn hosted_models(&self) -> Result<Vec<Model>, AppError> {
        let (models, deployments) =
            tokio::try_join!(self.list_models(), self.list_deployments())?;

        Ok(models
            .iter()
            .map(|m| {
                let deployment = deployments.iter().find(|d| d.m_id == m.id);
                map_hosted_model(m, deployment)
            })
            .collect())
    }
}
