//! Request dispatch
//!
//! Maps each control request variant onto the orchestrator and wraps the
//! outcome in the response envelope.

use crate::control::{ApiError, ApiRequest, ApiResponse, ProvisionRequest};
use crate::provision::{ClientIdentityRequest, ProvisionedClient, Provisioner};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Dispatches control requests to the provisioner
pub struct RequestHandler {
    provisioner: Arc<Provisioner>,
}

impl RequestHandler {
    /// Create a handler around a provisioner
    pub fn new(provisioner: Arc<Provisioner>) -> Self {
        Self { provisioner }
    }

    /// Handle one API request
    pub async fn handle_request(&self, request: ApiRequest) -> ApiResponse {
        debug!("Handling request {}: {:?}", request.id, request.request);

        let result = match &request.request {
            ProvisionRequest::GenerateConfig => {
                self.handle_provision(ClientIdentityRequest::GenerateKeys)
                    .await
            }
            ProvisionRequest::ConfigForKey { public_key } => {
                self.handle_provision(ClientIdentityRequest::CallerPublicKey(
                    public_key.clone(),
                ))
                .await
            }
            ProvisionRequest::Revoke { public_key } => self.handle_revoke(public_key).await,
            ProvisionRequest::ListPeers => self.handle_list_peers().await,
            ProvisionRequest::PoolStatus => self.handle_pool_status().await,
        };

        match result {
            Ok(data) => {
                info!("Request {} completed successfully", request.id);
                ApiResponse::success(request.id, data)
            }
            Err(e) => {
                error!("Request {} failed: {}", request.id, e);
                ApiResponse::error(request.id, e)
            }
        }
    }

    async fn handle_provision(
        &self,
        identity: ClientIdentityRequest,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        let client = self.provisioner.provision(identity).await?;
        Ok(Some(client_json(&client)))
    }

    async fn handle_revoke(
        &self,
        public_key: &str,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        self.provisioner.revoke(public_key).await?;
        Ok(Some(serde_json::json!({
            "public_key": public_key,
            "revoked": true,
        })))
    }

    async fn handle_list_peers(&self) -> Result<Option<serde_json::Value>, ApiError> {
        let peers = self.provisioner.list_peers().await?;
        let peers: Vec<serde_json::Value> = peers
            .iter()
            .map(|p| {
                serde_json::json!({
                    "public_key": p.public_key.to_base64(),
                    "allowed_ips": p.allowed_ips,
                    "endpoint": p.endpoint.map(|e| e.to_string()),
                })
            })
            .collect();
        Ok(Some(serde_json::json!({ "peers": peers })))
    }

    async fn handle_pool_status(&self) -> Result<Option<serde_json::Value>, ApiError> {
        let (used, free) = self.provisioner.pool_usage().await;
        Ok(Some(serde_json::json!({
            "used": used,
            "free": free,
        })))
    }
}

/// Response payload for a provisioned client.
///
/// The artifact text is the response's single copy of a generated private
/// key; it goes to the requester and nowhere else.
fn client_json(client: &ProvisionedClient) -> serde_json::Value {
    serde_json::json!({
        "public_key": client.public_key.to_base64(),
        "address": client.address.to_string(),
        "config": client.artifact.text,
        "path": client.artifact_path.to_string_lossy(),
    })
}
