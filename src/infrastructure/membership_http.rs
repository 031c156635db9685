use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::config::MembershipConfig;
use crate::core::traits::{MemberAddress, MembershipClient, StoreLiveStatus};
use crate::domain::ClusterRef;
use crate::error::{OperatorError, Result};

/// Membership client speaking to the control plane's HTTP API and to each
/// member's status endpoint
pub struct HttpMembershipClient {
    client: Client,
    config: MembershipConfig,
}

impl HttpMembershipClient {
    pub fn new(config: MembershipConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("rust-quorum-ops/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// `{scheme}://{cluster}-{service}.{namespace}:{port}{delete path}`
    pub fn member_delete_url(&self, cluster: &ClusterRef, member_id: u64) -> Result<Url> {
        let path = self
            .config
            .member_delete_path
            .replace("{id}", &member_id.to_string());
        let url = format!(
            "{}://{}-{}.{}:{}{}",
            self.config.scheme(),
            cluster.name,
            self.config.control_plane_service,
            cluster.namespace,
            self.config.control_plane_port,
            path
        );
        Ok(Url::parse(&url)?)
    }

    /// `{scheme}://{pod}.{peer service}.{namespace}.svc:{port}{status path}`
    pub fn store_status_url(&self, address: &MemberAddress) -> Result<Url> {
        let scheme = if address.tls_enabled || self.config.tls_enabled {
            "https"
        } else {
            "http"
        };
        let url = format!(
            "{}://{}:{}{}",
            scheme,
            address.host(),
            self.config.status_port,
            self.config.store_status_path
        );
        Ok(Url::parse(&url)?)
    }
}

#[async_trait]
impl MembershipClient for HttpMembershipClient {
    async fn delete_member(&self, cluster: &ClusterRef, member_id: u64) -> Result<()> {
        let url = self.member_delete_url(cluster, member_id)?;
        let response = self.client.delete(url.clone()).send().await?;

        match response.status() {
            status if status.is_success() => {
                info!(cluster = %cluster, member_id = member_id, "Member removed from membership");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!(cluster = %cluster, member_id = member_id, "Member already absent");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(OperatorError::ExternalServiceError(format!(
                    "failed to delete member {} via {}: {} {}",
                    member_id,
                    url,
                    status,
                    body.trim()
                )))
            }
        }
    }

    async fn get_store_status(&self, address: &MemberAddress) -> Result<StoreLiveStatus> {
        let url = self.store_status_url(address)?;
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(OperatorError::ExternalServiceError(format!(
                "failed to get store status from {}: {}",
                url,
                response.status()
            )));
        }

        let body = response.text().await?;
        Ok(StoreLiveStatus::parse(&body))
    }
}
