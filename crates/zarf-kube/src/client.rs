//! Cluster handle

use kube::Client;

use crate::error::Result;
use crate::release::ResourceManager;
use crate::state::{self, ZarfState};

/// A connected cluster with discovery-backed resource management
pub struct Cluster {
    client: Client,
    resources: ResourceManager,
}

impl Cluster {
    /// Connect using the ambient kubeconfig (KUBECONFIG or in-cluster)
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await?;
        Self::with_client(client).await
    }

    pub async fn with_client(client: Client) -> Result<Self> {
        let resources = ResourceManager::new(client.clone()).await?;
        Ok(Self { client, resources })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub async fn load_state(&self) -> Result<ZarfState> {
        state::load(&self.client).await
    }

    pub async fn save_state(&self, state: &ZarfState) -> Result<()> {
        state::save(&self.client, state).await
    }
}
