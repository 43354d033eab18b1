//! Shared setup for cluster tests

use std::collections::BTreeMap;
use std::path::PathBuf;

use kube::Client;

use limitrange_common::kube_utils::{
    create_client, delete_namespace, ensure_namespace, wait_for_default_service_account,
};
use limitrange_conformance::config::{run_id, ConformanceConfig};
use limitrange_conformance::Result;

/// Field manager for objects created by the cluster tests
const TEST_FIELD_MANAGER: &str = "limitrange-kind-tests";

/// Connect to the test cluster
pub async fn ensure_test_cluster() -> Result<Client> {
    let kubeconfig = std::env::var_os("LIMITRANGE_KUBECONFIG").map(PathBuf::from);
    create_client(kubeconfig.as_deref()).await
}

/// A namespace owned by one test
pub struct TestNamespace {
    client: Client,
    name: String,
}

impl TestNamespace {
    /// Create `lr-<suffix>-<run id>` and wait until pods can be created in it
    pub async fn create(client: &Client, suffix: &str) -> Result<Self> {
        let name = format!("lr-{}-{}", suffix, run_id());
        let labels = BTreeMap::from([(
            "app.kubernetes.io/managed-by".to_string(),
            TEST_FIELD_MANAGER.to_string(),
        )]);
        ensure_namespace(client, &name, &labels, TEST_FIELD_MANAGER).await?;
        wait_for_default_service_account(client, &name, ConformanceConfig::default().setup_poll())
            .await?;
        Ok(Self {
            client: client.clone(),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delete the namespace; failures are only logged
    pub async fn cleanup(self) {
        if let Err(e) = delete_namespace(&self.client, &self.name).await {
            eprintln!("cleanup of namespace {} failed: {}", self.name, e);
        }
    }
}
