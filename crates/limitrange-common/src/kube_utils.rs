//! Kubernetes client and namespace helpers

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info, warn};

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::wait::{poll_until, PollConfig};
use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Service account the token controller creates in every namespace
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// HTTP status used by admission plugins to refuse a request
pub const STATUS_FORBIDDEN: u16 = 403;
/// HTTP status used by object validation to refuse a request
pub const STATUS_UNPROCESSABLE: u16 = 422;
/// HTTP status for a name that is already taken
pub const STATUS_CONFLICT: u16 = 409;

/// Create a kube client from an optional kubeconfig path.
///
/// With no path the usual inference applies (`KUBECONFIG`, `~/.kube/config`,
/// in-cluster). Transient failures are retried with backoff.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let kubeconfig = kubeconfig.map(Path::to_path_buf);
    retry_with_backoff(&RetryConfig::with_max_attempts(10), "create_kube_client", || {
        let kubeconfig = kubeconfig.clone();
        async move { create_client_inner(kubeconfig.as_deref()).await }
    })
    .await
}

async fn create_client_inner(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!("failed to read kubeconfig {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Ensure a namespace exists with the given labels (idempotent).
///
/// Uses server-side apply so a re-run against a leftover namespace does not
/// fail on "already exists".
pub async fn ensure_namespace(
    client: &Client,
    name: &str,
    labels: &BTreeMap<String, String>,
    field_manager: &str,
) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "labels": labels
        }
    });
    retry_with_backoff(&RetryConfig::default(), "ensure_namespace", || {
        let api = api.clone();
        let ns = ns.clone();
        async move {
            api.patch(name, &PatchParams::apply(field_manager), &Patch::Apply(&ns))
                .await?;
            Ok::<(), Error>(())
        }
    })
    .await?;
    info!(namespace = %name, "Namespace ready");
    Ok(())
}

/// Delete a namespace. A namespace that is already gone counts as deleted.
pub async fn delete_namespace(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(namespace = %name, "Namespace deletion requested");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(namespace = %name, "Namespace already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Wait until the namespace's `default` ServiceAccount exists.
///
/// Pod creation is refused by ServiceAccount admission until the token
/// controller has populated a new namespace.
pub async fn wait_for_default_service_account(
    client: &Client,
    namespace: &str,
    poll: PollConfig,
) -> Result<()> {
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    let description = format!("ServiceAccount {}/{}", namespace, DEFAULT_SERVICE_ACCOUNT);
    poll_until(&description, poll, || {
        let api = api.clone();
        async move { Ok::<bool, Error>(api.get_opt(DEFAULT_SERVICE_ACCOUNT).await?.is_some()) }
    })
    .await
}

/// Whether an API error means the server refused the object on its merits
/// (admission Forbidden or validation Invalid), as opposed to the request
/// failing for some unrelated reason.
pub fn is_admission_rejection(err: &kube::Error) -> bool {
    matches!(
        err,
        kube::Error::Api(ae) if ae.code == STATUS_FORBIDDEN || ae.code == STATUS_UNPROCESSABLE
    )
}

/// Render labels as an equality-based selector (`a=b,c=d`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Log a cleanup failure without letting it replace the run's own result
pub fn log_cleanup_error(what: &str, err: &Error) {
    warn!(resource = %what, error = %err, "Cleanup failed");
}
