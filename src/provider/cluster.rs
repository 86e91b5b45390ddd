use std::collections::BTreeMap;

use anyhow::Context;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams, PostParams};
use kube::Api;
use log::trace;

const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";
const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// The handful of cluster calls token provisioning needs.
///
/// [`KubeClusterApi`] is the real implementation; tests substitute a fake so
/// the polling logic can run without a cluster.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a service-account token secret bound to `service_account` and
    /// return the name the cluster generated for it
    async fn create_token_secret(&self, namespace: &str, service_account: &str) -> anyhow::Result<String>;

    /// Add `secret` to the service account's list of secrets
    async fn attach_secret(&self, namespace: &str, service_account: &str, secret: &str) -> anyhow::Result<()>;

    /// Fetch a secret by name
    async fn get_secret(&self, namespace: &str, name: &str) -> anyhow::Result<Secret>;
}

/// [`ClusterApi`] backed by a [`kube::Client`]
#[derive(Clone)]
pub struct KubeClusterApi {
    client: kube::Client,
}

impl KubeClusterApi {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeClusterApi {
    async fn create_token_secret(&self, namespace: &str, service_account: &str) -> anyhow::Result<String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let created = secrets
            .create(&PostParams::default(), &token_secret(service_account))
            .await
            .with_context(|| format!("creating token secret in namespace {}", namespace))?;
        created
            .metadata
            .name
            .context("cluster did not assign a name to the token secret")
    }

    async fn attach_secret(&self, namespace: &str, service_account: &str, secret: &str) -> anyhow::Result<()> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "secrets": [{ "name": secret }] });
        trace!("Patching service account {}/{}: {}", namespace, service_account, patch);
        accounts
            .patch(service_account, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .with_context(|| format!("patching service account {}/{}", namespace, service_account))?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> anyhow::Result<Secret> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        secrets
            .get(name)
            .await
            .with_context(|| format!("reading secret {}/{}", namespace, name))
    }
}

/// The secret the token controller fills in for `service_account`.
///
/// Only a name prefix is given; the API server appends a random suffix.
pub fn token_secret(service_account: &str) -> Secret {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
        service_account.to_string(),
    );
    Secret {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-token-", service_account)),
            annotations: Some(annotations),
            ..Default::default()
        },
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    }
}
