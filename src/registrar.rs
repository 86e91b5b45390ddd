//! Drives each selected context through connect → provision → register.
//!
//! Contexts are processed strictly one after another in the order the
//! resolver produced them. Whatever happens to a context ends up as exactly
//! one row in the [`Reporter`]; a failing context never stops the ones after
//! it. Only an operator interrupt (the shared [`CancellationToken`]) ends a run
//! early, and then the in-flight context is recorded as cancelled.
use std::sync::Arc;

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::context::{ContextDescriptor, Target};
use crate::control_plane::{ControlPlane, RegistrationPayload};
use crate::error::{Error, Result};
use crate::provider::{cancellable, ClusterApi, KubeClusterApi, TokenProvider};
use crate::reporter::{Reporter, Status};

/// A cluster API handle plus the server URL it talks to
pub struct Connection {
    pub host: String,
    pub api: Arc<dyn ClusterApi>,
}

/// Turns a context into a live cluster connection
#[async_trait::async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, descriptor: &ContextDescriptor) -> Result<Connection>;
}

/// [`ClusterConnector`] that builds real [`kube::Client`]s
#[derive(Clone, Debug, Default)]
pub struct KubeConnector {
    in_cluster_fallback: bool,
}

impl KubeConnector {
    /// With `in_cluster_fallback` set, a context whose kubeconfig entry cannot
    /// be turned into a client config is retried with the pod's own service
    /// account credentials.
    pub fn new(in_cluster_fallback: bool) -> Self {
        Self { in_cluster_fallback }
    }

    async fn client_config(&self, descriptor: &ContextDescriptor) -> Result<kube::Config> {
        match descriptor.source.client_config().await {
            Ok(config) => Ok(config),
            Err(e) if self.in_cluster_fallback => {
                warn!(
                    "Failed to create config for context {} with error: {}; trying in-cluster config",
                    descriptor.name, e
                );
                kube::Config::incluster().map_err(|in_cluster| {
                    Error::client_config(format!(
                        "{} (in-cluster fallback failed: {})",
                        e, in_cluster
                    ))
                })
            }
            Err(e) => Err(Error::client_config(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, descriptor: &ContextDescriptor) -> Result<Connection> {
        let config = self.client_config(descriptor).await?;
        info!("Created config for context {}", descriptor.name);

        let host = config.cluster_url.to_string().trim_end_matches('/').to_string();
        let client = kube::Client::try_from(config)
            .map_err(|e| Error::client_construction(e.to_string()))?;
        info!("Created client for context {}", descriptor.name);

        Ok(Connection {
            host,
            api: Arc::new(KubeClusterApi::new(client)),
        })
    }
}

/// Whether a run visited every target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Completed,
    Interrupted,
}

/// Registers resolved contexts one at a time and reports each outcome
pub struct Registrar<C, P> {
    connector: C,
    control_plane: P,
    provider: TokenProvider,
}

impl<C: ClusterConnector, P: ControlPlane> Registrar<C, P> {
    pub fn new(connector: C, control_plane: P, provider: TokenProvider) -> Self {
        Self {
            connector,
            control_plane,
            provider,
        }
    }

    /// Process `targets` in order, recording one outcome per visited target
    pub async fn run(
        &self,
        targets: Vec<Target>,
        reporter: &mut dyn Reporter,
        cancel: &CancellationToken,
    ) -> RunState {
        for target in targets {
            if cancel.is_cancelled() {
                warn!("Interrupted, not visiting context {} or any after it", target.name);
                return RunState::Interrupted;
            }
            self.process(target, reporter, cancel).await;
        }
        if cancel.is_cancelled() {
            RunState::Interrupted
        } else {
            RunState::Completed
        }
    }

    /// Register a single target and record how it went
    pub async fn process(&self, target: Target, reporter: &mut dyn Reporter, cancel: &CancellationToken) {
        let Target { name, descriptor } = target;
        info!("Working on context {}", name);

        let result = match descriptor {
            Ok(descriptor) => cancellable(cancel, self.register(&descriptor, cancel))
                .await
                .and_then(|registered| registered),
            Err(e) => Err(e),
        };

        match result {
            Ok(body) => {
                info!("Cluster added for context {}", name);
                reporter.record(&name, Status::Success, &body);
            }
            Err(e) => {
                error!("Failed to register context {}: {}", name, e);
                reporter.record(&name, Status::Failed, &e.to_string());
            }
        }
    }

    async fn register(&self, descriptor: &ContextDescriptor, cancel: &CancellationToken) -> Result<String> {
        let connection = self.connector.connect(descriptor).await?;

        info!(
            "Generating service account secret for {}/{} on context {}",
            descriptor.namespace, descriptor.service_account, descriptor.name
        );
        let token = self
            .provider
            .provision(
                connection.api.as_ref(),
                &descriptor.namespace,
                &descriptor.service_account,
                cancel,
            )
            .await?;

        info!("Creating cluster {} in Codefresh", descriptor.selector);
        let payload = RegistrationPayload::service_account(
            connection.host,
            descriptor.selector.clone(),
            token.token,
            token.ca_certificate,
            descriptor.behind_firewall,
        );
        self.control_plane.register(&payload).await
    }
}
