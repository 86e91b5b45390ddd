//! Turns a kubeconfig and a [`Selection`] into the list of contexts to visit.
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use kube::config::{KubeConfigOptions, Kubeconfig};
use log::debug;

use crate::config::{Selection, DEFAULT_NAMESPACE, DEFAULT_SERVICE_ACCOUNT};
use crate::error::{Error, Result};

/// Report name used when the kubeconfig has no current context
pub const CURRENT_CONTEXT_PLACEHOLDER: &str = "current-context";

/// Where a context's client configuration comes from.
///
/// Holds the whole kubeconfig (shared between all contexts of a run) plus the
/// options that pick one context out of it. Cluster and user overrides are
/// always left empty so the server URL is the one the context itself names.
#[derive(Clone)]
pub struct ClientConfigSource {
    kubeconfig: Arc<Kubeconfig>,
    options: KubeConfigOptions,
}

impl ClientConfigSource {
    fn for_context(kubeconfig: Arc<Kubeconfig>, context: &str) -> Self {
        Self {
            kubeconfig,
            options: KubeConfigOptions {
                context: Some(context.to_string()),
                cluster: None,
                user: None,
            },
        }
    }

    /// Derive a client config for the selected context
    pub async fn client_config(&self) -> std::result::Result<kube::Config, kube::config::KubeconfigError> {
        kube::Config::from_custom_kubeconfig(self.kubeconfig.as_ref().clone(), &self.options).await
    }

    pub fn options(&self) -> &KubeConfigOptions {
        &self.options
    }
}

// KubeConfigOptions has no Debug impl, and the kubeconfig may hold credentials.
impl fmt::Debug for ClientConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfigSource")
            .field("context", &self.options.context)
            .field("cluster", &self.options.cluster)
            .field("user", &self.options.user)
            .finish_non_exhaustive()
    }
}

/// A context to register and the parameters it is registered with
#[derive(Clone, Debug)]
pub struct ContextDescriptor {
    pub name: String,
    /// Name the cluster is registered under on the control plane
    pub selector: String,
    pub namespace: String,
    pub service_account: String,
    pub behind_firewall: bool,
    pub source: ClientConfigSource,
}

/// One entry of a resolved selection.
///
/// Resolution failures are kept next to the name they belong to so that they
/// are reported like any other per-context failure.
#[derive(Debug)]
pub struct Target {
    pub name: String,
    pub descriptor: Result<ContextDescriptor>,
}

impl Target {
    fn resolved(descriptor: ContextDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            descriptor: Ok(descriptor),
        }
    }

    fn failed(name: impl Into<String>, error: Error) -> Self {
        Self {
            name: name.into(),
            descriptor: Err(error),
        }
    }
}

/// Read the kubeconfig file at `path`
pub fn load_kubeconfig(path: &Path) -> Result<Arc<Kubeconfig>> {
    Kubeconfig::read_from(path)
        .map(Arc::new)
        .map_err(|source| Error::Kubeconfig {
            path: path.to_path_buf(),
            source,
        })
}

/// Produce the contexts a run visits, in the kubeconfig's own order
pub fn resolve(kubeconfig: Arc<Kubeconfig>, selection: &Selection) -> Vec<Target> {
    match selection {
        Selection::All => kubeconfig
            .contexts
            .iter()
            .map(|named| {
                debug!("Found context {}", named.name);
                Target::resolved(default_descriptor(kubeconfig.clone(), &named.name))
            })
            .collect(),
        Selection::Named(named) => {
            if !has_context(&kubeconfig, &named.context) {
                return vec![Target::failed(
                    named.context.clone(),
                    Error::ContextNotFound {
                        name: named.context.clone(),
                    },
                )];
            }
            let source = ClientConfigSource::for_context(kubeconfig, &named.context);
            vec![Target::resolved(ContextDescriptor {
                name: named.context.clone(),
                selector: named
                    .display_name
                    .clone()
                    .unwrap_or_else(|| named.context.clone()),
                namespace: named.namespace.clone(),
                service_account: named.service_account.clone(),
                behind_firewall: named.behind_firewall,
                source,
            })]
        }
        Selection::Current => {
            let current = match kubeconfig.current_context.as_deref() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    return vec![Target::failed(
                        CURRENT_CONTEXT_PLACEHOLDER,
                        Error::CurrentContextUndefined,
                    )]
                }
            };
            if !has_context(&kubeconfig, &current) {
                return vec![Target::failed(
                    current.clone(),
                    Error::ContextNotFound { name: current },
                )];
            }
            vec![Target::resolved(default_descriptor(kubeconfig, &current))]
        }
    }
}

fn has_context(kubeconfig: &Kubeconfig, name: &str) -> bool {
    kubeconfig.contexts.iter().any(|c| c.name == name)
}

fn default_descriptor(kubeconfig: Arc<Kubeconfig>, name: &str) -> ContextDescriptor {
    ContextDescriptor {
        name: name.to_string(),
        selector: name.to_string(),
        namespace: DEFAULT_NAMESPACE.to_string(),
        service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
        behind_firewall: false,
        source: ClientConfigSource::for_context(kubeconfig, name),
    }
}
