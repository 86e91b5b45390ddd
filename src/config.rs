//! Command line and environment configuration.
//!
//! Flags are parsed with clap and folded into a [`Config`], which is the only
//! thing the rest of the crate sees. The selection flags are resolved by
//! precedence (`--all` wins over `--context`, which wins over the default of
//! the current context) into a single [`Selection`].
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Namespace used when none is given on the command line
pub const DEFAULT_NAMESPACE: &str = "default";
/// Service account used when none is given on the command line
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
/// Control plane used when `--api-host` is not set
pub const DEFAULT_API_HOST: &str = "https://g.codefresh.io/";

#[derive(Parser, Debug)]
#[command(name = "kube-enlist")]
#[command(about = "Register kubeconfig contexts with the Codefresh control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create clusters in Codefresh. Default is to add current-context
    Create(Flags),
}

#[derive(Args, Debug)]
struct Flags {
    /// Turn on verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Add all clusters from config file, default is only current context
    #[arg(short, long)]
    all: bool,

    /// Add a specific context
    #[arg(short, long)]
    context: Option<String>,

    /// Namespace holding the service account (with --context)
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Service account to mint a token for (with --context)
    #[arg(long, default_value = DEFAULT_SERVICE_ACCOUNT)]
    serviceaccount: String,

    /// Register the cluster as reachable only through an agent (with --context)
    #[arg(long)]
    behind_firewall: bool,

    /// Name to register the cluster under instead of the context name (with --context)
    #[arg(long)]
    name_overwrite: Option<String>,

    /// Codefresh API token
    #[arg(long, env = "CODEFRESH_TOKEN", hide_env_values = true)]
    token: String,

    /// Kubernetes config file to be used as input
    #[arg(long, env = "KUBECONFIG")]
    config: Option<PathBuf>,

    /// Codefresh API host
    #[arg(long, env = "CODEFRESH_URL", default_value = DEFAULT_API_HOST)]
    api_host: String,

    /// Fall back to the in-cluster service account when a context cannot be turned into a client config
    #[arg(long)]
    in_cluster_fallback: bool,
}

/// Which kubeconfig contexts a run operates on
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// The kubeconfig's `current-context`
    Current,
    /// A single context chosen by name
    Named(NamedSelection),
    /// Every context in the kubeconfig
    All,
}

/// Parameters that only apply when a context is chosen by name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedSelection {
    pub context: String,
    pub namespace: String,
    pub service_account: String,
    pub behind_firewall: bool,
    pub display_name: Option<String>,
}

impl NamedSelection {
    /// Select `context` with the default namespace and service account
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            behind_firewall: false,
            display_name: None,
        }
    }
}

/// Settings for a single run
#[derive(Clone, Debug)]
pub struct Config {
    pub selection: Selection,
    pub kubeconfig_path: PathBuf,
    pub api_host: String,
    pub api_token: String,
    pub verbose: bool,
    pub in_cluster_fallback: bool,
}

impl Config {
    /// Build a config from the process arguments and environment, exiting
    /// with a usage message if they are invalid
    pub fn new_from_flags() -> Self {
        Self::from_cli(Cli::parse())
    }

    /// Build a config from an explicit argument list
    pub fn try_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Cli::try_parse_from(args).map(Self::from_cli)
    }

    fn from_cli(cli: Cli) -> Self {
        match cli.command {
            Command::Create(flags) => Self::from_flags(flags),
        }
    }

    fn from_flags(flags: Flags) -> Self {
        let selection = if flags.all {
            Selection::All
        } else if let Some(context) = flags.context.filter(|c| !c.is_empty()) {
            Selection::Named(NamedSelection {
                context,
                namespace: flags.namespace,
                service_account: flags.serviceaccount,
                behind_firewall: flags.behind_firewall,
                display_name: flags.name_overwrite.filter(|n| !n.is_empty()),
            })
        } else {
            Selection::Current
        };

        Self {
            selection,
            kubeconfig_path: flags.config.unwrap_or_else(default_kubeconfig_path),
            api_host: flags.api_host,
            api_token: flags.token,
            verbose: flags.verbose,
            in_cluster_fallback: flags.in_cluster_fallback,
        }
    }

    /// Log filter used unless `RUST_LOG` says otherwise
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "info"
        } else {
            "error"
        }
    }
}

/// `$HOME/.kube/config`
pub fn default_kubeconfig_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".kube")
        .join("config")
}
