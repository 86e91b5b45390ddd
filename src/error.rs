use std::path::PathBuf;

/// Result type used throughout the registration workflow
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while registering a context.
///
/// Apart from [`Error::Kubeconfig`], which stops the run before any context
/// is visited, every variant ends up as the message of a FAILED row in the
/// final report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to load kubeconfig {}: {source}", path.display())]
    Kubeconfig {
        path: PathBuf,
        source: kube::config::KubeconfigError,
    },

    #[error("context {name:?} not found in kubeconfig")]
    ContextNotFound { name: String },

    #[error("kubeconfig has no current-context set")]
    CurrentContextUndefined,

    #[error("failed to create config with error: {0}")]
    ClientConfig(String),

    #[error("failed to create kubernetes client with error: {0}")]
    ClientConstruction(String),

    #[error("failed to create service-account token secret: {0:#}")]
    CreateSecret(anyhow::Error),

    #[error("failed to patch service-account with new secret: {0:#}")]
    AttachSecret(anyhow::Error),

    #[error("failed to get service-account secret: {0:#}")]
    FetchSecret(anyhow::Error),

    #[error("timed out waiting for secret {secret} to contain token after {attempts} attempts")]
    TokenProvisioningTimeout { secret: String, attempts: u32 },

    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("failed to test cluster (status {status}): {body}")]
    ConnectionTestFailed { status: u16, body: String },

    #[error("failed to create cluster (status {status}): {body}")]
    RegistrationRejected { status: u16, body: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn client_config(message: impl Into<String>) -> Self {
        Error::ClientConfig(message.into())
    }

    pub fn client_construction(message: impl Into<String>) -> Self {
        Error::ClientConstruction(message.into())
    }

    /// Whether this error came from an operator interrupt rather than from the
    /// context being processed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_message_keeps_remote_body() {
        let err = Error::RegistrationRejected {
            status: 409,
            body: r#"{"message":"cluster already exists"}"#.to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("409"));
        assert!(message.contains(r#"{"message":"cluster already exists"}"#));
    }

    #[test]
    fn anyhow_sources_are_rendered_as_a_chain() {
        let inner = anyhow::anyhow!("connection refused").context("POST secrets");
        let message = Error::CreateSecret(inner).to_string();
        assert_eq!(
            message,
            "failed to create service-account token secret: POST secrets: connection refused"
        );
    }

    #[test]
    fn timeout_is_not_cancellation() {
        let timeout = Error::TokenProvisioningTimeout {
            secret: "default-token-abcde".to_string(),
            attempts: 15,
        };
        assert!(!timeout.is_cancelled());
        assert!(Error::Cancelled.is_cancelled());
    }
}
