//! Mints service-account bearer tokens inside a target cluster.
//!
//! The crate provides the [`TokenProvider`] type which creates a
//! service-account token secret, attaches it to the service account and then
//! waits for the token controller to fill it in.
//!
//! # Example
//! ```rust,no_run
//! use kube_enlist::provider::{KubeClusterApi, TokenProvider};
//! use tokio_util::sync::CancellationToken;
//!
//! async {
//!     let client = kube::Client::try_default().await.unwrap();
//!     let api = KubeClusterApi::new(client);
//!
//!     let provider = TokenProvider::default();
//!     let token = provider
//!         .provision(&api, "default", "default", &CancellationToken::new())
//!         .await
//!         .unwrap();
//!     println!("got a {} byte token", token.token.len());
//! };
//! ```
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

mod cluster;
pub use cluster::{token_secret, ClusterApi, KubeClusterApi};

const TOKEN_KEY: &str = "token";
const CA_CERT_KEY: &str = "ca.crt";

/// How often and how many times to look at the token secret
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 15,
        }
    }
}

/// Token material read back from a populated service-account secret
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceAccountToken {
    pub token: Vec<u8>,
    pub ca_certificate: Vec<u8>,
}

// Keep bearer tokens out of logs.
impl std::fmt::Debug for ServiceAccountToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountToken")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("ca_certificate", &format_args!("<{} bytes>", self.ca_certificate.len()))
            .finish()
    }
}

impl ServiceAccountToken {
    /// Extract the token from a secret, or `None` while the token controller
    /// has not populated it yet
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let data = secret.data.as_ref()?;
        let token = data.get(TOKEN_KEY).filter(|t| !t.0.is_empty())?;
        Some(Self {
            token: token.0.clone(),
            ca_certificate: data.get(CA_CERT_KEY).map(|c| c.0.clone()).unwrap_or_default(),
        })
    }
}

/// Creates token secrets and waits for them to be populated
#[derive(Clone, Debug, Default)]
pub struct TokenProvider {
    settings: PollSettings,
}

impl TokenProvider {
    pub fn new(settings: PollSettings) -> Self {
        Self { settings }
    }

    /// Mint a token for `service_account` in `namespace`.
    ///
    /// The secret is fetched once per poll interval, starting one interval
    /// after the service account was patched. A fetch error aborts right away;
    /// only a secret without token data is retried. Cancelling `cancel` stops
    /// the wait at the next await point with [`Error::Cancelled`].
    pub async fn provision<A: ClusterApi + ?Sized>(
        &self,
        api: &A,
        namespace: &str,
        service_account: &str,
        cancel: &CancellationToken,
    ) -> Result<ServiceAccountToken> {
        debug!(
            "Creating secret for service-account token {}/{}",
            namespace, service_account
        );
        let secret_name = cancellable(cancel, api.create_token_secret(namespace, service_account))
            .await?
            .map_err(Error::CreateSecret)?;
        debug!(
            "Created secret {} for service-account token {}/{}",
            secret_name, namespace, service_account
        );

        cancellable(cancel, api.attach_secret(namespace, service_account, &secret_name))
            .await?
            .map_err(Error::AttachSecret)?;
        debug!(
            "Added secret {} to service-account {}/{} secrets",
            secret_name, namespace, service_account
        );

        let interval = self.settings.interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        for attempt in 1..=self.settings.max_attempts {
            cancellable(cancel, ticker.tick()).await?;

            let secret = cancellable(cancel, api.get_secret(namespace, &secret_name))
                .await?
                .map_err(Error::FetchSecret)?;
            match ServiceAccountToken::from_secret(&secret) {
                Some(token) => {
                    info!(
                        "Got service-account token from secret {} on attempt {}",
                        secret_name, attempt
                    );
                    return Ok(token);
                }
                None => debug!(
                    "Secret {} is missing service-account token (attempt {}/{})",
                    secret_name, attempt, self.settings.max_attempts
                ),
            }
        }

        Err(Error::TokenProvisioningTimeout {
            secret: secret_name,
            attempts: self.settings.max_attempts,
        })
    }
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = fut => Ok(output),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    pub(crate) const TOKEN: &[u8] = b"eyJhbGciOiJSUzI1NiJ9.fake";
    pub(crate) const CA: &[u8] = b"-----BEGIN CERTIFICATE-----\nfake\n-----END CERTIFICATE-----\n";

    /// Cluster whose token secret becomes ready on a chosen fetch
    #[derive(Default)]
    pub(crate) struct FakeCluster {
        pub ready_on: Option<u32>,
        pub fail_fetch_on: Option<u32>,
        pub fail_create: bool,
        pub fetches: AtomicU32,
        pub attached: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeCluster {
        pub fn ready_on(attempt: u32) -> Self {
            Self {
                ready_on: Some(attempt),
                ..Default::default()
            }
        }

        pub fn never_ready() -> Self {
            Self::default()
        }

        pub fn fetches(&self) -> u32 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ClusterApi for FakeCluster {
        async fn create_token_secret(&self, _namespace: &str, service_account: &str) -> anyhow::Result<String> {
            if self.fail_create {
                anyhow::bail!("secrets is forbidden: User \"system:anonymous\" cannot create resource \"secrets\"");
            }
            Ok(format!("{}-token-x7k2p", service_account))
        }

        async fn attach_secret(&self, namespace: &str, service_account: &str, secret: &str) -> anyhow::Result<()> {
            self.attached.lock().unwrap().push((
                namespace.to_string(),
                service_account.to_string(),
                secret.to_string(),
            ));
            Ok(())
        }

        async fn get_secret(&self, _namespace: &str, name: &str) -> anyhow::Result<Secret> {
            let attempt = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_fetch_on == Some(attempt) {
                anyhow::bail!("secrets {:?} not found", name);
            }
            let mut secret = Secret::default();
            secret.metadata.name = Some(name.to_string());
            if self.ready_on.map_or(false, |ready| attempt >= ready) {
                let mut data = BTreeMap::new();
                data.insert(TOKEN_KEY.to_string(), ByteString(TOKEN.to_vec()));
                data.insert(CA_CERT_KEY.to_string(), ByteString(CA.to_vec()));
                secret.data = Some(data);
            } else if attempt % 2 == 0 {
                // Alternate between "no data at all" and "empty token".
                let mut data = BTreeMap::new();
                data.insert(TOKEN_KEY.to_string(), ByteString(Vec::new()));
                secret.data = Some(data);
            }
            Ok(secret)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_token_on_first_ready_attempt() {
        let cluster = FakeCluster::ready_on(4);
        let started = tokio::time::Instant::now();

        let token = TokenProvider::default()
            .provision(&cluster, "default", "default", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(token.token, TOKEN);
        assert_eq!(token.ca_certificate, CA);
        assert_eq!(cluster.fetches(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn attaches_generated_secret_to_service_account() {
        let cluster = FakeCluster::ready_on(1);
        TokenProvider::default()
            .provision(&cluster, "codefresh", "registrar", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *cluster.attached.lock().unwrap(),
            vec![(
                "codefresh".to_string(),
                "registrar".to_string(),
                "registrar-token-x7k2p".to_string()
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_retry_budget() {
        let cluster = FakeCluster::never_ready();
        let started = tokio::time::Instant::now();

        let err = TokenProvider::default()
            .provision(&cluster, "default", "default", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::TokenProvisioningTimeout { secret, attempts } => {
                assert_eq!(secret, "default-token-x7k2p");
                assert_eq!(attempts, 15);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(cluster.fetches(), 15);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_last_attempt_is_not_a_timeout() {
        let cluster = FakeCluster::ready_on(15);
        let token = TokenProvider::default()
            .provision(&cluster, "default", "default", &CancellationToken::new())
            .await;
        assert!(token.is_ok());
        assert_eq!(cluster.fetches(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_error_is_not_retried() {
        let cluster = FakeCluster {
            ready_on: Some(5),
            fail_fetch_on: Some(2),
            ..Default::default()
        };

        let err = TokenProvider::default()
            .provision(&cluster, "default", "default", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FetchSecret(_)));
        assert!(err.to_string().contains("not found"));
        assert_eq!(cluster.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_skips_polling() {
        let cluster = FakeCluster {
            fail_create: true,
            ..Default::default()
        };

        let err = TokenProvider::default()
            .provision(&cluster, "default", "default", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CreateSecret(_)));
        assert!(cluster.attached.lock().unwrap().is_empty());
        assert_eq!(cluster.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait_within_one_interval() {
        let cluster = FakeCluster::never_ready();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();

        let err = TokenProvider::default()
            .provision(&cluster, "default", "default", &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(cluster.fetches(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(3500));
    }

    #[tokio::test]
    async fn already_cancelled_does_not_touch_the_cluster() {
        let cluster = FakeCluster::ready_on(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = TokenProvider::default()
            .provision(&cluster, "default", "default", &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(cluster.attached.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn custom_poll_settings() {
        let cluster = FakeCluster::never_ready();
        let provider = TokenProvider::new(PollSettings {
            interval: Duration::from_millis(200),
            max_attempts: 3,
        });
        let started = tokio::time::Instant::now();

        let err = provider
            .provision(&cluster, "default", "default", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TokenProvisioningTimeout { attempts: 3, .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[test]
    fn secret_without_ca_still_yields_token() {
        let mut data = BTreeMap::new();
        data.insert(TOKEN_KEY.to_string(), ByteString(TOKEN.to_vec()));
        let secret = Secret {
            data: Some(data),
            ..Default::default()
        };
        let token = ServiceAccountToken::from_secret(&secret).unwrap();
        assert!(token.ca_certificate.is_empty());
        assert!(!format!("{:?}", token).contains("fake"));
    }
}
