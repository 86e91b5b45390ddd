//! Client for the remote control plane clusters are registered with.
use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, info};
use reqwest::{header, Client, StatusCode};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

const TEST_PATH: &str = "api/kubernetes/test";
const REGISTER_PATH: &str = "api/clusters/local/cluster";

/// Body of both the reachability test and the registration call
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub provider_agent: String,
    pub host: String,
    pub selector: String,
    #[serde(serialize_with = "as_base64")]
    pub service_account_token: Vec<u8>,
    #[serde(serialize_with = "as_base64")]
    pub client_ca: Vec<u8>,
    pub behind_firewall: bool,
}

impl RegistrationPayload {
    /// Payload for a service-account-token ("sat") cluster
    pub fn service_account(
        host: impl Into<String>,
        selector: impl Into<String>,
        token: Vec<u8>,
        client_ca: Vec<u8>,
        behind_firewall: bool,
    ) -> Self {
        Self {
            kind: "sat".to_string(),
            provider_agent: "custom".to_string(),
            host: host.into(),
            selector: selector.into(),
            service_account_token: token,
            client_ca,
            behind_firewall,
        }
    }
}

fn as_base64<T: AsRef<[u8]>, S: Serializer>(bytes: &T, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
}

/// The remote side of a registration
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// Ask the control plane whether it can reach the cluster described by `payload`
    async fn test(&self, payload: &RegistrationPayload) -> Result<()>;

    /// Test the cluster and then record it, returning the control plane's
    /// response body
    async fn register(&self, payload: &RegistrationPayload) -> Result<String>;
}

/// [`ControlPlane`] spoken to over HTTP
#[derive(Clone)]
pub struct HttpControlPlane {
    base_url: String,
    token: String,
    client: Client,
}

impl HttpControlPlane {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(base_url, token, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, token: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, payload: &RegistrationPayload) -> Result<(StatusCode, String)> {
        let url = self.url(path);
        debug!("POST {} for selector {}", url, payload.selector);
        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, &self.token)
            .json(payload)
            .send()
            .await
            .map_err(|source| Error::Http {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| Error::Http { url, source })?;
        Ok((status, body))
    }
}

#[async_trait::async_trait]
impl ControlPlane for HttpControlPlane {
    async fn test(&self, payload: &RegistrationPayload) -> Result<()> {
        let (status, body) = self.post(TEST_PATH, payload).await?;
        if status != StatusCode::OK {
            return Err(Error::ConnectionTestFailed {
                status: status.as_u16(),
                body,
            });
        }
        info!("Test cluster passed for {}", payload.selector);
        Ok(())
    }

    async fn register(&self, payload: &RegistrationPayload) -> Result<String> {
        self.test(payload).await?;
        let (status, body) = self.post(REGISTER_PATH, payload).await?;
        if status != StatusCode::CREATED {
            return Err(Error::RegistrationRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
