//! HTTP client for the Consul v1 API
//!
//! Implements `ConsulApi` on top of reqwest with token and basic-auth support.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::ConsulApi;
use crate::error::{ClientError, Result};
use crate::model::{
    AgentServiceRegistration, CheckStatus, CheckUpdate, KvPair, ServiceEntry,
    SessionCreateRequest, SessionCreateResponse,
};

/// Configuration for the Consul HTTP client
#[derive(Clone, Debug)]
pub struct ConsulClientConfig {
    /// Agent address, with or without scheme (e.g. "localhost:8500")
    pub address: String,
    /// Datacenter to target, agent default when unset
    pub datacenter: Option<String>,
    /// ACL token sent as X-Consul-Token
    pub token: Option<String>,
    /// HTTP basic auth username
    pub username: Option<String>,
    /// HTTP basic auth password
    pub password: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for ConsulClientConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8500".to_string(),
            datacenter: None,
            token: None,
            username: None,
            password: None,
            connect_timeout_ms: 5000,
            read_timeout_ms: 30000,
        }
    }
}

impl ConsulClientConfig {
    /// Create a new config for a single agent address
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Set the datacenter
    pub fn with_datacenter(mut self, datacenter: &str) -> Self {
        self.datacenter = Some(datacenter.to_string());
        self
    }

    /// Set the ACL token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set basic auth credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Base URL derived from the address, defaulting to plain http
    pub fn base_url(&self) -> Result<String> {
        let address = self.address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(ClientError::InvalidAddress(self.address.clone()));
        }
        if address.contains("://") {
            if address.starts_with("http://") || address.starts_with("https://") {
                Ok(address.to_string())
            } else {
                Err(ClientError::InvalidAddress(self.address.clone()))
            }
        } else {
            Ok(format!("http://{}", address))
        }
    }
}

/// Consul HTTP API client
#[derive(Clone)]
pub struct ConsulClient {
    client: Client,
    base_url: String,
    config: ConsulClientConfig,
}

impl ConsulClient {
    /// Create a new client. No request is made until the first call.
    pub fn new(config: ConsulClientConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request with token, auth and datacenter applied
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, &url);

        if let Some(token) = &self.config.token {
            builder = builder.header("X-Consul-Token", token);
        }
        if let Some(username) = &self.config.username {
            builder = builder.basic_auth(username, self.config.password.as_ref());
        }
        if let Some(dc) = &self.config.datacenter {
            builder = builder.query(&[("dc", dc)]);
        }

        builder
    }

    /// Send a request, mapping non-success statuses to `ClientError::Status`
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ConsulApi for ConsulClient {
    async fn create_session(&self, request: &SessionCreateRequest) -> Result<String> {
        let response = self
            .send(self.request(Method::PUT, "/v1/session/create").json(request))
            .await?;
        let created: SessionCreateResponse = Self::decode(response).await?;
        debug!("Created session {}", created.id);
        Ok(created.id)
    }

    async fn renew_session(&self, session_id: &str) -> Result<bool> {
        let path = format!("/v1/session/renew/{}", session_id);
        match self.send(self.request(Method::PUT, &path)).await {
            Ok(_) => Ok(true),
            Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        let path = format!("/v1/session/destroy/{}", session_id);
        self.send(self.request(Method::PUT, &path)).await?;
        Ok(())
    }

    async fn acquire(&self, key: &str, value: &[u8], session_id: &str) -> Result<bool> {
        let path = format!("/v1/kv/{}", key);
        let response = self
            .send(
                self.request(Method::PUT, &path)
                    .query(&[("acquire", session_id)])
                    .body(value.to_vec()),
            )
            .await?;
        Self::decode(response).await
    }

    async fn get_key(&self, key: &str) -> Result<Option<KvPair>> {
        let path = format!("/v1/kv/{}", key);
        match self.send(self.request(Method::GET, &path)).await {
            Ok(response) => {
                let pairs: Vec<KvPair> = Self::decode(response).await?;
                Ok(pairs.into_iter().next())
            }
            Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let path = format!("/v1/kv/{}", prefix);
        match self
            .send(self.request(Method::GET, &path).query(&[("recurse", "true")]))
            .await
        {
            Ok(response) => Self::decode(response).await,
            Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let path = format!("/v1/kv/{}", key);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn register_service(&self, registration: &AgentServiceRegistration) -> Result<()> {
        self.send(
            self.request(Method::PUT, "/v1/agent/service/register")
                .json(registration),
        )
        .await?;
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> Result<()> {
        let path = format!("/v1/agent/service/deregister/{}", service_id);
        self.send(self.request(Method::PUT, &path)).await?;
        Ok(())
    }

    async fn update_ttl(&self, check_id: &str, output: &str, status: CheckStatus) -> Result<()> {
        let path = format!("/v1/agent/check/update/{}", check_id);
        let body = CheckUpdate {
            status,
            output: output.to_string(),
        };
        self.send(self.request(Method::PUT, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn health_service(
        &self,
        service: &str,
        tags: &[String],
        passing_only: bool,
    ) -> Result<Vec<ServiceEntry>> {
        let path = format!("/v1/health/service/{}", service);
        let mut builder = self.request(Method::GET, &path);
        for tag in tags {
            builder = builder.query(&[("tag", tag)]);
        }
        if passing_only {
            builder = builder.query(&[("passing", "true")]);
        }
        let response = self.send(builder).await?;
        Self::decode(response).await
    }
}
