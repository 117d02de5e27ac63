/*!
 * Presign client
 *
 * Resolves an object name, direction and network tier into a time-limited
 * URL through the external signing service. URLs are never cached; every
 * transfer attempt signs again.
 *
 * Wire contract:
 *
 * ```text
 * POST <endpoint>
 * {"network": "private", "direction": "download", "download_sign": "<name>"}
 *
 * 200 OK
 * {"code": 0, "message": "ok", "data": {"endpoint": "https://..."}}
 * ```
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::job::Direction;
use crate::config::{validate_endpoint, Network};
use crate::error::{Result, ShardlineError};

/// Source of presigned transfer URLs
#[async_trait]
pub trait Presigner: Send + Sync {
    /// Return a URL valid for one transfer of `name` in `direction`
    async fn resolve(&self, name: &str, direction: Direction, network: Network) -> Result<String>;
}

#[derive(Debug, Serialize)]
pub struct PresignRequest<'a> {
    pub network: &'a str,
    pub direction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_sign: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_sign: Option<&'a str>,
}

impl<'a> PresignRequest<'a> {
    pub fn new(name: &'a str, direction: Direction, network: Network) -> Self {
        let (download_sign, upload_sign) = match direction {
            Direction::Pull => (Some(name), None),
            Direction::Push => (None, Some(name)),
        };
        Self {
            network: network.as_str(),
            direction: direction.presign_verb(),
            download_sign,
            upload_sign,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PresignData {
    #[serde(default)]
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct PresignResponse {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    pub data: Option<PresignData>,
}

impl PresignResponse {
    /// Extract the URL, treating a non-zero code or empty endpoint as failure
    pub fn into_url(self, name: &str) -> Result<String> {
        if self.code != 0 {
            return Err(ShardlineError::SigningFailure {
                name: name.to_string(),
                status: None,
                reason: format!("service code {}: {}", self.code, self.message),
            });
        }
        match self.data {
            Some(data) if !data.endpoint.is_empty() => Ok(data.endpoint),
            _ => Err(ShardlineError::SigningFailure {
                name: name.to_string(),
                status: None,
                reason: "empty endpoint".to_string(),
            }),
        }
    }
}

/// Presigner speaking the JSON contract over HTTP
#[derive(Debug, Clone)]
pub struct HttpPresigner {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpPresigner {
    /// Fails with `Config` when the endpoint is not an absolute http(s) URL
    pub fn new(client: reqwest::Client, endpoint: &str) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: validate_endpoint(endpoint)?,
        })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait]
impl Presigner for HttpPresigner {
    async fn resolve(&self, name: &str, direction: Direction, network: Network) -> Result<String> {
        if name.trim().is_empty() {
            return Err(ShardlineError::InvalidName(name.to_string()));
        }

        let start = Instant::now();
        let request = PresignRequest::new(name, direction, network);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| signing_failure(name, None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(signing_failure(name, Some(status.as_u16()), body));
        }

        let parsed: PresignResponse = response
            .json()
            .await
            .map_err(|e| signing_failure(name, Some(status.as_u16()), format!("bad response body: {}", e)))?;

        let url = parsed.into_url(name)?;
        tracing::debug!(name, %direction, "presigned in {:?}", start.elapsed());
        Ok(url)
    }
}

fn signing_failure(name: &str, status: Option<u16>, reason: String) -> ShardlineError {
    ShardlineError::SigningFailure {
        name: name.to_string(),
        status,
        reason,
    }
}
