use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    dao::{
        backend::GameBackend,
        error::{BackendError, BackendResult},
    },
    dto::backend::{
        AnalyticsLoadResponse, FallbackOverrideResponse, PrimaryOverrideResponse,
        SaveRoundRequest, StatusResponse,
    },
    state::manual_override::ManualOverride,
};

/// URLs of the backend endpoints; absent ones fail with
/// [`BackendError::MissingEndpoint`].
#[derive(Debug, Clone, Default)]
pub struct BackendEndpoints {
    /// Manual-number lookup, tried first.
    pub primary_override_url: Option<String>,
    /// Sync endpoint used when the primary lookup fails.
    pub fallback_override_url: Option<String>,
    /// Receives a [`crate::dto::backend::SaveRoundRequest`] after each result.
    pub save_round_url: Option<String>,
    /// Serves the stored spin log.
    pub analytics_url: Option<String>,
}

/// [`GameBackend`] speaking JSON over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    endpoints: Arc<BackendEndpoints>,
}

impl HttpBackend {
    /// Build the client; every request is bounded by `timeout`.
    pub fn new(endpoints: BackendEndpoints, timeout: Duration) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| BackendError::ClientBuilder { source })?;
        Ok(Self {
            client,
            endpoints: Arc::new(endpoints),
        })
    }

    fn url(&self, endpoint: &'static str, url: &Option<String>) -> BackendResult<String> {
        url.clone()
            .ok_or(BackendError::MissingEndpoint { endpoint })
    }
}

async fn get_json<T>(client: Client, url: String) -> BackendResult<T>
where
    T: DeserializeOwned,
{
    // cache-busting query, as the endpoints sit behind caching proxies
    let response = client
        .get(&url)
        .query(&[("_", crate::dto::now_millis())])
        .send()
        .await
        .map_err(|source| BackendError::RequestSend {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::RequestStatus { url, status });
    }

    response
        .json::<T>()
        .await
        .map_err(|source| BackendError::DecodeResponse { url, source })
}

fn rejected(url: String, status: String, message: Option<String>) -> BackendError {
    BackendError::Rejected {
        url,
        status,
        message,
    }
}

impl GameBackend for HttpBackend {
    fn fetch_primary_override(&self) -> BoxFuture<'static, BackendResult<ManualOverride>> {
        let client = self.client.clone();
        let url = self.url("primary_override", &self.endpoints.primary_override_url);
        Box::pin(async move {
            let url = url?;
            let response: PrimaryOverrideResponse = get_json(client, url.clone()).await?;
            if !response.is_success() {
                return Err(rejected(url, response.status, None));
            }
            response
                .into_override()
                .map_err(|source| BackendError::InvalidPayload { url, source })
        })
    }

    fn fetch_fallback_override(&self) -> BoxFuture<'static, BackendResult<ManualOverride>> {
        let client = self.client.clone();
        let url = self.url("fallback_override", &self.endpoints.fallback_override_url);
        Box::pin(async move {
            let url = url?;
            let response: FallbackOverrideResponse = get_json(client, url.clone()).await?;
            if !response.is_success() {
                return Err(rejected(url, response.status, None));
            }
            response
                .into_override()
                .map_err(|source| BackendError::InvalidPayload { url, source })
        })
    }

    fn save_round(&self, request: SaveRoundRequest) -> BoxFuture<'static, BackendResult<()>> {
        let client = self.client.clone();
        let url = self.url("save_round", &self.endpoints.save_round_url);
        Box::pin(async move {
            let url = url?;
            let response = client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|source| BackendError::RequestSend {
                    url: url.clone(),
                    source,
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(BackendError::RequestStatus { url, status });
            }

            let body = response
                .json::<StatusResponse>()
                .await
                .map_err(|source| BackendError::DecodeResponse {
                    url: url.clone(),
                    source,
                })?;
            if !body.is_success() {
                return Err(rejected(url, body.status, body.message));
            }
            debug!(url = %url, message = body.message.as_deref().unwrap_or(""), "round data saved");
            Ok(())
        })
    }

    fn load_analytics(&self) -> BoxFuture<'static, BackendResult<Vec<u8>>> {
        let client = self.client.clone();
        let url = self.url("analytics", &self.endpoints.analytics_url);
        Box::pin(async move {
            let url = url?;
            let response: AnalyticsLoadResponse = get_json(client, url.clone()).await?;
            if !response.is_success() {
                return Err(rejected(url, response.status, None));
            }
            Ok(response.all_spins)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_endpoints_fail_without_network() {
        let backend = HttpBackend::new(BackendEndpoints::default(), Duration::from_secs(1)).unwrap();

        assert!(matches!(
            backend.fetch_primary_override().await,
            Err(BackendError::MissingEndpoint { endpoint: "primary_override" })
        ));
        assert!(matches!(
            backend.load_analytics().await,
            Err(BackendError::MissingEndpoint { endpoint: "analytics" })
        ));
    }
}
