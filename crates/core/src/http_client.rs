// HTTP Rank Acquisition Client
//
// Implements RankAcquisition by POSTing the request to the rank service, which
// drives a browser through the given egress identity and parses the result
// list. Status codes are mapped onto the retry taxonomy:
// - connect/timeout errors, 429 and 5xx are transient
// - any other non-2xx is a rejection and is not retried

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::acquisition::{
    AcquisitionError, AcquisitionRequest, AcquisitionResponse, RankAcquisition,
};

const DEFAULT_RANK_SERVICE_URL: &str = "http://127.0.0.1:8085/rank";

/// Configuration for [`HttpRankClient`]
#[derive(Debug, Clone)]
pub struct HttpRankClientConfig {
    /// Endpoint accepting acquisition requests
    pub endpoint: String,
    /// Per-request timeout; a browser search can take a while
    pub request_timeout: Duration,
}

impl Default for HttpRankClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RANK_SERVICE_URL.to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl HttpRankClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Rank acquisition over HTTP
pub struct HttpRankClient {
    client: Client,
    endpoint: Url,
}

impl HttpRankClient {
    pub fn new(config: HttpRankClientConfig) -> Result<Self, AcquisitionError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            AcquisitionError::transport(format!("invalid rank service url {}: {e}", config.endpoint))
        })?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AcquisitionError::transport(format!("failed to build client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RankAcquisition for HttpRankClient {
    async fn acquire(
        &self,
        request: &AcquisitionRequest,
    ) -> Result<AcquisitionResponse, AcquisitionError> {
        debug!(
            keyword = %request.keyword,
            lat = request.origin.lat,
            lng = request.origin.lng,
            direct = request.egress.is_direct(),
            "Requesting rank acquisition"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| AcquisitionError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Rank service returned an error status");
            return Err(classify_status(status, message));
        }

        response
            .json::<AcquisitionResponse>()
            .await
            .map_err(|e| AcquisitionError::InvalidResponse(e.to_string()))
    }
}

fn classify_status(status: StatusCode, message: String) -> AcquisitionError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AcquisitionError::Unavailable {
            status: status.as_u16(),
            message,
        }
    } else {
        AcquisitionError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}
