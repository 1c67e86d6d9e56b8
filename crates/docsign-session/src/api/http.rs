//! reqwest implementation of [`SigningApi`]

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shared_types::{PackageId, SignatureImageRef, SigningPackage, SuggestedPlacement};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{SignBatch, SigningApi, SuggestionResponse};
use crate::config::ClientConfig;
use crate::error::ApiError;

/// Error body returned by the backend
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// HTTP client for the signing backend
#[derive(Clone)]
pub struct HttpSigningApi {
    base: String,
    token: Option<String>,
    client: Client,
}

impl HttpSigningApi {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base: config.base_url().to_string(),
            token: config.api_token.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_status(status, &text))
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(transport_error)
    }

    /// `GET /health`. Only transport errors mean the backend is unreachable
    pub async fn ping(&self) -> Result<(), ApiError> {
        self.send(self.client.get(self.url("/health"))).await?;
        Ok(())
    }
}

#[async_trait]
impl SigningApi for HttpSigningApi {
    #[instrument(skip(self), fields(package = %package_id))]
    async fn fetch_package(&self, package_id: &PackageId) -> Result<SigningPackage, ApiError> {
        let url = self.url(&format!("/packages/{}", package_id));
        let package: SigningPackage = self.json(self.client.get(url)).await?;
        debug!("Fetched package with {} documents", package.document_count());
        Ok(package.into_ordered())
    }

    #[instrument(skip(self))]
    async fn fetch_document(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<Vec<u8>, ApiError> {
        let url = self.url(&format!(
            "/documents/{}/versions/{}/content",
            document_id, version_id
        ));
        let bytes = self
            .send(self.client.get(url))
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        debug!("Fetched {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self))]
    async fn suggest_placements(
        &self,
        document_id: &str,
    ) -> Result<Vec<SuggestedPlacement>, ApiError> {
        let url = self.url(&format!("/documents/{}/signature-suggestions", document_id));
        let response: SuggestionResponse = self.json(self.client.post(url)).await?;
        Ok(response.suggestions)
    }

    #[instrument(skip(self, png), fields(bytes = png.len()))]
    async fn upload_signature_image(&self, png: Vec<u8>) -> Result<SignatureImageRef, ApiError> {
        let request = self
            .client
            .post(self.url("/signature-images"))
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png);
        let response: UploadResponse = self.json(request).await?;
        Ok(SignatureImageRef(response.url))
    }

    #[instrument(skip(self, batch), fields(package = %package_id, signatures = batch.len()))]
    async fn submit_signatures(
        &self,
        package_id: &PackageId,
        batch: &SignBatch,
        timeout: Duration,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("/packages/{}/sign", package_id));
        debug!("Submitting batch with timeout {:?}", timeout);
        self.send(self.client.post(url).json(batch).timeout(timeout))
            .await?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ApiError::Offline(err.to_string())
    } else {
        warn!("Unclassified transport error: {}", err);
        ApiError::Status {
            status: err.status().map(|s| s.as_u16()).unwrap_or(0),
            message: err.to_string(),
        }
    }
}

/// Map a non-success response onto the error taxonomy
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .error
        .or(parsed.message)
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::CONFLICT => ApiError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            if is_already_completed(&message) {
                ApiError::Conflict(message)
            } else {
                ApiError::Validation(message)
            }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ApiError::Timeout,
        _ => ApiError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

fn is_already_completed(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already signed") || lower.contains("already completed")
}
