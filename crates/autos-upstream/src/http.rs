use async_trait::async_trait;
use autos_core::PipelineError;
use bytes::Bytes;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use crate::source::{ByteRange, DocumentMeta, DocumentSource, SourceProbe};

/// HTTP implementation of [`DocumentSource`].
///
/// Listing goes through `{base_url}/processes/{process_number}/documents`;
/// `source_ref` values are absolute URLs fetched as-is. An optional API key is
/// sent as a bearer token on every request.
pub struct HttpDocumentSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDocumentSource {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PipelineError::Upstream(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn map_transport_error(error: reqwest::Error) -> PipelineError {
        if error.is_timeout() {
            PipelineError::Timeout(error.to_string())
        } else if error.is_connect() {
            PipelineError::Connection(error.to_string())
        } else {
            PipelineError::Upstream(error.to_string())
        }
    }

    fn ensure_fetch_status(response: &Response, source_ref: &str) -> Result<(), PipelineError> {
        match response.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(()),
            status => Err(PipelineError::UpstreamStatus {
                status: status.as_u16(),
                message: format!("Fetch of {} returned {}", source_ref, status),
            }),
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn list_documents(
        &self,
        process_number: &str,
    ) -> Result<Vec<DocumentMeta>, PipelineError> {
        let url = format!("{}/processes/{}/documents", self.base_url, process_number);

        let response = self
            .apply_auth(self.client.get(&url))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::UpstreamStatus {
                status: status.as_u16(),
                message: format!("Listing documents for {} returned {}", process_number, status),
            });
        }

        let documents: Vec<DocumentMeta> = response
            .json()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Invalid listing response: {}", e)))?;

        tracing::debug!(
            process_number,
            count = documents.len(),
            "Listed upstream documents"
        );

        Ok(documents)
    }

    async fn fetch_bytes(
        &self,
        source_ref: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes, PipelineError> {
        let mut request = self.apply_auth(self.client.get(source_ref));
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request.send().await.map_err(Self::map_transport_error)?;
        Self::ensure_fetch_status(&response, source_ref)?;

        response.bytes().await.map_err(Self::map_transport_error)
    }

    async fn probe(&self, source_ref: &str) -> Result<SourceProbe, PipelineError> {
        let response = self
            .apply_auth(self.client.head(source_ref))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::UpstreamStatus {
                status: status.as_u16(),
                message: format!("Probe of {} returned {}", source_ref, status),
            });
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let accepts_ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        Ok(SourceProbe {
            size,
            accepts_ranges,
        })
    }
}
