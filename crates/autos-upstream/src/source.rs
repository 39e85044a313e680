use async_trait::async_trait;
use autos_core::PipelineError;
use bytes::Bytes;
use serde::Deserialize;

/// Document metadata as listed by the upstream source.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DocumentMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", alias = "mime_type")]
    pub mime_type: String,
    pub size: Option<u64>,
    /// Locator for the document bytes. Documents listed without one cannot be
    /// acquired and fail before any fetch attempt.
    pub source_ref: Option<String>,
}

/// What a HEAD probe learned about a source reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceProbe {
    pub size: Option<u64>,
    pub accepts_ranges: bool,
}

/// Inclusive byte range for a partial fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Inclusive ranges are never empty; a one-byte range has `start == end`.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Upstream document provider.
///
/// HTTP 200 (full) and 206 (partial) responses are success; every other
/// status surfaces as [`PipelineError::UpstreamStatus`] so the retry
/// conditions can classify it.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// List every document known for a process.
    async fn list_documents(
        &self,
        process_number: &str,
    ) -> Result<Vec<DocumentMeta>, PipelineError>;

    /// Fetch document bytes, optionally a byte range of them.
    async fn fetch_bytes(
        &self,
        source_ref: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes, PipelineError>;

    /// Probe size and range support without transferring the body.
    async fn probe(&self, source_ref: &str) -> Result<SourceProbe, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_is_inclusive() {
        let range = ByteRange { start: 0, end: 1023 };
        assert_eq!(range.header_value(), "bytes=0-1023");
        assert_eq!(range.len(), 1024);
    }

    #[test]
    fn meta_deserializes_contract_fields() {
        let meta: DocumentMeta = serde_json::from_str(
            r#"{"id":"DOC-1","name":"a.pdf","type":"application/pdf","size":42,"source_ref":"https://u.example/1"}"#,
        )
        .unwrap();
        assert_eq!(meta.id, "DOC-1");
        assert_eq!(meta.mime_type, "application/pdf");
        assert_eq!(meta.size, Some(42));
    }
}
