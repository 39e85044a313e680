//! Chunked download of large documents.
//!
//! Small documents (or documents of unknown size) are fetched in a single
//! request. Large ones are probed, split into byte ranges sized by a tiered
//! schedule, fetched concurrently under a semaphore, and reassembled in index
//! order. The sole integrity check is length equality against the probed size.

use autos_core::{BackoffStrategy, PipelineError, RetryCondition, RetryPolicy};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::source::{ByteRange, DocumentSource};

/// Below this size a document is fetched in one request.
pub const SINGLE_SHOT_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Hard cap on the number of chunks for one document.
pub const MAX_CHUNKS: u64 = 1000;

const MIB: u64 = 1024 * 1024;

/// Tiered chunk size: 1 MiB below 100 MiB, 2 MiB below 500 MiB, 5 MiB above.
fn chunk_size_for(total_size: u64) -> u64 {
    if total_size < 100 * MIB {
        MIB
    } else if total_size < 500 * MIB {
        2 * MIB
    } else {
        5 * MIB
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Document size {size} exceeds the {max} byte limit")]
    SizeExceeded { size: u64, max: u64 },

    #[error("Download would require {0} chunks, above the {MAX_CHUNKS} cap")]
    TooManyChunks(u64),

    #[error("Chunk {index} failed after retries: {source}")]
    ChunkFetchFailed {
        index: usize,
        #[source]
        source: PipelineError,
    },

    #[error("Reassembled size {actual} does not match expected size {expected}")]
    IntegrityMismatch { expected: u64, actual: u64 },

    #[error(transparent)]
    Source(#[from] PipelineError),
}

impl From<DownloadError> for PipelineError {
    fn from(error: DownloadError) -> Self {
        match error {
            DownloadError::SizeExceeded { size, max } => PipelineError::Validation(format!(
                "Document size {} exceeds the {} byte limit",
                size, max
            )),
            DownloadError::TooManyChunks(n) => PipelineError::Validation(format!(
                "Download would require {} chunks, above the {} cap",
                n, MAX_CHUNKS
            )),
            DownloadError::ChunkFetchFailed { source, .. } => source,
            DownloadError::IntegrityMismatch { expected, actual } => {
                PipelineError::Integrity { expected, actual }
            }
            DownloadError::Source(inner) => inner,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    /// Hard limit on document size; anything larger is refused outright.
    pub max_size: u64,
    /// Concurrent in-flight chunk fetches.
    pub max_concurrent_chunks: usize,
    /// Per-chunk retry policy.
    pub chunk_retry: RetryPolicy,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            max_size: 1024 * MIB,
            max_concurrent_chunks: 4,
            chunk_retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                backoff_multiplier: 2.0,
                jitter_ratio: 0.1,
                strategy: BackoffStrategy::Exponential,
                condition: RetryCondition::AllErrors,
                attempt_timeout: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkPlan {
    chunk_size: u64,
    count: u64,
}

fn plan_chunks(total_size: u64) -> Result<ChunkPlan, DownloadError> {
    let chunk_size = chunk_size_for(total_size);
    let count = total_size.div_ceil(chunk_size);
    if count > MAX_CHUNKS {
        return Err(DownloadError::TooManyChunks(count));
    }
    Ok(ChunkPlan { chunk_size, count })
}

fn range_for(index: u64, chunk_size: u64, total_size: u64) -> ByteRange {
    let start = index * chunk_size;
    let end = (start + chunk_size - 1).min(total_size - 1);
    ByteRange { start, end }
}

/// Drives single-shot or chunked acquisition against any [`DocumentSource`].
pub struct ChunkedDownloader {
    source: Arc<dyn DocumentSource>,
    options: DownloaderOptions,
}

impl ChunkedDownloader {
    pub fn new(source: Arc<dyn DocumentSource>, options: DownloaderOptions) -> Self {
        Self { source, options }
    }

    /// Acquire the full document bytes.
    ///
    /// `expected_size` is the size reported by the listing, if any; the probe
    /// result takes precedence for chunk planning.
    pub async fn acquire(
        &self,
        source_ref: &str,
        expected_size: Option<u64>,
    ) -> Result<Bytes, DownloadError> {
        if let Some(size) = expected_size {
            self.check_size(size)?;
            if size < SINGLE_SHOT_THRESHOLD {
                return self.single_shot(source_ref, Some(size)).await;
            }
        } else {
            return self.single_shot(source_ref, None).await;
        }

        let probe = self.source.probe(source_ref).await?;
        let size = match probe.size {
            Some(size) if probe.accepts_ranges => size,
            // Probe learned nothing usable: fall back to one request.
            _ => return self.single_shot(source_ref, probe.size).await,
        };
        self.check_size(size)?;
        if size < SINGLE_SHOT_THRESHOLD {
            return self.single_shot(source_ref, Some(size)).await;
        }

        let plan = plan_chunks(size)?;
        tracing::debug!(
            source_ref,
            size,
            chunk_size = plan.chunk_size,
            chunks = plan.count,
            "Starting chunked download"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_chunks));
        let mut tasks: JoinSet<Result<(usize, Bytes), DownloadError>> = JoinSet::new();

        for index in 0..plan.count {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.options.chunk_retry.clone();
            let source_ref = source_ref.to_string();
            let range = range_for(index, plan.chunk_size, size);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| PipelineError::Capacity("Chunk semaphore closed".to_string()))?;

                let fetched = retry
                    .execute("fetch_chunk", || source.fetch_bytes(&source_ref, Some(range)))
                    .await
                    .map_err(|source| DownloadError::ChunkFetchFailed {
                        index: index as usize,
                        source,
                    })?;

                Ok((index as usize, fetched.value))
            });
        }

        let mut chunks: Vec<Option<Bytes>> = vec![None; plan.count as usize];
        while let Some(joined) = tasks.join_next().await {
            let (index, bytes) = joined.map_err(|e| {
                DownloadError::Source(PipelineError::Upstream(format!(
                    "Chunk task failed: {}",
                    e
                )))
            })??;
            chunks[index] = Some(bytes);
        }

        let mut assembled = BytesMut::with_capacity(size as usize);
        for (index, chunk) in chunks.into_iter().enumerate() {
            match chunk {
                Some(bytes) => assembled.extend_from_slice(&bytes),
                None => {
                    return Err(DownloadError::ChunkFetchFailed {
                        index,
                        source: PipelineError::Upstream("Chunk never arrived".to_string()),
                    })
                }
            }
        }

        Self::check_integrity(size, assembled.len() as u64)?;
        Ok(assembled.freeze())
    }

    /// Sequential variant reporting progress after each chunk. Used where a
    /// caller needs byte-level progress rather than throughput.
    pub async fn acquire_streaming<F>(
        &self,
        source_ref: &str,
        expected_size: u64,
        mut progress: F,
    ) -> Result<Bytes, DownloadError>
    where
        F: FnMut(u64, u64) + Send,
    {
        self.check_size(expected_size)?;

        if expected_size < SINGLE_SHOT_THRESHOLD {
            let bytes = self.single_shot(source_ref, Some(expected_size)).await?;
            progress(bytes.len() as u64, expected_size);
            return Ok(bytes);
        }

        let plan = plan_chunks(expected_size)?;
        let mut assembled = BytesMut::with_capacity(expected_size as usize);

        for index in 0..plan.count {
            let range = range_for(index, plan.chunk_size, expected_size);
            let fetched = self
                .options
                .chunk_retry
                .execute("fetch_chunk", || {
                    self.source.fetch_bytes(source_ref, Some(range))
                })
                .await
                .map_err(|source| DownloadError::ChunkFetchFailed {
                    index: index as usize,
                    source,
                })?;

            assembled.extend_from_slice(&fetched.value);
            progress(assembled.len() as u64, expected_size);
        }

        Self::check_integrity(expected_size, assembled.len() as u64)?;
        Ok(assembled.freeze())
    }

    async fn single_shot(
        &self,
        source_ref: &str,
        expected_size: Option<u64>,
    ) -> Result<Bytes, DownloadError> {
        let bytes = self.source.fetch_bytes(source_ref, None).await?;

        if bytes.len() as u64 > self.options.max_size {
            return Err(DownloadError::SizeExceeded {
                size: bytes.len() as u64,
                max: self.options.max_size,
            });
        }
        if let Some(expected) = expected_size {
            Self::check_integrity(expected, bytes.len() as u64)?;
        }

        Ok(bytes)
    }

    fn check_size(&self, size: u64) -> Result<(), DownloadError> {
        if size > self.options.max_size {
            return Err(DownloadError::SizeExceeded {
                size,
                max: self.options.max_size,
            });
        }
        Ok(())
    }

    fn check_integrity(expected: u64, actual: u64) -> Result<(), DownloadError> {
        if expected != actual {
            return Err(DownloadError::IntegrityMismatch { expected, actual });
        }
        Ok(())
    }
}
