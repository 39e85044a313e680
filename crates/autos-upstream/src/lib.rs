//! Upstream source client and chunked download machinery.
//!
//! The [`DocumentSource`] trait abstracts the judicial document provider;
//! [`HttpDocumentSource`] is the HTTP implementation. [`ChunkedDownloader`]
//! sits on top of any source and decides between a single-shot fetch and a
//! ranged, chunked download with bounded concurrency.

pub mod chunked;
pub mod http;
pub mod source;

pub use chunked::{ChunkedDownloader, DownloadError, DownloaderOptions};
pub use http::HttpDocumentSource;
pub use source::{ByteRange, DocumentMeta, DocumentSource, SourceProbe};
