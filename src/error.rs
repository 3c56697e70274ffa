//! Crate-level error type
//!
//! Each module owns a focused error enum; [`PricefeedError`] gathers them for
//! callers that drive the whole system (the binaries, embedding services).

use crate::config::ConfigurationError;
use crate::ingestion::{ChunkSourceError, PriceLookupError, WorkerError, WorkerPoolError};
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PricefeedError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chunk source error: {0}")]
    ChunkSource(#[from] ChunkSourceError),

    #[error("worker pool error: {0}")]
    WorkerPool(#[from] WorkerPoolError),

    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("price lookup error: {0}")]
    PriceLookup(#[from] PriceLookupError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PricefeedResult<T> = Result<T, PricefeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_errors_convert() {
        let err: PricefeedError =
            ConfigurationError::invalid_value("pipeline.worker_count", "must be at least 1").into();
        assert!(matches!(err, PricefeedError::Configuration(_)));
        assert!(err.to_string().contains("pipeline.worker_count"));

        let err: PricefeedError = PriceLookupError::RateLimited.into();
        assert!(matches!(err, PricefeedError::PriceLookup(_)));
    }

    #[test]
    fn test_worker_startup_errors_convert() {
        fn read_context(input: &str) -> PricefeedResult<crate::ingestion::WorkerContext> {
            Ok(crate::ingestion::WorkerContext::from_json(input)?)
        }
        assert!(matches!(
            read_context("not json"),
            Err(PricefeedError::Worker(WorkerError::Context(_)))
        ));

        let err: PricefeedError =
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stdin closed").into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
