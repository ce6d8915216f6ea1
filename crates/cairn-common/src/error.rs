//! Error types for CairnDB.

use thiserror::Error;

/// Result type alias using CairnError.
pub type Result<T> = std::result::Result<T, CairnError>;

/// Errors that can occur in CairnDB storage operations.
#[derive(Debug, Error)]
pub enum CairnError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Disk manager errors
    #[error("Page {page_id} is beyond the end of the data file")]
    PageOutOfBounds { page_id: u32 },

    // Buffer pool errors
    #[error("Buffer pool exhausted, no evictable frame")]
    PoolExhausted,

    // B+ tree errors
    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Header page is full, cannot register index")]
    HeaderFull,

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),
}
