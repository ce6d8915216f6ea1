//! Disk-facing components for CairnDB.
//!
//! This crate provides:
//! - Disk manager for page-granular blocking file I/O
//! - Log manager, the append-only write-ahead log sink

mod disk;
mod log;

pub use disk::{DiskManager, DiskManagerConfig};
pub use log::{LogManager, Lsn};
