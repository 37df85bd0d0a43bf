//! S3 object storage for transcoded assets.
//!
//! This crate provides:
//! - Public-read uploads of local files
//! - Public URL construction for uploaded objects

pub mod client;
pub mod error;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
