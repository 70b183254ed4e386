//! Scratch storage and S3 object storage.
//!
//! This crate provides:
//! - The scratch directory handler with guaranteed cleanup
//! - The `ObjectStore` abstraction and its S3 implementation
//! - Multipart upload sessions with per-part retry and abort
//! - The gateway moving objects between the store and scratch
//! - An in-memory store for local runs and tests

pub mod backoff;
pub mod client;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod multipart;
pub mod scratch;

pub use client::{ObjectReader, ObjectStore, S3Client, S3Config, UploadedPart};
pub use error::{StorageError, StorageResult};
pub use gateway::{content_type_for, GatewayConfig, StorageGateway, SINGLE_PART_LIMIT};
pub use memory::MemoryStore;
pub use multipart::{MultipartConfig, MultipartSession, MultipartState, DEFAULT_PART_SIZE};
pub use scratch::{ScratchConfig, ScratchFiles, ScratchStorage};
