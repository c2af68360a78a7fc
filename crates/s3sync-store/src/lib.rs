//! s3sync Store - S3 adapter for the object-store port
//!
//! Implements [`IObjectStore`](s3sync_core::ports::object_store::IObjectStore)
//! on top of the official AWS SDK, including ranged multipart downloads
//! and multipart uploads tuned by
//! [`TransferSettings`](s3sync_core::config::TransferSettings), and an
//! [`IStoreBuilder`](s3sync_core::ports::object_store::IStoreBuilder)
//! that handles profile, region, and role resolution.

pub mod client;
pub mod session;

pub use client::S3ObjectStore;
pub use session::S3StoreBuilder;
