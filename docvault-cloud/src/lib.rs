//! Remote blob transports for DocVault backups.
//!
//! Backups leave the device as self-describing encrypted blobs; a
//! [`BlobTransport`] only stores and returns their bytes by identifier.

pub mod config;
pub mod error;
pub mod s3_transport;
pub mod transport;

pub use config::CloudConfig;
pub use error::{CloudError, CloudResult};
pub use s3_transport::S3Transport;
pub use transport::{BlobTransport, MemoryTransport, RemoteBlob};
