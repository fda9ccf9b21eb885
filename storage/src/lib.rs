//! Key-addressed binary storage for uploaded documents
//!
//! [Client] hides the backend: an S3-compatible bucket in production, or a
//! process-local map for development and tests.

pub mod client;
mod memory;
mod s3;

pub use client::Client;
pub use client::Config;
pub use client::S3Config;

use bytes::Bytes;
use chrono::DateTime;
use chrono::Utc;

/// The kind of request sent to the object store, used in errors and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Put,
    Get,
    Head,
    Delete,
    List,
    Ping,
    CreateBucket,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object '{key}' not found")]
    NotFound { key: String },
    #[error("object store {operation} request failed on '{target}': {message}")]
    Request {
        operation: Operation,
        target: String,
        message: String,
    },
    #[error("could not read the content of object '{key}': {message}")]
    Body { key: String, message: String },
    #[error("the object store was set to fail {0} requests")]
    InjectedFault(Operation),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The content of a stored object
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// An entry returned by [Client::list]
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// What is written alongside the bytes of a new object
#[derive(Debug, Clone)]
pub struct PutRequest<'a> {
    pub key: &'a str,
    pub data: Bytes,
    pub content_type: &'a str,
    /// Hex encoded SHA-256 of `data`, stored as object metadata
    pub checksum_sha256: &'a str,
}
