//! S3 gateway - S3-compatible REST front end over pluggable blob stores
//!
//! This library provides the core functionality for the gateway server:
//! signature verification, request routing, operation handlers, multipart
//! tracking, and the backing-store interface with its providers.

pub mod api;
pub mod config;
pub mod identity;
pub mod init;
pub mod multipart;
pub mod storage;
pub mod tls;
pub mod types;
