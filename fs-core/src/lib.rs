//! `fs-core` — the content-addressed remote filesystem engine.
//!
//! Everything the `client` FUSE binary and `store-server` test harness
//! share lives here: manifest parsing, crypto primitives, the object-store
//! client, the cache layer trait family and racing manager, the meta
//! store, the populate/download pipeline, the change tracker, the upload
//! worker, the tlog, and the cleaner. `client` itself is a thin
//! `fuser::Filesystem` dispatch shell plus CLI/config/cron wiring around
//! these modules.

pub mod cache;
pub mod cleaner;
pub mod config;
pub mod crypto;
pub mod download;
pub mod error;
pub mod manifest;
pub mod meta;
pub mod populate;
pub mod store;
pub mod tlog;
pub mod tracker;
pub mod upload;

pub use error::{FsError, FsResult};
