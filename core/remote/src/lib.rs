//! Remote sync service abstraction.
//!
//! This module provides the trait the sync engine uses to talk to the
//! authoritative marker service, the JSON contract of that service, and
//! two implementations:
//! - `HttpSyncClient`: the real HTTP API
//! - `MemoryRemote`: a scriptable in-process server for tests and demos

pub mod contract;
pub mod http;
pub mod memory;
pub mod service;

pub use contract::{ExportFile, ExportManifestEntry, SyncStatusRequest, SyncStatusResponse};
pub use http::HttpSyncClient;
pub use memory::{gzip, MemoryRemote, PageRequest, ScriptedPage};
pub use service::{RemoteSyncService, MAX_RESULT_COUNT};
