//! MAV Explorer Library
//!
//! Backend for browsing ArduPilot DataFlash (`.bin`) flight logs. A client
//! uploads a log, optionally gzip-compressed and split into chunks; the log is
//! decoded once and kept in memory under an opaque session token that scopes
//! every later query.
//!
//! # Features
//!
//! - **`cli`** (default): Build the `mav-explorer` server binary
//!
//! # Quick Start
//!
//! Decode a log and query it without the HTTP layer:
//! ```rust,no_run
//! use mav_explorer::{query, DataFlashDecoder, SessionCache};
//! use std::sync::Arc;
//!
//! let cache = SessionCache::new(Arc::new(DataFlashDecoder::new()), 0);
//! let raw = std::fs::read("flight.bin").unwrap();
//! let session = cache.create_session(&raw, Some("flight.bin".to_string())).unwrap();
//! for range in query::flight_modes(&session) {
//!     println!("{} {:.1}s - {:.1}s", range.mode, range.start, range.end);
//! }
//! let roll = query::timeseries(&session, "ATT", "Roll", 10);
//! println!("{} roll samples", roll.len());
//! ```
//!
//! Serve the HTTP API:
//! ```rust,no_run
//! use mav_explorer::{server, GraphCatalog, ServerConfig};
//!
//! # async fn run() -> mav_explorer::Result<()> {
//! server::serve(ServerConfig::default(), GraphCatalog::builtin()?).await
//! # }
//! ```
//!
//! # Public API
//!
//! ## Upload
//! - [`ChunkReceiver`] - Accept chunks, reassemble and decode the completed upload
//! - [`UploadRegistry`] - In-flight uploads keyed by upload id
//! - [`try_reassemble`] - Concatenate chunks by index and decompress
//!
//! ## Sessions and Queries
//! - [`SessionCache`] - Token to decoded log, with oldest-first eviction
//! - [`query`] - Timeseries, graphs, flight modes, stats, parameters, dumps
//! - [`csv_stream`] - Lazy CSV rendering of one message type
//!
//! ## Decoding
//! - [`LogDecoder`] - Pluggable bytes to messages decoder
//! - [`DataFlashDecoder`] - FMT-driven DataFlash decoder
//! - [`VehicleInfo`] - Vehicle family and firmware detection

pub mod config;
pub mod error;
pub mod export;
pub mod expression;
pub mod graphs;
pub mod parser;
pub mod query;
pub mod reassembly;
pub mod server;
pub mod session;
pub mod types;
pub mod upload;
pub mod vehicle;

pub use config::ServerConfig;
pub use error::{ExplorerError, Result};
pub use export::{csv_filename, csv_stream, CsvExport};
pub use graphs::{GraphCatalog, GraphDefinition};
pub use parser::{parse_dataflash_bytes, DataFlashDecoder, LogDecoder};
pub use reassembly::try_reassemble;
pub use server::{router, AppState};
pub use session::{AnalysisSession, SessionCache};
pub use types::*;
pub use upload::{
    ChunkAck, ChunkMetadata, ChunkReceiver, ChunkRequest, ChunkResponse, Encoding, FinalResult,
    UploadLimits, UploadRegistry, UploadSession,
};
pub use vehicle::{VehicleInfo, VehicleKind};

#[cfg(test)]
#[path = "../tests/common/fixture.rs"]
mod fixture;
