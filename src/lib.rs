//! # stackio
//!
//! A layered, asynchronous file streaming pipeline.
//!
//! Read requests enter a stack of processing stages. Each stage may satisfy
//! a request, rewrite it into one or more sub-requests, or pass it on to the
//! next stage. A single scheduling thread orders requests by priority and
//! deadline, admits them while the stack has capacity, and runs each stage's
//! work on worker pools. The standard stack is:
//!
//! ```text
//!  caller ──► Streamer ──► Scheduler ──► ArchiveDecompressor ──► StorageDrive ──► ...
//!                              ▲                 │ rayon                │ rayon
//!                              └──── wake-up ────┴──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stackio::storage::StorageDriveConfig;
//! use stackio::{RequestPath, RequestStatus, StackBuilder, Streamer, StreamerConfig};
//!
//! fn main() -> stackio::Result<()> {
//!     let stack = StackBuilder::new()
//!         .drive(StorageDriveConfig::ssd().drive_path("/game/data"))
//!         .build()?;
//!     let streamer = Streamer::new(stack, StreamerConfig::default())?;
//!
//!     let path = RequestPath::from_root("/game/data", "textures/sky.dds")?;
//!     let (status, bytes) = streamer.read_blocking(path, 0, 16 * 1024, None)?;
//!     assert_eq!(status, RequestStatus::Completed);
//!     println!("read {} bytes", bytes.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Archived Files
//!
//! Files stored inside archives are described by a [`CompressionLookup`],
//! typically an [`ArchiveRegistry`]. The [`ArchiveDecompressor`] stage turns
//! reads of such files into reads of the archive plus a decompression job:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stackio::compression::{ArchiveRegistry, CompressionInfo};
//! use stackio::storage::StorageDriveConfig;
//! use stackio::{RequestPath, StackBuilder, Streamer, StreamerConfig, codec};
//!
//! fn main() -> stackio::Result<()> {
//!     let registry = Arc::new(ArchiveRegistry::new());
//!     let archive = RequestPath::from_root("/game", "level1.pak")?;
//!     registry.register(
//!         RequestPath::from_root("/game", "level1/map.bin")?,
//!         CompressionInfo::compressed(archive, 512, 1_024, 4_096, codec::deflate()),
//!     );
//!
//!     let stack = StackBuilder::new()
//!         .archives(registry)
//!         .drive(StorageDriveConfig::ssd().drive_path("/game"))
//!         .build()?;
//!     let streamer = Streamer::new(stack, StreamerConfig::default())?;
//!     let path = RequestPath::from_root("/game", "level1/map.bin")?;
//!     let (_status, map) = streamer.read_blocking(path, 0, 4_096, None)?;
//!     println!("{} bytes of map data", map.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Request Outcomes
//!
//! Requests never fail with an [`Error`]. A missing file, a corrupt archive
//! entry or a cancellation end the request with a terminal [`RequestStatus`]
//! while every other request keeps going. [`Error`] is reserved for
//! configuration, path construction and the lifecycle of the scheduling
//! thread.
//!
//! ## Logging
//!
//! Stages log through the [`log`](https://docs.rs/log) facade. Nothing is
//! printed unless the application installs a logger.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.
//!
//! [`CompressionLookup`]: compression::CompressionLookup
//! [`ArchiveRegistry`]: compression::ArchiveRegistry
//! [`ArchiveDecompressor`]: decompressor::ArchiveDecompressor

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod codec;
pub mod compression;
pub mod context;
pub mod decompressor;
pub mod error;
pub mod request;
pub mod request_path;
pub mod scheduler;
pub mod stack;
pub mod stats;
pub mod storage;
pub mod streamer;

pub use buffer::OutputBuffer;
pub use error::{Error, Result};
pub use request::{FileRequestPtr, Priority, ReportType, RequestStatus};
pub use request_path::RequestPath;
pub use stack::{Status, StreamStackEntry};
pub use stats::Statistic;
pub use streamer::{StackBuilder, Streamer, StreamerConfig};
