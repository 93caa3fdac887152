//! Soapberry CFB - A Rust library for reading and writing Compound File
//! Binary (OLE2 structured storage) containers
//!
//! A compound file multiplexes many independent named byte streams and a
//! hierarchical directory of storages inside a single flat file, using
//! fixed-size sectors linked through allocation tables. This crate
//! implements the container engine: sector chaining, the two-level
//! allocation table (main table plus extension sectors), the mini
//! allocation table for small streams, and the flat-array directory tree.
//!
//! # Features
//!
//! - **Reader**: open a container, enumerate storages and streams, and read
//!   any stream by path, with chain-corruption detection that isolates
//!   defective streams instead of failing the whole file
//! - **Writer**: stage streams and storages in memory and serialize a
//!   complete container; the allocation tables and directory are rebuilt
//!   from scratch on every save
//! - **Tolerant parsing**: truncated final sectors are accepted with a
//!   warning rather than an error
//!
//! # Example - Reading a container
//!
//! ```no_run
//! use std::fs::File;
//! use soapberry_cfb::CfbFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = File::open("document.doc")?;
//! let cfb = CfbFile::open(file)?;
//!
//! // List all streams
//! for stream in cfb.list_streams() {
//!     println!("Stream: {:?}", stream);
//! }
//!
//! // Open a specific stream
//! let data = cfb.open_stream(&["WordDocument"])?;
//! println!("Stream size: {} bytes", data.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Writing a container
//!
//! ```no_run
//! use soapberry_cfb::CfbWriter;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = CfbWriter::new();
//!
//! // Add a stream
//! writer.create_stream(&["MyStream"], b"Hello, World!")?;
//!
//! // Create a storage and add a stream inside it
//! writer.create_storage(&["MyStorage"])?;
//! writer.create_stream(&["MyStorage", "NestedStream"], b"Nested content")?;
//!
//! // Save to file
//! writer.save("output.ole")?;
//! # Ok(())
//! # }
//! ```

/// Constants for the compound file format
pub mod consts;

/// Error and warning types
pub mod error;

/// Document/block assembly with fill-byte padding
pub mod block;

/// Header (superblock) parsing and serialization
pub mod header;

/// Allocation table decoding, chain resolution and generation
pub mod fat;

/// Extension table (DIFAT) generation for large allocation tables
pub mod difat;

/// Sector store with the one-time chain claim discipline
pub mod sector;

/// Mini allocation table and mini stream
pub mod minifat;

/// Directory (property) tree
pub mod directory;

/// Compound file reader
mod file;

/// Compound file writer
///
/// This module provides functionality to create compound files from staged
/// streams and storages; the whole allocation/directory layout is rebuilt
/// on every save.
pub mod writer;

// Re-export public types for convenient access
pub use directory::DirectoryEntry;
pub use error::{CfbError, ChainFault, Result, Warning};
pub use file::{CfbFile, is_cfb};
pub use header::Header;
pub use writer::CfbWriter;
