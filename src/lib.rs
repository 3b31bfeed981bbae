//! # logscope
//!
//! logscope is the back-end engine for interactively viewing and searching
//! very large line-oriented text files (multi-gigabyte, tens of millions of
//! lines) without ever holding the whole file in memory. It speaks
//! newline-delimited JSON over a pair of byte streams and is meant to be
//! spawned and owned by an editor or viewer host.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`source`] - Encoding probe and the canonical random-access byte view
//!   (memory-mapped file, or a UTF-8 shadow for UTF-16 input)
//! - [`index`] - The line index: byte offsets for every line, built with a
//!   SIMD newline scan and extended incrementally as the file grows
//! - [`session`] - The single open-file context owning source, index, and
//!   the installed column extractor
//! - [`query`] - Chunk extraction, column parsing, log format detection,
//!   and the parallel full-file search
//! - [`server`] - The JSON protocol: wire types, dispatcher, and the
//!   polling watcher that turns appends and truncations into events
//! - [`error`] - The protocol error taxonomy
//!
//! ## Quick start
//!
//! ```ignore
//! use logscope::server::Dispatcher;
//!
//! // Serve the protocol over stdio until EOF.
//! Dispatcher::run(std::io::stdin(), std::io::stdout().lock())?;
//! ```
//!
//! ## Performance
//!
//! The line index is the only structure that always stays resident: 8 bytes
//! per line. Indexing streams the file through `memchr` (parallelised
//! across cores for the initial build), chunk reads touch only the
//! requested byte range, and searches fan out over per-core partitions with
//! a shared 1000-match cap.

pub mod error;
pub mod index;
pub mod query;
pub mod server;
pub mod session;
pub mod source;
