#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `pipesync_engine` implements the delta-transfer core: summarizing a base
//! file into a block table, streaming a source against that table to produce
//! a delta of back-references and literal runs, and resolving a delta against
//! a random-access base to reconstruct the source.
//!
//! # Design
//!
//! - [`SumTable`] maps the 32-bit weak checksum of each base block to the
//!   block's 16-byte strong digest and index. Lookup is two-stage: the weak
//!   checksum acts as a cheap filter and the strong digest confirms.
//! - [`SumTable::delta`] slides a [`checksums::SumWindow`] over the source,
//!   emitting a [`DeltaOp::Copy`] whenever the window equals a base block and
//!   accumulating evicted bytes into [`DeltaOp::Literal`] runs otherwise.
//!   Matching is greedy and forward-only; the delta is correct but not
//!   guaranteed minimal.
//! - [`apply`] replays a delta over any [`ReadAt`] base into a writer.
//!
//! # Invariants
//!
//! - Resolving every delta element in order reproduces the source
//!   byte-for-byte.
//! - Every `Copy` offset is a whole multiple of the block length, and only
//!   the final element of a delta may carry a length below it.
//! - Table construction is deterministic: on weak or strong collisions the
//!   earliest block index wins.
//!
//! # Errors
//!
//! Table construction and delta production surface [`std::io::Error`] from
//! the underlying readers unchanged. Patch application reports
//! [`PatchError`], distinguishing a back-reference against an absent base
//! from ordinary I/O failure.

mod delta;
mod patch;
mod sumtable;

pub use delta::{Delta, DeltaOp};
pub use patch::{PatchError, ReadAt, apply};
pub use sumtable::SumTable;
