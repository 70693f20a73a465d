#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `pipesync_protocol` carries the two synchronization calls over a reliable
//! ordered byte pipe in each direction: `sumtable` asks the receiver to
//! summarize its base file, `patch` ships a delta back for atomic
//! materialization.
//!
//! # Design
//!
//! Every message travels in one length-delimited frame: a fixed header
//! ([`FrameHeader`]: kind, sequence number, payload length) followed by the
//! payload. Requests carry the method *name* and the method's argument
//! encoding; responses carry a status byte and either the method's result
//! encoding or an error string. The delta encoding registers its two element
//! shapes up front as fixed tags ([`wire::TAG_COPY`], [`wire::TAG_LITERAL`]),
//! so a decoder always knows how to dispatch.
//!
//! [`Client`] multiplexes concurrent calls from many threads over one pipe
//! pair: frames are written under a lock and a dedicated reader thread routes
//! each response to the waiting caller by sequence number. [`serve`] is the
//! receiving half, decoding one request at a time and dispatching to a
//! [`Service`] implementation.
//!
//! # Invariants
//!
//! - Every value defined by the data model round-trips through its encoding.
//! - A response's sequence number always equals the request's; callers never
//!   observe another call's result.
//! - Transport failures are fatal: all outstanding and future calls on the
//!   client fail once the pipe breaks.
//!
//! # Errors
//!
//! [`WireError`] reports malformed bytes (truncation, bad tags, oversized
//! frames). [`ProtocolError`] wraps wire errors, transport I/O failures, the
//! peer's error strings, and disconnection.

mod client;
mod message;
mod server;
pub mod wire;

pub use client::Client;
pub use message::{PatchArg, Request, Response, decode_sum_table, encode_sum_table};
pub use server::{Service, serve};
pub use wire::{FrameHeader, FrameKind, ProtocolError, WireError};
