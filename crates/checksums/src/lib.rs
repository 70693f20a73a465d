#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `pipesync_checksums` provides the two checksum primitives the delta engine
//! is built on: a rolling weak checksum over a fixed-length byte window and a
//! 16-byte strong digest that disambiguates weak-checksum collisions.
//!
//! # Design
//!
//! The crate offers two pieces:
//!
//! - [`SumWindow`], a ring buffer of exactly one block whose Fletcher-style
//!   weak checksum updates in O(1) as the window slides one byte at a time.
//! - [`strong::block_digest`] and [`strong::window_digest`], the 16-byte
//!   digest that confirms candidate block matches; the window form hashes a
//!   ring-split window in logical order without copying.
//!
//! # Invariants
//!
//! - Both checksum components are truncated to 16 bits after every update,
//!   and the positional weights always use the configured block length, not
//!   the number of live bytes. A window shortened by end of input therefore
//!   supports lookup but never a rolling update.
//! - [`SumWindow::roll`] rejects windows that are not completely filled so
//!   the caller never observes silent state corruption.
//!
//! # Errors
//!
//! [`RollingError`] reports rolling updates attempted on a window that is not
//! full. I/O failures during [`SumWindow::fill`] surface as
//! [`std::io::Error`] unchanged.
//!
//! # Examples
//!
//! ```
//! use std::io::Cursor;
//! use pipesync_checksums::SumWindow;
//!
//! let mut window = SumWindow::new(4);
//! window.fill(&mut Cursor::new(b"abcdef")).unwrap();
//! let full = window.value();
//!
//! // Slide the window one byte: "abcd" -> "bcde".
//! let evicted = window.roll(b'e').unwrap();
//! assert_eq!(evicted, b'a');
//! assert_ne!(window.value(), full);
//! ```

pub mod strong;

mod rolling;

pub use rolling::{RollingError, SumWindow};
