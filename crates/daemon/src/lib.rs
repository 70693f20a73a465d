#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `pipesync_daemon` is the receiving half of a synchronization session: it
//! answers `sumtable` by summarizing its local base file and retaining the
//! open handle, then answers `patch` by materializing the reconstructed file
//! atomically next to the base.
//!
//! # Design
//!
//! [`Receiver`] keeps one registry mapping each summarized path to its
//! retained handle (`None` for a base that did not exist). A well-formed
//! session is `sumtable(p)` followed by exactly one `patch` naming `p`; the
//! handle's lifetime is that interval, and it is released whether or not the
//! patch succeeds. The reconstructed bytes go to a temporary file created in
//! the target's own directory so the final rename is atomic; permission and
//! ownership are applied to the temporary file before it takes the target's
//! name.
//!
//! Paths arrive from the network and are confined by [`check_path`]: nothing
//! absolute, no `..` segments. Symlinks are not resolved; the serving
//! process's working directory is the jail.
//!
//! # Errors
//!
//! [`ReceiverError`] covers the rejection cases the protocol tests rely on
//! (`invalid path`, `base file not in registry`) alongside I/O and patch
//! failures. Every failure path removes the temporary file.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path};

use engine::{PatchError, SumTable};
use protocol::{PatchArg, ProtocolError, Service};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced by the receiver's two calls.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// The path is absolute or contains a `..` segment.
    #[error("invalid path")]
    InvalidPath,
    /// `patch` named a path with no retained handle.
    #[error("base file not in registry")]
    NotInRegistry,
    /// Reading the base, writing the temporary file, or applying metadata
    /// failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Resolving the delta failed.
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Rejects paths that could escape the working-directory jail.
///
/// Absolute paths and any `..` component are refused. Symlinks are
/// deliberately not resolved; operators point the receiver's working
/// directory at the jail.
pub fn check_path(path: &str) -> Result<(), ReceiverError> {
    let path = Path::new(path);
    if path.is_absolute() {
        return Err(ReceiverError::InvalidPath);
    }
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ReceiverError::InvalidPath);
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// Receiver-side service state for one connection.
///
/// Dropping the receiver (the connection ending) closes every retained
/// handle.
#[derive(Debug)]
pub struct Receiver {
    block_len: usize,
    registry: HashMap<String, Option<File>>,
}

impl Receiver {
    /// Creates a receiver summarizing bases in blocks of `block_len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `block_len` is zero; the driver validates the flag.
    #[must_use]
    pub fn new(block_len: usize) -> Self {
        assert!(block_len > 0, "block length must be positive");
        Self {
            block_len,
            registry: HashMap::new(),
        }
    }

    /// Summarizes the base at `path` and retains its handle for the
    /// subsequent [`patch`](Self::patch).
    ///
    /// A base the filesystem reports as absent is not an error: the table is
    /// empty and the retained handle is `None`. Any other open or read
    /// failure propagates. Summarizing a path that is already registered
    /// replaces (and closes) the previously retained handle.
    pub fn sumtable(&mut self, path: &str) -> Result<SumTable, ReceiverError> {
        check_path(path)?;

        let base = match File::open(path) {
            Ok(file) => Some(file),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let table = match &base {
            Some(file) => {
                let mut reader = BufReader::with_capacity(self.block_len, file);
                SumTable::from_reader(Some(&mut reader), self.block_len)?
            }
            None => SumTable::new(self.block_len),
        };

        debug!(path, blocks = table.len(), "base summarized");
        if self.registry.insert(path.to_owned(), base).is_some() {
            debug!(path, "replaced previously retained handle");
        }
        Ok(table)
    }

    /// Applies `arg.delta` against the retained base and atomically renames
    /// the result over `arg.path` with the requested permission and
    /// ownership.
    ///
    /// The retained handle is released (and closed) whether or not the patch
    /// succeeds; the temporary file never survives a failure.
    pub fn patch(&mut self, arg: &PatchArg) -> Result<(), ReceiverError> {
        let Some(base) = self.registry.remove(&arg.path) else {
            return Err(ReceiverError::NotInRegistry);
        };

        let target = Path::new(&arg.path);
        let tmp = materialize(target, base.as_ref(), arg)?;
        match tmp.persist(target) {
            Ok(_) => {
                info!(path = %arg.path, "patch committed");
                Ok(())
            }
            // The temporary file rides back in the error and is removed when
            // it drops here.
            Err(e) => Err(ReceiverError::Io(e.error)),
        }
    }
}

/// Builds the reconstructed file next to `target`, with metadata applied,
/// ready to be renamed into place.
fn materialize(
    target: &Path,
    base: Option<&File>,
    arg: &PatchArg,
) -> Result<NamedTempFile, ReceiverError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = target.file_name().ok_or(ReceiverError::InvalidPath)?;
    let mut prefix = name.to_os_string();
    prefix.push(".");

    let mut tmp = tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)?;
    engine::apply(base, &arg.delta, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(arg.permission))?;
    std::os::unix::fs::chown(tmp.path(), Some(arg.uid as u32), Some(arg.gid as u32))?;
    Ok(tmp)
}

impl Service for Receiver {
    type Error = ReceiverError;

    fn sumtable(&mut self, path: &str) -> Result<SumTable, ReceiverError> {
        Receiver::sumtable(self, path)
    }

    fn patch(&mut self, arg: PatchArg) -> Result<(), ReceiverError> {
        Receiver::patch(self, &arg)
    }
}

/// Serves one synchronization connection over a pipe pair, typically this
/// process's standard input and output.
pub fn serve_connection<R, W>(
    reader: &mut R,
    writer: &mut W,
    block_len: usize,
) -> Result<(), ProtocolError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut receiver = Receiver::new(block_len);
    protocol::serve(reader, writer, &mut receiver)
}
