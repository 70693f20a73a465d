#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `pipesync_cli` is the command-line front-end: it recognizes the small
//! option surface (`--blocksize`, `--debug`, `--backup`, `-0`, `--argsep`),
//! selects a driver from the operand keywords, and wires the engine, protocol,
//! and daemon crates together.
//!
//! Three drivers exist. *Local* reconstructs `<src>` against `<base>` on this
//! host. *Sender* changes into a directory, spawns the remote command over a
//! stdin/stdout pipe pair, and synchronizes each named file through one
//! multiplexed connection, reporting one status record per file. *Receiver*
//! changes into a directory and serves one connection on its own stdio.
//!
//! # Design
//!
//! [`run`] accepts the argument iterator together with handles for standard
//! output and error and returns a numeric status, keeping the binary crate a
//! thin shim and the whole surface testable in-process. [`exit_code_from`]
//! maps that status to a [`std::process::ExitCode`].
//!
//! # Errors
//!
//! Exit status 2 reports argument problems (with the usage synopsis on
//! stderr), 1 reports fatal failures with a `pipesync: ...` diagnostic, and
//! sender mode also exits 1 when any individual file failed after all files
//! were attempted.

use std::env;
use std::ffi::OsStr;
use std::io::{self, Write};
use std::process::ExitCode;

use engine::{Delta, DeltaOp};
use thiserror::Error;

mod local;
mod options;
mod send;

use options::{Mode, Options, Parsed};

/// Successful completion.
pub const EXIT_OK: i32 = 0;
/// Fatal error, diagnostic on stderr.
pub const EXIT_FATAL: i32 = 1;
/// Argument error, usage on stderr.
pub const EXIT_USAGE: i32 = 2;

/// Driver-level errors; rendered as `pipesync: <message>` on stderr.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Patch(#[from] engine::PatchError),
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    #[error("{0}")]
    Fatal(String),
}

/// Runs the tool with explicit argument and output handles.
///
/// Returns [`EXIT_OK`], [`EXIT_FATAL`], or [`EXIT_USAGE`].
pub fn run<I, Out, Err>(args: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString>,
    Out: Write,
    Err: Write,
{
    init_tracing();

    let args: Vec<std::ffi::OsString> = args.into_iter().map(Into::into).collect();
    let (options, mode) = match options::parse(args) {
        Ok(Parsed::Run(options, mode)) => (options, mode),
        Ok(Parsed::Help(text)) => {
            let _ = stdout.write_all(text.as_bytes());
            return EXIT_OK;
        }
        Err(usage) => {
            let _ = writeln!(stderr, "pipesync: {usage}");
            if !usage.0.contains("Usage:") {
                let _ = writeln!(stderr, "{}", options::usage_text());
            }
            return EXIT_USAGE;
        }
    };

    let outcome = match &mode {
        Mode::Local { src, base, target } => {
            local::run(&options, src, base, target.as_deref(), stderr).map(|()| true)
        }
        Mode::Send {
            remote_cmd,
            files,
            dir,
        } => send::run(
            &options,
            remote_cmd,
            files.clone(),
            dir,
            stdout,
            stderr,
        ),
        Mode::Receive { dir } => run_receive(&options, dir).map(|()| true),
    };

    match outcome {
        Ok(true) => EXIT_OK,
        Ok(false) => EXIT_FATAL,
        Err(e) => {
            let _ = writeln!(stderr, "pipesync: {e}");
            EXIT_FATAL
        }
    }
}

/// Maps a [`run`] status to the process exit code.
#[must_use]
pub fn exit_code_from(status: i32) -> ExitCode {
    match status {
        0 => ExitCode::SUCCESS,
        n => ExitCode::from(n.clamp(1, 255) as u8),
    }
}

/// Receiver driver: serve one connection on this process's stdio.
fn run_receive(options: &Options, dir: &OsStr) -> Result<(), CliError> {
    env::set_current_dir(dir)?;
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    daemon::serve_connection(&mut stdin, &mut stdout, options.block_len)?;
    Ok(())
}

/// Human-readable delta dump for `--debug`.
pub(crate) fn describe_delta(delta: &Delta) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    for (i, op) in delta.iter().enumerate() {
        let _ = match op {
            DeltaOp::Copy { offset, len } => {
                writeln!(out, "delta[{i}]: copy offset={offset} len={len}")
            }
            DeltaOp::Literal(bytes) => writeln!(out, "delta[{i}]: literal len={}", bytes.len()),
        };
    }
    out
}

/// Installs the stderr tracing subscriber once per process, honoring
/// `PIPESYNC_LOG` and falling back to `RUST_LOG`.
fn init_tracing() {
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_env("PIPESYNC_LOG")
            .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    });
}
