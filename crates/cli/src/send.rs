//! Sender mode: spawn the remote receiver over a pipe pair and push every
//! file through one multiplexed connection.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::MetadataExt;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

use protocol::{Client, PatchArg};
use tracing::{debug, info};

use crate::options::Options;
use crate::{CliError, describe_delta};

/// Outcome of one file's synchronization, reported on the status stream.
struct FileStatus {
    path: String,
    result: Result<(), CliError>,
    delta_dump: Option<String>,
}

/// Runs the sender driver. Returns `true` when every file synchronized.
///
/// The working directory moves to `dir` first, so file paths are relative to
/// it on both ends. Each file gets its own worker thread; all workers share
/// the one RPC connection to the spawned receiver. A receiver that exits
/// before the work is done is fatal.
pub fn run<Out, Err>(
    options: &Options,
    remote_cmd: &[OsString],
    files: Option<Vec<OsString>>,
    dir: &OsStr,
    stdout: &mut Out,
    stderr: &mut Err,
) -> Result<bool, CliError>
where
    Out: Write,
    Err: Write,
{
    env::set_current_dir(dir)?;

    let files = match files {
        Some(files) => files,
        None => files_from_stdin(options.null_sep)?,
    };

    let program = remote_cmd
        .first()
        .ok_or_else(|| CliError::Fatal("no remote command given".to_owned()))?;
    debug!(program = %program.to_string_lossy(), files = files.len(), "launching receiver");
    let mut child = Command::new(program)
        .args(&remote_cmd[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;

    let child_in = child
        .stdin
        .take()
        .ok_or_else(|| CliError::Fatal("remote command has no stdin".to_owned()))?;
    let child_out = child
        .stdout
        .take()
        .ok_or_else(|| CliError::Fatal("remote command has no stdout".to_owned()))?;
    let client = Client::new(child_out, child_in);

    let (exit_tx, exit_rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let status = child.wait();
        let _ = exit_tx.send(status);
    });

    let mut all_ok = true;
    thread::scope(|scope| {
        let (status_tx, status_rx) = mpsc::channel();
        for file in &files {
            let status_tx = status_tx.clone();
            let client = &client;
            let debug_delta = options.debug;
            scope.spawn(move || {
                let path = file.to_string_lossy().into_owned();
                let mut delta_dump = None;
                let result = sync_one(client, file, debug_delta, &mut delta_dump);
                let _ = status_tx.send(FileStatus {
                    path,
                    result,
                    delta_dump,
                });
            });
        }
        drop(status_tx);

        while let Ok(status) = status_rx.recv() {
            if let Some(dump) = &status.delta_dump {
                let _ = stderr.write_all(dump.as_bytes());
            }
            all_ok &= status.result.is_ok();
            let _ = write_status(stdout, options.null_sep, &status);
        }
    });

    // A receiver that is already gone never saw the whole job list.
    if let Ok(early) = exit_rx.try_recv() {
        let _ = waiter.join();
        return Err(CliError::Fatal(match early {
            Ok(status) => format!("remote command exited prematurely ({status})"),
            Err(e) => format!("remote command could not be awaited: {e}"),
        }));
    }

    // Closing our write half asks the receiver to finish and exit.
    drop(client);
    let outcome = exit_rx
        .recv()
        .map_err(|_| CliError::Fatal("lost track of the remote command".to_owned()))?;
    let _ = waiter.join();
    match outcome {
        Ok(status) if status.success() => {
            info!(files = files.len(), all_ok, "sender finished");
            Ok(all_ok)
        }
        Ok(status) => Err(CliError::Fatal(format!(
            "remote command failed ({status})"
        ))),
        Err(e) => Err(CliError::Fatal(format!(
            "remote command could not be awaited: {e}"
        ))),
    }
}

/// Synchronizes one file over the shared connection.
fn sync_one(
    client: &Client,
    file: &OsStr,
    debug_delta: bool,
    delta_dump: &mut Option<String>,
) -> Result<(), CliError> {
    let path = file
        .to_str()
        .ok_or_else(|| CliError::Fatal("path is not valid UTF-8".to_owned()))?;

    let src = File::open(path)?;
    let meta = src.metadata()?;

    let table = client.sumtable(path)?;
    let delta = table.delta(&mut BufReader::new(&src))?;
    if debug_delta {
        *delta_dump = Some(describe_delta(&delta));
    }

    client.patch(PatchArg {
        path: path.to_owned(),
        delta,
        uid: meta.uid() as i32,
        gid: meta.gid() as i32,
        permission: meta.mode() & 0o7777,
    })?;
    Ok(())
}

/// Reads the file list from stdin, one path per line, or zero-separated
/// under `-0`.
fn files_from_stdin(null_sep: bool) -> io::Result<Vec<OsString>> {
    let mut buf = Vec::new();
    io::stdin().lock().read_to_end(&mut buf)?;
    let sep = if null_sep { b'\0' } else { b'\n' };
    Ok(buf
        .split(|&b| b == sep)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| OsString::from_vec(chunk.to_vec()))
        .collect())
}

/// One status record: `<path>: OK.` / `<path>: <err>` per line, or
/// `<path>\0<err-or-empty>\0` under `-0`.
fn write_status<W: Write>(out: &mut W, null_sep: bool, status: &FileStatus) -> io::Result<()> {
    if null_sep {
        out.write_all(status.path.as_bytes())?;
        out.write_all(b"\0")?;
        if let Err(e) = &status.result {
            out.write_all(e.to_string().as_bytes())?;
        }
        out.write_all(b"\0")?;
    } else {
        match &status.result {
            Ok(()) => writeln!(out, "{}: OK.", status.path)?,
            Err(e) => writeln!(out, "{}: {e}", status.path)?,
        }
    }
    out.flush()
}
