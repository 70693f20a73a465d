//! Argument parsing: a light split of options from operands, typed option
//! parsing via clap, and mode selection on the operand keywords.
//!
//! Operands are kept out of clap's lexer on purpose: a remote command line
//! may contain anything, including tokens that look like options or the
//! literal separator clap reserves, so everything from the first non-option
//! token onward is taken verbatim.

use std::ffi::{OsStr, OsString};

use clap::{Arg, ArgAction, Command, value_parser};
use thiserror::Error;

/// Default block length, overridable with `--blocksize`.
pub const DEFAULT_BLOCK_LEN: u32 = 4096;

/// An argument-level error; reported with the usage text and exit code 2.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Options shared by all modes.
#[derive(Clone, Debug)]
pub struct Options {
    /// Block length for summary tables and delta windows.
    pub block_len: usize,
    /// Dump computed deltas to stderr.
    pub debug: bool,
    /// Local mode: keep the old base as `<base>~`.
    pub backup: bool,
    /// Null-separated file list and status output.
    pub null_sep: bool,
    /// Token separating the remote command from the file list.
    pub argsep: OsString,
}

/// The selected driver and its operands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Reconstruct locally: `<src> <base> [<target>]`.
    Local {
        /// File to read.
        src: OsString,
        /// Presumed-similar file to delta against.
        base: OsString,
        /// Explicit output; `None` replaces the base atomically.
        target: Option<OsString>,
    },
    /// Drive a remote receiver: `<remote-cmd...> [<argsep> <file>...] SEND <dir>`.
    Send {
        /// Command line spawning the receiver over a pipe pair.
        remote_cmd: Vec<OsString>,
        /// Files named on the command line; `None` reads them from stdin.
        files: Option<Vec<OsString>>,
        /// Directory to change into before launching.
        dir: OsString,
    },
    /// Serve one connection on stdio: `RECEIVE <dir>`.
    Receive {
        /// Directory to change into before serving.
        dir: OsString,
    },
}

/// Outcome of argument parsing.
#[derive(Debug)]
pub enum Parsed {
    /// Run the selected mode.
    Run(Options, Mode),
    /// Print this help text and exit successfully.
    Help(String),
}

fn command() -> Command {
    Command::new("pipesync")
        .about("Synchronize files with rolling-checksum deltas over a pipe")
        .override_usage(
            "pipesync [OPTIONS] <SRC> <BASE> [TARGET]\n       \
             pipesync [OPTIONS] <REMOTE-CMD>... [<ARGSEP> <FILE>...] SEND <DIR>\n       \
             pipesync [OPTIONS] RECEIVE <DIR>",
        )
        .disable_version_flag(true)
        .arg(
            Arg::new("blocksize")
                .long("blocksize")
                .value_name("N")
                .help("Block length for summary tables and delta windows")
                .value_parser(value_parser!(u32).range(1..))
                .default_value("4096"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Dump computed deltas to stderr")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("backup")
                .long("backup")
                .help("Rename the old base to <BASE>~ before replacing it (local mode)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("null")
                .short('0')
                .help("Read the stdin file list and write status zero-separated")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("argsep")
                .long("argsep")
                .value_name("SEP")
                .help("Token separating the remote command from the file list")
                .default_value("--"),
        )
}

/// Usage synopsis for usage-error reports.
pub fn usage_text() -> String {
    command().render_usage().to_string()
}

fn is_known_flag(arg: &str) -> bool {
    matches!(arg, "--debug" | "--backup" | "-0" | "--help" | "-h")
}

fn takes_value(arg: &str) -> bool {
    matches!(arg, "--blocksize" | "--argsep")
}

fn is_inline_option(arg: &str) -> bool {
    arg.strip_prefix("--blocksize=").is_some() || arg.strip_prefix("--argsep=").is_some()
}

/// Splits the raw argument list into option tokens (for clap) and verbatim
/// operands, at the first token that is not a recognized option.
fn split_args(mut args: Vec<OsString>) -> Result<(Vec<OsString>, Vec<OsString>), UsageError> {
    let mut options = Vec::new();
    if args.is_empty() {
        args.push(OsString::from("pipesync"));
    }
    let mut iter = args.into_iter();
    options.push(iter.next().unwrap_or_else(|| OsString::from("pipesync")));

    let mut operands = Vec::new();
    while let Some(arg) = iter.next() {
        // Decide on an owned copy so the token itself can move below.
        let text = arg.to_str().map(str::to_owned);
        match text.as_deref() {
            Some(s) if is_known_flag(s) || is_inline_option(s) => options.push(arg),
            Some(s) if takes_value(s) => {
                let value = iter
                    .next()
                    .ok_or_else(|| UsageError(format!("option {s} requires a value")))?;
                options.push(arg);
                options.push(value);
            }
            Some("--") => {
                operands.extend(iter);
                break;
            }
            Some(s) if s.starts_with('-') && s.len() > 1 => {
                return Err(UsageError(format!("unexpected option {s:?}")));
            }
            _ => {
                operands.push(arg);
                operands.extend(iter);
                break;
            }
        }
    }
    Ok((options, operands))
}

fn select_mode(operands: Vec<OsString>, argsep: &OsStr) -> Result<Mode, UsageError> {
    if operands.is_empty() {
        return Err(UsageError("missing operands".to_owned()));
    }

    if operands[0] == *"RECEIVE" {
        if operands.len() != 2 {
            return Err(UsageError(
                "RECEIVE takes exactly one directory".to_owned(),
            ));
        }
        let mut operands = operands;
        return Ok(Mode::Receive {
            dir: operands.remove(1),
        });
    }

    if operands.len() >= 2 && operands[operands.len() - 2] == *"SEND" {
        let mut operands = operands;
        let dir = operands.pop().unwrap_or_default();
        operands.pop(); // the SEND keyword
        if operands.is_empty() {
            return Err(UsageError("SEND requires a remote command".to_owned()));
        }
        return Ok(match operands.iter().position(|arg| arg.as_os_str() == argsep) {
            Some(0) => {
                return Err(UsageError(
                    "the remote command must precede the file-list separator".to_owned(),
                ));
            }
            Some(sep) => {
                let files = operands.split_off(sep + 1);
                operands.pop(); // the separator itself
                Mode::Send {
                    remote_cmd: operands,
                    files: Some(files),
                    dir,
                }
            }
            None => Mode::Send {
                remote_cmd: operands,
                files: None,
                dir,
            },
        });
    }

    let mut operands = operands;
    match operands.len() {
        2 => {
            let base = operands.pop().unwrap_or_default();
            let src = operands.pop().unwrap_or_default();
            Ok(Mode::Local {
                src,
                base,
                target: None,
            })
        }
        3 => {
            let target = operands.pop().unwrap_or_default();
            let base = operands.pop().unwrap_or_default();
            let src = operands.pop().unwrap_or_default();
            Ok(Mode::Local {
                src,
                base,
                target: Some(target),
            })
        }
        n => Err(UsageError(format!(
            "expected 2 or 3 operands for local mode, got {n}"
        ))),
    }
}

/// Parses the full argument list, argv\[0\] included.
pub fn parse(args: Vec<OsString>) -> Result<Parsed, UsageError> {
    let (options, operands) = split_args(args)?;

    let matches = match command().try_get_matches_from(options) {
        Ok(matches) => matches,
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            return Ok(Parsed::Help(e.render().to_string()));
        }
        Err(e) => return Err(UsageError(e.render().to_string())),
    };

    let options = Options {
        block_len: matches
            .get_one::<u32>("blocksize")
            .copied()
            .unwrap_or(DEFAULT_BLOCK_LEN) as usize,
        debug: matches.get_flag("debug"),
        backup: matches.get_flag("backup"),
        null_sep: matches.get_flag("null"),
        argsep: matches
            .get_one::<String>("argsep")
            .map_or_else(|| OsString::from("--"), OsString::from),
    };

    let mode = select_mode(operands, &options.argsep)?;
    Ok(Parsed::Run(options, mode))
}
