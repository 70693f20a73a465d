//! Local mode: reconstruct `<src>` against `<base>` on this host.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use engine::{Delta, SumTable};
use tracing::debug;

use crate::options::Options;
use crate::{CliError, describe_delta};

/// Runs one local reconstruction.
///
/// With no explicit target the base is replaced atomically through a
/// temporary file in its own directory (optionally keeping the old base as
/// `<base>~`); an explicit target is written directly and truncated.
pub fn run<Err: Write>(
    options: &Options,
    src: &OsStr,
    base: &OsStr,
    target: Option<&OsStr>,
    stderr: &mut Err,
) -> Result<(), CliError> {
    let src_file = File::open(src)?;
    let base_file = match File::open(base) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let table = match &base_file {
        Some(file) => {
            let mut reader = BufReader::with_capacity(options.block_len, file);
            SumTable::from_reader(Some(&mut reader), options.block_len)?
        }
        None => SumTable::new(options.block_len),
    };

    let delta = table.delta(&mut BufReader::new(&src_file))?;
    if options.debug {
        let _ = stderr.write_all(describe_delta(&delta).as_bytes());
    }

    match target {
        Some(target) => write_target(target, base_file.as_ref(), &delta),
        None => replace_base(base, &src_file, base_file.as_ref(), &delta, options.backup),
    }
}

/// Three-argument form: write (and truncate) the explicit target.
fn write_target(target: &OsStr, base: Option<&File>, delta: &Delta) -> Result<(), CliError> {
    let mut out = BufWriter::new(File::create(target)?);
    engine::apply(base, delta, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Two-argument form: materialize next to the base and rename over it,
/// carrying the source's permission bits.
fn replace_base(
    base: &OsStr,
    src_file: &File,
    base_file: Option<&File>,
    delta: &Delta,
    backup: bool,
) -> Result<(), CliError> {
    let target = Path::new(base);
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = target
        .file_name()
        .ok_or_else(|| CliError::Fatal(format!("{}: not a file path", target.display())))?;
    let mut prefix = name.to_os_string();
    prefix.push(".");

    let mut tmp = tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)?;
    engine::apply(base_file, delta, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().set_permissions(src_file.metadata()?.permissions())?;

    if backup && base_file.is_some() {
        let mut backup_name = base.to_os_string();
        backup_name.push("~");
        debug!(base = %target.display(), "keeping old base as backup");
        std::fs::rename(base, &backup_name)?;
    }

    tmp.persist(target).map_err(|e| CliError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    fn options() -> Options {
        Options {
            block_len: 4,
            debug: false,
            backup: false,
            null_sep: false,
            argsep: "--".into(),
        }
    }

    fn run_quiet(
        options: &Options,
        src: &Path,
        base: &Path,
        target: Option<&Path>,
    ) -> Result<(), CliError> {
        let mut stderr = Vec::new();
        run(
            options,
            src.as_os_str(),
            base.as_os_str(),
            target.map(Path::as_os_str),
            &mut stderr,
        )
    }

    #[test]
    fn two_argument_form_replaces_the_base_atomically() {
        let scratch = TempDir::new().expect("scratch dir");
        let src = scratch.path().join("src.bin");
        let base = scratch.path().join("base.bin");
        fs::write(&src, b"XABCDEFGH").expect("seed src");
        fs::write(&base, b"ABCDEFGH").expect("seed base");

        run_quiet(&options(), &src, &base, None).expect("local run");

        assert_eq!(fs::read(&base).expect("patched base"), b"XABCDEFGH");
        assert!(!scratch.path().join("base.bin~").exists());
    }

    #[test]
    fn backup_keeps_the_old_base_under_a_tilde_name() {
        let scratch = TempDir::new().expect("scratch dir");
        let src = scratch.path().join("src.bin");
        let base = scratch.path().join("base.bin");
        fs::write(&src, b"new contents").expect("seed src");
        fs::write(&base, b"old contents").expect("seed base");

        let options = Options {
            backup: true,
            ..options()
        };
        run_quiet(&options, &src, &base, None).expect("local run");

        assert_eq!(fs::read(&base).expect("patched base"), b"new contents");
        assert_eq!(
            fs::read(scratch.path().join("base.bin~")).expect("backup"),
            b"old contents"
        );
    }

    #[test]
    fn three_argument_form_writes_the_target_directly() {
        let scratch = TempDir::new().expect("scratch dir");
        let src = scratch.path().join("src.bin");
        let base = scratch.path().join("base.bin");
        let target = scratch.path().join("out.bin");
        fs::write(&src, b"ABCDZEFGH").expect("seed src");
        fs::write(&base, b"ABCDEFGH").expect("seed base");
        fs::write(&target, b"previous target contents").expect("seed target");

        run_quiet(&options(), &src, &base, Some(&target)).expect("local run");

        assert_eq!(fs::read(&target).expect("target"), b"ABCDZEFGH");
        assert_eq!(fs::read(&base).expect("base untouched"), b"ABCDEFGH");
    }

    #[test]
    fn a_missing_base_still_materializes_the_source() {
        let scratch = TempDir::new().expect("scratch dir");
        let src = scratch.path().join("src.bin");
        let base = scratch.path().join("brand-new.bin");
        fs::write(&src, b"created from literals").expect("seed src");

        run_quiet(&options(), &src, &base, None).expect("local run");

        assert_eq!(fs::read(&base).expect("created"), b"created from literals");
    }

    #[test]
    fn the_replacement_carries_the_sources_permissions() {
        let scratch = TempDir::new().expect("scratch dir");
        let src = scratch.path().join("src.bin");
        let base = scratch.path().join("base.bin");
        fs::write(&src, b"contents").expect("seed src");
        fs::write(&base, b"old").expect("seed base");
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).expect("chmod src");

        run_quiet(&options(), &src, &base, None).expect("local run");

        let mode = fs::metadata(&base).expect("metadata").permissions().mode() & 0o7777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn a_missing_source_is_an_error_and_leaves_the_base_alone() {
        let scratch = TempDir::new().expect("scratch dir");
        let base = scratch.path().join("base.bin");
        fs::write(&base, b"untouched").expect("seed base");

        let err = run_quiet(&options(), &scratch.path().join("absent.bin"), &base, None)
            .expect_err("must fail");
        assert!(matches!(err, CliError::Io(_)));
        assert_eq!(fs::read(&base).expect("base"), b"untouched");
    }

    #[test]
    fn debug_dumps_the_delta_to_stderr() {
        let scratch = TempDir::new().expect("scratch dir");
        let src = scratch.path().join("src.bin");
        let base = scratch.path().join("base.bin");
        fs::write(&src, b"XABCDEFGH").expect("seed src");
        fs::write(&base, b"ABCDEFGH").expect("seed base");

        let options = Options {
            debug: true,
            ..options()
        };
        let mut stderr = Vec::new();
        run(
            &options,
            src.as_os_str(),
            base.as_os_str(),
            None,
            &mut stderr,
        )
        .expect("local run");

        let dump = String::from_utf8(stderr).expect("utf-8 dump");
        assert!(dump.contains("literal"));
        assert!(dump.contains("copy"));
    }
}
