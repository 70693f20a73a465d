use std::fs::File;
use std::io::{self, Write};

use thiserror::Error;

use crate::{Delta, DeltaOp};

/// Errors raised while resolving a delta into the reconstructed stream.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Reading the base or writing the output failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The delta references base bytes but no base is available.
    #[error("delta references base bytes but no base file is available")]
    MissingBase,
}

/// Positioned reads against a base, independent of any seek cursor.
pub trait ReadAt {
    /// Reads exactly `buf.len()` bytes at `offset`, failing on short reads.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
}

#[cfg(unix)]
impl ReadAt for File {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }
}

impl ReadAt for [u8] {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start <= self.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

/// Resolves `delta` against `base` and writes the reconstructed bytes to
/// `out`.
///
/// Back-references read exactly their length from the base; literals are
/// written verbatim. One scratch buffer is reused across back-references and
/// grown to the largest length seen. Any short read, read error, or write
/// error aborts with that error; the output may then be partially written and
/// is the caller's to discard.
pub fn apply<B, W>(base: Option<&B>, delta: &Delta, out: &mut W) -> Result<(), PatchError>
where
    B: ReadAt + ?Sized,
    W: Write,
{
    let mut scratch: Vec<u8> = Vec::new();
    for op in delta {
        match op {
            DeltaOp::Copy { offset, len } => {
                let base = base.ok_or(PatchError::MissingBase)?;
                let len = *len as usize;
                if scratch.len() < len {
                    scratch.resize(len, 0);
                }
                base.read_exact_at(&mut scratch[..len], *offset)?;
                out.write_all(&scratch[..len])?;
            }
            DeltaOp::Literal(bytes) => out.write_all(bytes)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use proptest::prelude::*;

    use crate::SumTable;

    fn reconstruct(base: &[u8], delta: &Delta) -> Vec<u8> {
        let mut out = Vec::new();
        apply(Some(base), delta, &mut out).unwrap();
        out
    }

    #[test]
    fn copies_and_literals_interleave_in_order() {
        let base = b"ABCDEFGH";
        let delta = vec![
            DeltaOp::Copy { offset: 4, len: 4 },
            DeltaOp::Literal(b"-mid-".to_vec()),
            DeltaOp::Copy { offset: 0, len: 4 },
        ];

        assert_eq!(reconstruct(base, &delta), b"EFGH-mid-ABCD");
    }

    #[test]
    fn copy_past_the_base_end_fails() {
        let base = b"ABCD";
        let delta = vec![DeltaOp::Copy { offset: 2, len: 4 }];

        let err = apply(Some(base.as_slice()), &delta, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PatchError::Io(_)));
    }

    #[test]
    fn copy_without_a_base_fails() {
        let delta = vec![DeltaOp::Copy { offset: 0, len: 1 }];

        let err = apply::<[u8], _>(None, &delta, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PatchError::MissingBase));
    }

    #[test]
    fn literals_do_not_require_a_base() {
        let delta = vec![DeltaOp::Literal(b"fresh".to_vec())];

        let mut out = Vec::new();
        apply::<[u8], _>(None, &delta, &mut out).unwrap();
        assert_eq!(out, b"fresh");
    }

    #[test]
    fn empty_delta_writes_nothing() {
        let mut out = Vec::new();
        apply(Some(b"base".as_slice()), &Delta::new(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    proptest! {
        #[test]
        fn delta_then_patch_reproduces_the_source(
            base in prop::collection::vec(any::<u8>(), 0..=256),
            src in prop::collection::vec(any::<u8>(), 0..=256),
            block_len in 1usize..=9,
        ) {
            let table =
                SumTable::from_reader(Some(&mut Cursor::new(&base)), block_len).unwrap();
            let delta = table.delta(&mut Cursor::new(&src)).unwrap();

            prop_assert_eq!(reconstruct(&base, &delta), src);
        }

        #[test]
        fn shared_prefix_sources_round_trip(
            common in prop::collection::vec(any::<u8>(), 0..=200),
            edit in prop::collection::vec(any::<u8>(), 0..=32),
            splice_at in 0usize..=200,
        ) {
            // Source derived from the base by a single splice, the shape a
            // real sync encounters.
            let base = common;
            let splice_at = splice_at.min(base.len());
            let mut src = base.clone();
            src.splice(splice_at..splice_at, edit);

            let table = SumTable::from_reader(Some(&mut Cursor::new(&base)), 8).unwrap();
            let delta = table.delta(&mut Cursor::new(&src)).unwrap();

            prop_assert_eq!(reconstruct(&base, &delta), src);
        }
    }
}
