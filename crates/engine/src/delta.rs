use std::io::{self, BufRead, ErrorKind};

use checksums::SumWindow;
use tracing::trace;

use crate::SumTable;

/// One element of a delta: either a range of the base or verbatim source
/// bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaOp {
    /// Reuse `len` bytes of the base starting at `offset`.
    Copy {
        /// Byte offset into the base.
        offset: u64,
        /// Number of bytes to copy.
        len: u32,
    },
    /// Emit these bytes verbatim.
    Literal(Vec<u8>),
}

/// Ordered delta elements that reconstruct a source when resolved against the
/// base they were computed from.
pub type Delta = Vec<DeltaOp>;

fn flush_literal(delta: &mut Delta, lit: &mut Vec<u8>) {
    if !lit.is_empty() {
        delta.push(DeltaOp::Literal(std::mem::take(lit)));
    }
}

fn read_byte<R: BufRead>(src: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match src.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

impl SumTable {
    /// Computes the delta that turns the base this table summarizes into the
    /// bytes of `src`.
    ///
    /// The source is streamed through a block-length window. A window that
    /// matches a base block (weak checksum confirmed by strong digest) emits
    /// a [`DeltaOp::Copy`] and the window refills behind it; otherwise the
    /// window slides one byte and the evicted byte joins the pending literal
    /// run. A short window at end of input is looked up once, covering a
    /// source that ends exactly on the base's short final block.
    ///
    /// Matching is greedy; the delta reproduces the source exactly but is
    /// not guaranteed minimal.
    pub fn delta<R: BufRead>(&self, src: &mut R) -> io::Result<Delta> {
        let block_len = self.block_len();
        let mut window = SumWindow::new(block_len);
        let mut delta = Delta::new();
        let mut lit: Vec<u8> = Vec::new();

        'refill: loop {
            let filled = window.fill(src)?;
            if filled == 0 {
                break;
            }

            if filled < block_len {
                // Final short window: one lookup, no sliding.
                if let Some(index) = self.lookup(&window) {
                    flush_literal(&mut delta, &mut lit);
                    delta.push(DeltaOp::Copy {
                        offset: self.block_offset(index),
                        len: filled as u32,
                    });
                } else {
                    lit.extend_from_slice(&window.logical_to_vec());
                }
                break;
            }

            loop {
                if let Some(index) = self.lookup(&window) {
                    flush_literal(&mut delta, &mut lit);
                    delta.push(DeltaOp::Copy {
                        offset: self.block_offset(index),
                        len: block_len as u32,
                    });
                    continue 'refill;
                }

                let Some(incoming) = read_byte(src)? else {
                    // Input ended while scanning: the window never matched,
                    // so its logical bytes extend the literal run.
                    lit.extend_from_slice(&window.logical_to_vec());
                    break 'refill;
                };
                let evicted = window.roll(incoming).map_err(io::Error::other)?;
                lit.push(evicted);
            }
        }

        flush_literal(&mut delta, &mut lit);
        trace!(elements = delta.len(), "delta computed");
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    const L: usize = 4;

    fn table_of(base: &[u8]) -> SumTable {
        SumTable::from_reader(Some(&mut Cursor::new(base)), L).unwrap()
    }

    fn delta_of(table: &SumTable, src: &[u8]) -> Delta {
        table.delta(&mut Cursor::new(src)).unwrap()
    }

    fn copy(offset: u64, len: u32) -> DeltaOp {
        DeltaOp::Copy { offset, len }
    }

    fn lit(bytes: &[u8]) -> DeltaOp {
        DeltaOp::Literal(bytes.to_vec())
    }

    #[test]
    fn identical_source_is_pure_back_references() {
        let table = table_of(b"ABCDEFGH");
        assert_eq!(
            delta_of(&table, b"ABCDEFGH"),
            vec![copy(0, 4), copy(4, 4)]
        );
    }

    #[test]
    fn prefix_insertion_costs_one_literal_byte() {
        let table = table_of(b"ABCDEFGH");
        assert_eq!(
            delta_of(&table, b"XABCDEFGH"),
            vec![lit(b"X"), copy(0, 4), copy(4, 4)]
        );
    }

    #[test]
    fn mid_stream_insertion_splits_the_matches() {
        let table = table_of(b"ABCDEFGH");
        assert_eq!(
            delta_of(&table, b"ABCDZEFGH"),
            vec![copy(0, 4), lit(b"Z"), copy(4, 4)]
        );
    }

    #[test]
    fn reordered_blocks_are_both_found() {
        let table = table_of(b"ABCDEFGH");
        assert_eq!(
            delta_of(&table, b"EFGHABCD"),
            vec![copy(4, 4), copy(0, 4)]
        );
    }

    #[test]
    fn missing_base_produces_one_literal_run() {
        let table = SumTable::from_reader::<Cursor<&[u8]>>(None, L).unwrap();
        assert_eq!(delta_of(&table, b"hello"), vec![lit(b"hello")]);
    }

    #[test]
    fn short_final_block_matches_with_its_own_length() {
        let table = table_of(b"ABCDEFG");
        assert_eq!(
            delta_of(&table, b"ABCDEFG"),
            vec![copy(0, 4), copy(4, 3)]
        );
    }

    #[test]
    fn empty_source_produces_an_empty_delta() {
        let table = table_of(b"ABCDEFGH");
        assert_eq!(delta_of(&table, b""), Delta::new());
    }

    #[test]
    fn source_shorter_than_a_block_with_no_match_is_literal() {
        let table = table_of(b"ABCDEFGH");
        assert_eq!(delta_of(&table, b"xy"), vec![lit(b"xy")]);
    }

    #[test]
    fn unmatched_tail_merges_into_a_single_literal() {
        // The trailing window never matches; its bytes join the pending
        // literal run rather than forming a second element.
        let table = table_of(b"ABCDEFGH");
        assert_eq!(
            delta_of(&table, b"ABCDxxxxxx"),
            vec![copy(0, 4), lit(b"xxxxxx")]
        );
    }

    #[test]
    fn back_reference_offsets_are_block_aligned() {
        let base = b"aaaabbbbccccddddeee";
        let table = table_of(base);
        let delta = delta_of(&table, b"ccccXaaaabbbbeee");

        for (i, op) in delta.iter().enumerate() {
            if let DeltaOp::Copy { offset, len } = op {
                assert_eq!(offset % L as u64, 0);
                if i < delta.len() - 1 {
                    assert_eq!(*len as usize, L);
                } else {
                    assert!(*len as usize <= L);
                }
            }
        }
    }
}
