use std::io::{self, Read};

use checksums::SumWindow;
use checksums::strong::{self, BlockDigest};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Summary of a base file's non-overlapping blocks, keyed by weak checksum
/// and strong digest.
///
/// All blocks are exactly the block length except possibly the final one.
/// Insertion is first-writer-wins on both keys, so a base with repeated
/// content deterministically resolves to the earliest matching block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SumTable {
    block_len: usize,
    table: FxHashMap<u32, FxHashMap<BlockDigest, u32>>,
}

impl SumTable {
    /// Creates an empty table for blocks of `block_len` bytes.
    ///
    /// An empty table is the representation of a base that does not exist:
    /// every lookup misses and a delta against it is pure literals.
    ///
    /// # Panics
    ///
    /// Panics if `block_len` is zero; callers validate block lengths at the
    /// configuration boundary.
    #[must_use]
    pub fn new(block_len: usize) -> Self {
        assert!(block_len > 0, "block length must be positive");
        Self {
            block_len,
            table: FxHashMap::default(),
        }
    }

    /// Summarizes `base` in non-overlapping blocks of `block_len` bytes.
    ///
    /// `None` yields the empty table. Read errors other than end of input
    /// abort construction.
    pub fn from_reader<R: Read>(base: Option<&mut R>, block_len: usize) -> io::Result<Self> {
        let mut table = Self::new(block_len);
        let Some(reader) = base else {
            return Ok(table);
        };

        let mut window = SumWindow::new(block_len);
        for index in 0u32.. {
            if window.fill(reader)? == 0 {
                break;
            }
            let (front, back) = window.logical();
            table.insert(window.value(), strong::window_digest(front, back), index);
        }

        debug!(
            block_len,
            digests = table.len(),
            "summary table constructed"
        );
        Ok(table)
    }

    /// Block length the table was built with.
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Number of distinct block digests stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.values().map(FxHashMap::len).sum()
    }

    /// Returns `true` when no blocks are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Records `digest -> index` under `wsum`, keeping an existing entry on
    /// collision.
    pub fn insert(&mut self, wsum: u32, digest: BlockDigest, index: u32) {
        self.table
            .entry(wsum)
            .or_default()
            .entry(digest)
            .or_insert(index);
    }

    /// Looks up the window's contents, confirming a weak-checksum hit with
    /// the strong digest over the window's logical bytes.
    #[must_use]
    pub fn lookup(&self, window: &SumWindow) -> Option<u32> {
        let inner = self.table.get(&window.value())?;
        let (front, back) = window.logical();
        inner.get(&strong::window_digest(front, back)).copied()
    }

    /// Byte offset of block `index` in the base.
    #[must_use]
    pub fn block_offset(&self, index: u32) -> u64 {
        u64::from(index) * self.block_len as u64
    }

    /// Iterates over `(weak checksum, strong digest, block index)` entries in
    /// unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, BlockDigest, u32)> + '_ {
        self.table.iter().flat_map(|(&wsum, inner)| {
            inner
                .iter()
                .map(move |(&digest, &index)| (wsum, digest, index))
        })
    }
}
