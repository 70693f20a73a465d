use std::io::{self, ErrorKind, Read};

use thiserror::Error;

/// Error raised when a rolling update is attempted on a window that does not
/// hold a complete block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("rolling update requires a full window ({live} of {block_len} bytes live)")]
pub struct RollingError {
    /// Number of bytes currently held by the window.
    pub live: usize,
    /// Configured block length of the window.
    pub block_len: usize,
}

/// Fixed-length byte window with a Fletcher-style weak checksum that updates
/// in O(1) per one-byte slide.
///
/// The window holds bytes `c0..c(L-1)` at logical positions `0..L` where `L`
/// is the block length. The two 16-bit components are
///
/// - `a = (c0 + c1 + ... + c(L-1)) mod 2^16`
/// - `b = (L*c0 + (L-1)*c1 + ... + 1*c(L-1)) mod 2^16`
///
/// and the exposed value packs them as `(b << 16) | a`. The physical buffer
/// is a ring: after `k` slides the logical window starts at storage index
/// `k mod L`, and [`logical`](Self::logical) returns the two storage slices
/// in logical order.
#[derive(Clone, Debug)]
pub struct SumWindow {
    buf: Vec<u8>,
    live: usize,
    idx: usize,
    a: u16,
    b: u16,
}

impl SumWindow {
    /// Creates an empty window for blocks of `block_len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `block_len` is zero; callers validate block lengths at the
    /// configuration boundary.
    #[must_use]
    pub fn new(block_len: usize) -> Self {
        assert!(block_len > 0, "block length must be positive");
        Self {
            buf: vec![0; block_len],
            live: 0,
            idx: 0,
            a: 0,
            b: 0,
        }
    }

    /// Configured block length of the window.
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes currently held by the window.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.live
    }

    /// Returns `true` when the window holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns `true` when the window holds a complete block.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.live == self.buf.len()
    }

    /// Refills the window from `reader`, reading until the buffer is full or
    /// the stream ends, and recomputes both checksum components.
    ///
    /// Returns the number of bytes read: the block length for a full window,
    /// a smaller count for the final short window of a stream, or zero at
    /// end of input (the window is then empty). `Interrupted` reads are
    /// retried; any other error is returned unchanged.
    pub fn fill<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut total = 0;
        while total < self.buf.len() {
            match reader.read(&mut self.buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.live = total;
        self.recompute();
        Ok(total)
    }

    /// Recomputes both components from the live bytes and resets the ring to
    /// logical order.
    ///
    /// The positional weight of byte `i` is `block_len - i` truncated to 16
    /// bits, independent of how many bytes are live, so short final windows
    /// hash consistently with full ones on both sides of a transfer.
    pub fn recompute(&mut self) {
        let block_len = self.buf.len();
        self.idx = 0;
        self.a = 0;
        self.b = 0;
        for (i, &c) in self.buf[..self.live].iter().enumerate() {
            self.a = self.a.wrapping_add(u16::from(c));
            self.b = self
                .b
                .wrapping_add(((block_len - i) as u16).wrapping_mul(u16::from(c)));
        }
    }

    /// Loads `block` as the window contents without touching a reader.
    ///
    /// # Panics
    ///
    /// Panics if `block` is longer than the configured block length.
    pub fn load(&mut self, block: &[u8]) {
        assert!(block.len() <= self.buf.len());
        self.buf[..block.len()].copy_from_slice(block);
        self.live = block.len();
        self.recompute();
    }

    /// Slides the window one byte: `incoming` enters at the logical end and
    /// the oldest byte is evicted and returned.
    ///
    /// Both components are updated in O(1) with wrapping 16-bit arithmetic;
    /// the high component is adjusted with the already-updated low component,
    /// which is what makes the incremental form equal the full recomputation.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError`] when the window does not hold a complete
    /// block. Short end-of-stream windows use constant-length weights that a
    /// one-byte slide cannot maintain, so they only support lookup.
    pub fn roll(&mut self, incoming: u8) -> Result<u8, RollingError> {
        if !self.is_full() {
            return Err(RollingError {
                live: self.live,
                block_len: self.buf.len(),
            });
        }

        let old = self.buf[self.idx];
        self.a = self
            .a
            .wrapping_sub(u16::from(old))
            .wrapping_add(u16::from(incoming));
        self.b = self
            .b
            .wrapping_sub((self.buf.len() as u16).wrapping_mul(u16::from(old)))
            .wrapping_add(self.a);
        self.buf[self.idx] = incoming;
        self.idx = (self.idx + 1) % self.buf.len();
        Ok(old)
    }

    /// Packed 32-bit weak checksum `(b << 16) | a`.
    #[must_use]
    pub fn value(&self) -> u32 {
        (u32::from(self.b) << 16) | u32::from(self.a)
    }

    /// The live window bytes in logical order as two storage slices.
    ///
    /// The first slice runs from the logical start to the end of the ring,
    /// the second wraps around to the logical end. Concatenating them yields
    /// the window contents in stream order.
    #[must_use]
    pub fn logical(&self) -> (&[u8], &[u8]) {
        (&self.buf[self.idx..self.live], &self.buf[..self.idx])
    }

    /// The live window bytes in logical order as one owned buffer.
    #[must_use]
    pub fn logical_to_vec(&self) -> Vec<u8> {
        let (front, back) = self.logical();
        let mut out = Vec::with_capacity(front.len() + back.len());
        out.extend_from_slice(front);
        out.extend_from_slice(back);
        out
    }
}
