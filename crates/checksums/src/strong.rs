//! Strong digest used to confirm weak-checksum matches.
//!
//! The weak checksum is only a filter; equality of two blocks is decided by
//! this 16-byte digest. Collision resistance is not a required security
//! property: the base file is under the caller's own control, and a digest
//! never leaves one summary/delta pair. Any 16-byte digest could be
//! substituted without changing the table shape; MD5 is what the wire peers
//! agree on today.

use digest::Digest;

/// Number of bytes in a strong digest.
pub const DIGEST_LEN: usize = 16;

/// Strong digest of one block, in file order.
pub type BlockDigest = [u8; DIGEST_LEN];

/// Digests a block that is contiguous in memory.
#[must_use]
pub fn block_digest(block: &[u8]) -> BlockDigest {
    md5::Md5::digest(block).into()
}

/// Digests a ring-split window in logical order, `front` then `back`.
///
/// A window that has slid around its ring stores its logical bytes as two
/// storage slices; feeding both halves into one hasher avoids reassembling
/// them just to compare against a block digest.
#[must_use]
pub fn window_digest(front: &[u8], back: &[u8]) -> BlockDigest {
    let mut hasher = md5::Md5::new();
    hasher.update(front);
    hasher.update(back);
    hasher.finalize().into()
}
