//! Frame header and primitive field encodings.
//!
//! All integers are little-endian. Variable-length fields carry a `u32`
//! length prefix. The two delta element shapes are registered as fixed tags
//! so decoders can dispatch without further context.

use std::io::{self, ErrorKind, Read, Write};

use thiserror::Error;

/// Tag for a back-reference delta element (`offset: u64`, `len: u32`).
pub const TAG_COPY: u8 = 0;
/// Tag for a literal delta element (`u32` length, then the bytes).
pub const TAG_LITERAL: u8 = 1;

/// Encoded length of a [`FrameHeader`].
pub const HEADER_LEN: usize = 13;

/// Upper bound on a frame payload; anything larger is a protocol violation.
pub const MAX_PAYLOAD: u32 = 1 << 30;

/// Errors describing malformed wire bytes.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum WireError {
    /// A field extends past the end of its payload.
    #[error("truncated message: {needed} more bytes required")]
    Truncated {
        /// Number of missing bytes.
        needed: usize,
    },
    /// The frame kind byte is not a known kind.
    #[error("invalid frame kind {0:#04x}")]
    InvalidKind(u8),
    /// A delta element carries an unregistered tag.
    #[error("invalid delta element tag {0:#04x}")]
    InvalidTag(u8),
    /// The request names a method the receiver does not implement.
    #[error("unknown method {0:?}")]
    UnknownMethod(String),
    /// The declared payload length exceeds [`MAX_PAYLOAD`].
    #[error("frame payload of {0} bytes exceeds the protocol limit")]
    Oversized(u32),
    /// A payload decoded completely but bytes were left over.
    #[error("payload carries {0} trailing bytes")]
    Trailing(usize),
    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    /// A summary table declares a zero block length.
    #[error("summary table declares a zero block length")]
    InvalidBlockLength,
}

/// Errors surfaced by RPC calls and the serve loop.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The peer sent bytes this implementation cannot decode.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The peer reported an error for this call.
    #[error("{0}")]
    Remote(String),
    /// The connection closed while calls were outstanding.
    #[error("connection closed with calls outstanding")]
    Disconnected,
}

/// Copies a slice of exactly `N` bytes into a local array.
///
/// Callers pass slices whose length the surrounding code already fixed
/// (header fields, checked `take` results).
fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Message direction of a frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FrameKind {
    /// Caller to service.
    Request = 1,
    /// Service to caller.
    Response = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            other => Err(WireError::InvalidKind(other)),
        }
    }
}

/// Fixed-size frame header: kind, call sequence number, payload length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// Message direction.
    pub kind: FrameKind,
    /// Sequence number correlating a response with its request.
    pub seq: u64,
    /// Payload length in bytes.
    pub len: u32,
}

impl FrameHeader {
    /// Encodes the header into its fixed-size wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.kind as u8;
        out[1..9].copy_from_slice(&self.seq.to_le_bytes());
        out[9..13].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    /// Decodes a header, validating the kind and the payload length bound.
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Result<Self, WireError> {
        let kind = FrameKind::try_from(bytes[0])?;
        let seq = u64::from_le_bytes(array(&bytes[1..9]));
        let len = u32::from_le_bytes(array(&bytes[9..13]));
        if len > MAX_PAYLOAD {
            return Err(WireError::Oversized(len));
        }
        Ok(Self { kind, seq, len })
    }
}

/// Writes one frame and flushes the transport.
pub fn write_frame<W: Write + ?Sized>(
    writer: &mut W,
    kind: FrameKind,
    seq: u64,
    payload: &[u8],
) -> io::Result<()> {
    let header = FrameHeader {
        kind,
        seq,
        len: payload.len() as u32,
    };
    writer.write_all(&header.encode())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Reads one frame, or `None` when the transport closes cleanly between
/// frames.
///
/// A close mid-frame is an error; a partial header or payload never goes
/// unnoticed.
pub fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
) -> Result<Option<(FrameHeader, Vec<u8>)>, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    let mut read = 0;
    while read < HEADER_LEN {
        match reader.read(&mut header[read..]) {
            Ok(0) if read == 0 => return Ok(None),
            Ok(0) => {
                return Err(ProtocolError::Io(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )));
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }

    let header = FrameHeader::decode(header)?;
    let mut payload = vec![0u8; header.len as usize];
    reader.read_exact(&mut payload)?;
    Ok(Some((header, payload)))
}

/// Append-only payload builder.
#[derive(Debug, Default)]
pub(crate) struct PutBuf(pub Vec<u8>);

impl PutBuf {
    pub fn put_u8(&mut self, v: u8) {
        self.0.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.0.extend_from_slice(v);
    }

    pub fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }
}

/// Checked payload reader.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GetBuf<'a> {
    buf: &'a [u8],
}

impl<'a> GetBuf<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::Truncated {
                needed: n - self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        Ok(array(self.take(N)?))
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn get_digest(&mut self) -> Result<[u8; 16], WireError> {
        self.take_array()
    }

    pub fn get_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    pub fn get_str(&mut self) -> Result<&'a str, WireError> {
        std::str::from_utf8(self.get_bytes()?).map_err(|_| WireError::InvalidUtf8)
    }

    /// Fails unless every payload byte was consumed.
    pub fn finish(self) -> Result<(), WireError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(WireError::Trailing(self.buf.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = FrameHeader {
            kind: FrameKind::Request,
            seq: 0x0123_4567_89ab_cdef,
            len: 42,
        };
        let decoded = FrameHeader::decode(header.encode()).expect("decode succeeds");
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_rejects_invalid_kind() {
        let mut bytes = FrameHeader {
            kind: FrameKind::Response,
            seq: 1,
            len: 0,
        }
        .encode();
        bytes[0] = 0x7f;

        assert_eq!(
            FrameHeader::decode(bytes),
            Err(WireError::InvalidKind(0x7f))
        );
    }

    #[test]
    fn header_rejects_oversized_payloads() {
        let mut bytes = FrameHeader {
            kind: FrameKind::Request,
            seq: 1,
            len: 0,
        }
        .encode();
        bytes[9..13].copy_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(
            FrameHeader::decode(bytes),
            Err(WireError::Oversized(_))
        ));
    }

    #[test]
    fn frames_round_trip_over_a_buffer() {
        let mut pipe = Vec::new();
        write_frame(&mut pipe, FrameKind::Response, 7, b"payload").unwrap();

        let (header, payload) = read_frame(&mut pipe.as_slice()).unwrap().expect("one frame");
        assert_eq!(header.kind, FrameKind::Response);
        assert_eq!(header.seq, 7);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn clean_close_between_frames_reads_as_none() {
        assert!(read_frame(&mut [].as_slice()).unwrap().is_none());
    }

    #[test]
    fn close_mid_header_is_an_error() {
        let mut pipe = Vec::new();
        write_frame(&mut pipe, FrameKind::Request, 1, b"x").unwrap();
        pipe.truncate(HEADER_LEN - 2);

        assert!(read_frame(&mut pipe.as_slice()).is_err());
    }

    #[test]
    fn close_mid_payload_is_an_error() {
        let mut pipe = Vec::new();
        write_frame(&mut pipe, FrameKind::Request, 1, b"payload").unwrap();
        pipe.truncate(HEADER_LEN + 3);

        assert!(read_frame(&mut pipe.as_slice()).is_err());
    }

    #[test]
    fn get_buf_reports_missing_bytes() {
        let mut get = GetBuf::new(&[1, 2]);
        assert_eq!(get.get_u32(), Err(WireError::Truncated { needed: 2 }));
    }

    #[test]
    fn finish_rejects_trailing_bytes() {
        let mut put = PutBuf::default();
        put.put_u8(1);
        put.put_u8(2);

        let mut get = GetBuf::new(&put.0);
        get.get_u8().unwrap();
        assert_eq!(get.finish(), Err(WireError::Trailing(1)));
    }
}
