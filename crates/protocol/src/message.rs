//! Request/response bodies and the codecs for the data model.

use engine::{Delta, DeltaOp, SumTable};

use crate::wire::{GetBuf, PutBuf, TAG_COPY, TAG_LITERAL, WireError};

/// Method name of the summary call on the wire.
pub const METHOD_SUMTABLE: &str = "sumtable";
/// Method name of the patch call on the wire.
pub const METHOD_PATCH: &str = "patch";

/// Arguments of the `patch` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchArg {
    /// Receiver-relative path of the base file, as previously summarized.
    pub path: String,
    /// Delta reconstructing the source from that base.
    pub delta: Delta,
    /// Owner to apply to the materialized file.
    pub uid: i32,
    /// Group to apply to the materialized file.
    pub gid: i32,
    /// Permission bits to apply to the materialized file.
    pub permission: u32,
}

/// A decoded request: the method name resolved to its argument shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Summarize the base at `path` and retain its handle.
    Sumtable {
        /// Receiver-relative path of the base file.
        path: String,
    },
    /// Apply a delta and materialize the result over the base.
    Patch(PatchArg),
}

impl Request {
    /// Encodes the request payload: method name, then the arguments.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut put = PutBuf::default();
        match self {
            Self::Sumtable { path } => {
                put.put_str(METHOD_SUMTABLE);
                put.put_str(path);
            }
            Self::Patch(arg) => {
                put.put_str(METHOD_PATCH);
                put.put_str(&arg.path);
                put_delta(&mut put, &arg.delta);
                put.put_i32(arg.uid);
                put.put_i32(arg.gid);
                put.put_u32(arg.permission);
            }
        }
        put.0
    }

    /// Decodes a request payload, dispatching on the method name.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut get = GetBuf::new(payload);
        let method = get.get_str()?;
        let request = match method {
            METHOD_SUMTABLE => Self::Sumtable {
                path: get.get_str()?.to_owned(),
            },
            METHOD_PATCH => {
                let path = get.get_str()?.to_owned();
                let delta = get_delta(&mut get)?;
                let uid = get.get_i32()?;
                let gid = get.get_i32()?;
                let permission = get.get_u32()?;
                Self::Patch(PatchArg {
                    path,
                    delta,
                    uid,
                    gid,
                    permission,
                })
            }
            other => return Err(WireError::UnknownMethod(other.to_owned())),
        };
        get.finish()?;
        Ok(request)
    }
}

const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

/// A decoded response: the method's result payload or the peer's error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// The call succeeded; the payload is the method's result encoding.
    Ok(Vec<u8>),
    /// The call failed with this message.
    Err(String),
}

impl Response {
    /// Encodes the response payload: status byte, then result or message.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut put = PutBuf::default();
        match self {
            Self::Ok(result) => {
                put.put_u8(STATUS_OK);
                put.0.extend_from_slice(result);
            }
            Self::Err(message) => {
                put.put_u8(STATUS_ERR);
                put.put_str(message);
            }
        }
        put.0
    }

    /// Decodes a response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut get = GetBuf::new(payload);
        match get.get_u8()? {
            STATUS_OK => Ok(Self::Ok(payload[1..].to_vec())),
            STATUS_ERR => {
                let message = get.get_str()?.to_owned();
                get.finish()?;
                Ok(Self::Err(message))
            }
            other => Err(WireError::InvalidTag(other)),
        }
    }
}

fn put_delta(put: &mut PutBuf, delta: &Delta) {
    put.put_u32(delta.len() as u32);
    for op in delta {
        match op {
            DeltaOp::Copy { offset, len } => {
                put.put_u8(TAG_COPY);
                put.put_u64(*offset);
                put.put_u32(*len);
            }
            DeltaOp::Literal(bytes) => {
                put.put_u8(TAG_LITERAL);
                put.put_bytes(bytes);
            }
        }
    }
}

fn get_delta(get: &mut GetBuf<'_>) -> Result<Delta, WireError> {
    let count = get.get_u32()? as usize;
    let mut delta = Delta::new();
    for _ in 0..count {
        let op = match get.get_u8()? {
            TAG_COPY => DeltaOp::Copy {
                offset: get.get_u64()?,
                len: get.get_u32()?,
            },
            TAG_LITERAL => DeltaOp::Literal(get.get_bytes()?.to_vec()),
            other => return Err(WireError::InvalidTag(other)),
        };
        delta.push(op);
    }
    Ok(delta)
}

/// Encodes a summary table as the `sumtable` result payload.
#[must_use]
pub fn encode_sum_table(table: &SumTable) -> Vec<u8> {
    let mut put = PutBuf::default();
    put.put_u32(table.block_len() as u32);
    put.put_u32(table.len() as u32);
    for (wsum, digest, index) in table.iter() {
        put.put_u32(wsum);
        put.0.extend_from_slice(&digest);
        put.put_u32(index);
    }
    put.0
}

/// Decodes a `sumtable` result payload.
pub fn decode_sum_table(payload: &[u8]) -> Result<SumTable, WireError> {
    let mut get = GetBuf::new(payload);
    let block_len = get.get_u32()? as usize;
    if block_len == 0 {
        return Err(WireError::InvalidBlockLength);
    }
    let count = get.get_u32()? as usize;
    let mut table = SumTable::new(block_len);
    for _ in 0..count {
        let wsum = get.get_u32()?;
        let digest = get.get_digest()?;
        let index = get.get_u32()?;
        table.insert(wsum, digest, index);
    }
    get.finish()?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn sample_delta() -> Delta {
        vec![
            DeltaOp::Copy {
                offset: 8192,
                len: 4096,
            },
            DeltaOp::Literal(b"inserted".to_vec()),
            DeltaOp::Copy {
                offset: 0,
                len: 17,
            },
        ]
    }

    #[test]
    fn sumtable_request_round_trips() {
        let request = Request::Sumtable {
            path: "dir/base.bin".to_owned(),
        };
        assert_eq!(Request::decode(&request.encode()), Ok(request));
    }

    #[test]
    fn patch_request_round_trips() {
        let request = Request::Patch(PatchArg {
            path: "dir/base.bin".to_owned(),
            delta: sample_delta(),
            uid: 1000,
            gid: -1,
            permission: 0o640,
        });
        assert_eq!(Request::decode(&request.encode()), Ok(request));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut put = PutBuf::default();
        put.put_str("chmod");

        assert_eq!(
            Request::decode(&put.0),
            Err(WireError::UnknownMethod("chmod".to_owned()))
        );
    }

    #[test]
    fn truncated_patch_request_is_rejected() {
        let request = Request::Patch(PatchArg {
            path: "p".to_owned(),
            delta: sample_delta(),
            uid: 0,
            gid: 0,
            permission: 0o644,
        });
        let mut bytes = request.encode();
        bytes.truncate(bytes.len() - 1);

        assert!(matches!(
            Request::decode(&bytes),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_request_bytes_are_rejected() {
        let mut bytes = Request::Sumtable {
            path: "p".to_owned(),
        }
        .encode();
        bytes.push(0);

        assert_eq!(Request::decode(&bytes), Err(WireError::Trailing(1)));
    }

    #[test]
    fn responses_round_trip() {
        let ok = Response::Ok(b"result bytes".to_vec());
        assert_eq!(Response::decode(&ok.encode()), Ok(ok));

        let err = Response::Err("base file not in registry".to_owned());
        assert_eq!(Response::decode(&err.encode()), Ok(err));
    }

    #[test]
    fn delta_with_unregistered_tag_is_rejected() {
        let mut put = PutBuf::default();
        put.put_str(METHOD_PATCH);
        put.put_str("p");
        put.put_u32(1);
        put.put_u8(9);

        assert_eq!(Request::decode(&put.0), Err(WireError::InvalidTag(9)));
    }

    #[test]
    fn sum_tables_round_trip() {
        let table =
            SumTable::from_reader(Some(&mut Cursor::new(b"summary table payload")), 6).unwrap();

        let decoded = decode_sum_table(&encode_sum_table(&table)).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn empty_sum_table_round_trips() {
        let table = SumTable::new(4096);
        let decoded = decode_sum_table(&encode_sum_table(&table)).unwrap();

        assert_eq!(decoded.block_len(), 4096);
        assert!(decoded.is_empty());
    }
}
