//! Serving side of the pipe RPC: one request at a time, dispatched by method
//! name.

use std::fmt::Display;
use std::io::{Read, Write};

use engine::SumTable;
use tracing::{debug, trace};

use crate::message::{PatchArg, Request, Response, encode_sum_table};
use crate::wire::{FrameKind, ProtocolError, WireError, read_frame, write_frame};

/// The two calls a synchronization peer answers.
///
/// Methods take `&mut self`: the service owns per-connection state (the
/// retained base handles bridging a `sumtable` to its `patch`) and the serve
/// loop never dispatches concurrently.
pub trait Service {
    /// Error type rendered into the response's error string.
    type Error: Display;

    /// Summarizes the base at `path` and retains its handle for a subsequent
    /// [`patch`](Self::patch).
    fn sumtable(&mut self, path: &str) -> Result<SumTable, Self::Error>;

    /// Applies a delta against the retained base and materializes the result.
    fn patch(&mut self, arg: PatchArg) -> Result<(), Self::Error>;
}

/// Serves one connection until the peer closes its write half.
///
/// Requests are decoded and dispatched strictly in order. A method failure is
/// reported to the peer under the call's sequence number and the connection
/// stays up; only transport failures and undecodable frames end the loop with
/// an error.
pub fn serve<R, W, S>(reader: &mut R, writer: &mut W, service: &mut S) -> Result<(), ProtocolError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
    S: Service,
{
    while let Some((header, payload)) = read_frame(reader)? {
        if header.kind != FrameKind::Request {
            return Err(ProtocolError::Wire(WireError::InvalidKind(
                header.kind as u8,
            )));
        }

        let response = match Request::decode(&payload) {
            Ok(Request::Sumtable { path }) => {
                trace!(seq = header.seq, path = %path, "sumtable request");
                match service.sumtable(&path) {
                    Ok(table) => Response::Ok(encode_sum_table(&table)),
                    Err(e) => Response::Err(e.to_string()),
                }
            }
            Ok(Request::Patch(arg)) => {
                trace!(seq = header.seq, path = %arg.path, "patch request");
                match service.patch(arg) {
                    Ok(()) => Response::Ok(Vec::new()),
                    Err(e) => Response::Err(e.to_string()),
                }
            }
            Err(e) => {
                debug!(seq = header.seq, error = %e, "undecodable request");
                Response::Err(e.to_string())
            }
        };

        write_frame(writer, FrameKind::Response, header.seq, &response.encode())?;
    }
    debug!("connection closed by peer");
    Ok(())
}
