//! Caller side of the pipe RPC: concurrent calls multiplexed by sequence
//! number over one writer and one reader.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use engine::SumTable;
use tracing::{debug, trace};

use crate::message::{PatchArg, Request, Response, decode_sum_table};
use crate::wire::{FrameKind, ProtocolError, read_frame, write_frame};

type Pending = Arc<Mutex<HashMap<u64, mpsc::Sender<Response>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// RPC client over one full-duplex pipe pair.
///
/// Any number of threads may call concurrently; requests are written under a
/// lock and a dedicated reader thread routes each response frame to the
/// caller waiting on its sequence number. When the transport fails or closes,
/// every outstanding and future call fails with
/// [`ProtocolError::Disconnected`].
pub struct Client {
    writer: Mutex<Box<dyn Write + Send>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_seq: AtomicU64,
    reader: Option<thread::JoinHandle<()>>,
}

impl Client {
    /// Builds a client on a pipe pair and starts its response reader thread.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = thread::spawn({
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            move || read_responses(reader, &pending, &closed)
        });
        Self {
            writer: Mutex::new(Box::new(writer)),
            pending,
            closed,
            next_seq: AtomicU64::new(0),
            reader: Some(reader),
        }
    }

    /// Calls `sumtable` for `path` on the peer.
    pub fn sumtable(&self, path: &str) -> Result<SumTable, ProtocolError> {
        let payload = self.call(&Request::Sumtable {
            path: path.to_owned(),
        })?;
        Ok(decode_sum_table(&payload)?)
    }

    /// Calls `patch` on the peer.
    pub fn patch(&self, arg: PatchArg) -> Result<(), ProtocolError> {
        self.call(&Request::Patch(arg)).map(|_| ())
    }

    fn call(&self, request: &Request) -> Result<Vec<u8>, ProtocolError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        lock(&self.pending).insert(seq, tx);
        // Ordering with the reader's shutdown: it flips `closed` before
        // draining the pending map, so a call that registered too late either
        // sees the flag here or loses its sender to the drain and fails the
        // receive below. Either way it cannot block forever.
        if self.closed.load(Ordering::SeqCst) {
            lock(&self.pending).remove(&seq);
            return Err(ProtocolError::Disconnected);
        }
        trace!(seq, "dispatching call");

        let written = {
            let mut writer = lock(&self.writer);
            write_frame(&mut *writer, FrameKind::Request, seq, &request.encode())
        };
        if let Err(e) = written {
            lock(&self.pending).remove(&seq);
            return Err(ProtocolError::Io(e));
        }

        // The sender end is dropped when the reader thread shuts down, which
        // turns a dead transport into Disconnected for every waiter.
        match rx.recv() {
            Ok(Response::Ok(payload)) => Ok(payload),
            Ok(Response::Err(message)) => Err(ProtocolError::Remote(message)),
            Err(mpsc::RecvError) => Err(ProtocolError::Disconnected),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Closing the write half lets a well-behaved peer drain and close its
        // side, which ends the detached reader thread at a frame boundary.
        *lock(&self.writer) = Box::new(std::io::sink());
        self.reader.take();
    }
}

fn read_responses<R: Read>(mut reader: R, pending: &Pending, closed: &AtomicBool) {
    loop {
        match read_frame(&mut reader) {
            Ok(Some((header, payload))) if header.kind == FrameKind::Response => {
                let sender = lock(pending).remove(&header.seq);
                match (sender, Response::decode(&payload)) {
                    (Some(sender), Ok(response)) => {
                        // A dead caller is fine; it gave up on the call.
                        let _ = sender.send(response);
                    }
                    (None, _) => debug!(seq = header.seq, "response for unknown call"),
                    (_, Err(e)) => {
                        debug!(error = %e, "undecodable response, closing connection");
                        break;
                    }
                }
            }
            Ok(Some((header, _))) => {
                debug!(seq = header.seq, "unexpected request frame from peer");
                break;
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "transport read failed");
                break;
            }
        }
    }
    // Flag first, then drop the senders: every outstanding or late-arriving
    // caller observes one of the two and fails with Disconnected.
    closed.store(true, Ordering::SeqCst);
    lock(pending).clear();
}
