//! Per-upload state machine.
//!
//! An [`Upload`] is shared by every HTTP transaction that touches the same
//! token plus the single downstream consumer. The record lock guards
//! metadata only (state, offset, buffer head/tail, wakers) and is never
//! held across an await; producers and the consumer suspend through stored
//! wakers instead.
//!
//! # Offset discipline
//!
//! `offset` counts bytes the downstream consumer has actually pulled out of
//! the buffer — nothing else. Bytes a producer has admitted but the
//! consumer has not yet drained are *not* part of `offset`, and a producer
//! abort discards them. The client's truthful resumption point is therefore
//! always what the downstream has accepted, never what the transport
//! managed to transmit.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::Notify;
use tracing::debug;
use updraft_field::UploadToken;

use crate::error::{BodyError, ProtocolError, ProtocolResult, TerminateReason};

/// Lifecycle states of an upload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Created, no producer ever attached. Collapses to `Receiving` on the
    /// creating request's attach.
    Initial,
    /// A producer is attached and bytes are being admitted.
    Receiving,
    /// No producer attached, upload not complete; awaiting the next append.
    Idle,
    /// All body bytes delivered; the consumer may still be draining its
    /// response path.
    Complete,
    /// Cancelled, evicted, or replaced. Reads and writes are rejected.
    Terminated,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Initial => "initial",
            UploadState::Receiving => "receiving",
            UploadState::Idle => "idle",
            UploadState::Complete => "complete",
            UploadState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a record, for offset retrieval and introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    pub offset: u64,
    pub total_length: Option<u64>,
    pub state: UploadState,
    pub interop_version: Option<u64>,
}

impl UploadStatus {
    /// Value of the `Upload-Incomplete` response field.
    pub fn incomplete(&self) -> bool {
        !matches!(self.state, UploadState::Complete)
    }
}

/// Result of a clean producer finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishOutcome {
    /// Bytes acknowledged downstream at finish time.
    pub offset: u64,
    /// Whether the finish completed the upload.
    pub complete: bool,
}

struct Shared {
    state: UploadState,
    reason: Option<TerminateReason>,
    offset: u64,
    total_length: Option<u64>,
    buffer: VecDeque<Bytes>,
    buffered: usize,
    producer: Option<u64>,
    next_producer: u64,
    producer_waker: Option<Waker>,
    consumer_waker: Option<Waker>,
    body_taken: bool,
    last_activity: Instant,
}

/// A single logical upload, shared across transactions.
pub struct Upload {
    token: UploadToken,
    interop_version: Option<u64>,
    max_buffered: usize,
    shared: Mutex<Shared>,
    /// Signalled whenever the buffer empties or the record dies; producers
    /// waiting in [`ProducerGuard::finish`] listen here.
    drained: Notify,
}

impl Upload {
    pub fn new(
        token: UploadToken,
        total_length: Option<u64>,
        interop_version: Option<u64>,
        max_buffered: usize,
    ) -> Self {
        Self {
            token,
            interop_version,
            max_buffered: max_buffered.max(1),
            shared: Mutex::new(Shared {
                state: UploadState::Initial,
                reason: None,
                offset: 0,
                total_length,
                buffer: VecDeque::new(),
                buffered: 0,
                producer: None,
                next_producer: 0,
                producer_waker: None,
                consumer_waker: None,
                body_taken: false,
                last_activity: Instant::now(),
            }),
            drained: Notify::new(),
        }
    }

    pub fn token(&self) -> &UploadToken {
        &self.token
    }

    /// Interop version the upload was opened with. Fixed for the record's
    /// lifetime; every later request must repeat it.
    pub fn interop_version(&self) -> Option<u64> {
        self.interop_version
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> UploadState {
        self.lock().state
    }

    pub fn status(&self) -> UploadStatus {
        let s = self.lock();
        UploadStatus {
            offset: s.offset,
            total_length: s.total_length,
            state: s.state,
            interop_version: self.interop_version,
        }
    }

    /// State plus time of last byte movement, for the reaper.
    pub fn activity(&self) -> (UploadState, Instant) {
        let s = self.lock();
        (s.state, s.last_activity)
    }

    /// Admit a request as this upload's producer.
    ///
    /// Runs the full precondition gauntlet under the record lock — terminal
    /// states, single-producer exclusivity (I1), interop agreement (I5),
    /// offset equality (I7), declared-length consistency (I6) — and only
    /// then flips the record to `Receiving`. On any error the record is
    /// untouched.
    pub fn attach_producer(
        self: &Arc<Self>,
        expected_offset: u64,
        declared_length: Option<u64>,
        interop_version: Option<u64>,
    ) -> ProtocolResult<ProducerGuard> {
        let mut s = self.lock();

        match s.state {
            UploadState::Terminated => {
                return Err(ProtocolError::Terminated(
                    s.reason.unwrap_or(TerminateReason::Cancelled),
                ));
            }
            UploadState::Receiving => return Err(ProtocolError::ProducerConflict),
            UploadState::Initial | UploadState::Idle | UploadState::Complete => {}
        }

        if interop_version != self.interop_version {
            return Err(ProtocolError::InteropMismatch {
                expected: self.interop_version,
                requested: interop_version,
            });
        }

        if expected_offset != s.offset {
            return Err(ProtocolError::OffsetMismatch {
                expected: s.offset,
                requested: expected_offset,
            });
        }

        if matches!(s.state, UploadState::Complete) {
            return Err(ProtocolError::AlreadyComplete);
        }

        match (s.total_length, declared_length) {
            (Some(expected), Some(declared)) if expected != declared => {
                return Err(ProtocolError::LengthMismatch { expected, declared });
            }
            (None, Some(declared)) => {
                if declared < s.offset {
                    return Err(ProtocolError::LengthExceeded { declared });
                }
                s.total_length = Some(declared);
            }
            _ => {}
        }

        let id = s.next_producer;
        s.next_producer += 1;
        s.producer = Some(id);
        s.state = UploadState::Receiving;
        s.last_activity = Instant::now();
        debug!(token = %self.token, producer = id, offset = s.offset, "producer attached");

        Ok(ProducerGuard {
            upload: Arc::clone(self),
            id,
            armed: true,
        })
    }

    /// Hand out the consumer stream. There is exactly one for the record's
    /// whole life; subsequent calls return `None`.
    pub fn take_body(self: &Arc<Self>) -> Option<UploadBody> {
        let mut s = self.lock();
        if s.body_taken {
            return None;
        }
        s.body_taken = true;
        Some(UploadBody {
            upload: Arc::clone(self),
            done: false,
        })
    }

    /// Tear the record down. Discards buffered bytes, wakes both sides, and
    /// rejects everything from now on. Idempotent; returns whether this
    /// call did the teardown.
    pub fn terminate(&self, reason: TerminateReason) -> bool {
        let mut s = self.lock();
        if matches!(s.state, UploadState::Terminated) {
            return false;
        }
        s.state = UploadState::Terminated;
        s.reason = Some(reason);
        s.producer = None;
        s.buffer.clear();
        s.buffered = 0;
        s.last_activity = Instant::now();
        let producer_waker = s.producer_waker.take();
        let consumer_waker = s.consumer_waker.take();
        drop(s);
        if let Some(w) = producer_waker {
            w.wake();
        }
        if let Some(w) = consumer_waker {
            w.wake();
        }
        self.drained.notify_waiters();
        debug!(token = %self.token, reason = reason.as_str(), "upload terminated");
        true
    }

    fn poll_admit(
        &self,
        cx: &mut Context<'_>,
        producer_id: u64,
        chunk: &mut Option<Bytes>,
    ) -> Poll<ProtocolResult<()>> {
        let mut s = self.lock();

        if matches!(s.state, UploadState::Terminated) {
            return Poll::Ready(Err(ProtocolError::Terminated(
                s.reason.unwrap_or(TerminateReason::Cancelled),
            )));
        }
        if s.producer != Some(producer_id) {
            return Poll::Ready(Err(ProtocolError::ProducerConflict));
        }

        let len = chunk.as_ref().map(Bytes::len).unwrap_or(0);
        if let Some(declared) = s.total_length {
            if s.offset + (s.buffered + len) as u64 > declared {
                return Poll::Ready(Err(ProtocolError::LengthExceeded { declared }));
            }
        }

        // A chunk larger than the bound is admitted alone into an empty
        // buffer so the transfer cannot deadlock against its own cap.
        if s.buffered > 0 && s.buffered + len > self.max_buffered {
            s.producer_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let bytes = match chunk.take() {
            Some(bytes) => bytes,
            None => return Poll::Ready(Ok(())),
        };
        s.buffered += bytes.len();
        s.buffer.push_back(bytes);
        s.last_activity = Instant::now();
        if let Some(w) = s.consumer_waker.take() {
            w.wake();
        }
        Poll::Ready(Ok(()))
    }

    fn abort_producer(&self, producer_id: u64) -> u64 {
        let mut s = self.lock();
        if s.producer == Some(producer_id) {
            s.producer = None;
            let discarded = s.buffered;
            s.buffer.clear();
            s.buffered = 0;
            if matches!(s.state, UploadState::Receiving) {
                s.state = UploadState::Idle;
            }
            s.last_activity = Instant::now();
            if discarded > 0 {
                debug!(
                    token = %self.token,
                    discarded,
                    offset = s.offset,
                    "producer aborted, undrained bytes discarded"
                );
            }
            self.drained.notify_waiters();
        }
        s.offset
    }
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.lock();
        f.debug_struct("Upload")
            .field("token", &self.token)
            .field("state", &s.state)
            .field("offset", &s.offset)
            .field("buffered", &s.buffered)
            .finish()
    }
}

/// Exclusive producer slot on an upload.
///
/// Dropping the guard without calling [`finish`](ProducerGuard::finish) is
/// the transport-failure path: buffered-but-undrained bytes are discarded
/// and the record returns to `Idle` at the drained offset.
#[derive(Debug)]
pub struct ProducerGuard {
    upload: Arc<Upload>,
    id: u64,
    armed: bool,
}

impl ProducerGuard {
    /// Admit one chunk, suspending while the buffer is at its bound.
    pub async fn admit(&mut self, chunk: Bytes) -> ProtocolResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let mut chunk = Some(chunk);
        std::future::poll_fn(|cx| self.upload.poll_admit(cx, self.id, &mut chunk)).await
    }

    /// Finish the transaction cleanly. Waits for the downstream consumer to
    /// drain everything admitted, then moves the record to `Complete` (body
    /// ended without `Upload-Incomplete`, or the declared length was
    /// reached) or back to `Idle`.
    pub async fn finish(mut self, incomplete: bool) -> ProtocolResult<FinishOutcome> {
        self.armed = false;
        loop {
            let notified = self.upload.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut s = self.upload.lock();
                if matches!(s.state, UploadState::Terminated) {
                    return Err(ProtocolError::Terminated(
                        s.reason.unwrap_or(TerminateReason::Cancelled),
                    ));
                }
                if s.buffer.is_empty() {
                    s.producer = None;
                    let complete = !incomplete || s.total_length == Some(s.offset);
                    s.state = if complete {
                        UploadState::Complete
                    } else {
                        UploadState::Idle
                    };
                    s.last_activity = Instant::now();
                    let waker = if complete { s.consumer_waker.take() } else { None };
                    let outcome = FinishOutcome {
                        offset: s.offset,
                        complete,
                    };
                    drop(s);
                    if let Some(w) = waker {
                        w.wake();
                    }
                    debug!(
                        token = %self.upload.token,
                        offset = outcome.offset,
                        complete = outcome.complete,
                        "producer finished"
                    );
                    return Ok(outcome);
                }
            }
            notified.await;
        }
    }

    /// Abort explicitly, returning the drained offset the client may resume
    /// from. Equivalent to dropping the guard.
    pub fn abort(mut self) -> u64 {
        self.armed = false;
        self.upload.abort_producer(self.id)
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        if self.armed {
            self.upload.abort_producer(self.id);
        }
    }
}

/// The downstream consumer's view of an upload: one contiguous stream of
/// chunks spanning every append, in admission order.
///
/// Draining this stream is the *only* thing that advances the record's
/// offset. When no producer is attached the stream pends — a paused upload
/// is not an error. Termination surfaces once as an `Err` item, then the
/// stream is fused.
pub struct UploadBody {
    upload: Arc<Upload>,
    done: bool,
}

impl Stream for UploadBody {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let mut s = this.upload.lock();
        if let Some(chunk) = s.buffer.pop_front() {
            s.buffered -= chunk.len();
            s.offset += chunk.len() as u64;
            s.last_activity = Instant::now();
            let empty = s.buffer.is_empty();
            if let Some(w) = s.producer_waker.take() {
                w.wake();
            }
            drop(s);
            if empty {
                this.upload.drained.notify_waiters();
            }
            return Poll::Ready(Some(Ok(chunk)));
        }
        match s.state {
            UploadState::Complete => {
                this.done = true;
                Poll::Ready(None)
            }
            UploadState::Terminated => {
                this.done = true;
                let reason = s.reason.unwrap_or(TerminateReason::Cancelled);
                Poll::Ready(Some(Err(BodyError::new(reason))))
            }
            _ => {
                s.consumer_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
