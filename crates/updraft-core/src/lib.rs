//! Core state machine for the resumable-upload gateway.
//!
//! A logical upload may span many HTTP transactions: a creating POST,
//! any number of appending PATCHes, offset-retrieval HEADs, and a
//! cancelling DELETE. This crate owns the state those transactions share:
//!
//! - [`Upload`] — the per-upload record: offset accounting, the bounded
//!   chunk buffer between producer and consumer, and the state machine
//!   (`Initial → Receiving ⇄ Idle → Complete/Terminated`).
//! - [`UploadBody`] — the downstream consumer's single contiguous stream
//!   over every append. Draining it is the only thing that advances the
//!   record's offset.
//! - [`UploadRegistry`] — the process-wide token map with single-winner
//!   creation and the background reaper.
//! - [`ResponseSlot`] — hand-off of the downstream handler's response to
//!   whichever transaction is entitled to carry it.
//!
//! The crate is transport-agnostic: it never reads sockets or headers.
//! The gateway layer feeds it parsed header fields and raw body chunks.

mod config;
mod error;
mod record;
mod registry;
mod slot;

pub use config::{GatewayConfig, TokenReusePolicy};
pub use error::{BodyError, ProtocolError, ProtocolResult, TerminateReason};
pub use record::{FinishOutcome, ProducerGuard, Upload, UploadBody, UploadState, UploadStatus};
pub use registry::{
    spawn_reaper, ReaperHandle, RegistryEntry, SweepStats, UploadRegistry, UploadSnapshot,
};
pub use slot::ResponseSlot;

pub use updraft_field::UploadToken;
