//! The collaborator interfaces a host application implements around this
//! crate: durable storage and transport (`Io`), and the replicated
//! application state (`StateMachine`).
//!
//! These traits document the contract; the `Server` itself never stores or
//! calls into an implementation of them. Instead, `step` reifies every
//! operation a collaborator must perform as data in the returned
//! [`crate::event::Update`], and the host reports completion by
//! constructing the matching [`crate::event::Event`] later. `Io::time`/
//! `Io::random` are the one exception: they are consulted directly by the
//! host before constructing a `Server` (to seed its clock and PRNG), never
//! during `step` itself.

use std::num::NonZeroU32;

use crate::configuration::Configuration;
use crate::entry::{Entry, LogIndex, ServerId, Term};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub index: LogIndex,
    pub term: Term,
    pub configuration: Configuration,
}

/// What `Io::load` returns on startup: whatever persistent state survived
/// the last run.
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub current_term: Term,
    pub voted_for: Option<ServerId>,
    pub snapshot: Option<SnapshotMetadata>,
    pub entries: Vec<Entry>,
}

/// The durable-storage and transport collaborator. A host implements this
/// against its own disk format and network stack; this crate never calls
/// it directly except to read `version`.
pub trait Io {
    /// Must be non-zero; checked once at startup.
    fn version(&self) -> NonZeroU32;

    fn bootstrap(&mut self, config: &Configuration) -> Result<()>;
    fn recover(&mut self, config: &Configuration) -> Result<()>;
    fn load(&mut self) -> Result<LoadedState>;

    fn persist_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> Result<()>;
    fn persist_entries(&mut self, first_index: LogIndex, entries: &[Entry]) -> Result<()>;

    fn load_snapshot_chunk(
        &mut self,
        metadata: &SnapshotMetadata,
        offset: u64,
    ) -> Result<(Vec<u8>, bool)>;
    fn persist_snapshot(
        &mut self,
        metadata: &SnapshotMetadata,
        offset: u64,
        chunk: &[u8],
        last: bool,
    ) -> Result<()>;

    fn send(&mut self, to: ServerId, message: crate::message::Message) -> Result<()>;

    /// Current monotonic time in milliseconds. Consulted once, at startup,
    /// to establish the server's initial clock.
    fn time(&self) -> u64;
    /// A random value in `[lo, hi)`. Consulted once, at startup, to seed
    /// the server's internal PRNG.
    fn random(&self, lo: u64, hi: u64) -> u64;

    fn close(&mut self) -> Result<()>;
}

/// The user-supplied application state machine collaborator.
pub trait StateMachine {
    /// Must be non-zero; checked once at startup alongside [`Io::version`].
    fn version(&self) -> NonZeroU32;

    fn apply(&mut self, entry: &Entry) -> Result<Vec<u8>>;
    fn snapshot(&mut self) -> Result<Vec<Vec<u8>>>;
    fn restore(&mut self, chunks: &[Vec<u8>]) -> Result<()>;
}
