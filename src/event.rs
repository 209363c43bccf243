//! The closed `Event`/`Update` pair `step` trades in. Every occurrence the
//! outside world reports comes in as one `Event`; every side effect the
//! core wants performed comes out as one `Update`.

use crate::configuration::Configuration;
use crate::entry::{Entry, LogIndex, ServerId};
use crate::io::SnapshotMetadata;
use crate::message::{Envelope, Message};

/// Outcome of an asynchronous collaborator operation the core previously
/// requested via an `Update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
}

/// One occurrence the outside world reports to the core.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// The timer the caller was told to arm (via `Update::next_tick`) fired.
    Timeout,
    /// A message arrived from another server.
    Receive {
        from_id: ServerId,
        from_address: String,
        message: Message,
    },
    /// A previously requested send completed (successfully or not).
    Sent { to: ServerId, message: Message, status: Status },
    /// A previously requested `persist_entries` completed.
    PersistedEntries {
        first_index: LogIndex,
        count: usize,
        status: Status,
    },
    /// A previously requested `persist_snapshot` chunk completed.
    PersistedSnapshot {
        metadata: SnapshotMetadata,
        offset: u64,
        last: bool,
        status: Status,
    },
    /// The application finished taking a snapshot up to `metadata.index`,
    /// retaining `trailing` entries behind it when the log is compacted.
    Snapshot {
        metadata: SnapshotMetadata,
        trailing: u64,
    },
    /// A client wants to append `entries` to the replicated log.
    Submit { entries: Vec<SubmittedEntry> },
    /// A client asks that `server_id` be given catch-up rounds (e.g. before
    /// proposing its promotion to voter).
    CatchUp { server_id: ServerId },
    /// A client asks the current leader to transfer leadership to `target_id`.
    Transfer { target_id: ServerId },
}

/// What a client hands to `Submit`: either an opaque command or a
/// configuration change, mirroring [`crate::entry::EntryData`] minus the
/// barrier kind (which only the core itself ever appends).
#[derive(Debug, Clone)]
pub enum SubmittedEntry {
    Command(Vec<u8>),
    Configuration(Configuration),
}

/// One occurrence fed into `step`, timestamped by the caller. Time only
/// ever advances because the caller wrote a new `event.time`; the core
/// itself never reads a clock.
#[derive(Debug, Clone)]
pub struct Event {
    pub time: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(time: u64, kind: EventKind) -> Self {
        Event { time, kind }
    }
}

/// Terminal status of a client-initiated operation (submit, catch-up,
/// transfer), delivered once its fate is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    Cancelled,
    NotLeader { leader_hint: Option<ServerId> },
}

/// A resolved client request, reported back through `Update::completions`.
#[derive(Debug, Clone)]
pub struct Completion {
    pub index: Option<LogIndex>,
    pub outcome: Outcome,
}

/// Entries to hand the collaborator for durable storage, starting at
/// `first_index` and running contiguously through the end of the slice.
#[derive(Debug, Clone)]
pub struct PersistEntries {
    pub first_index: LogIndex,
    pub entries: Vec<Entry>,
}

/// A snapshot chunk to either load (leader, driving an InstallSnapshot
/// stream) or persist (follower, receiving one).
#[derive(Debug, Clone)]
pub struct SnapshotChunk {
    pub metadata: SnapshotMetadata,
    pub offset: u64,
    pub chunk: Vec<u8>,
    pub last: bool,
}

/// A request to the application to take a snapshot up to `index`.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub index: LogIndex,
}

/// A snapshot chunk the leader wants loaded from the application and sent
/// to `to`, continuing the InstallSnapshot stream at `offset`.
#[derive(Debug, Clone)]
pub struct LoadSnapshotChunk {
    pub to: ServerId,
    pub metadata: SnapshotMetadata,
    pub offset: u64,
}

/// Everything a single `step` call produced. Every field is optional or
/// empty by default; the caller only needs to act on what is present.
#[derive(Debug, Clone, Default)]
pub struct Update {
    /// Set when `current_term`/`voted_for` changed and must be persisted
    /// before any message depending on them is sent.
    pub persist_meta: Option<(crate::entry::Term, Option<ServerId>)>,
    pub persist_entries: Option<PersistEntries>,
    /// A chunk to persist (follower) or to load from the application and
    /// then send (leader).
    pub persist_snapshot: Option<SnapshotChunk>,
    /// A chunk the application should load and send to `to`, starting at
    /// `offset` into the snapshot described by `metadata`.
    pub load_snapshot_chunk: Option<LoadSnapshotChunk>,
    pub messages: Vec<Envelope>,
    /// Entries newly safe to apply, in order, `(last_applied, commit_index]`.
    pub apply: Vec<Entry>,
    pub snapshot_request: Option<SnapshotRequest>,
    pub completions: Vec<Completion>,
    /// If present, the caller should deliver a `Timeout` event in this many
    /// milliseconds unless some other event arrives first.
    pub next_tick: Option<u64>,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.persist_meta.is_none()
            && self.persist_entries.is_none()
            && self.persist_snapshot.is_none()
            && self.load_snapshot_chunk.is_none()
            && self.messages.is_empty()
            && self.apply.is_empty()
            && self.snapshot_request.is_none()
            && self.completions.is_empty()
    }

    pub fn send(&mut self, to: ServerId, message: Message) {
        self.messages.push(Envelope { to, message });
    }
}
