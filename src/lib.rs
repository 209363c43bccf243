//! A deterministic, I/O-free Raft consensus core.
//!
//! [`Server`] implements the Raft state machine as a pure `step` function:
//! feed it one [`Event`] at a time and it returns an [`Update`] describing
//! everything the host now needs to do (persist state, send messages, apply
//! committed entries, arm a timer). The core never performs I/O itself and
//! never blocks; [`Io`] and [`StateMachine`] document the contract a host
//! implements around it.

#[macro_use]
extern crate error_chain;

mod config;
mod configuration;
mod digest;
mod election;
mod entry;
mod error;
mod event;
mod io;
mod log;
mod membership;
mod message;
mod progress;
mod replication;
mod server;
mod snapshot;
mod step;
mod tick;

pub use config::Config;
pub use configuration::{Configuration, Role, ServerInfo};
pub use digest::digest;
pub use entry::{Batch, Entry, EntryData, LogIndex, LogPosition, ServerId, Term};
pub use error::{Error, ErrorKind, Result};
pub use event::{
    Completion, Event, EventKind, LoadSnapshotChunk, Outcome, PersistEntries, SnapshotChunk,
    SnapshotRequest, Status, SubmittedEntry, Update,
};
pub use io::{Io, LoadedState, SnapshotMetadata, StateMachine};
pub use log::Log;
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, Envelope, InstallSnapshotRequest,
    InstallSnapshotResponse, Message, RequestVoteRequest, RequestVoteResponse, TimeoutNowRequest,
};
pub use progress::{Progress, ProgressState};
pub use server::{CandidateState, FollowerState, LeaderState, Mode, Server, TransferState};
