//! Wire messages exchanged between servers: votes, log replication,
//! snapshot installs, and the `TimeoutNow` leadership-transfer handoff.

use crate::configuration::Configuration;
use crate::entry::{Entry, LogIndex, ServerId, Term};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: ServerId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
    /// True for a pre-vote straw poll that does not bump the receiver's term.
    pub pre_vote: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub pre_vote: bool,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: ServerId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<Entry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// On success: the follower's own `last_index`, used by the leader to
    /// notice a follower with a longer uncommitted tail and trigger a
    /// barrier entry. On failure: a hint for fast log-conflict resolution.
    pub last_log_index: Option<LogIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSnapshotRequest {
    pub term: Term,
    pub leader_id: ServerId,
    pub last_index: LogIndex,
    pub last_term: Term,
    pub configuration: Configuration,
    pub offset: u64,
    pub data: Vec<u8>,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSnapshotResponse {
    pub term: Term,
    /// Offset acknowledged as persisted; lets the leader resume a retried
    /// stream from the right place instead of restarting at zero.
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutNowRequest {
    pub term: Term,
    pub leader_id: ServerId,
}

/// The closed set of messages exchanged between servers. Every variant
/// carries `term`; replies additionally carry an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RequestVote(RequestVoteRequest),
    RequestVoteResult(RequestVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResult(AppendEntriesResponse),
    InstallSnapshot(InstallSnapshotRequest),
    InstallSnapshotResult(InstallSnapshotResponse),
    TimeoutNow(TimeoutNowRequest),
}

impl Message {
    pub fn term(&self) -> Term {
        match self {
            Message::RequestVote(m) => m.term,
            Message::RequestVoteResult(m) => m.term,
            Message::AppendEntries(m) => m.term,
            Message::AppendEntriesResult(m) => m.term,
            Message::InstallSnapshot(m) => m.term,
            Message::InstallSnapshotResult(m) => m.term,
            Message::TimeoutNow(m) => m.term,
        }
    }
}

/// An outgoing message addressed to a single recipient, as carried by the
/// `messages` field of an [`crate::event::Update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: ServerId,
    pub message: Message,
}
