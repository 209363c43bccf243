//! The `Server`: persistent state, volatile state and the progress tracker,
//! all in one struct.
//!
//! The constructor takes already-loaded state (`current_term`, `voted_for`,
//! any snapshot, any trailing entries) by value rather than reaching out to
//! a collaborator itself: `bootstrap`/`recover`/`load` are inputs to
//! `Server::new`, not operations `step` performs.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::configuration::{Configuration, ConfigurationState};
use crate::entry::{Entry, LogIndex, ServerId, Term};
use crate::io::{LoadedState, SnapshotMetadata};
use crate::log::Log;
use crate::progress::Progress;

/// A server's place in the Raft state machine.
pub enum Mode {
    Unavailable,
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

pub struct FollowerState {
    pub election_timeout_ms: u64,
    pub election_timer_start: u64,
    pub leader_id: Option<ServerId>,
}

pub struct CandidateState {
    pub election_timeout_ms: u64,
    pub election_timer_start: u64,
    /// True while this candidacy is a pre-vote straw poll that has not yet
    /// bumped `current_term`.
    pub pre_vote: bool,
    pub votes_granted: HashSet<ServerId>,
    pub any_rejected: bool,
}

pub struct LeaderState {
    pub progress: HashMap<ServerId, Progress>,
    pub transfer: Option<TransferState>,
}

pub struct TransferState {
    pub target: ServerId,
    pub started: u64,
}

/// A client-submitted entry still awaiting a commit/loss verdict, tracked
/// so its eventual [`crate::event::Completion`] can be reported.
pub(crate) struct PendingProposal {
    pub index: LogIndex,
    pub term: Term,
}

pub struct Server {
    pub(crate) id: ServerId,
    pub(crate) cfg: Config,

    // Persistent state.
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<ServerId>,
    pub(crate) log: Log,

    // Volatile state.
    pub(crate) mode: Mode,
    pub(crate) commit_index: LogIndex,
    pub(crate) last_applied: LogIndex,
    pub(crate) last_stored: LogIndex,
    pub(crate) closed: bool,

    pub(crate) configuration: ConfigurationState,
    pub(crate) rng: SmallRng,

    /// True while a `persist_entries` intent is outstanding, so `step`
    /// never emits a second one before the first completes.
    pub(crate) persisting_entries: bool,
    /// True while this server (as leader) is waiting on the application to
    /// finish taking a snapshot it requested via `snapshot_request`.
    pub(crate) taking_snapshot: bool,
    /// True while this server (as follower) is persisting an incoming
    /// InstallSnapshot chunk and has not yet heard back via
    /// `PersistedSnapshot`.
    pub(crate) installing_snapshot: bool,
    /// Metadata of the most recent snapshot this server holds, whether
    /// taken locally or received from a leader. `None` before the first one.
    pub(crate) snapshot_metadata: Option<SnapshotMetadata>,
    /// Stashed until the matching `PersistedSnapshot` event tells this
    /// follower the chunk is durable and it is safe to ack the leader.
    pub(crate) pending_snapshot_chunk: Option<PendingSnapshotChunk>,

    pub(crate) pending_proposals: Vec<PendingProposal>,
    pub(crate) pending_catch_ups: HashSet<ServerId>,
}

/// An InstallSnapshot chunk a follower has asked the collaborator to
/// persist, along with who to ack and what offset/finality it carries.
pub(crate) struct PendingSnapshotChunk {
    pub from: ServerId,
    pub metadata: SnapshotMetadata,
    pub offset: u64,
    /// Offset to ack once this chunk is durable: `offset` plus the number
    /// of bytes it carried, i.e. where the leader should resume streaming.
    pub next_offset: u64,
    pub last: bool,
}

impl Server {
    /// Constructs a `Server` from whatever `Io::load` returned, plus one
    /// random value the caller obtained from `Io::random` to seed this
    /// server's internal PRNG. The server starts `Unavailable`; call
    /// [`Server::start`] to move it to `Follower`.
    pub fn new(id: ServerId, cfg: Config, loaded: LoadedState, random_seed: u64) -> Self {
        let mut log = Log::new();
        let mut configuration = ConfigurationState::new(Configuration::new());

        if let Some(snapshot) = &loaded.snapshot {
            log.restore(snapshot.index, snapshot.term);
            configuration.restore_from_snapshot(snapshot.configuration.clone(), snapshot.index);
        }
        log.append(loaded.entries.clone())
            .expect("loaded entries must be contiguous with the snapshot boundary");

        // Replay every loaded entry into the configuration so it reflects
        // the end of the log, not just the snapshot. Whether each one is
        // already committed is unknown at load time in general; passing
        // `LogIndex::MAX` here would wrongly mark all of them committed, so
        // conservatively treat none of them as committed yet and let the
        // very next `Receive`/`Timeout` step re-derive `commit_index` from
        // the persisted term/vote and subsequent leader traffic.
        let snapshot_index = loaded.snapshot.as_ref().map(|s| s.index).unwrap_or(0);
        for entry in &loaded.entries {
            configuration.apply(entry, snapshot_index);
        }
        let commit_index = snapshot_index;

        Server {
            id,
            cfg,
            current_term: loaded.current_term,
            voted_for: loaded.voted_for,
            log,
            mode: Mode::Unavailable,
            commit_index,
            last_applied: commit_index,
            last_stored: loaded
                .snapshot
                .as_ref()
                .map(|s| s.index)
                .unwrap_or(0)
                .max(0),
            closed: false,
            configuration,
            rng: SmallRng::seed_from_u64(random_seed),
            persisting_entries: false,
            taking_snapshot: false,
            installing_snapshot: false,
            snapshot_metadata: loaded.snapshot.clone(),
            pending_snapshot_chunk: None,
            pending_proposals: Vec::new(),
            pending_catch_ups: HashSet::new(),
        }
    }

    /// Moves an `Unavailable` server to `Follower` at its persisted term,
    /// returning the initial `Update` so the caller learns when to deliver
    /// the first `Timeout` (there is no other event that would tell it).
    pub fn start(&mut self, now: u64) -> crate::event::Update {
        self.mode = Mode::Follower(FollowerState {
            election_timeout_ms: self.new_election_timeout(),
            election_timer_start: now,
            leader_id: None,
        });
        info!("server {} starting as follower in term {}", self.id, self.current_term);
        let mut update = crate::event::Update::default();
        self.cycle(now, &mut update);
        update
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.mode, Mode::Leader(_))
    }

    pub fn leader_id(&self) -> Option<ServerId> {
        match &self.mode {
            Mode::Leader(_) => Some(self.id),
            Mode::Follower(f) => f.leader_id,
            _ => None,
        }
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration.value
    }

    pub(crate) fn new_election_timeout(&mut self) -> u64 {
        let base = self.cfg.election_timeout_ms();
        self.rng.gen_range(base..(2 * base))
    }

    pub(crate) fn can_be_leader(&self) -> bool {
        self.log.last_index() >= self.commit_index
    }

    pub(crate) fn is_voter(&self) -> bool {
        self.configuration
            .value
            .get(self.id)
            .map(|s| s.role == crate::configuration::Role::Voter)
            .unwrap_or(false)
    }

    /// Run on every incoming message and response: steps down if the peer's
    /// term is higher than ours.
    pub(crate) fn observe_term(&mut self, term: Term, now: u64, update: &mut crate::event::Update) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            update.persist_meta = Some((self.current_term, self.voted_for));
            self.become_follower(now, update);
        }
    }

    pub(crate) fn become_follower(&mut self, now: u64, update: &mut crate::event::Update) {
        debug!("server {} becoming follower in term {}", self.id, self.current_term);
        let leader_id = match &self.mode {
            Mode::Follower(f) => f.leader_id,
            _ => None,
        };
        self.mode = Mode::Follower(FollowerState {
            election_timeout_ms: self.new_election_timeout(),
            election_timer_start: now,
            leader_id,
        });
        self.cycle(now, update);
    }

    /// Queues everything appended but not yet durable, covering the whole
    /// unpersisted range rather than just whatever this call appended, so
    /// a `persist_entries` intent is never emitted twice before the first
    /// one completes.
    pub(crate) fn queue_persist_entries(&mut self, update: &mut crate::event::Update) {
        if self.persisting_entries {
            return;
        }
        let first = self.last_stored + 1;
        let last = self.log.last_index();
        if first > last {
            return;
        }
        let entries = (first..=last).filter_map(|i| self.log.get(i).cloned()).collect();
        self.persisting_entries = true;
        update.persist_entries = Some(crate::event::PersistEntries { first_index: first, entries });
    }

    /// Transitions to `Unavailable`, cancelling every pending client
    /// request.
    pub fn close(&mut self) -> Vec<crate::event::Completion> {
        self.closed = true;
        self.mode = Mode::Unavailable;
        self.pending_proposals
            .drain(..)
            .map(|_| crate::event::Completion {
                index: None,
                outcome: crate::event::Outcome::Cancelled,
            })
            .collect()
    }
}
