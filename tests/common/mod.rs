//! A tiny deterministic event simulator used to drive clusters of `Server`s
//! through scenario and property tests without any real I/O.
//!
//! Time never reads a clock: the harness owns `now` and advances it only by
//! popping the next queued occurrence, so a whole scenario replays
//! bit-for-bit identically every run.

use std::collections::HashMap;

use raft::{
    Completion, Config, Configuration, Entry, EntryData, Event, EventKind, LoadedState, LogIndex,
    Message, Role, Server, ServerId, SnapshotMetadata, Status, SubmittedEntry, Term, Update,
};

const MESSAGE_LATENCY: u64 = 10;

#[derive(Debug, Clone)]
enum Occurrence {
    Timeout,
    Deliver { from: ServerId, message: Message },
    PersistedEntries { first_index: LogIndex, count: usize },
    PersistedSnapshot { metadata: SnapshotMetadata, offset: u64, last: bool },
    ApplySnapshot { metadata: SnapshotMetadata, trailing: u64 },
    SentOk { message: Message },
}

pub struct Cluster {
    pub servers: HashMap<ServerId, Server>,
    pub applied: HashMap<ServerId, Vec<Entry>>,
    pub completions: HashMap<ServerId, Vec<Completion>>,
    pub now: u64,
    queue: Vec<(u64, u64, ServerId, Occurrence)>,
    seq: u64,
    pub snapshot_trailing: u64,
    /// Counts every `load_snapshot_chunk` a server's `Update` has produced,
    /// keyed by that server's id. Lets tests observe retries of an
    /// InstallSnapshot stream without reaching into leader internals.
    pub install_snapshot_chunks_sent: HashMap<ServerId, u32>,
}

/// Builds a fresh `Server` whose persisted state already contains the
/// bootstrap configuration entry at index 1, term 0 — as `Io::bootstrap`
/// would have written before the very first `start`, in a real deployment.
pub fn bootstrapped_server(id: ServerId, ids: &[ServerId], cfg: Config, seed: u64) -> Server {
    let mut config = Configuration::new();
    for &peer in ids {
        config.upsert(peer, format!("127.0.0.1:{}", 9000 + peer), Role::Voter);
    }
    let entry = Entry { index: 1, term: 0, data: EntryData::Configuration(config) };
    let loaded = LoadedState {
        current_term: 0,
        voted_for: None,
        snapshot: None,
        entries: vec![entry],
    };
    let mut server = Server::new(id, cfg, loaded, seed);
    server.start(0);
    server
}

fn bootstrapped_server_with_update(id: ServerId, ids: &[ServerId], cfg: Config, seed: u64) -> (Server, Update) {
    let mut config = Configuration::new();
    for &peer in ids {
        config.upsert(peer, format!("127.0.0.1:{}", 9000 + peer), Role::Voter);
    }
    let entry = Entry { index: 1, term: 0, data: EntryData::Configuration(config) };
    let loaded = LoadedState {
        current_term: 0,
        voted_for: None,
        snapshot: None,
        entries: vec![entry],
    };
    let mut server = Server::new(id, cfg, loaded, seed);
    let update = server.start(0);
    (server, update)
}

fn default_cfg() -> Config {
    let mut cfg = Config::default();
    cfg.set_election_timeout(1000).unwrap();
    cfg.set_heartbeat_timeout(100).unwrap();
    cfg
}

impl Cluster {
    pub fn new(ids: &[ServerId]) -> Self {
        Self::with_config(ids, default_cfg())
    }

    pub fn with_config(ids: &[ServerId], cfg: Config) -> Self {
        let mut servers = HashMap::new();
        let mut startup_updates = Vec::new();
        for (i, &id) in ids.iter().enumerate() {
            let (server, update) = bootstrapped_server_with_update(id, ids, cfg.clone(), 1000 + i as u64);
            servers.insert(id, server);
            startup_updates.push((id, update));
        }
        let mut cluster = Cluster {
            servers,
            applied: HashMap::new(),
            completions: HashMap::new(),
            now: 0,
            queue: Vec::new(),
            seq: 0,
            snapshot_trailing: 8,
            install_snapshot_chunks_sent: HashMap::new(),
        };
        for (id, update) in startup_updates {
            cluster.handle_update(id, update);
        }
        cluster
    }

    fn push(&mut self, time: u64, id: ServerId, occ: Occurrence) {
        self.seq += 1;
        self.queue.push((time, self.seq, id, occ));
    }

    /// Advances time to `target`, delivering every queued occurrence due at
    /// or before it, in `(time, insertion-order)` order.
    pub fn advance_to(&mut self, target: u64) {
        loop {
            self.queue.sort_by_key(|(t, s, _, _)| (*t, *s));
            let next = self.queue.first().map(|(t, ..)| *t);
            match next {
                Some(t) if t <= target => {
                    let (t, _, id, occ) = self.queue.remove(0);
                    self.now = t;
                    self.deliver(id, occ);
                }
                _ => break,
            }
        }
        self.now = self.now.max(target);
    }

    /// Runs until `pred` holds or `limit` occurrences have been processed,
    /// whichever comes first. Returns whether `pred` held.
    pub fn run_until(&mut self, limit: usize, mut pred: impl FnMut(&Cluster) -> bool) -> bool {
        for _ in 0..limit {
            if pred(self) {
                return true;
            }
            self.queue.sort_by_key(|(t, s, _, _)| (*t, *s));
            if self.queue.is_empty() {
                return pred(self);
            }
            let (t, _, id, occ) = self.queue.remove(0);
            self.now = t;
            self.deliver(id, occ);
        }
        pred(self)
    }

    fn deliver(&mut self, id: ServerId, occ: Occurrence) {
        let now = self.now;
        let kind = match occ {
            Occurrence::Timeout => EventKind::Timeout,
            Occurrence::Deliver { from, message } => EventKind::Receive {
                from_id: from,
                from_address: format!("127.0.0.1:{}", 9000 + from),
                message,
            },
            Occurrence::PersistedEntries { first_index, count } => {
                EventKind::PersistedEntries { first_index, count, status: Status::Ok }
            }
            Occurrence::PersistedSnapshot { metadata, offset, last } => {
                EventKind::PersistedSnapshot { metadata, offset, last, status: Status::Ok }
            }
            Occurrence::ApplySnapshot { metadata, trailing } => {
                EventKind::Snapshot { metadata, trailing }
            }
            Occurrence::SentOk { message } => {
                EventKind::Sent { to: id, message, status: Status::Ok }
            }
        };

        let update = match self.servers.get_mut(&id) {
            Some(server) => server
                .step(Event::new(now, kind))
                .expect("step must not fail in these tests"),
            None => return,
        };
        self.handle_update(id, update);
    }

    fn handle_update(&mut self, id: ServerId, update: Update) {
        let now = self.now;

        if let Some(p) = update.persist_entries {
            self.push(
                now,
                id,
                Occurrence::PersistedEntries { first_index: p.first_index, count: p.entries.len() },
            );
        }

        if let Some(chunk) = update.persist_snapshot {
            self.push(
                now,
                id,
                Occurrence::PersistedSnapshot {
                    metadata: chunk.metadata,
                    offset: chunk.offset,
                    last: chunk.last,
                },
            );
        }

        if let Some(load) = update.load_snapshot_chunk {
            *self.install_snapshot_chunks_sent.entry(id).or_insert(0) += 1;
            // Simulate the host reading a chunk from the application,
            // sending it on, then reporting completion of that send.
            let req = raft::InstallSnapshotRequest {
                term: self.servers[&id].current_term(),
                leader_id: id,
                last_index: load.metadata.index,
                last_term: load.metadata.term,
                configuration: load.metadata.configuration.clone(),
                offset: load.offset,
                data: vec![0u8; 64],
                done: true,
            };
            let message = Message::InstallSnapshot(req);
            self.push(
                now + MESSAGE_LATENCY,
                load.to,
                Occurrence::Deliver { from: id, message: message.clone() },
            );
            self.push(now, id, Occurrence::SentOk { message });
        }

        for envelope in update.messages {
            self.push(
                now + MESSAGE_LATENCY,
                envelope.to,
                Occurrence::Deliver { from: id, message: envelope.message.clone() },
            );
            self.push(now, id, Occurrence::SentOk { message: envelope.message });
        }

        if let Some(req) = update.snapshot_request {
            let config = self.servers[&id].configuration().clone();
            let term = self.servers[&id].log().term_of(req.index).unwrap_or(0);
            let metadata = SnapshotMetadata { index: req.index, term, configuration: config };
            self.push(
                now,
                id,
                Occurrence::ApplySnapshot { metadata, trailing: self.snapshot_trailing },
            );
        }

        if !update.apply.is_empty() {
            self.applied.entry(id).or_default().extend(update.apply);
        }

        if !update.completions.is_empty() {
            self.completions.entry(id).or_default().extend(update.completions);
        }

        if let Some(delay) = update.next_tick {
            self.push(now + delay, id, Occurrence::Timeout);
        }
    }

    pub fn leader(&self) -> Option<ServerId> {
        self.servers.iter().find(|(_, s)| s.is_leader()).map(|(id, _)| *id)
    }

    pub fn submit(&mut self, leader: ServerId, commands: Vec<Vec<u8>>) {
        let entries: Vec<SubmittedEntry> = commands.into_iter().map(SubmittedEntry::Command).collect();
        let now = self.now;
        let update = {
            let server = self.servers.get_mut(&leader).unwrap();
            server
                .step(Event::new(now, EventKind::Submit { entries }))
                .expect("submit must succeed on the leader")
        };
        self.handle_update(leader, update);
    }

    pub fn submit_configuration(&mut self, leader: ServerId, config: Configuration) {
        let now = self.now;
        let update = {
            let server = self.servers.get_mut(&leader).unwrap();
            server
                .step(Event::new(now, EventKind::Submit { entries: vec![SubmittedEntry::Configuration(config)] }))
                .expect("configuration submit must succeed on the leader")
        };
        self.handle_update(leader, update);
    }

    pub fn catch_up(&mut self, leader: ServerId, server_id: ServerId) {
        let now = self.now;
        let update = {
            let server = self.servers.get_mut(&leader).unwrap();
            server
                .step(Event::new(now, EventKind::CatchUp { server_id }))
                .expect("catch-up request must not fail")
        };
        self.handle_update(leader, update);
    }

    /// Processes up to `limit` queued occurrences unconditionally, useful
    /// for letting in-flight replication settle before making assertions.
    pub fn drain(&mut self, limit: usize) {
        for _ in 0..limit {
            self.queue.sort_by_key(|(t, s, _, _)| (*t, *s));
            if self.queue.is_empty() {
                break;
            }
            let (t, _, id, occ) = self.queue.remove(0);
            self.now = t;
            self.deliver(id, occ);
        }
    }

    /// Silences every message in flight between `a` and `b` in both
    /// directions, modelling a network partition going forward. Messages
    /// already queued before the call still land; call this before
    /// triggering the traffic you want dropped.
    pub fn isolate(&mut self, a: ServerId, b: ServerId) {
        self.queue.retain(|(_, _, id, occ)| {
            !matches!(occ, Occurrence::Deliver { from, .. }
                if (*id == a && *from == b) || (*id == b && *from == a))
        });
    }

    pub fn term_of(&self, id: ServerId) -> Term {
        self.servers[&id].current_term()
    }
}
