//! Timer-driven state transitions, dispatched from `Event::Timeout` and
//! also re-entered any time the core needs to recompute how long until the
//! next timer should fire (e.g. right after becoming a follower).
//!
//! Moves the relevant bits of state into a small summary, matches on it,
//! and either performs a transition or sets `next_tick`. The leader branch
//! additionally checks heartbeat staleness per follower, snapshot
//! triggering, catch-up round deadlines and transfer aborts.

use log::{debug, warn};

use crate::event::Update;
use crate::server::{LeaderState, Mode, Server};

impl Server {
    /// The single place that decides "is there anything to do right now,
    /// and if not, when should I be woken up again". Called from
    /// `Event::Timeout`, and recursively any time a transition might have
    /// produced more work (after `become_follower`/`start_election`).
    pub(crate) fn cycle(&mut self, now: u64, update: &mut Update) {
        if self.closed {
            return;
        }

        if self.configuration.value.servers().is_empty() || !self.configuration.value.contains(self.id)
        {
            // Nothing meaningful can happen without a configuration we are
            // part of; check back in a second rather than spinning.
            update.next_tick = Some(1000);
            return;
        }

        enum Summary {
            Follower { elapsed: u64, timeout: u64 },
            Candidate { votes: usize, elapsed: u64, timeout: u64 },
            Leader,
        }

        let summary = match &self.mode {
            Mode::Unavailable => return,
            Mode::Follower(f) => Summary::Follower {
                elapsed: now.saturating_sub(f.election_timer_start),
                timeout: f.election_timeout_ms,
            },
            Mode::Candidate(c) => Summary::Candidate {
                votes: 1 + c.votes_granted.len(),
                elapsed: now.saturating_sub(c.election_timer_start),
                timeout: c.election_timeout_ms,
            },
            Mode::Leader(_) => Summary::Leader,
        };

        match summary {
            Summary::Follower { elapsed, timeout } => {
                if !self.is_voter() {
                    update.next_tick = Some(timeout.saturating_sub(elapsed).max(1));
                    return;
                }
                if !self.can_be_leader() {
                    if self.configuration.value.voter_count() == 1 {
                        panic!(
                            "server {} has an uncommitted tail past its own commit_index \
                             and is the only voter: cannot make progress",
                            self.id
                        );
                    }
                    update.next_tick = Some(timeout.saturating_sub(elapsed).max(1));
                    return;
                }
                if elapsed >= timeout || self.configuration.value.voter_count() == 1 {
                    self.start_election(now, update);
                } else {
                    update.next_tick = Some(timeout - elapsed);
                }
            }
            Summary::Candidate { votes, elapsed, timeout } => {
                let quorum = self.configuration.value.quorum_size();
                if votes >= quorum {
                    self.become_leader(now, update);
                } else if elapsed >= timeout {
                    self.start_election(now, update);
                } else {
                    update.next_tick = Some(timeout - elapsed);
                }
            }
            Summary::Leader => {
                if let Some(n) = self.find_next_commit_index() {
                    self.advance_commit(n, now, update);
                }

                self.check_snapshot_trigger(now, update);
                self.check_catch_up_deadlines(now, update);
                self.check_transfer_deadline(now, update);

                let mut next_heartbeat = self.replicate_to_all(now, update);

                if self.configuration.value.servers().len() == 1 {
                    next_heartbeat = 2000;
                }
                if !self.check_quorum_recent(now) {
                    warn!("server {} lost quorum contact, stepping down", self.id);
                    self.become_follower(now, update);
                    return;
                }

                update.next_tick = Some(next_heartbeat);
            }
        }
    }

    /// True if a majority of voters (including self) have been heard from
    /// within the last `election_timeout` (the check-quorum rule).
    fn check_quorum_recent(&self, now: u64) -> bool {
        let leader = match &self.mode {
            Mode::Leader(l) => l,
            _ => return true,
        };
        let quorum = self.configuration.value.quorum_size();
        let mut count = 1; // self
        for info in self.configuration.value.voters() {
            if info.id == self.id {
                continue;
            }
            if let Some(p) = leader.progress.get(&info.id) {
                if let Some(recv) = p.last_recv_time {
                    if now.saturating_sub(recv) < self.cfg.election_timeout_ms() {
                        count += 1;
                    }
                }
            }
        }
        count >= quorum
    }

    fn become_leader(&mut self, now: u64, update: &mut Update) {
        debug!("server {} becoming leader in term {}", self.id, self.current_term);
        let last_index = self.log.last_index();
        let mut progress = std::collections::HashMap::new();
        for info in self.configuration.value.servers() {
            if info.id == self.id {
                continue;
            }
            let mut p = crate::progress::Progress::new(last_index);
            // The vote that just won this election counts as contact: a
            // leader that never heard from anyone again should get a full
            // election_timeout of grace before check_quorum steps it down,
            // not none at all.
            p.last_recv_time = Some(now);
            progress.insert(info.id, p);
        }
        self.mode = Mode::Leader(LeaderState {
            progress,
            transfer: None,
        });

        // A new leader appends a barrier entry in its own term so that
        // commit can advance past entries from prior terms.
        let term = self.current_term;
        let index = last_index + 1;
        let entry = crate::entry::Entry::barrier(index, term);
        self.log.append(vec![entry.clone()]).expect("barrier follows last_index");
        self.configuration.apply(&entry, self.commit_index);
        self.queue_persist_entries(update);

        self.cycle(now, update);
    }
}
