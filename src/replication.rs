//! Log replication: leader-side send decisions, the follower-side accept/
//! reject rule, and commit-index advancement.
//!
//! The per-follower Probe/Pipeline split and the `last_log_index` accept
//! hint let the leader skip straight to a follower's real divergence point
//! instead of decrementing `next_index` one entry at a time.

use crate::entry::{Entry, LogIndex, ServerId};
use crate::event::Update;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Message, TimeoutNowRequest,
};
use crate::progress::ProgressState;
use crate::server::{Mode, Server};

impl Server {
    /// Sends a heartbeat or catch-up `AppendEntries` to every follower whose
    /// progress says it is time to, returning the smallest delay until the
    /// next one is due.
    pub(crate) fn replicate_to_all(&mut self, now: u64, update: &mut Update) -> u64 {
        let heartbeat = self.cfg.heartbeat_timeout_ms();
        let targets: Vec<ServerId> = match &self.mode {
            Mode::Leader(l) => l.progress.keys().copied().collect(),
            _ => return heartbeat,
        };

        let mut next = heartbeat;
        for id in targets {
            let due = self.replicate_to_one(id, now, update);
            next = next.min(due);
        }
        next
    }

    /// Returns how many milliseconds until this follower is next due for a
    /// send, sending one now if it already is.
    pub(crate) fn replicate_to_one(&mut self, id: ServerId, now: u64, update: &mut Update) -> u64 {
        let heartbeat = self.cfg.heartbeat_timeout_ms();
        let leader = match &mut self.mode {
            Mode::Leader(l) => l,
            _ => return heartbeat,
        };
        let progress = match leader.progress.get_mut(&id) {
            Some(p) => p,
            None => return heartbeat,
        };

        if progress.state == ProgressState::Snapshot {
            let timeout = self.cfg.install_snapshot_timeout_ms();
            let elapsed = now.saturating_sub(progress.last_send_time.unwrap_or(0));
            if progress.request_pending && elapsed < timeout {
                return timeout.saturating_sub(elapsed);
            }
            // No chunk awaiting an ack right now (fresh entry into the
            // stream, or the last one just got acked), or the follower has
            // gone silent past the install-snapshot timeout: (re)issue the
            // current offset.
            progress.request_pending = false;
            self.begin_snapshot_stream(id, now, update);
            return heartbeat;
        }

        let pipelining = progress.state == ProgressState::Pipeline;
        let has_new_entries = progress.next_index <= self.log.last_index();
        let waiting_on_probe_ack = !pipelining && progress.request_pending;

        let should_send = if waiting_on_probe_ack {
            progress.is_stale(now, heartbeat)
        } else {
            has_new_entries || progress.is_stale(now, heartbeat)
        };

        if !should_send {
            let elapsed = now.saturating_sub(progress.last_send_time.unwrap_or(0));
            return heartbeat.saturating_sub(elapsed.min(heartbeat));
        }

        if self.log.is_compacted(progress.next_index) {
            self.begin_snapshot_stream(id, now, update);
            return heartbeat;
        }

        let prev_index = progress.next_index.saturating_sub(1);
        let prev_term = self.log.term_of(prev_index).unwrap_or(0);
        let entries: Vec<Entry> = if pipelining {
            (progress.next_index..=self.log.last_index())
                .filter_map(|i| self.log.get(i).cloned())
                .collect()
        } else {
            self.log.get(progress.next_index).cloned().into_iter().collect()
        };

        progress.last_send_time = Some(now);
        progress.request_pending = true;

        update.send(
            id,
            Message::AppendEntries(AppendEntriesRequest {
                term: self.current_term,
                leader_id: self.id,
                prev_log_index: prev_index,
                prev_log_term: prev_term,
                entries,
                leader_commit: self.commit_index,
            }),
        );

        heartbeat
    }

    pub(crate) fn handle_append_entries(
        &mut self,
        from: ServerId,
        req: AppendEntriesRequest,
        now: u64,
        update: &mut Update,
    ) {
        if req.term < self.current_term {
            update.send(
                from,
                Message::AppendEntriesResult(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    last_log_index: Some(self.log.last_index()),
                }),
            );
            return;
        }
        self.observe_term(req.term, now, update);
        if !matches!(self.mode, Mode::Follower(_)) {
            self.become_follower(now, update);
        }
        if let Mode::Follower(f) = &mut self.mode {
            f.leader_id = Some(from);
            f.election_timer_start = now;
        }

        let prev_ok = req.prev_log_index == 0
            || self.log.term_of(req.prev_log_index) == Some(req.prev_log_term);

        if !prev_ok {
            update.send(
                from,
                Message::AppendEntriesResult(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    last_log_index: Some(self.log.last_index().min(req.prev_log_index)),
                }),
            );
            return;
        }

        for entry in req.entries {
            match self.log.term_of(entry.index) {
                Some(existing_term) if existing_term == entry.term => continue,
                Some(_) => {
                    self.log
                        .truncate(entry.index, self.commit_index)
                        .expect("leader never asks a follower to truncate a committed entry");
                    self.configuration.revert(entry.index);
                }
                None => {}
            }
            self.log
                .append(vec![entry.clone()])
                .expect("gap-free by construction: a missing entry always follows the log's current tail");
            self.configuration.apply(&entry, self.commit_index);
        }

        self.last_stored = self.last_stored.min(self.log.last_index());
        self.queue_persist_entries(update);

        if req.leader_commit > self.commit_index {
            let new_commit = req.leader_commit.min(self.log.last_index());
            self.advance_commit(new_commit, now, update);
        }

        update.send(
            from,
            Message::AppendEntriesResult(AppendEntriesResponse {
                term: self.current_term,
                success: true,
                last_log_index: Some(self.log.last_index()),
            }),
        );
    }

    pub(crate) fn handle_append_entries_result(
        &mut self,
        from: ServerId,
        resp: AppendEntriesResponse,
        now: u64,
        update: &mut Update,
    ) {
        if resp.term > self.current_term {
            self.observe_term(resp.term, now, update);
            return;
        }
        let leader = match &mut self.mode {
            Mode::Leader(l) => l,
            _ => return,
        };
        let progress = match leader.progress.get_mut(&from) {
            Some(p) => p,
            None => return,
        };

        if resp.success {
            let matched = resp.last_log_index.unwrap_or(progress.match_index);
            progress.on_append_accepted(matched, now);
        } else {
            progress.on_append_rejected(resp.last_log_index, now);
        }

        if let Some(n) = self.find_next_commit_index() {
            self.advance_commit(n, now, update);
        }
        self.check_catch_up_progress(from, now, update);
        self.check_transfer_ready(from, now, update);
        self.replicate_to_one(from, now, update);
    }

    /// Largest index replicated to a majority of voters in the current
    /// term, or `None` if no such index is above `commit_index`
    /// (the leader-completeness safeguard: never commits a prior-term
    /// entry purely on replication count, only via the barrier entry).
    pub(crate) fn find_next_commit_index(&self) -> Option<LogIndex> {
        let leader = match &self.mode {
            Mode::Leader(l) => l,
            _ => return None,
        };
        let quorum = self.configuration.value.quorum_size();
        let last_index = self.log.last_index();

        let mut best = None;
        for candidate in ((self.commit_index + 1)..=last_index).rev() {
            if self.log.term_of(candidate) != Some(self.current_term) {
                continue;
            }
            let mut count = 1; // self
            for info in self.configuration.value.voters() {
                if info.id == self.id {
                    continue;
                }
                if let Some(p) = leader.progress.get(&info.id) {
                    if p.match_index >= candidate {
                        count += 1;
                    }
                }
            }
            if count >= quorum {
                best = Some(candidate);
                break;
            }
        }
        best
    }

    pub(crate) fn advance_commit(&mut self, new_commit: LogIndex, now: u64, update: &mut Update) {
        if new_commit <= self.commit_index {
            return;
        }
        self.commit_index = new_commit;
        self.configuration.commit(new_commit);

        let mut to_apply = Vec::new();
        for i in (self.last_applied + 1)..=new_commit {
            if let Some(entry) = self.log.get(i) {
                to_apply.push(entry.clone());
            }
        }
        self.last_applied = new_commit;
        update.apply.extend(to_apply);

        self.resolve_pending_proposals(now, update);
        self.finish_transfer_if_ready(now, update);
    }

    fn resolve_pending_proposals(&mut self, _now: u64, update: &mut Update) {
        let commit_index = self.commit_index;
        let mut remaining = Vec::with_capacity(self.pending_proposals.len());
        for p in self.pending_proposals.drain(..) {
            if p.index <= commit_index {
                let outcome = if self.log.term_of(p.index) == Some(p.term) {
                    crate::event::Outcome::Committed
                } else {
                    crate::event::Outcome::Cancelled
                };
                update.completions.push(crate::event::Completion {
                    index: Some(p.index),
                    outcome,
                });
            } else if self.log.term_of(p.index) != Some(p.term) {
                // Overwritten by a conflicting leader before it could commit.
                update.completions.push(crate::event::Completion {
                    index: Some(p.index),
                    outcome: crate::event::Outcome::Cancelled,
                });
            } else {
                remaining.push(p);
            }
        }
        self.pending_proposals = remaining;
    }

    /// Issues a `TimeoutNow` to the transfer target once it has fully
    /// caught up, completing a leadership transfer.
    pub(crate) fn finish_transfer_if_ready(&mut self, now: u64, update: &mut Update) {
        let last_index = self.log.last_index();
        let target = match &self.mode {
            Mode::Leader(l) => l.transfer.as_ref().map(|t| t.target),
            _ => None,
        };
        let target = match target {
            Some(t) => t,
            None => return,
        };
        self.maybe_send_timeout_now(target, last_index, update);
    }

    fn check_transfer_ready(&mut self, from: ServerId, _now: u64, update: &mut Update) {
        let last_index = self.log.last_index();
        self.maybe_send_timeout_now(from, last_index, update);
    }

    fn maybe_send_timeout_now(
        &mut self,
        candidate: ServerId,
        last_index: LogIndex,
        update: &mut Update,
    ) {
        let matches_target = match &self.mode {
            Mode::Leader(l) => l.transfer.as_ref().map(|t| t.target) == Some(candidate),
            _ => false,
        };
        if !matches_target {
            return;
        }
        let caught_up = match &self.mode {
            Mode::Leader(l) => l
                .progress
                .get(&candidate)
                .map(|p| p.match_index >= last_index)
                .unwrap_or(false),
            _ => false,
        };
        if caught_up {
            update.send(
                candidate,
                Message::TimeoutNow(TimeoutNowRequest {
                    term: self.current_term,
                    leader_id: self.id,
                }),
            );
            if let Mode::Leader(l) = &mut self.mode {
                l.transfer = None;
            }
        }
    }
}
