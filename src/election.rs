//! Leader election: pre-vote, real vote, and the vote-granting rule.
//!
//! A candidate that bumped `current_term` immediately on every election
//! timeout could disrupt a live leader each time a partitioned server's
//! timer fired. `Config::pre_vote` gates a straw-poll round first: a
//! candidate only bumps its term after winning that round, so a partitioned
//! server that can never reach a majority never perturbs the rest of the
//! cluster's term.

use log::{debug, info};

use crate::entry::ServerId;
use crate::event::Update;
use crate::message::{Message, RequestVoteRequest, RequestVoteResponse, TimeoutNowRequest};
use crate::server::{CandidateState, Mode, Server};

impl Server {
    /// Entry point for a timed-out election timer: runs the pre-vote straw
    /// poll first if configured to, otherwise goes straight to a real vote.
    pub(crate) fn start_election(&mut self, now: u64, update: &mut Update) {
        self.begin_candidacy(self.cfg.pre_vote(), now, update);
    }

    fn begin_candidacy(&mut self, pre_vote: bool, now: u64, update: &mut Update) {
        if !pre_vote {
            self.current_term += 1;
            self.voted_for = Some(self.id);
            update.persist_meta = Some((self.current_term, self.voted_for));
        }

        let election_timeout_ms = self.new_election_timeout();
        self.mode = Mode::Candidate(CandidateState {
            election_timeout_ms,
            election_timer_start: now,
            pre_vote,
            votes_granted: Default::default(),
            any_rejected: false,
        });

        info!(
            "server {} starting {}election for term {}",
            self.id,
            if pre_vote { "pre-" } else { "" },
            self.current_term + if pre_vote { 1 } else { 0 }
        );

        let term = if pre_vote { self.current_term + 1 } else { self.current_term };
        let last_log_index = self.log.last_index();
        let last_log_term = self.log.last_term();

        for info in self.configuration.value.voters() {
            if info.id == self.id {
                continue;
            }
            update.send(
                info.id,
                Message::RequestVote(RequestVoteRequest {
                    term,
                    candidate_id: self.id,
                    last_log_index,
                    last_log_term,
                    pre_vote,
                }),
            );
        }

        if self.configuration.value.quorum_size() <= 1 {
            self.cycle(now, update);
        }
    }

    pub(crate) fn handle_request_vote(
        &mut self,
        from: ServerId,
        req: RequestVoteRequest,
        now: u64,
        update: &mut Update,
    ) {
        let candidate_term = if req.pre_vote { req.term - 1 } else { req.term };
        if !req.pre_vote && req.term > self.current_term {
            self.observe_term(req.term, now, update);
        }

        let our_last_term = self.log.last_term();
        let our_last_index = self.log.last_index();
        let log_ok = (req.last_log_term, req.last_log_index) >= (our_last_term, our_last_index);

        let term_ok = if req.pre_vote {
            candidate_term >= self.current_term
        } else {
            req.term == self.current_term
        };

        let havent_voted_for_someone_else = match self.voted_for {
            None => true,
            Some(v) => v == req.candidate_id,
        };

        let granted = self.is_voter()
            && term_ok
            && log_ok
            && (req.pre_vote || havent_voted_for_someone_else)
            && self.leader_is_stale(now);

        if granted && !req.pre_vote {
            self.voted_for = Some(req.candidate_id);
            update.persist_meta = Some((self.current_term, self.voted_for));
            if let Mode::Follower(f) = &mut self.mode {
                f.election_timer_start = now;
            }
            debug!("server {} granted vote to {} in term {}", self.id, req.candidate_id, req.term);
        }

        update.send(
            from,
            Message::RequestVoteResult(RequestVoteResponse {
                term: self.current_term,
                pre_vote: req.pre_vote,
                vote_granted: granted,
            }),
        );
    }

    /// Check-quorum-adjacent rule: refuse to grant a real vote while a
    /// known leader has been heard from recently, unless `force` semantics
    /// apply (a leadership transfer always uses `TimeoutNow`, which bypasses
    /// voting entirely, so this only guards unsolicited candidacies).
    fn leader_is_stale(&self, now: u64) -> bool {
        match &self.mode {
            Mode::Follower(f) => match f.leader_id {
                Some(_) => now.saturating_sub(f.election_timer_start) >= self.cfg.election_timeout_ms(),
                None => true,
            },
            _ => true,
        }
    }

    pub(crate) fn handle_request_vote_result(
        &mut self,
        from: ServerId,
        resp: RequestVoteResponse,
        now: u64,
        update: &mut Update,
    ) {
        if !resp.pre_vote && resp.term > self.current_term {
            self.observe_term(resp.term, now, update);
            return;
        }

        let candidate = match &mut self.mode {
            Mode::Candidate(c) if c.pre_vote == resp.pre_vote => c,
            _ => return,
        };

        if !resp.vote_granted {
            candidate.any_rejected = true;
            return;
        }
        candidate.votes_granted.insert(from);

        let pre_vote = candidate.pre_vote;
        let votes = 1 + candidate.votes_granted.len();
        let quorum = self.configuration.value.quorum_size();

        if votes >= quorum {
            if pre_vote {
                self.begin_candidacy(false, now, update);
            } else {
                self.cycle(now, update);
            }
        }
    }

    /// A leader transferring leadership away sends this directly to the
    /// chosen successor once it has caught up, skipping the normal election
    /// timeout and the vote it would otherwise require.
    pub(crate) fn handle_timeout_now(
        &mut self,
        _from: ServerId,
        req: TimeoutNowRequest,
        now: u64,
        update: &mut Update,
    ) {
        if req.term < self.current_term || !self.is_voter() {
            return;
        }
        self.observe_term(req.term, now, update);
        self.begin_candidacy(false, now, update);
    }
}
