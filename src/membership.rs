//! Client-facing operations: submitting entries, leadership transfer, and
//! the catch-up rounds a server goes through before being promoted to
//! voter.

use crate::entry::{Entry, EntryData, ServerId};
use crate::error::{Error, ErrorKind};
use crate::event::{Completion, Outcome, SubmittedEntry, Update};
use crate::server::{Mode, PendingProposal, Server, TransferState};

impl Server {
    pub(crate) fn handle_submit(
        &mut self,
        submitted: Vec<SubmittedEntry>,
        _now: u64,
        update: &mut Update,
    ) -> std::result::Result<(), Error> {
        if !self.is_leader() {
            return Err(ErrorKind::NotLeader(self.leader_id()).into());
        }
        if submitted
            .iter()
            .any(|e| matches!(e, SubmittedEntry::Configuration(_)))
            && self.configuration.has_pending()
        {
            return Err(ErrorKind::Busy.into());
        }

        let term = self.current_term;
        let mut index = self.log.last_index();
        let mut entries = Vec::with_capacity(submitted.len());
        for item in submitted {
            index += 1;
            let data = match item {
                SubmittedEntry::Command(bytes) => EntryData::Command(std::sync::Arc::new(bytes)),
                SubmittedEntry::Configuration(config) => EntryData::Configuration(config),
            };
            let entry = Entry { index, term, data };
            self.configuration.apply(&entry, self.commit_index);
            self.pending_proposals.push(PendingProposal { index, term });
            entries.push(entry);
        }

        self.log.append(entries).expect("leader appends immediately after its own last_index");
        self.queue_persist_entries(update);

        self.replicate_to_all(_now, update);
        Ok(())
    }

    pub(crate) fn handle_catch_up(&mut self, server_id: ServerId, now: u64, update: &mut Update) {
        if !self.is_leader() || !self.configuration.value.contains(server_id) {
            update.completions.push(Completion {
                index: None,
                outcome: Outcome::NotLeader { leader_hint: self.leader_id() },
            });
            return;
        }
        self.pending_catch_ups.insert(server_id);
        let last_index = self.log.last_index();
        if let Mode::Leader(l) = &mut self.mode {
            let progress = l
                .progress
                .entry(server_id)
                .or_insert_with(|| crate::progress::Progress::new(last_index));
            progress.start_catch_up_round(last_index, now);
        }
    }

    /// Called after every successful `AppendEntries` reply from a server
    /// undergoing catch-up: advances to the next round, or reports success
    /// once caught up, or gives up after `max_catch_up_rounds`.
    pub(crate) fn check_catch_up_progress(&mut self, from: ServerId, now: u64, update: &mut Update) {
        if !self.pending_catch_ups.contains(&from) {
            return;
        }
        let max_rounds = self.cfg.max_catch_up_rounds();

        let (finished, round, elapsed) = match &self.mode {
            Mode::Leader(l) => match l.progress.get(&from) {
                Some(p) => (
                    p.catch_up_round_finished(),
                    p.catch_up_round,
                    p.catch_up_round_start.map(|s| now.saturating_sub(s)).unwrap_or(0),
                ),
                None => return,
            },
            _ => return,
        };

        if !finished {
            return;
        }

        if round >= max_rounds
            || elapsed > self.cfg.max_catch_up_round_duration_ms()
        {
            self.pending_catch_ups.remove(&from);
            update.completions.push(Completion {
                index: None,
                outcome: Outcome::Cancelled,
            });
            return;
        }

        self.pending_catch_ups.remove(&from);
        update.completions.push(Completion {
            index: None,
            outcome: Outcome::Committed,
        });
    }

    /// Aborts any catch-up round that has exceeded its per-round duration
    /// without finishing, counting it as a failed round rather than
    /// silently hanging.
    pub(crate) fn check_catch_up_deadlines(&mut self, now: u64, update: &mut Update) {
        let max_duration = self.cfg.max_catch_up_round_duration_ms();
        let max_rounds = self.cfg.max_catch_up_rounds();
        let last_index = self.log.last_index();

        let stalled: Vec<ServerId> = match &self.mode {
            Mode::Leader(l) => l
                .progress
                .iter()
                .filter(|(id, _)| self.pending_catch_ups.contains(id))
                .filter(|(_, p)| {
                    !p.catch_up_round_finished()
                        && p.catch_up_round_start
                            .map(|s| now.saturating_sub(s) > max_duration)
                            .unwrap_or(false)
                })
                .map(|(id, _)| *id)
                .collect(),
            _ => return,
        };

        for id in stalled {
            let give_up = if let Mode::Leader(l) = &mut self.mode {
                let p = l.progress.get_mut(&id).unwrap();
                if p.catch_up_round >= max_rounds {
                    true
                } else {
                    p.start_catch_up_round(last_index, now);
                    false
                }
            } else {
                false
            };
            if give_up {
                self.pending_catch_ups.remove(&id);
                update.completions.push(Completion {
                    index: None,
                    outcome: Outcome::Cancelled,
                });
            }
        }
    }

    pub(crate) fn handle_transfer(&mut self, target_id: ServerId, now: u64, update: &mut Update) {
        if !self.is_leader() {
            update.completions.push(Completion {
                index: None,
                outcome: Outcome::NotLeader { leader_hint: self.leader_id() },
            });
            return;
        }
        if target_id == self.id {
            update.completions.push(Completion { index: None, outcome: Outcome::Committed });
            return;
        }
        if let Mode::Leader(l) = &mut self.mode {
            l.transfer = Some(TransferState { target: target_id, started: now });
        }
        self.finish_transfer_if_ready(now, update);
    }

    /// Cancels an in-flight leadership transfer that has not completed
    /// within an election timeout.
    pub(crate) fn check_transfer_deadline(&mut self, now: u64, update: &mut Update) {
        let timeout = self.cfg.election_timeout_ms();
        let expired = match &self.mode {
            Mode::Leader(l) => l
                .transfer
                .as_ref()
                .map(|t| now.saturating_sub(t.started) > timeout)
                .unwrap_or(false),
            _ => false,
        };
        if expired {
            if let Mode::Leader(l) = &mut self.mode {
                l.transfer = None;
            }
            update.completions.push(Completion {
                index: None,
                outcome: Outcome::Cancelled,
            });
        }
    }
}
