//! The single entry point: `Server::step`. Dispatches one `Event` to the
//! handler that owns it and returns everything the caller now needs to do.

use crate::entry::ServerId;
use crate::error::{ErrorKind, Result};
use crate::event::{Event, EventKind, Status, Update};
use crate::message::Message;
use crate::server::Server;

impl Server {
    /// Advances the server by exactly one occurrence. Never blocks, never
    /// performs I/O: everything the caller must now do is returned in the
    /// `Update`, not performed as a side effect of this call.
    pub fn step(&mut self, event: Event) -> Result<Update> {
        if self.closed {
            return Err(ErrorKind::Shutdown.into());
        }

        let now = event.time;
        let mut update = Update::default();

        match event.kind {
            EventKind::Timeout => self.cycle(now, &mut update),
            EventKind::Receive { from_id, message, .. } => {
                self.handle_receive(from_id, message, now, &mut update)
            }
            EventKind::Sent { to, message, status } => {
                self.handle_sent(to, message, status, now, &mut update)
            }
            EventKind::PersistedEntries { first_index, count, status } => {
                self.handle_persisted_entries(first_index, count, status, now, &mut update)
            }
            EventKind::PersistedSnapshot { status, .. } => {
                self.handle_persisted_snapshot(status, now, &mut update)
            }
            EventKind::Snapshot { metadata, trailing } => {
                self.handle_snapshot_taken(metadata, trailing, now, &mut update)
            }
            EventKind::Submit { entries } => self.handle_submit(entries, now, &mut update)?,
            EventKind::CatchUp { server_id } => self.handle_catch_up(server_id, now, &mut update),
            EventKind::Transfer { target_id } => self.handle_transfer(target_id, now, &mut update),
        }

        Ok(update)
    }

    fn handle_receive(&mut self, from: ServerId, message: Message, now: u64, update: &mut Update) {
        match message {
            Message::RequestVote(req) => self.handle_request_vote(from, req, now, update),
            Message::RequestVoteResult(resp) => self.handle_request_vote_result(from, resp, now, update),
            Message::AppendEntries(req) => self.handle_append_entries(from, req, now, update),
            Message::AppendEntriesResult(resp) => {
                self.handle_append_entries_result(from, resp, now, update)
            }
            Message::InstallSnapshot(req) => self.handle_install_snapshot(from, req, now, update),
            Message::InstallSnapshotResult(resp) => {
                self.handle_install_snapshot_result(from, resp, now, update)
            }
            Message::TimeoutNow(req) => self.handle_timeout_now(from, req, now, update),
        }
    }

    fn handle_sent(&mut self, to: ServerId, message: Message, status: Status, now: u64, _update: &mut Update) {
        match &message {
            Message::InstallSnapshot(_) => self.handle_snapshot_chunk_sent(to, &message, status, now),
            Message::AppendEntries(_) if status == Status::Failed => {
                if let crate::server::Mode::Leader(leader) = &mut self.mode {
                    if let Some(progress) = leader.progress.get_mut(&to) {
                        progress.request_pending = false;
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_persisted_entries(
        &mut self,
        first_index: crate::entry::LogIndex,
        count: usize,
        status: Status,
        now: u64,
        update: &mut Update,
    ) {
        self.persisting_entries = false;
        if status != Status::Ok || count == 0 {
            return;
        }
        let last = first_index + count as u64 - 1;
        if last > self.last_stored {
            self.last_stored = last;
        }
        if let Some(n) = self.find_next_commit_index() {
            self.advance_commit(n, now, update);
        }
        self.queue_persist_entries(update);
    }
}
