//! Snapshotting: triggering local compaction, and streaming an
//! InstallSnapshot chunk sequence in either direction.
//!
//! `Io::load_snapshot_chunk` looks synchronous, but since this crate never
//! calls a collaborator directly, the host is expected to perform that
//! read *after* seeing `Update::load_snapshot_chunk`, build the
//! `InstallSnapshotRequest` itself (reading `term`/`id` off this server),
//! send it, and report the outcome as an ordinary `Event::Sent` carrying
//! that same message. Likewise, once a follower's final chunk is reported
//! durable via `PersistedSnapshot`, the host (not this crate) calls its own
//! `StateMachine::restore` with the chunks it already wrote.

use crate::entry::ServerId;
use crate::event::{Status, Update};
use crate::io::SnapshotMetadata;
use crate::message::{InstallSnapshotRequest, InstallSnapshotResponse, Message};
use crate::progress::ProgressState;
use crate::server::{Mode, PendingSnapshotChunk, Server};

impl Server {
    /// Requests a snapshot once the log has grown past `snapshot_threshold`
    /// entries since the last one, regardless of leader/follower role: a
    /// long-lived follower that never becomes leader still needs to bound
    /// its own memory use.
    pub(crate) fn check_snapshot_trigger(&mut self, _now: u64, update: &mut Update) {
        if self.taking_snapshot {
            return;
        }
        let since_last = self.commit_index.saturating_sub(self.log.snapshot_index());
        if since_last < self.cfg.snapshot_threshold() {
            return;
        }
        self.taking_snapshot = true;
        update.snapshot_request = Some(crate::event::SnapshotRequest { index: self.commit_index });
    }

    /// The application finished taking the snapshot this server asked for.
    pub(crate) fn handle_snapshot_taken(
        &mut self,
        metadata: SnapshotMetadata,
        trailing: u64,
        _now: u64,
        _update: &mut Update,
    ) {
        self.taking_snapshot = false;
        self.log
            .compact(metadata.index, trailing)
            .expect("a leader/follower only snapshots up to its own commit_index");
        self.snapshot_metadata = Some(metadata);
    }

    /// Leader side: if this follower's `next_index` points at a
    /// compacted-away entry, switch it into the snapshot pipeline and, if
    /// no other chunk load is already in flight this step, request one.
    pub(crate) fn begin_snapshot_stream(&mut self, id: ServerId, now: u64, update: &mut Update) {
        let metadata = match &self.snapshot_metadata {
            Some(m) => m.clone(),
            None => return,
        };
        let leader = match &mut self.mode {
            Mode::Leader(l) => l,
            _ => return,
        };
        let progress = match leader.progress.get_mut(&id) {
            Some(p) => p,
            None => return,
        };
        if progress.state != ProgressState::Snapshot {
            progress.enter_snapshot(metadata.index);
        }
        if progress.request_pending || update.load_snapshot_chunk.is_some() {
            return;
        }
        progress.request_pending = true;
        progress.last_send_time = Some(now);
        update.load_snapshot_chunk = Some(crate::event::LoadSnapshotChunk {
            to: id,
            metadata,
            offset: progress.snapshot_offset,
        });
    }

    /// Leader side: the host finished loading and sending one chunk.
    pub(crate) fn handle_snapshot_chunk_sent(
        &mut self,
        to: ServerId,
        message: &Message,
        status: Status,
        now: u64,
    ) {
        let req = match message {
            Message::InstallSnapshot(req) => req,
            _ => return,
        };
        let leader = match &mut self.mode {
            Mode::Leader(l) => l,
            _ => return,
        };
        let progress = match leader.progress.get_mut(&to) {
            Some(p) => p,
            None => return,
        };
        match status {
            Status::Ok => {
                // Stays pending until the follower's ack arrives (or the
                // install-snapshot timeout forces a retry): the transport
                // send completing says nothing about whether the chunk was
                // persisted on the other end.
                progress.last_send_time = Some(now);
                progress.awaiting_final_ack = req.done;
            }
            Status::Failed => {
                progress.request_pending = false;
            }
        }
    }

    /// Leader side: the follower acknowledged a chunk as persisted.
    pub(crate) fn handle_install_snapshot_result(
        &mut self,
        from: ServerId,
        resp: InstallSnapshotResponse,
        now: u64,
        update: &mut Update,
    ) {
        if resp.term > self.current_term {
            self.observe_term(resp.term, now, update);
            return;
        }
        let snapshot_last_index = self.snapshot_metadata.as_ref().map(|m| m.index);
        let leader = match &mut self.mode {
            Mode::Leader(l) => l,
            _ => return,
        };
        let progress = match leader.progress.get_mut(&from) {
            Some(p) => p,
            None => return,
        };
        if progress.state != ProgressState::Snapshot {
            return;
        }
        progress.last_recv_time = Some(now);
        if progress.awaiting_final_ack {
            let last_index = snapshot_last_index.unwrap_or(0);
            progress.on_snapshot_done(last_index, now);
        } else {
            progress.snapshot_offset = resp.offset;
            progress.request_pending = false;
        }
        self.replicate_to_one(from, now, update);
    }

    /// Follower side: a leader is streaming a snapshot to us.
    pub(crate) fn handle_install_snapshot(
        &mut self,
        from: ServerId,
        req: InstallSnapshotRequest,
        now: u64,
        update: &mut Update,
    ) {
        if req.term < self.current_term {
            update.send(
                from,
                Message::InstallSnapshotResult(InstallSnapshotResponse {
                    term: self.current_term,
                    offset: 0,
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

        if self.installing_snapshot {
            // Already persisting a chunk; the leader will retry once we ack.
            return;
        }
        self.installing_snapshot = true;
        let metadata = SnapshotMetadata {
            index: req.last_index,
            term: req.last_term,
            configuration: req.configuration,
        };
        let next_offset = req.offset + req.data.len() as u64;
        self.pending_snapshot_chunk = Some(PendingSnapshotChunk {
            from,
            metadata: metadata.clone(),
            offset: req.offset,
            next_offset,
            last: req.done,
        });
        update.persist_snapshot = Some(crate::event::SnapshotChunk {
            metadata,
            offset: req.offset,
            chunk: req.data,
            last: req.done,
        });
    }

    /// Follower side: the chunk requested above is now durable.
    pub(crate) fn handle_persisted_snapshot(&mut self, status: Status, now: u64, update: &mut Update) {
        let pending = match self.pending_snapshot_chunk.take() {
            Some(p) => p,
            None => return,
        };
        self.installing_snapshot = false;

        if status == Status::Failed {
            // Ask for the same chunk again; it never made it to disk.
            update.send(
                pending.from,
                Message::InstallSnapshotResult(InstallSnapshotResponse {
                    term: self.current_term,
                    offset: pending.offset,
                }),
            );
            return;
        }

        if pending.last {
            self.log.restore(pending.metadata.index, pending.metadata.term);
            self.configuration
                .restore_from_snapshot(pending.metadata.configuration.clone(), pending.metadata.index);
            self.commit_index = pending.metadata.index;
            self.last_applied = pending.metadata.index;
            self.last_stored = pending.metadata.index;
            self.snapshot_metadata = Some(pending.metadata.clone());
        }

        update.send(
            pending.from,
            Message::InstallSnapshotResult(InstallSnapshotResponse {
                term: self.current_term,
                offset: pending.next_offset,
            }),
        );
    }
}
